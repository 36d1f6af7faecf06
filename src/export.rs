// src/export.rs
//
// Optional data dumps next to a task's images.
//  - pxyz.in : the aggregated field in chunk format, so it reads back as a single chunk
//  - {PLANE}.dat : one row `u v a b` per slice sample
//
// Both are plain text written through a BufWriter; values use `{:.5e}`.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::PlaneError;
use crate::slice::Slice;
use crate::vector_field::VectorField3D;

pub const FULL_FIELD_FILE: &str = "pxyz.in";

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    Ok(())
}

pub fn full_field_path(task_folder: &Path) -> PathBuf {
    task_folder.join(FULL_FIELD_FILE)
}

pub fn slice_data_path(task_folder: &Path, slice: &Slice) -> PathBuf {
    task_folder.join(format!("{}.dat", slice.plane.as_str()))
}

/// Write `field` as one chunk covering every cell (x fastest, then y, then z).
pub fn write_full_field(path: &Path, field: &VectorField3D) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let g = field.grid;
    let mut w = BufWriter::new(File::create(path)?);

    writeln!(w, "{} {} {}", g.nx, g.ny, g.nz)?;
    for k in 0..g.nz {
        for j in 0..g.ny {
            for i in 0..g.nx {
                let p = field.get(i, j, k);
                writeln!(
                    w,
                    "{} {} {} {:.5e} {:.5e} {:.5e}",
                    i + 1,
                    j + 1,
                    k + 1,
                    p[0],
                    p[1],
                    p[2]
                )?;
            }
        }
    }
    w.flush()
}

pub fn write_slice_data(path: &Path, slice: &Slice) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let mut w = BufWriter::new(File::create(path)?);
    for s in &slice.samples {
        writeln!(
            w,
            "{} {} {:.5e} {:.5e}",
            s.u, s.v, s.value[0], s.value[1]
        )?;
    }
    w.flush()
}

/// `write_slice_data` into the task folder, mapped to the per-plane error.
pub fn export_slice(task_folder: &Path, slice: &Slice) -> Result<PathBuf, PlaneError> {
    let path = slice_data_path(task_folder, slice);
    write_slice_data(&path, slice).map_err(|source| PlaneError::Export {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::aggregate;
    use crate::grid::Grid3D;
    use crate::slice::{Plane, extract};
    use std::fs;

    fn field() -> VectorField3D {
        let mut f = VectorField3D::new(Grid3D::new(3, 2, 2));
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..3 {
                    f.set(i, j, k, [0.125 * i as f64, 0.5 * j as f64, 1.0e-3 * k as f64]);
                }
            }
        }
        f
    }

    #[test]
    fn full_field_reads_back_as_a_single_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = full_field_path(&dir.path().join("task_1"));
        let f = field();
        write_full_field(&path, &f).unwrap();

        let back = aggregate(&[path.clone()]).unwrap();
        assert_eq!(back.grid, f.grid);
        assert_eq!(back.data, f.data);

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("3 2 2"));
        assert_eq!(lines.next(), Some("1 1 1 0.00000e0 0.00000e0 0.00000e0"));
        assert_eq!(text.lines().count(), 1 + 12);
    }

    #[test]
    fn slice_rows_carry_positions_and_in_plane_components() {
        let dir = tempfile::tempdir().unwrap();
        let s = extract(&field(), Plane::XZ, Some(1)).unwrap();
        let path = export_slice(dir.path(), &s).unwrap();
        assert_eq!(path, dir.path().join("XZ.dat"));

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3 * 2);
        // u = 3 (x index 2), v = 2 (z index 1)
        assert!(text.lines().any(|l| l == "3 2 2.50000e-1 1.00000e-3"));
    }
}
