// tests/batch.rs
//
// End-to-end runs of the batch pipeline on task trees written into a temp dir.
//
// Run with:
//   cargo test --test batch

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;

use polar_slice::config::BatchConfig;
use polar_slice::pipeline::{PlaneOutcome, run_batch};
use polar_slice::slice::Plane;
use polar_slice::sweep::{SweepSpec, generate};

/// Write `num_chunks` chunk files for an `n`^3 vortex field, splitting along z.
/// Chunk `skip` (if any) is left out.
fn write_chunks(folder: &Path, n: usize, time_step: u64, num_chunks: usize, skip: Option<usize>) {
    fs::create_dir_all(folder).unwrap();
    let centre = (n as f64 + 1.0) / 2.0;
    for c in 0..num_chunks {
        if skip == Some(c) {
            continue;
        }
        let (k0, k1) = (c * n / num_chunks, (c + 1) * n / num_chunks);
        let mut text = format!("{n} {n} {n}\n");
        for k in k0 + 1..=k1 {
            for j in 1..=n {
                for i in 1..=n {
                    let (x, y) = (i as f64 - centre, j as f64 - centre);
                    text.push_str(&format!("{i} {j} {k} {:.4} {:.4} {:.4}\n", -y, x, 0.1 * k as f64));
                }
            }
        }
        let name = format!("PELOOP.{:08}.dat", time_step + c as u64);
        fs::write(folder.join(name), text).unwrap();
    }
}

fn config(root: &Path, extra: &str) -> BatchConfig {
    let toml = format!(
        r#"
        base_dir = "{base}"
        summary_dir = "{summary}"
        output_ext = "png"
        {extra}

        [planes.xy]
        dpi = 50.0

        [planes.xz]
        dpi = 50.0

        [planes.yz]
        dpi = 50.0
        "#,
        base = root.join("tasks").display(),
        summary = root.join("summary").display(),
    );
    BatchConfig::from_toml_str(&toml, Path::new("batch.toml")).unwrap()
}

fn summary_rows(root: &Path, plane: Plane) -> Vec<String> {
    let csv = root.join("summary").join(plane.as_str()).join(format!("{plane}_summary.csv"));
    match fs::read_to_string(csv) {
        Ok(text) => text.lines().skip(1).map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

fn png_size(path: &Path) -> (u32, u32) {
    let bytes = fs::read(path).unwrap();
    assert_eq!(&bytes[1..4], b"PNG");
    let be = |k: usize| u32::from_be_bytes([bytes[k], bytes[k + 1], bytes[k + 2], bytes[k + 3]]);
    (be(16), be(20))
}

#[test]
fn full_size_task_is_rendered_and_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let task = root.join("tasks/task_1_asub1_0.5_asub2_0.5");
    write_chunks(&task, 100, 500, 20, None);
    let cfg = config(root, "");

    let report = run_batch(&cfg).unwrap();
    assert_eq!(report.complete, 1);
    assert!(report.exit_ok());

    let xy = task.join("XY_quiver.png");
    // 6.4 in at 50 dpi, square 1..100 window
    assert_eq!(png_size(&xy), (320, 320));
    assert_eq!(
        summary_rows(root, Plane::XY),
        vec!["1,asub1=0.5;asub2=0.5,task_1_asub1_0.5_asub2_0.5_XY.png".to_string()]
    );
    assert!(root.join("summary/XY/task_1_asub1_0.5_asub2_0.5_XY.png").is_file());
    // 1..100 x 25..165
    assert_eq!(png_size(&task.join("XZ_quiver.png")), (320, 453));
}

#[test]
fn missing_chunk_fails_the_task_and_later_tasks_continue() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_chunks(&root.join("tasks/task_1_t_1"), 20, 500, 20, None);
    write_chunks(&root.join("tasks/task_2_t_2"), 20, 500, 20, Some(7));
    write_chunks(&root.join("tasks/task_3_t_3"), 20, 500, 20, None);
    let cfg = config(root, "workers = 2");

    let report = run_batch(&cfg).unwrap();
    assert_eq!(report.tasks, 3);
    assert_eq!(report.complete, 2);
    let two = report.outcome("2").unwrap();
    assert_eq!(two.planes, [PlaneOutcome::Failed("MissingChunkError"); 3]);

    for plane in Plane::ALL {
        let rows = summary_rows(root, plane);
        let ids: Vec<&str> = rows.iter().map(|r| r.split(',').next().unwrap()).collect();
        assert!(!ids.contains(&"2"), "{plane}: {rows:?}");
        assert_eq!(ids.len(), 2);
    }
    assert!(!root.join("tasks/task_2_t_2/XY_quiver.png").exists());
}

#[test]
fn out_of_range_xy_index_fails_only_xy() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_chunks(&root.join("tasks/task_1_t_1"), 20, 500, 20, None);
    let mut cfg = config(root, "");
    cfg.planes[Plane::XY.ordinal()].index = Some(999);

    let report = run_batch(&cfg).unwrap();
    let one = report.outcome("1").unwrap();
    assert_eq!(one.plane(Plane::XY), PlaneOutcome::Failed("IndexOutOfRangeError"));
    assert_eq!(one.plane(Plane::XZ), PlaneOutcome::Succeeded);
    assert_eq!(one.plane(Plane::YZ), PlaneOutcome::Succeeded);
    assert!(summary_rows(root, Plane::XY).is_empty());
    assert_eq!(summary_rows(root, Plane::XZ).len(), 1);
    // No task had every plane succeed.
    assert!(!report.exit_ok());
}

#[test]
fn reruns_never_duplicate_rows() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_chunks(&root.join("tasks/task_1_t_1"), 12, 500, 20, None);
    write_chunks(&root.join("tasks/task_2_t_2"), 12, 500, 20, Some(3));
    let cfg = config(root, "");

    let first = run_batch(&cfg).unwrap();
    assert_eq!(first.plane(Plane::XY).succeeded, 1);
    assert_eq!(first.plane(Plane::XY).failed, 1);

    // Repair task 2, then run again: task 1 is skipped, task 2 is filled in.
    write_chunks(&root.join("tasks/task_2_t_2"), 12, 500, 20, None);
    let second = run_batch(&cfg).unwrap();
    assert_eq!(second.complete, 2);
    assert_eq!(second.plane(Plane::XY).skipped, 1);
    assert_eq!(second.plane(Plane::XY).succeeded, 1);

    let third = run_batch(&cfg).unwrap();
    assert_eq!(third.plane(Plane::YZ).skipped, 2);
    for plane in Plane::ALL {
        assert_eq!(summary_rows(root, plane).len(), 2);
    }
}

#[test]
fn swept_tasks_are_discovered_through_the_metadata_index() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let origin = root.join("origin");
    fs::create_dir_all(&origin).unwrap();
    fs::write(
        origin.join("inputN.in"),
        "100 100 100 ! nx, ny, nz\n0.0 0.0 ! asub1, asub2 (misfit)\n",
    )
    .unwrap();

    let spec = SweepSpec::from_toml_str(
        r#"
        [[params]]
        name = "asub1"
        start = 0.0
        end = 0.5
        step = 0.5

        [[params]]
        name = "asub2"
        start = 0.0
        end = 0.5
        step = 0.5

        [[filters]]
        lesser = "asub1"
        greater = "asub2"
        "#,
        Path::new("sweep.toml"),
    )
    .unwrap()
    .rooted_at(root);
    let folders = generate(&spec).unwrap();
    assert_eq!(
        folders,
        vec![
            "task_1_asub1_0.0_asub2_0.0",
            "task_2_asub1_0.0_asub2_0.5",
            "task_3_asub1_0.5_asub2_0.5",
        ]
    );
    for f in &folders {
        write_chunks(&root.join("tasks").join(f), 10, 500, 20, None);
    }
    // A stray directory the index does not list is ignored.
    write_chunks(&root.join("tasks/task_9_asub1_1_asub2_1"), 10, 500, 20, None);

    let index = root.join("tasks.csv");
    let cfg = config(root, &format!("metadata_index = \"{}\"", index.display()));
    let report = run_batch(&cfg).unwrap();
    assert_eq!(report.tasks, 3);
    assert_eq!(report.complete, 3);

    let rows = summary_rows(root, Plane::YZ);
    assert_eq!(rows.len(), 3);
    assert!(rows.contains(&"2,asub1=0.0;asub2=0.5,task_2_asub1_0.0_asub2_0.5_YZ.png".to_string()));
}
