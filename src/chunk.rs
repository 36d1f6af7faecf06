// src/chunk.rs
//
// Rebuild a task's full 3D polarisation field from its chunk files.
//
// Chunk format (plain text, whitespace separated):
//   nx ny nz                 <- header, identical in every chunk of a task
//   i j k px py pz           <- one line per cell, 1-based indices
//   ...
//
// Chunk c of a run at time step t is named by the configured pattern applied to t + c,
// e.g. "PELOOP.%08d.dat" -> PELOOP.00000507.dat for t = 500, c = 7.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{ConfigError, TaskError};
use crate::grid::Grid3D;
use crate::vector_field::VectorField3D;

/// Filename pattern with a single printf-style integer placeholder
/// (`%d`, `%8d` space padded, `%08d` zero padded). `%%` is a literal percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPattern {
    pattern: String,
    #[serde(skip)]
    prefix: String,
    #[serde(skip)]
    suffix: String,
    #[serde(skip)]
    width: usize,
    #[serde(skip)]
    zero_pad: bool,
}

impl ChunkPattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let fail = |reason: &str| ConfigError::ChunkPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut spec: Option<(usize, bool)> = None;
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if spec.is_some() { &mut suffix } else { &mut prefix };
            if c != '%' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                out.push('%');
                continue;
            }
            if spec.is_some() {
                return Err(fail("more than one placeholder"));
            }
            let zero_pad = chars.peek() == Some(&'0');
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            if chars.next() != Some('d') {
                return Err(fail("placeholder must be %d, %Nd or %0Nd"));
            }
            let width = if digits.is_empty() {
                0
            } else {
                digits.parse().map_err(|_| fail("bad field width"))?
            };
            spec = Some((width, zero_pad));
        }

        let (width, zero_pad) = spec.ok_or_else(|| fail("no %d placeholder"))?;
        if prefix.contains(['/', '\\']) || suffix.contains(['/', '\\']) {
            return Err(fail("must be a bare file name"));
        }
        Ok(Self {
            pattern: pattern.to_string(),
            prefix,
            suffix,
            width,
            zero_pad,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn format(&self, index: u64) -> String {
        let number = if self.zero_pad {
            format!("{index:0width$}", width = self.width)
        } else {
            format!("{index:width$}", width = self.width)
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }
}

/// Paths of the chunk files one task is expected to contain, in read order.
pub fn chunk_paths(folder: &Path, pattern: &ChunkPattern, time_step: u64, count: u64) -> Vec<PathBuf> {
    (0..count)
        .map(|c| folder.join(pattern.format(time_step + c)))
        .collect()
}

/// Largest lattice a chunk header may declare (512^3 cells, about 3 GiB of field data).
pub const MAX_CELLS: usize = 1 << 27;

fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> TaskError {
    TaskError::MalformedChunk {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

fn io_err(path: &Path, source: io::Error) -> TaskError {
    TaskError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn parse_header(path: &Path, line: &str) -> Result<Grid3D, TaskError> {
    let dims: Vec<usize> = line
        .split_whitespace()
        .take(3)
        .map(str::parse::<usize>)
        .collect::<Result<_, _>>()
        .map_err(|e| malformed(path, 1, format!("bad header {line:?}: {e}")))?;
    if dims.len() < 3 {
        return Err(malformed(path, 1, format!("header needs nx ny nz, got {line:?}")));
    }
    if dims.contains(&0) {
        return Err(malformed(path, 1, format!("zero dimension in header {line:?}")));
    }
    let cells = dims[0]
        .checked_mul(dims[1])
        .and_then(|n| n.checked_mul(dims[2]))
        .filter(|&n| n <= MAX_CELLS);
    if cells.is_none() {
        return Err(malformed(
            path,
            1,
            format!("header {line:?} exceeds {MAX_CELLS} cells"),
        ));
    }
    Ok(Grid3D::new(dims[0], dims[1], dims[2]))
}

/// Read one chunk into `field`, creating the field from the header if this is the first chunk.
fn read_chunk(path: &Path, field: &mut Option<VectorField3D>) -> Result<usize, TaskError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TaskError::MissingChunk(path.to_path_buf()));
        }
        Err(e) => return Err(io_err(path, e)),
    };
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line.map_err(|e| io_err(path, e))?,
        None => return Err(malformed(path, 1, "empty file")),
    };
    let grid = parse_header(path, &header)?;

    if let Some(existing) = field.as_ref() {
        if existing.grid != grid {
            return Err(TaskError::HeaderMismatch {
                path: path.to_path_buf(),
                expected: existing.grid.dims(),
                found: grid.dims(),
            });
        }
    }
    let field = field.get_or_insert_with(|| VectorField3D::new(grid));

    let mut cells = 0usize;
    for (n, line) in lines.enumerate() {
        let line_no = n + 2;
        let line = line.map_err(|e| io_err(path, e))?;
        let mut parts = line.split_whitespace();

        let Some(first) = parts.next() else {
            continue;
        };
        let mut idx = [0usize; 3];
        let mut val = [0f64; 3];
        for (slot, tok) in idx.iter_mut().zip(std::iter::once(first).chain(parts.by_ref())) {
            *slot = tok
                .parse()
                .map_err(|e| malformed(path, line_no, format!("bad index {tok:?}: {e}")))?;
        }
        let mut n_val = 0;
        for (slot, tok) in val.iter_mut().zip(parts.by_ref()) {
            *slot = tok
                .parse()
                .map_err(|e| malformed(path, line_no, format!("bad value {tok:?}: {e}")))?;
            n_val += 1;
        }
        if n_val < 3 {
            return Err(malformed(path, line_no, "expected i j k px py pz"));
        }

        let [i, j, k] = idx;
        let g = field.grid;
        if i == 0 || j == 0 || k == 0 || i > g.nx || j > g.ny || k > g.nz {
            return Err(malformed(
                path,
                line_no,
                format!("cell ({i}, {j}, {k}) outside {}x{}x{}", g.nx, g.ny, g.nz),
            ));
        }
        field.set(i - 1, j - 1, k - 1, val);
        cells += 1;
    }
    Ok(cells)
}

/// Aggregate `paths` (in order) into one field. All chunks must declare the same dimensions.
pub fn aggregate(paths: &[PathBuf]) -> Result<VectorField3D, TaskError> {
    let mut field: Option<VectorField3D> = None;
    for path in paths {
        let cells = read_chunk(path, &mut field)?;
        debug!(path = %path.display(), cells, "read chunk");
    }
    // An empty path list only happens with num_chunks == 0, which config validation refuses.
    field.ok_or_else(|| TaskError::MissingChunk(PathBuf::new()))
}
