// src/task.rs
//
// Task discovery.
//
// A task is one simulation run materialised as a directory under the base directory.
// Two sources describe the same set of tasks:
//  - the directory names themselves: task_{id}_{name1}_{val1}_{name2}_{val2}...
//  - the metadata index written by the sweep generator: id,folder,<param names...>
//
// Both are behind `TaskRepository`. Discovery failures are fatal for the run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::DiscoveryError;

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Stable identifier, unique within a batch.
    pub id: String,
    /// Directory name under the base directory.
    pub name: String,
    pub folder: PathBuf,
    /// Scanned parameters in sweep order, values as written by the generator.
    pub params: Vec<(String, String)>,
}

impl Task {
    /// `name=value;name=value`, the summary index's parameter column.
    pub fn param_string(&self) -> String {
        self.params
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

pub trait TaskRepository {
    /// Every task to process, in processing order.
    fn discover(&self) -> Result<Vec<Task>, DiscoveryError>;
}

// The id is one `_`-free component; everything after it is name/value pairs.
static TASK_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^task_([^_]+)(?:_(.+))?$").expect("task name pattern compiles")
});

/// Ids end up as the first column of the summary indexes.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(|c: char| c == ',' || c == '"' || c.is_whitespace())
}

fn is_number(s: &str) -> bool {
    s.parse::<f64>().is_ok_and(f64::is_finite)
}

fn require_base_dir(base_dir: &Path) -> Result<(), DiscoveryError> {
    if base_dir.is_dir() {
        Ok(())
    } else {
        Err(DiscoveryError::MissingBaseDir(base_dir.to_path_buf()))
    }
}

fn check_unique(tasks: &[Task]) -> Result<(), DiscoveryError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for t in tasks {
        if let Some(first) = seen.insert(&t.id, &t.name) {
            return Err(DiscoveryError::DuplicateTask {
                id: t.id.clone(),
                first: first.to_string(),
                second: t.name.clone(),
            });
        }
    }
    Ok(())
}

/// Tasks found by parsing subdirectory names of `base_dir`.
pub struct DirectoryScan {
    pub base_dir: PathBuf,
}

impl DirectoryScan {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

/// Split a folder name into (id, params). Incomplete parameter lists are rejected.
pub fn parse_task_name(name: &str) -> Result<(String, Vec<(String, String)>), String> {
    let caps = TASK_NAME
        .captures(name)
        .ok_or_else(|| "does not match task_{id}_...".to_string())?;
    let id = caps[1].to_string();
    if !is_valid_id(&id) {
        return Err(format!("id {id:?} contains a comma, quote or whitespace"));
    }

    let mut params = Vec::new();
    if let Some(rest) = caps.get(2) {
        let parts: Vec<&str> = rest.as_str().split('_').collect();
        if parts.len() % 2 != 0 {
            return Err(format!("parameter {:?} has no value", parts[parts.len() - 1]));
        }
        for pair in parts.chunks(2) {
            let (n, v) = (pair[0], pair[1]);
            if n.is_empty() {
                return Err("empty parameter name".to_string());
            }
            if !is_number(v) {
                return Err(format!("parameter {n:?} has non-numeric value {v:?}"));
            }
            params.push((n.to_string(), v.to_string()));
        }
    }
    Ok((id, params))
}

impl TaskRepository for DirectoryScan {
    fn discover(&self) -> Result<Vec<Task>, DiscoveryError> {
        require_base_dir(&self.base_dir)?;
        let io = |source| DiscoveryError::Io {
            path: self.base_dir.clone(),
            source,
        };

        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.base_dir).map_err(io)? {
            let entry = entry.map_err(io)?;
            if !entry.file_type().map_err(io)?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("task_") {
                continue;
            }
            match parse_task_name(&name) {
                Ok((id, params)) => tasks.push(Task {
                    id,
                    folder: entry.path(),
                    name,
                    params,
                }),
                Err(reason) => warn!(folder = %name, %reason, "ignoring task directory"),
            }
        }

        if tasks.is_empty() {
            return Err(DiscoveryError::NoTasks(self.base_dir.clone()));
        }
        // Numeric ids in numeric order, then the rest by name.
        tasks.sort_by(|a, b| {
            let key = |t: &Task| (t.id.parse::<u64>().map_err(|_| ()), t.name.clone());
            let (ka, kb) = (key(a), key(b));
            match (&ka.0, &kb.0) {
                (Ok(x), Ok(y)) => x.cmp(y).then(ka.1.cmp(&kb.1)),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => ka.1.cmp(&kb.1),
            }
        });
        check_unique(&tasks)?;
        Ok(tasks)
    }
}

/// Tasks listed in a metadata index (`id,folder,<param names...>`), in file order.
pub struct MetadataIndex {
    pub base_dir: PathBuf,
    pub index_path: PathBuf,
}

impl MetadataIndex {
    pub fn new(base_dir: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            index_path: index_path.into(),
        }
    }
}

impl TaskRepository for MetadataIndex {
    fn discover(&self) -> Result<Vec<Task>, DiscoveryError> {
        require_base_dir(&self.base_dir)?;
        let file = fs::File::open(&self.index_path).map_err(|source| DiscoveryError::Io {
            path: self.index_path.clone(),
            source,
        })?;
        let bad = |line: u64, reason: String| DiscoveryError::MalformedIndex {
            path: self.index_path.clone(),
            line: line as usize,
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let header = reader.headers().map_err(|e| bad(1, e.to_string()))?.clone();
        if header.is_empty() || header.iter().all(str::is_empty) {
            return Err(DiscoveryError::NoTasks(self.base_dir.clone()));
        }
        if header.len() < 2 || &header[0] != "id" || &header[1] != "folder" {
            return Err(bad(1, format!("header must start with id,folder, got {header:?}")));
        }
        let names: Vec<&str> = header.iter().skip(2).collect();

        let mut tasks = Vec::new();
        for result in reader.records() {
            let row = result.map_err(|e| {
                let line = e.position().map_or(0, |p| p.line());
                bad(line, e.to_string())
            })?;
            let line_no = row.position().map_or(0, |p| p.line());
            if row.len() != header.len() {
                return Err(bad(
                    line_no,
                    format!("expected {} columns, got {}", header.len(), row.len()),
                ));
            }
            let (id, folder) = (&row[0], &row[1]);
            if !is_valid_id(id) || folder.is_empty() {
                return Err(bad(line_no, format!("bad id {id:?} or folder {folder:?}")));
            }
            let mut params = Vec::with_capacity(names.len());
            for (n, v) in names.iter().zip(row.iter().skip(2)) {
                if !is_number(v) {
                    return Err(bad(line_no, format!("{n} = {v:?} is not a number")));
                }
                params.push((n.to_string(), v.to_string()));
            }
            tasks.push(Task {
                id: id.to_string(),
                folder: self.base_dir.join(folder),
                name: folder.to_string(),
                params,
            });
        }

        if tasks.is_empty() {
            return Err(DiscoveryError::NoTasks(self.base_dir.clone()));
        }
        check_unique(&tasks)?;
        Ok(tasks)
    }
}
