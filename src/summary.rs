// src/summary.rs
//
// Per-plane summary index.
//
// Layout under the summary root:
//   {PLANE}/{PLANE}_summary.csv      task_id,parameters,filename
//   {PLANE}/{task folder}_{PLANE}.{ext}
//
// One row per (task, plane). Check, copy and append run under the plane's mutex,
// so concurrent tasks never write the same row twice. Ids already on disk are
// loaded on first use of a plane; nothing is created until the first append.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::PlaneError;
use crate::slice::Plane;
use crate::task::Task;

pub const HEADER: [&str; 3] = ["task_id", "parameters", "filename"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Appended,
    /// A row for this task already existed; nothing was written.
    AlreadyIndexed,
}

#[derive(Default)]
struct PlaneIndex {
    /// None until the CSV has been read.
    ids: Option<HashSet<String>>,
}

pub struct SummaryIndexer {
    root: PathBuf,
    ext: String,
    planes: [Mutex<PlaneIndex>; 3],
}

impl SummaryIndexer {
    pub fn new(root: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ext: ext.into(),
            planes: Default::default(),
        }
    }

    pub fn plane_dir(&self, plane: Plane) -> PathBuf {
        self.root.join(plane.as_str())
    }

    pub fn csv_path(&self, plane: Plane) -> PathBuf {
        self.plane_dir(plane)
            .join(format!("{}_summary.csv", plane.as_str()))
    }

    /// File name of a task's image inside the plane directory.
    pub fn image_name(&self, task: &Task, plane: Plane) -> String {
        format!("{}_{}.{}", task.name, plane.as_str(), self.ext)
    }

    fn lock(&self, plane: Plane) -> MutexGuard<'_, PlaneIndex> {
        // A panic while holding the lock cannot leave a half-written id set behind:
        // ids are inserted only after the row is on disk.
        self.planes[plane.ordinal()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn loaded<'a>(
        &self,
        plane: Plane,
        index: &'a mut PlaneIndex,
    ) -> Result<&'a mut HashSet<String>, PlaneError> {
        if index.ids.is_none() {
            let path = self.csv_path(plane);
            let ids = read_ids(&path).map_err(|source| PlaneError::Summary { path, source })?;
            index.ids = Some(ids);
        }
        Ok(index.ids.get_or_insert_with(HashSet::new))
    }

    /// Whether an earlier run (or an earlier task in this one) indexed `task_id` for `plane`.
    pub fn is_indexed(&self, plane: Plane, task_id: &str) -> Result<bool, PlaneError> {
        let mut guard = self.lock(plane);
        Ok(self.loaded(plane, &mut guard)?.contains(task_id))
    }

    /// Copy `image` into the plane directory and append the task's row,
    /// unless the task is already indexed for this plane.
    pub fn record(&self, task: &Task, plane: Plane, image: &Path) -> Result<Recorded, PlaneError> {
        let mut guard = self.lock(plane);
        let ids = self.loaded(plane, &mut guard)?;
        if ids.contains(&task.id) {
            warn!(task = %task.id, %plane, "already in summary index; not adding again");
            return Ok(Recorded::AlreadyIndexed);
        }

        let dir = self.plane_dir(plane);
        let err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PlaneError::Summary { path, source }
        };
        fs::create_dir_all(&dir).map_err(err(&dir))?;

        let name = self.image_name(task, plane);
        let dest = dir.join(&name);
        fs::copy(image, &dest).map_err(err(&dest))?;

        let csv = self.csv_path(plane);
        append_row(&csv, &task.id, &task.param_string(), &name).map_err(err(&csv))?;

        ids.insert(task.id.clone());
        debug!(task = %task.id, %plane, file = %name, "indexed");
        Ok(Recorded::Appended)
    }
}

fn read_ids(path: &Path) -> io::Result<HashSet<String>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let mut ids = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(id) = record.get(0).map(str::trim).filter(|id| !id.is_empty()) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

fn append_row(path: &Path, id: &str, params: &str, filename: &str) -> io::Result<()> {
    let fresh = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if fresh {
        w.write_record(HEADER)?;
    }
    w.write_record([id, params, filename])?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            name: format!("task_{id}_a_0.5_b_1"),
            folder: PathBuf::from(format!("task_{id}_a_0.5_b_1")),
            params: vec![
                ("a".to_string(), "0.5".to_string()),
                ("b".to_string(), "1".to_string()),
            ],
        }
    }

    fn image(dir: &Path) -> PathBuf {
        let p = dir.join("XY_quiver.png");
        fs::write(&p, b"not really a png").unwrap();
        p
    }

    #[test]
    fn nothing_exists_before_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let idx = SummaryIndexer::new(dir.path().join("summary"), "png");
        assert!(!idx.is_indexed(Plane::XY, "1").unwrap());
        assert!(!dir.path().join("summary").exists());
    }

    #[test]
    fn record_copies_image_and_appends_row() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path());
        let idx = SummaryIndexer::new(dir.path().join("summary"), "png");

        assert_eq!(idx.record(&task("1"), Plane::XY, &img).unwrap(), Recorded::Appended);
        assert_eq!(idx.record(&task("2"), Plane::XY, &img).unwrap(), Recorded::Appended);

        let csv = fs::read_to_string(idx.csv_path(Plane::XY)).unwrap();
        assert_eq!(
            csv,
            "task_id,parameters,filename\n\
             1,a=0.5;b=1,task_1_a_0.5_b_1_XY.png\n\
             2,a=0.5;b=1,task_2_a_0.5_b_1_XY.png\n"
        );
        let copied = dir.path().join("summary/XY/task_1_a_0.5_b_1_XY.png");
        assert_eq!(fs::read(copied).unwrap(), b"not really a png");
        assert!(!idx.plane_dir(Plane::XZ).exists());
    }

    #[test]
    fn second_record_is_skipped_even_across_indexers() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path());
        let root = dir.path().join("summary");

        let first = SummaryIndexer::new(&root, "png");
        first.record(&task("7"), Plane::YZ, &img).unwrap();
        assert_eq!(
            first.record(&task("7"), Plane::YZ, &img).unwrap(),
            Recorded::AlreadyIndexed
        );

        // A fresh indexer sees what the previous run wrote.
        let rerun = SummaryIndexer::new(&root, "png");
        assert!(rerun.is_indexed(Plane::YZ, "7").unwrap());
        assert!(!rerun.is_indexed(Plane::XY, "7").unwrap());
        assert_eq!(
            rerun.record(&task("7"), Plane::YZ, &img).unwrap(),
            Recorded::AlreadyIndexed
        );

        let csv = fs::read_to_string(rerun.csv_path(Plane::YZ)).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn concurrent_records_write_each_task_once() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path());
        let idx = Arc::new(SummaryIndexer::new(dir.path().join("summary"), "png"));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let idx = Arc::clone(&idx);
                let img = img.clone();
                std::thread::spawn(move || {
                    // Two threads per task id.
                    idx.record(&task(&(n % 4).to_string()), Plane::XZ, &img).unwrap()
                })
            })
            .collect();
        let appended = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == Recorded::Appended)
            .count();
        assert_eq!(appended, 4);

        let csv = fs::read_to_string(idx.csv_path(Plane::XZ)).unwrap();
        assert_eq!(csv.lines().count(), 5);
    }

    #[test]
    fn fields_with_commas_round_trip_through_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path());
        let root = dir.path().join("summary");
        let mut odd = task("1,5");
        odd.params = vec![("a".to_string(), "1,0".to_string())];

        let first = SummaryIndexer::new(&root, "png");
        assert_eq!(first.record(&odd, Plane::XY, &img).unwrap(), Recorded::Appended);

        let rerun = SummaryIndexer::new(&root, "png");
        assert!(rerun.is_indexed(Plane::XY, "1,5").unwrap());
        assert!(!rerun.is_indexed(Plane::XY, "1").unwrap());
        assert_eq!(
            rerun.record(&odd, Plane::XY, &img).unwrap(),
            Recorded::AlreadyIndexed
        );
        let csv = fs::read_to_string(rerun.csv_path(Plane::XY)).unwrap();
        assert_eq!(
            csv,
            "task_id,parameters,filename\n\"1,5\",\"a=1,0\",\"task_1,5_a_0.5_b_1_XY.png\"\n"
        );
    }

    #[test]
    fn missing_source_image_is_a_summary_error() {
        let dir = tempfile::tempdir().unwrap();
        let idx = SummaryIndexer::new(dir.path().join("summary"), "png");
        let err = idx
            .record(&task("1"), Plane::XY, &dir.path().join("absent.png"))
            .unwrap_err();
        assert_eq!(err.kind(), "SummaryError");
        assert!(!idx.is_indexed(Plane::XY, "1").unwrap());
    }
}
