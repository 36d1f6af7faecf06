// src/pipeline.rs
//
// Batch runner: discover tasks, then for each task
//   chunks -> 3D field -> (per plane) slice -> mesh -> quiver image -> summary row.
//
// Failure scope:
//  - DiscoveryError stops the batch before any task runs.
//  - TaskError (field reconstruction) fails every pending plane of that task.
//  - PlaneError fails one (task, plane); the other planes still run.
// Nothing here panics on bad data; every failure ends up as a count in `BatchReport`.
//
// Tasks run on a rayon pool of `workers` threads. Images go to per-task paths;
// summary appends are serialised inside `SummaryIndexer`.

use std::fmt;
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::chunk::{aggregate, chunk_paths};
use crate::config::BatchConfig;
use crate::error::{BatchError, PlaneError};
use crate::export;
use crate::interp::resample;
use crate::render::{QuiverStyle, render_quiver};
use crate::slice::{Plane, extract};
use crate::summary::{Recorded, SummaryIndexer};
use crate::task::{DirectoryScan, MetadataIndex, Task, TaskRepository};
use crate::vector_field::VectorField3D;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneOutcome {
    /// Rendered and appended to the summary index in this run.
    Succeeded,
    /// Already indexed by an earlier run.
    Skipped,
    Failed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: String,
    /// Indexed by `Plane::ordinal()`.
    pub planes: [PlaneOutcome; 3],
}

impl TaskOutcome {
    pub fn plane(&self, plane: Plane) -> PlaneOutcome {
        self.planes[plane.ordinal()]
    }

    pub fn is_complete(&self) -> bool {
        self.planes
            .iter()
            .all(|p| matches!(p, PlaneOutcome::Succeeded | PlaneOutcome::Skipped))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub tasks: usize,
    pub complete: usize,
    /// Indexed by `Plane::ordinal()`.
    pub planes: [PlaneCounts; 3],
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    fn from_outcomes(outcomes: Vec<TaskOutcome>) -> Self {
        let mut report = Self {
            tasks: outcomes.len(),
            ..Self::default()
        };
        for o in &outcomes {
            if o.is_complete() {
                report.complete += 1;
            }
            for (counts, outcome) in report.planes.iter_mut().zip(o.planes) {
                match outcome {
                    PlaneOutcome::Succeeded => counts.succeeded += 1,
                    PlaneOutcome::Skipped => counts.skipped += 1,
                    PlaneOutcome::Failed(_) => counts.failed += 1,
                }
            }
        }
        report.outcomes = outcomes;
        report
    }

    pub fn plane(&self, plane: Plane) -> PlaneCounts {
        self.planes[plane.ordinal()]
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.task_id == task_id)
    }

    /// The run counts as successful if at least one task is complete.
    pub fn exit_ok(&self) -> bool {
        self.complete > 0
    }

    pub fn log(&self) {
        for plane in Plane::ALL {
            let c = self.plane(plane);
            info!(
                %plane,
                succeeded = c.succeeded,
                skipped = c.skipped,
                failed = c.failed,
                "plane summary"
            );
        }
        info!(tasks = self.tasks, complete = self.complete, "batch finished");
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} of {} tasks complete", self.complete, self.tasks)?;
        for plane in Plane::ALL {
            let c = self.plane(plane);
            writeln!(
                f,
                "  {plane}: {} succeeded, {} skipped, {} failed",
                c.succeeded, c.skipped, c.failed
            )?;
        }
        Ok(())
    }
}

/// Metadata index when configured, directory scan otherwise.
pub fn repository(config: &BatchConfig) -> Box<dyn TaskRepository> {
    match &config.metadata_index {
        Some(index) => Box::new(MetadataIndex::new(&config.base_dir, index)),
        None => Box::new(DirectoryScan::new(&config.base_dir)),
    }
}

pub struct BatchRunner<'a> {
    config: &'a BatchConfig,
    summary: SummaryIndexer,
}

impl<'a> BatchRunner<'a> {
    pub fn new(config: &'a BatchConfig) -> Self {
        Self {
            config,
            summary: SummaryIndexer::new(&config.summary_dir, &config.output_ext),
        }
    }

    pub fn image_path(&self, task: &Task, plane: Plane) -> PathBuf {
        task.folder
            .join(format!("{}_quiver.{}", plane.as_str(), self.config.output_ext))
    }

    pub fn run(&self, repo: &dyn TaskRepository) -> Result<BatchReport, BatchError> {
        let tasks = repo.discover()?;
        info!(
            tasks = tasks.len(),
            workers = self.config.workers,
            "starting batch"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()?;
        let outcomes: Vec<TaskOutcome> =
            pool.install(|| tasks.par_iter().map(|t| self.process_task(t)).collect());

        let report = BatchReport::from_outcomes(outcomes);
        report.log();
        Ok(report)
    }

    fn process_task(&self, task: &Task) -> TaskOutcome {
        let mut planes = [PlaneOutcome::Skipped; 3];
        let mut pending = Vec::with_capacity(3);

        for plane in Plane::ALL {
            match self.summary.is_indexed(plane, &task.id) {
                Ok(true) => debug!(task = %task.id, %plane, "plane already indexed"),
                Ok(false) => pending.push(plane),
                Err(e) => planes[plane.ordinal()] = fail(task, plane, &e),
            }
        }
        if pending.is_empty() {
            if planes.iter().all(|p| *p == PlaneOutcome::Skipped) {
                info!(task = %task.id, "already indexed, skipping");
            }
            return TaskOutcome {
                task_id: task.id.clone(),
                planes,
            };
        }

        let paths = chunk_paths(
            &task.folder,
            &self.config.chunk_pattern,
            self.config.time_step,
            self.config.num_chunks,
        );
        let field = match aggregate(&paths) {
            Ok(field) => field,
            Err(e) => {
                warn!(task = %task.id, kind = e.kind(), error = %e, "task failed");
                for plane in pending {
                    planes[plane.ordinal()] = PlaneOutcome::Failed(e.kind());
                }
                return TaskOutcome {
                    task_id: task.id.clone(),
                    planes,
                };
            }
        };
        debug!(task = %task.id, dims = ?field.grid.dims(), "field assembled");

        if self.config.write_full_field {
            let path = export::full_field_path(&task.folder);
            // The images do not depend on this file; a failed dump only warns.
            if let Err(e) = export::write_full_field(&path, &field) {
                warn!(task = %task.id, kind = "ExportError", path = %path.display(), error = %e, "full field export failed");
            }
        }

        for plane in pending {
            planes[plane.ordinal()] = match self.process_plane(task, &field, plane) {
                Ok(outcome) => outcome,
                Err(e) => fail(task, plane, &e),
            };
        }
        TaskOutcome {
            task_id: task.id.clone(),
            planes,
        }
    }

    fn process_plane(
        &self,
        task: &Task,
        field: &VectorField3D,
        plane: Plane,
    ) -> Result<PlaneOutcome, PlaneError> {
        let cfg = self.config.plane(plane);
        let slice = extract(field, plane, cfg.index)?;
        if self.config.write_slice_data {
            export::export_slice(&task.folder, &slice)?;
        }

        let grid = resample(&slice, &cfg.mesh(), cfg.method)?;
        let style = QuiverStyle::from_plane(cfg);
        let image = self.image_path(task, plane);
        let format = self.config.output_format;
        if let Err(e) = render_quiver(&grid, &style, format, &image) {
            warn!(task = %task.id, %plane, error = %e, "render failed, retrying once");
            render_quiver(&grid, &style, format, &image)?;
        }

        let outcome = match self.summary.record(task, plane, &image)? {
            Recorded::Appended => PlaneOutcome::Succeeded,
            Recorded::AlreadyIndexed => PlaneOutcome::Skipped,
        };
        debug!(task = %task.id, %plane, index = slice.index, image = %image.display(), "plane done");
        Ok(outcome)
    }
}

fn fail(task: &Task, plane: Plane, e: &PlaneError) -> PlaneOutcome {
    warn!(task = %task.id, %plane, kind = e.kind(), error = %e, "plane failed");
    PlaneOutcome::Failed(e.kind())
}

/// Discover and process every task described by `config`.
pub fn run_batch(config: &BatchConfig) -> Result<BatchReport, BatchError> {
    let repo = repository(config);
    BatchRunner::new(config).run(repo.as_ref())
}
