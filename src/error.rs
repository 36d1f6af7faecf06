// src/error.rs
//
// Error taxonomy for the batch.
//
// Severity follows the type, not the variant:
//  - ConfigError, DiscoveryError, BatchError, SweepError are fatal to the run.
//  - TaskError abandons one task (all three planes).
//  - PlaneError abandons one (task, plane) pair; the other planes carry on.
//
// `kind()` gives the stable name printed in log lines.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::slice::Plane;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid chunk pattern {pattern:?}: {reason}")]
    ChunkPattern { pattern: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("base directory {0} does not exist")]
    MissingBaseDir(PathBuf),

    #[error("no tasks found under {0}")]
    NoTasks(PathBuf),

    #[error("duplicate task id {id:?} ({first} and {second})")]
    DuplicateTask {
        id: String,
        first: String,
        second: String,
    },

    #[error("{path}:{line}: {reason}")]
    MalformedIndex {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DiscoveryError {
    pub fn kind(&self) -> &'static str {
        "DiscoveryError"
    }
}

/// Failure that stops a batch before any task is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failure while rebuilding a task's 3D field. Abandons the whole task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("missing chunk file {0}")]
    MissingChunk(PathBuf),

    #[error("{path}: header declares {found:?}, earlier chunks declared {expected:?}")]
    HeaderMismatch {
        path: PathBuf,
        expected: [usize; 3],
        found: [usize; 3],
    },

    #[error("{path}:{line}: {reason}")]
    MalformedChunk {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TaskError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingChunk(_) => "MissingChunkError",
            Self::HeaderMismatch { .. } => "HeaderMismatchError",
            Self::MalformedChunk { .. } => "MalformedChunkError",
            Self::Io { .. } => "IoError",
        }
    }
}

#[derive(Debug, Error)]
pub enum InterpolationError {
    #[error("need at least 3 non-collinear samples, got {usable} usable of {total}")]
    Degenerate { usable: usize, total: usize },

    #[error("samples do not form a complete rectilinear lattice: {0}")]
    NotRectilinear(String),
}

/// Failure of one (task, plane) pair.
#[derive(Debug, Error)]
pub enum PlaneError {
    #[error("{plane} index {index} out of range for axis extent {extent}")]
    IndexOutOfRange {
        plane: Plane,
        index: usize,
        extent: usize,
    },

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error("failed to render {path}: {reason}")]
    Render { path: PathBuf, reason: String },

    #[error("failed to update summary at {path}: {source}")]
    Summary {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to export {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PlaneError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IndexOutOfRange { .. } => "IndexOutOfRangeError",
            Self::Interpolation(_) => "InterpolationError",
            Self::Render { .. } => "RenderError",
            Self::Summary { .. } => "SummaryError",
            Self::Export { .. } => "ExportError",
        }
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse sweep spec {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("parameter {0:?} is not adjustable in the template input")]
    UnknownParameter(String),

    #[error("scanned parameter name {0:?} must be non-empty and free of '_' and ','")]
    BadParameterName(String),

    #[error("invalid range for {name:?}: {reason}")]
    InvalidRange { name: String, reason: String },

    #[error("filter references {0:?}, which is not scanned")]
    UnknownFilterParameter(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
