//! Error types for the worker pool and the row pipeline.

use std::time::Duration;

use tessera_pipeline::PipelineError;
use tessera_tiles::ResolveError;

/// Failure of a single task (one row) on a worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The tile resolver failed for one cell of the row.
    #[error("tile resolution failed for column {col}: {source}")]
    Resolve {
        /// Column of the failing cell.
        col: usize,
        /// Resolver error.
        #[source]
        source: ResolveError,
    },

    /// The task panicked on its worker thread.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The task was abandoned because its pool was terminated.
    #[error("task abandoned by a terminated worker")]
    Aborted,

    /// No worker reported back within the configured task timeout.
    #[error("no worker result within {0:?}")]
    TimedOut(Duration),

    /// The worker's thread is gone and can no longer accept tasks.
    #[error("worker {worker} is no longer running")]
    WorkerLost {
        /// Index of the lost worker.
        worker: usize,
    },
}

/// Worker pool contract violations and lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was used before `init` or after `destroy`.
    #[error("worker pool is not ready (call init first, and not after destroy)")]
    NotReady,

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        /// Index of the worker that failed to start.
        worker: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No worker event arrived within the wait limit.
    #[error("no worker event within {0:?}")]
    TimedOut(Duration),
}

/// Coarse classification of a [`MosaicError`].
///
/// Lets callers tell a user-initiated cancellation apart from a genuine
/// failure without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid source data or configuration; nothing was started.
    Input,
    /// A row's computation or tile resolution failed.
    TaskFailure,
    /// The job was cancelled.
    Interrupted,
    /// The pool or builder was used against its contract.
    PoolMisuse,
}

/// Errors reported by the row pipeline.
#[derive(Debug, thiserror::Error)]
pub enum MosaicError {
    /// The source image or tile size was rejected before any work started.
    #[error(transparent)]
    Input(#[from] PipelineError),

    /// A row failed; rows before it were already delivered.
    #[error("row {row} failed: {source}")]
    Task {
        /// Index of the failing row.
        row: usize,
        /// What went wrong.
        #[source]
        source: TaskError,
    },

    /// The job was cancelled while rows were in flight.
    #[error("render interrupted")]
    Interrupted,

    /// The worker pool could not be used.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Another job from the same builder is still active.
    #[error("a mosaic job is already active for this builder")]
    Busy,

    /// The builder configuration is invalid.
    #[error("invalid builder configuration: {0}")]
    InvalidConfig(String),
}

impl MosaicError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) | Self::InvalidConfig(_) => ErrorKind::Input,
            Self::Task { .. } | Self::Pool(PoolError::Spawn { .. } | PoolError::TimedOut(_)) => {
                ErrorKind::TaskFailure
            }
            Self::Interrupted => ErrorKind::Interrupted,
            Self::Pool(PoolError::NotReady) | Self::Busy => ErrorKind::PoolMisuse,
        }
    }

    /// Returns `true` if the job was cancelled rather than failing.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
