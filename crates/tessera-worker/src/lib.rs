//! tessera-worker: Parallel row pipeline for tessera mosaics.
//!
//! A bounded [`WorkerPool`] of OS threads computes each row's color keys
//! (and, by default, resolves its tiles) while a [`MosaicBuilder`] job
//! delivers finished rows to the caller strictly top to bottom. Jobs can
//! be cancelled from any thread through a [`Canceller`].

pub mod builder;
pub mod error;
pub mod ordered;
pub mod pool;
pub mod task;

pub use builder::{BuilderConfig, Canceller, Completion, Job, JobState, MosaicBuilder};
pub use error::{ErrorKind, MosaicError, PoolError, TaskError};
pub use ordered::OrderedRows;
pub use pool::{AbortHandle, AbortSignal, Wait, WorkerPool};
pub use task::{ResolveStage, RowContext};
