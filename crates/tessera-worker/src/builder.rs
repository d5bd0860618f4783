//! The row pipeline: turns an image into mosaic rows delivered in order.
//!
//! A [`MosaicBuilder`] is a session that runs at most one [`Job`] at a
//! time. A job slices the image, submits every row to a fresh
//! [`WorkerPool`], and hands finished rows to the caller in ascending
//! row order even though workers finish them in any order. Rows that
//! arrive early wait in an [`OrderedRows`] buffer until every row above
//! them has been delivered.
//!
//! A job ends in one of three ways:
//!
//! - every row delivered: [`Job::run`] returns a [`Completion`];
//! - a row failed: rows above it were delivered, then
//!   [`MosaicError::Task`];
//! - [`Canceller::cancel`] was called: no further rows are delivered and
//!   [`MosaicError::Interrupted`] is returned.
//!
//! In every case the pool is destroyed before `run` returns.

use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tessera_pipeline::report::{duration_serde, option_duration_serde};
use tessera_pipeline::{
    DEFAULT_SAMPLE_STRIDE, Dimensions, PipelineError, Row, RgbaImage, TileSize, slice,
};
use tessera_tiles::TileResolver;

use crate::error::{MosaicError, PoolError, TaskError};
use crate::ordered::OrderedRows;
use crate::pool::{AbortHandle, AbortSignal, Wait, WorkerPool};
use crate::task::{ResolveStage, RowContext};

/// Row pipeline settings.
///
/// Every field has a default, so a partial JSON object is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Every `sample_stride`-th pixel of a cell contributes to its
    /// color key.
    pub sample_stride: usize,

    /// Where tiles are resolved.
    pub resolve_stage: ResolveStage,

    /// Longest wait for any worker result before the job fails, in
    /// seconds. `None` waits indefinitely.
    #[serde(with = "option_duration_serde")]
    pub task_timeout: Option<Duration>,
}

impl BuilderConfig {
    /// Default number of workers.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Default sampling stride.
    pub const DEFAULT_SAMPLE_STRIDE: usize = DEFAULT_SAMPLE_STRIDE;

    /// Default resolve stage.
    pub const DEFAULT_RESOLVE_STAGE: ResolveStage = ResolveStage::InWorker;

    /// Check field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::InvalidConfig`] if `workers` or
    /// `sample_stride` is zero, or `task_timeout` is zero.
    pub fn validate(&self) -> Result<(), MosaicError> {
        if self.workers == 0 {
            return Err(MosaicError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.sample_stride == 0 {
            return Err(MosaicError::InvalidConfig(
                "sample_stride must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MosaicError::InvalidConfig(
                "task_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            sample_stride: Self::DEFAULT_SAMPLE_STRIDE,
            resolve_stage: Self::DEFAULT_RESOLVE_STAGE,
            task_timeout: None,
        }
    }
}

/// Lifecycle of a [`Job`]. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, not yet running.
    Idle,
    /// Rows are being computed and delivered.
    Running,
    /// Every row was delivered.
    Completed,
    /// Cancelled before every row was delivered.
    Cancelled,
    /// A row failed.
    Failed,
}

impl JobState {
    /// Whether the job has finished, one way or another.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Cancelled => 3,
            Self::Failed => 4,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

/// Summary of a job that delivered every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Rows delivered.
    pub rows: usize,
    /// Cells across all rows.
    pub cells: usize,
    /// Wall-clock time from `run` to the last delivery (seconds).
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

/// State shared between a job and its cancellers.
#[derive(Debug)]
struct JobShared {
    active: AtomicBool,
    state: AtomicU8,
}

impl JobShared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: JobState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }
}

/// Cancels a [`Job`] from any thread, including from inside the row
/// callback.
#[derive(Debug, Clone)]
pub struct Canceller {
    shared: Arc<JobShared>,
    abort: AbortHandle,
}

impl Canceller {
    /// Stop the job.
    ///
    /// No row is delivered after this returns. Running worker tasks are
    /// abandoned and their results discarded. Has no effect on a job
    /// that already finished.
    pub fn cancel(&self) {
        if self.shared.state().is_terminal() {
            return;
        }
        if self.shared.active.swap(false, Ordering::AcqRel) {
            log::warn!("cancelling mosaic job");
            self.abort.abort();
        }
    }

    /// Whether cancellation has been requested or the job has ended.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !self.shared.is_active()
    }

    /// Current state of the job.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.shared.state()
    }
}

/// Releases the builder's one-job slot when dropped.
#[derive(Debug)]
struct SessionGuard(Arc<AtomicBool>);

impl SessionGuard {
    fn acquire(slot: &Arc<AtomicBool>) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(slot)))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A session that turns images into mosaic rows.
///
/// Builders are independent: each owns its own job slot, so several
/// builders may run jobs at the same time.
pub struct MosaicBuilder {
    config: BuilderConfig,
    resolver: Arc<dyn TileResolver>,
    slot: Arc<AtomicBool>,
}

impl MosaicBuilder {
    /// Create a builder that resolves tiles with `resolver`.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::InvalidConfig`] if `config` fails
    /// [`BuilderConfig::validate`].
    pub fn new(
        config: BuilderConfig,
        resolver: impl TileResolver + 'static,
    ) -> Result<Self, MosaicError> {
        config.validate()?;
        Ok(Self {
            config,
            resolver: Arc::new(resolver),
            slot: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Whether a job from this builder is still alive.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.slot.load(Ordering::Acquire)
    }

    /// Slice `image` and prepare a job with a ready worker pool.
    ///
    /// # Errors
    ///
    /// - [`MosaicError::Busy`] while another job from this builder is alive.
    /// - [`MosaicError::Input`] with [`PipelineError::NoCells`] if the
    ///   image holds no whole tile.
    /// - [`MosaicError::Pool`] if worker threads cannot be started.
    pub fn start(&self, image: &RgbaImage, tile: TileSize) -> Result<Job, MosaicError> {
        let guard = SessionGuard::acquire(&self.slot).ok_or(MosaicError::Busy)?;

        let rows = slice(image, tile);
        let cells: usize = rows.iter().map(Row::len).sum();
        if cells == 0 {
            return Err(PipelineError::NoCells {
                width: image.width(),
                height: image.height(),
                tile_width: tile.width(),
                tile_height: tile.height(),
            }
            .into());
        }

        let context = Arc::new(RowContext::new(
            tile,
            self.config.sample_stride,
            self.config.resolve_stage,
            Arc::clone(&self.resolver),
        ));
        let workers = NonZeroUsize::new(self.config.workers)
            .ok_or_else(|| MosaicError::InvalidConfig("workers must be at least 1".to_string()))?;
        let worker_context = Arc::clone(&context);
        let mut pool = WorkerPool::new(workers, move |row: Row, signal: &AbortSignal| {
            worker_context.compute_row(row, signal)
        });
        pool.init()?;

        let shared = Arc::new(JobShared {
            active: AtomicBool::new(true),
            state: AtomicU8::new(JobState::Idle.to_u8()),
        });
        let canceller = Canceller {
            shared: Arc::clone(&shared),
            abort: pool.abort_handle()?,
        };

        log::info!(
            "prepared mosaic job: {} rows, {cells} cells, {}x{} tiles, {workers} workers",
            rows.len(),
            tile.width(),
            tile.height(),
        );

        Ok(Job {
            source: Dimensions {
                width: image.width(),
                height: image.height(),
            },
            tile,
            cells,
            rows,
            pool,
            context,
            task_timeout: self.config.task_timeout,
            shared,
            canceller,
            guard: Some(guard),
        })
    }

    /// [`start`](Self::start) a job and [`run`](Job::run) it to the end.
    ///
    /// # Errors
    ///
    /// Any error of [`start`](Self::start) or [`Job::run`].
    pub fn transform_row_by_row<F>(
        &self,
        image: &RgbaImage,
        tile: TileSize,
        on_row: F,
    ) -> Result<Completion, MosaicError>
    where
        F: FnMut(Row),
    {
        self.start(image, tile)?.run(on_row)
    }
}

impl std::fmt::Debug for MosaicBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosaicBuilder")
            .field("config", &self.config)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// One image-to-mosaic transformation.
///
/// Holds its builder's job slot until it finishes or is dropped.
#[derive(Debug)]
pub struct Job {
    source: Dimensions,
    tile: TileSize,
    cells: usize,
    rows: Vec<Row>,
    pool: WorkerPool<Row, Row>,
    context: Arc<RowContext>,
    task_timeout: Option<Duration>,
    shared: Arc<JobShared>,
    canceller: Canceller,
    guard: Option<SessionGuard>,
}

impl Job {
    /// A handle that cancels this job.
    #[must_use]
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Source image dimensions.
    #[must_use]
    pub const fn source(&self) -> Dimensions {
        self.source
    }

    /// Tile size the image was sliced with.
    #[must_use]
    pub const fn tile(&self) -> TileSize {
        self.tile
    }

    /// Number of rows the job will deliver.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of cells across all rows.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.cells
    }

    /// Compute every row and pass each one to `on_row` in row order.
    ///
    /// Blocks the calling thread until the job finishes. The worker pool
    /// is destroyed and the builder's job slot released before this
    /// returns.
    ///
    /// # Errors
    ///
    /// - [`MosaicError::Interrupted`] if the job was cancelled.
    /// - [`MosaicError::Task`] for the first row (in row order) that
    ///   failed or timed out.
    /// - [`MosaicError::Pool`] if the job is not idle (already run).
    ///
    /// # Panics
    ///
    /// A panic raised by `on_row` is propagated after the job is marked
    /// [`JobState::Failed`] and the pool is destroyed.
    pub fn run<F>(&mut self, mut on_row: F) -> Result<Completion, MosaicError>
    where
        F: FnMut(Row),
    {
        if self.state() != JobState::Idle {
            return Err(PoolError::NotReady.into());
        }
        self.shared.set_state(JobState::Running);

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.drive(&mut on_row))) {
            Ok(result) => result,
            Err(payload) => {
                log::error!("row callback panicked; mosaic job failed");
                self.finish(JobState::Failed);
                panic::resume_unwind(payload);
            }
        };

        self.finish(match &result {
            Ok(_) => JobState::Completed,
            Err(MosaicError::Interrupted) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        });

        match &result {
            Ok(done) => log::info!(
                "mosaic job completed: {} rows in {:.3}s",
                done.rows,
                done.elapsed.as_secs_f64()
            ),
            Err(MosaicError::Interrupted) => log::warn!("mosaic job interrupted"),
            Err(e) => log::error!("mosaic job failed: {e}"),
        }
        result
    }

    fn finish(&mut self, state: JobState) {
        self.shared.set_state(state);
        self.shared.active.store(false, Ordering::Release);
        self.pool.destroy();
        self.guard = None;
    }

    fn drive(&mut self, on_row: &mut dyn FnMut(Row)) -> Result<Completion, MosaicError> {
        let started = Instant::now();
        let rows = std::mem::take(&mut self.rows);
        let total = rows.len();
        let (done_tx, done_rx) = flume::unbounded::<(usize, Result<Row, TaskError>)>();

        for row in rows {
            if !self.shared.is_active() {
                return Err(MosaicError::Interrupted);
            }
            let index = row.index;
            let done_tx = done_tx.clone();
            self.pool.run(row, move |result| {
                let _ = done_tx.send((index, result));
            })?;
        }
        drop(done_tx);

        let mut ordered = OrderedRows::new(total);
        while !ordered.is_complete() {
            if !self.shared.is_active() {
                return Err(MosaicError::Interrupted);
            }

            let wait = match self.pool.wait_one(self.task_timeout) {
                Ok(wait) => wait,
                Err(PoolError::TimedOut(limit)) => {
                    return Err(MosaicError::Task {
                        row: ordered.next_index(),
                        source: TaskError::TimedOut(limit),
                    });
                }
                Err(e) => return Err(e.into()),
            };

            for (index, result) in done_rx.try_iter() {
                ordered.insert(index, result);
            }

            while let Some((index, result)) = ordered.pop_ready() {
                if !self.shared.is_active() {
                    return Err(MosaicError::Interrupted);
                }
                let mut row = result.map_err(|source| MosaicError::Task { row: index, source })?;
                if self.context.stage() == ResolveStage::InOrchestrator {
                    self.context
                        .resolve_row(&mut row)
                        .map_err(|source| MosaicError::Task { row: index, source })?;
                    // Resolution may call back into a resolver that cancels.
                    if !self.shared.is_active() {
                        return Err(MosaicError::Interrupted);
                    }
                }
                log::debug!(
                    "delivering row {index} ({} cells, {} rows waiting)",
                    row.len(),
                    ordered.parked()
                );
                on_row(row);
            }

            // Every callback has fired; anything still missing was lost.
            if wait == Wait::Idle && !ordered.is_complete() {
                return Err(MosaicError::Task {
                    row: ordered.next_index(),
                    source: TaskError::Aborted,
                });
            }
        }

        Ok(Completion {
            rows: total,
            cells: self.cells,
            elapsed: started.elapsed(),
        })
    }
}
