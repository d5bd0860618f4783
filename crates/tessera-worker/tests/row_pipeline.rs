//! Integration tests: run whole jobs through the row pipeline with
//! resolvers that misbehave in controlled ways.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tessera_pipeline::{ColorKey, Rgba, RgbaImage, Tile, TileSize};
use tessera_tiles::{CachedResolver, ResolveError, ShapeResolver, TileResolver};
use tessera_worker::{
    BuilderConfig, Canceller, ErrorKind, JobState, MosaicBuilder, MosaicError, ResolveStage,
    TaskError,
};

/// 8 px wide, one 8x8 cell per row; row `i` is filled with red = `i`.
fn striped(rows: u32) -> RgbaImage {
    RgbaImage::from_fn(8, rows * 8, |_, y| {
        Rgba([u8::try_from(y / 8).unwrap(), 0, 0, 255])
    })
}

fn tile8() -> TileSize {
    TileSize::new(8, 8).unwrap()
}

fn config(workers: usize) -> BuilderConfig {
    BuilderConfig {
        workers,
        ..BuilderConfig::default()
    }
}

/// Sleeps longer for lower red values, so the top row finishes last.
struct InverseLatency {
    rows: u8,
    finished: Mutex<Vec<u8>>,
}

impl TileResolver for InverseLatency {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        let red = key.rgb()[0];
        thread::sleep(Duration::from_millis(u64::from(self.rows - red) * 25));
        self.finished.lock().unwrap().push(red);
        ShapeResolver::default().resolve(key, size)
    }
}

/// Blocks every call until the test releases (or drops) the gate.
struct Gated {
    gate: flume::Receiver<()>,
    calls: AtomicUsize,
}

impl TileResolver for Gated {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.recv();
        ShapeResolver::default().resolve(key, size)
    }
}

/// Fails for one specific red value.
struct FailOn(u8);

impl TileResolver for FailOn {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        if key.rgb()[0] == self.0 {
            return Err(ResolveError::Unavailable {
                key,
                reason: "tile server said no".into(),
            });
        }
        ShapeResolver::default().resolve(key, size)
    }
}

// --- Ordering ---

#[test]
fn rows_arrive_in_order_when_workers_finish_in_reverse() {
    let rows = 4;
    let resolver = Arc::new(InverseLatency {
        rows,
        finished: Mutex::new(Vec::new()),
    });
    let builder = MosaicBuilder::new(config(4), Arc::clone(&resolver)).unwrap();

    let mut delivered = Vec::new();
    let done = builder
        .transform_row_by_row(&striped(u32::from(rows)), tile8(), |row| {
            delivered.push(row.index);
        })
        .unwrap();

    assert_eq!(delivered, vec![0, 1, 2, 3]);
    assert_eq!(done.rows, 4);
    // Every row ran concurrently, so the slowest (top) row resolved last.
    assert_eq!(resolver.finished.lock().unwrap().last(), Some(&0));
}

#[test]
fn single_worker_still_delivers_every_row() {
    let builder = MosaicBuilder::new(config(1), ShapeResolver::default()).unwrap();
    let mut delivered = Vec::new();
    builder
        .transform_row_by_row(&striped(6), tile8(), |row| delivered.push(row.index))
        .unwrap();
    assert_eq!(delivered, (0..6).collect::<Vec<_>>());
}

// --- End to end ---

#[test]
fn solid_red_yields_four_red_cells_in_row_major_order() {
    let img = RgbaImage::from_pixel(64, 64, Rgba([255, 0, 0, 255]));
    let builder = MosaicBuilder::new(BuilderConfig::default(), ShapeResolver::default()).unwrap();

    let mut cells = Vec::new();
    let done = builder
        .transform_row_by_row(&img, TileSize::new(32, 32).unwrap(), |row| {
            for cell in &row.cells {
                assert!(cell.tile.is_some());
                cells.push((cell.row, cell.col, cell.color.unwrap().to_string()));
            }
        })
        .unwrap();

    assert_eq!(
        cells,
        vec![
            (0, 0, "ff0000".to_string()),
            (0, 1, "ff0000".to_string()),
            (1, 0, "ff0000".to_string()),
            (1, 1, "ff0000".to_string()),
        ]
    );
    assert_eq!((done.rows, done.cells), (2, 4));
}

#[test]
fn cached_resolver_renders_each_color_once() {
    let img = RgbaImage::from_pixel(64, 32, Rgba([0, 0, 255, 255]));
    let cache = Arc::new(CachedResolver::new(ShapeResolver::default()));
    let builder = MosaicBuilder::new(config(1), Arc::clone(&cache)).unwrap();
    builder
        .transform_row_by_row(&img, tile8(), |_| {})
        .unwrap();
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 31);
}

// --- Cancellation ---

#[test]
fn cancel_inside_callback_stops_delivery() {
    let builder = MosaicBuilder::new(config(2), ShapeResolver::default()).unwrap();
    let mut job = builder.start(&striped(5), tile8()).unwrap();
    let canceller = job.canceller();

    let mut delivered = Vec::new();
    let err = job
        .run(|row| {
            delivered.push(row.index);
            canceller.cancel();
        })
        .unwrap_err();

    assert_eq!(delivered, vec![0]);
    assert!(matches!(err, MosaicError::Interrupted));
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(canceller.state(), JobState::Cancelled);
    assert!(!builder.is_busy());
}

#[test]
fn cancel_from_another_thread_unblocks_run() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let resolver = Arc::new(Gated {
        gate: gate_rx,
        calls: AtomicUsize::new(0),
    });
    let builder = MosaicBuilder::new(config(2), Arc::clone(&resolver)).unwrap();
    let mut job = builder.start(&striped(4), tile8()).unwrap();

    let canceller = job.canceller();
    let cancel_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });

    let mut delivered = 0;
    let err = job.run(|_| delivered += 1).unwrap_err();
    cancel_thread.join().unwrap();

    assert!(err.is_interrupted());
    assert_eq!(delivered, 0);
    assert_eq!(job.state(), JobState::Cancelled);

    // Releasing the stalled workers must not start the queued rows.
    drop(gate_tx);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn delivered_count_is_frozen_after_cancel() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let resolver = Arc::new(Gated {
        gate: gate_rx,
        calls: AtomicUsize::new(0),
    });
    let builder = MosaicBuilder::new(config(1), Arc::clone(&resolver)).unwrap();
    let mut job = builder.start(&striped(4), tile8()).unwrap();
    let canceller = job.canceller();

    // Let exactly the first two rows through, then cancel.
    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&delivered);
    let err = job
        .run(move |row| {
            let mut seen = seen.lock().unwrap();
            seen.push(row.index);
            if seen.len() == 2 {
                canceller.cancel();
            }
        })
        .unwrap_err();
    assert!(err.is_interrupted());

    // More tokens after the fact change nothing.
    for _ in 0..4 {
        let _ = gate_tx.send(());
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(*delivered.lock().unwrap(), vec![0, 1]);
}

#[test]
fn cancel_during_orchestrator_resolution_delivers_nothing() {
    /// Cancels the job from inside its first `resolve` call.
    struct CancelOnResolve(Mutex<Option<Canceller>>);

    impl TileResolver for CancelOnResolve {
        fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
            if let Some(canceller) = self.0.lock().unwrap().take() {
                canceller.cancel();
            }
            ShapeResolver::default().resolve(key, size)
        }
    }

    let resolver = Arc::new(CancelOnResolve(Mutex::new(None)));
    let builder = MosaicBuilder::new(
        BuilderConfig {
            workers: 1,
            resolve_stage: ResolveStage::InOrchestrator,
            ..BuilderConfig::default()
        },
        Arc::clone(&resolver),
    )
    .unwrap();
    let mut job = builder.start(&striped(3), tile8()).unwrap();
    *resolver.0.lock().unwrap() = Some(job.canceller());

    let mut delivered = Vec::new();
    let err = job.run(|row| delivered.push(row.index)).unwrap_err();

    assert!(err.is_interrupted());
    assert!(delivered.is_empty(), "rows delivered after cancel: {delivered:?}");
    assert_eq!(job.state(), JobState::Cancelled);
}

// --- Failure ---

#[test]
#[allow(clippy::panic)]
fn panicking_callback_leaves_the_job_failed() {
    let builder = MosaicBuilder::new(config(2), ShapeResolver::default()).unwrap();
    let mut job = builder.start(&striped(3), tile8()).unwrap();
    let canceller = job.canceller();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        job.run(|_| panic!("renderer blew up"))
    }));

    assert!(outcome.is_err());
    assert_eq!(canceller.state(), JobState::Failed);
    assert!(canceller.is_cancelled());
    // The builder's job slot is free again.
    assert!(builder.start(&striped(1), tile8()).is_ok());
}

#[test]
fn failed_row_stops_the_job_after_earlier_rows() {
    let builder = MosaicBuilder::new(config(4), FailOn(2)).unwrap();
    let mut job = builder.start(&striped(5), tile8()).unwrap();

    let mut delivered = Vec::new();
    let err = job.run(|row| delivered.push(row.index)).unwrap_err();

    assert_eq!(delivered, vec![0, 1]);
    assert!(matches!(
        err,
        MosaicError::Task {
            row: 2,
            source: TaskError::Resolve { col: 0, .. }
        }
    ));
    assert_eq!(err.kind(), ErrorKind::TaskFailure);
    assert_eq!(job.state(), JobState::Failed);
}

#[test]
fn orchestrator_stage_failure_is_reported_for_its_row() {
    let builder = MosaicBuilder::new(
        BuilderConfig {
            resolve_stage: ResolveStage::InOrchestrator,
            ..BuilderConfig::default()
        },
        FailOn(1),
    )
    .unwrap();
    let mut delivered = Vec::new();
    let err = builder
        .transform_row_by_row(&striped(3), tile8(), |row| delivered.push(row.index))
        .unwrap_err();
    assert_eq!(delivered, vec![0]);
    assert!(matches!(err, MosaicError::Task { row: 1, .. }));
}

#[test]
fn stalled_worker_times_out() {
    let (_gate_tx, gate_rx) = flume::unbounded();
    let builder = MosaicBuilder::new(
        BuilderConfig {
            workers: 1,
            task_timeout: Some(Duration::from_millis(30)),
            ..BuilderConfig::default()
        },
        Gated {
            gate: gate_rx,
            calls: AtomicUsize::new(0),
        },
    )
    .unwrap();

    let err = builder
        .transform_row_by_row(&striped(2), tile8(), |_| {})
        .unwrap_err();
    assert!(matches!(
        err,
        MosaicError::Task {
            row: 0,
            source: TaskError::TimedOut(_)
        }
    ));
}

// --- Input and guard ---

#[test]
fn image_smaller_than_a_tile_is_an_input_error() {
    let builder = MosaicBuilder::new(BuilderConfig::default(), ShapeResolver::default()).unwrap();
    let img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
    let err = builder
        .start(&img, TileSize::new(16, 16).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(!builder.is_busy());
}

#[test]
fn one_job_per_builder_at_a_time() {
    let builder = MosaicBuilder::new(BuilderConfig::default(), ShapeResolver::default()).unwrap();
    let img = striped(2);

    let first = builder.start(&img, tile8()).unwrap();
    assert!(builder.is_busy());
    assert!(matches!(builder.start(&img, tile8()), Err(MosaicError::Busy)));

    drop(first);
    assert!(!builder.is_busy());
    let mut second = builder.start(&img, tile8()).unwrap();
    second.run(|_| {}).unwrap();
}

#[test]
fn independent_builders_run_concurrently() {
    let handles: Vec<_> = (0..3)
        .map(|_| {
            thread::spawn(|| {
                let builder =
                    MosaicBuilder::new(config(2), ShapeResolver::default()).unwrap();
                let mut delivered = Vec::new();
                builder
                    .transform_row_by_row(&striped(8), tile8(), |row| delivered.push(row.index))
                    .unwrap();
                delivered
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), (0..8).collect::<Vec<_>>());
    }
}

// --- Resolve stages ---

#[test]
fn skip_stage_delivers_colors_without_tiles() {
    let builder = MosaicBuilder::new(
        BuilderConfig {
            resolve_stage: ResolveStage::Skip,
            ..BuilderConfig::default()
        },
        FailOn(0),
    )
    .unwrap();
    let mut cells = 0;
    builder
        .transform_row_by_row(&striped(3), tile8(), |row| {
            for cell in &row.cells {
                assert!(cell.color.is_some());
                assert!(cell.tile.is_none());
                cells += 1;
            }
        })
        .unwrap();
    assert_eq!(cells, 3);
}

#[test]
fn orchestrator_stage_resolves_on_the_calling_thread() {
    struct RecordThread(Mutex<Vec<thread::ThreadId>>);

    impl TileResolver for RecordThread {
        fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
            self.0.lock().unwrap().push(thread::current().id());
            ShapeResolver::default().resolve(key, size)
        }
    }

    let resolver = Arc::new(RecordThread(Mutex::new(Vec::new())));
    let builder = MosaicBuilder::new(
        BuilderConfig {
            resolve_stage: ResolveStage::InOrchestrator,
            ..BuilderConfig::default()
        },
        Arc::clone(&resolver),
    )
    .unwrap();
    builder
        .transform_row_by_row(&striped(3), tile8(), |row| {
            assert!(row.cells.iter().all(|c| c.tile.is_some()));
        })
        .unwrap();

    let me = thread::current().id();
    let threads = resolver.0.lock().unwrap();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|id| *id == me));
}
