//! tessera: turn an image into a tiled color mosaic.
//!
//! Decodes the input image, runs one row-pipeline job over it, paints
//! each row into the output canvas as soon as it is delivered, and saves
//! the result as a PNG. Optionally writes an SVG rendition of the same
//! mosaic and prints a JSON report.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin tessera -- [OPTIONS] <IMAGE_PATH> -o <OUT.png>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Ctrl-C cancels the
//! render; rows already painted are discarded and nothing is written.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tessera_pipeline::{
    CellRecord, Dimensions, MosaicCanvas, MosaicReport, TileShape, TileSize,
};
use tessera_tiles::{CachedResolver, ShapeResolver};
use tessera_worker::{
    BuilderConfig, Completion, Job, MosaicBuilder, MosaicError, ResolveStage,
};

/// Default tile side in pixels.
const DEFAULT_TILE_SIZE: u32 = 16;

/// Build a tiled color mosaic from an image.
///
/// The image is cut into whole tiles (any partial strip on the right or
/// bottom is dropped), each tile's average color is computed on a pool
/// of worker threads, and rows are assembled top to bottom.
#[derive(Parser)]
#[command(name = "tessera", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Where to write the mosaic PNG.
    #[arg(short, long)]
    output: PathBuf,

    /// Tile width in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    tile_width: u32,

    /// Tile height in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    tile_height: u32,

    /// Number of worker threads.
    #[arg(long, default_value_t = BuilderConfig::DEFAULT_WORKERS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    workers: usize,

    /// Sample every Nth pixel of a tile when averaging its color.
    #[arg(long, default_value_t = BuilderConfig::DEFAULT_SAMPLE_STRIDE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    sample_stride: usize,

    /// Shape drawn in each tile.
    #[arg(long, value_enum, default_value_t = Shape::Square)]
    shape: Shape,

    /// Where tiles are resolved.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_STAGE)]
    resolve_stage: Stage,

    /// Fail if no worker reports back within this many milliseconds.
    #[arg(long)]
    task_timeout_ms: Option<u64>,

    /// Also write the mosaic as SVG to this path.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Print a JSON report of every cell to stdout.
    #[arg(long)]
    json: bool,

    /// Full builder config as a JSON string.
    ///
    /// When provided, `--workers`, `--sample-stride`, `--resolve-stage`
    /// and `--task-timeout-ms` are ignored. The JSON must be a valid
    /// `BuilderConfig` serialization; missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Tile shape selection.
#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    /// Fill the whole tile.
    Square,
    /// Fill the ellipse inscribed in the tile.
    Ellipse,
}

/// Resolve stage selection.
#[derive(Clone, Copy, ValueEnum)]
enum Stage {
    /// Resolve tiles on the worker threads.
    Worker,
    /// Resolve tiles on the main thread before painting each row.
    Orchestrator,
    /// Paint flat colors; never resolve tiles.
    Skip,
}

/// Maps a [`ResolveStage`] to the local CLI [`Stage`] enum.
const fn stage_from_config(stage: ResolveStage) -> Stage {
    match stage {
        ResolveStage::InWorker => Stage::Worker,
        ResolveStage::InOrchestrator => Stage::Orchestrator,
        ResolveStage::Skip => Stage::Skip,
    }
}

/// The CLI default stage, derived from [`BuilderConfig::DEFAULT_RESOLVE_STAGE`]
/// so the two cannot silently diverge.
const CLI_DEFAULT_STAGE: Stage = stage_from_config(BuilderConfig::DEFAULT_RESOLVE_STAGE);

/// Build a [`BuilderConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual pipeline flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<BuilderConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(BuilderConfig {
        workers: cli.workers,
        sample_stride: cli.sample_stride,
        resolve_stage: match cli.resolve_stage {
            Stage::Worker => ResolveStage::InWorker,
            Stage::Orchestrator => ResolveStage::InOrchestrator,
            Stage::Skip => ResolveStage::Skip,
        },
        task_timeout: cli.task_timeout_ms.map(Duration::from_millis),
    })
}

/// Run `job`, painting each delivered row into `canvas` and collecting
/// its cell records.
fn paint_job(
    job: &mut Job,
    canvas: &mut MosaicCanvas,
    cells: &mut Vec<CellRecord>,
) -> Result<Completion, MosaicError> {
    job.run(|row| {
        canvas.paint_row(&row);
        cells.extend(row.records());
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let tile = match TileSize::new(cli.tile_width, cli.tile_height) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let image = match tessera_pipeline::decode_image(&image_bytes) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let shape = match cli.shape {
        Shape::Square => TileShape::Square,
        Shape::Ellipse => TileShape::Ellipse,
    };
    let resolver = Arc::new(CachedResolver::new(ShapeResolver::new(shape)));
    let builder = match MosaicBuilder::new(config, Arc::clone(&resolver)) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let source = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    eprintln!(
        "Image: {} ({}x{}, {} bytes)",
        cli.image_path.display(),
        source.width,
        source.height,
        image_bytes.len(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!();

    let mut job = match builder.start(&image, tile) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let canceller = job.canceller();
    if let Err(e) = ctrlc::set_handler(move || canceller.cancel()) {
        log::warn!("Ctrl-C will not cancel the render: {e}");
    }

    let mut canvas = MosaicCanvas::new(source, tile);
    let mut cells = Vec::new();
    let outcome = paint_job(&mut job, &mut canvas, &mut cells);
    let completion = match outcome {
        Ok(done) => done,
        Err(e) if e.is_interrupted() => {
            eprintln!("Render interrupted after {} rows", canvas.rows_painted());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let stats = resolver.stats();
    log::debug!(
        "tile cache: {} hits, {} misses, {} tiles",
        stats.hits,
        stats.misses,
        resolver.len()
    );

    if let Err(e) = canvas.image().save(&cli.output) {
        eprintln!("Error writing {}: {e}", cli.output.display());
        return ExitCode::FAILURE;
    }
    eprintln!("Completed in {:.3}s", completion.elapsed.as_secs_f64());
    eprintln!("Mosaic written to {}", cli.output.display());

    if let Some(ref svg_path) = cli.svg {
        let title = cli
            .image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mosaic");
        let desc = format!(
            "{}x{} tiles, {} workers",
            tile.width(),
            tile.height(),
            config.workers
        );
        let metadata = tessera_export::SvgMetadata {
            title: Some(title),
            description: Some(&desc),
        };
        let svg = tessera_export::to_svg(&cells, canvas.dimensions(), &metadata, shape);
        match std::fs::write(svg_path, &svg) {
            Ok(()) => {
                eprintln!(
                    "SVG written to {} ({} bytes)",
                    svg_path.display(),
                    svg.len(),
                );
            }
            Err(e) => {
                eprintln!("Error writing SVG to {}: {e}", svg_path.display());
            }
        }
    }

    if cli.json {
        let report = MosaicReport {
            source,
            tile,
            mosaic: canvas.dimensions(),
            rows: completion.rows,
            workers: config.workers,
            elapsed: completion.elapsed,
            cells,
        };
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                return ExitCode::FAILURE;
            }
        }
        eprintln!("{}", report.summary());
    }

    ExitCode::SUCCESS
}
