//! tessera-pipeline: Pure mosaic data model and leaf algorithms (sans-IO).
//!
//! Turns an image into the units of work the row pipeline schedules:
//! decode -> slice into rows of cells -> average color key per cell ->
//! paint delivered rows into the output canvas.
//!
//! This crate has **no I/O and no threads** -- it operates on in-memory
//! images and returns structured data. Scheduling lives in
//! `tessera-worker`, tile rendering in `tessera-tiles`.

pub mod color;
pub mod compose;
pub mod decode;
pub mod report;
pub mod slice;
pub mod types;

pub use color::{DEFAULT_SAMPLE_STRIDE, average_color_key};
pub use compose::MosaicCanvas;
pub use decode::decode_image;
pub use report::MosaicReport;
pub use slice::{grid, slice};
pub use types::{
    Cell, CellRecord, ColorKey, Dimensions, ParseColorKeyError, PipelineError, Rgba, RgbaImage,
    Row, Tile, TileShape, TileSize,
};
