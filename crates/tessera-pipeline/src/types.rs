//! Shared types for the tessera mosaic pipeline.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` and its pixel type so downstream crates can
/// hand images to the pipeline without depending on `image` directly.
pub use image::{Rgba, RgbaImage};

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Size of one mosaic tile in pixels.
///
/// Both sides are guaranteed non-zero; construct through [`TileSize::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Dimensions", into = "Dimensions")]
pub struct TileSize {
    width: u32,
    height: u32,
}

impl TileSize {
    /// Create a tile size.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTileSize`] if either side is zero.
    pub const fn new(width: u32, height: u32) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidTileSize { width, height });
        }
        Ok(Self { width, height })
    }

    /// Tile width in pixels.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.width
    }

    /// Tile height in pixels.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.height
    }
}

impl TryFrom<Dimensions> for TileSize {
    type Error = PipelineError;

    fn try_from(d: Dimensions) -> Result<Self, Self::Error> {
        Self::new(d.width, d.height)
    }
}

impl From<TileSize> for Dimensions {
    fn from(t: TileSize) -> Self {
        Self {
            width: t.width,
            height: t.height,
        }
    }
}

/// The representative color of a cell, used to select a tile asset.
///
/// Displays (and serializes) as six lowercase hex digits without a
/// leading `#`, e.g. `ff0000` for pure red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ColorKey([u8; 3]);

impl ColorKey {
    /// Create a key from its red, green and blue channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// The `[r, g, b]` channels.
    #[must_use]
    pub const fn rgb(self) -> [u8; 3] {
        self.0
    }

    /// The key as an opaque RGBA pixel.
    #[must_use]
    pub const fn to_rgba(self) -> Rgba<u8> {
        let [r, g, b] = self.0;
        Rgba([r, g, b, 255])
    }
}

impl fmt::Display for ColorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "{r:02x}{g:02x}{b:02x}")
    }
}

/// Error returned when a string is not a six-digit hex color key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color key {0:?}: expected six hex digits")]
pub struct ParseColorKeyError(String);

impl FromStr for ColorKey {
    type Err = ParseColorKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorKeyError(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ParseColorKeyError(s.to_string()))
        };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl From<ColorKey> for String {
    fn from(key: ColorKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ColorKey {
    type Error = ParseColorKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Geometry of the drawable shape inside each tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileShape {
    /// The tile is filled edge to edge.
    #[default]
    Square,
    /// The ellipse inscribed in the tile is filled; corners stay transparent.
    Ellipse,
}

/// A rendered tile asset.
///
/// Cloning is cheap: the pixels are shared, so one resolved tile can be
/// attached to every cell with the same color key.
#[derive(Debug, Clone)]
pub struct Tile(Arc<RgbaImage>);

impl Tile {
    /// Wrap a rendered image.
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self(Arc::new(image))
    }

    /// The tile pixels.
    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    /// Whether both handles point at the same pixels.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One tile-sized region of the source image.
///
/// The pixel block is an owned copy so the cell can be moved to a worker
/// thread without borrowing the caller's image.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Row index in the slice matrix.
    pub row: usize,
    /// Column index in the slice matrix.
    pub col: usize,
    /// Left edge in source image pixels.
    pub x: u32,
    /// Top edge in source image pixels.
    pub y: u32,
    /// Cell width in pixels.
    pub width: u32,
    /// Cell height in pixels.
    pub height: u32,
    /// Copy of the source pixels covered by this cell.
    pub pixels: RgbaImage,
    /// Average color, attached by a worker.
    pub color: Option<ColorKey>,
    /// Resolved tile, attached by a worker or by the orchestrator.
    pub tile: Option<Tile>,
}

impl Cell {
    /// Placement summary for reports and exports.
    ///
    /// Returns `None` until a color key has been attached.
    #[must_use]
    pub fn record(&self) -> Option<CellRecord> {
        self.color.map(|color| CellRecord {
            row: self.row,
            col: self.col,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            color,
        })
    }
}

/// Serializable placement of a colorized cell, without pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    /// Row index in the slice matrix.
    pub row: usize,
    /// Column index in the slice matrix.
    pub col: usize,
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Computed color key.
    pub color: ColorKey,
}

/// Cells sharing a row index, in column order.
///
/// A row is the unit of work handed to a worker and the unit of
/// progressive delivery to the caller.
#[derive(Debug, Clone)]
pub struct Row {
    /// Row index in the slice matrix (top row is 0).
    pub index: usize,
    /// Cells in column order.
    pub cells: Vec<Cell>,
}

impl Row {
    /// Number of cells in the row.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if the row has no cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Placement records of every colorized cell.
    #[must_use]
    pub fn records(&self) -> Vec<CellRecord> {
        self.cells.iter().filter_map(Cell::record).collect()
    }
}

/// Errors that can occur before any work is scheduled.
///
/// Every variant is an input error: nothing has been started when one is
/// returned.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// A tile side was zero.
    #[error("invalid tile size {width}x{height}: both sides must be non-zero")]
    InvalidTileSize {
        /// Requested tile width.
        width: u32,
        /// Requested tile height.
        height: u32,
    },

    /// The image is smaller than a single tile in at least one direction.
    #[error("image {width}x{height} contains no whole {tile_width}x{tile_height} tile")]
    NoCells {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
        /// Tile width.
        tile_width: u32,
        /// Tile height.
        tile_height: u32,
    },
}
