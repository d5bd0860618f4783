//! Partition an image into a row-major matrix of fixed-size cells.
//!
//! Only whole tiles are produced: `floor(height / tile_height)` rows of
//! `floor(width / tile_width)` cells. The remainder strip on the right and
//! bottom edges is dropped.

use image::RgbaImage;
use image::imageops;

use crate::types::{Cell, Dimensions, Row, TileSize};

/// Number of `(rows, columns)` whole tiles that fit in `dimensions`.
#[must_use]
pub const fn grid(dimensions: Dimensions, tile: TileSize) -> (u32, u32) {
    (
        dimensions.height / tile.height(),
        dimensions.width / tile.width(),
    )
}

/// Slice `image` into rows of tile-sized cells.
///
/// Each cell carries its own copy of the pixel block at
/// `(col * tile_width, row * tile_height)`. Rows are returned top to
/// bottom, cells left to right. A row may be empty when the image is
/// narrower than one tile.
#[must_use]
pub fn slice(image: &RgbaImage, tile: TileSize) -> Vec<Row> {
    let dimensions = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let (rows, cols) = grid(dimensions, tile);
    let (tw, th) = (tile.width(), tile.height());

    (0..rows)
        .map(|r| {
            let cells = (0..cols)
                .map(|c| {
                    let x = c * tw;
                    let y = r * th;
                    Cell {
                        row: r as usize,
                        col: c as usize,
                        x,
                        y,
                        width: tw,
                        height: th,
                        pixels: imageops::crop_imm(image, x, y, tw, th).to_image(),
                        color: None,
                        tile: None,
                    }
                })
                .collect();
            Row {
                index: r as usize,
                cells,
            }
        })
        .collect()
}
