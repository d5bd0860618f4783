//! Reassemble colorized rows into the output mosaic.
//!
//! The canvas covers only whole tiles, so it is `cols * tile_width` by
//! `rows * tile_height` pixels. Rows can be painted in any order, but the
//! row pipeline delivers them top to bottom so callers can show progress.

use image::{RgbaImage, imageops};

use crate::slice::grid;
use crate::types::{Dimensions, Row, TileSize};

/// Output image that rows are painted into as they arrive.
#[derive(Debug, Clone)]
pub struct MosaicCanvas {
    image: RgbaImage,
    rows_painted: usize,
}

impl MosaicCanvas {
    /// Create a transparent canvas for an image of `source` dimensions.
    #[must_use]
    pub fn new(source: Dimensions, tile: TileSize) -> Self {
        let (rows, cols) = grid(source, tile);
        Self {
            image: RgbaImage::new(cols * tile.width(), rows * tile.height()),
            rows_painted: 0,
        }
    }

    /// Canvas dimensions in pixels.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.image.width(),
            height: self.image.height(),
        }
    }

    /// Number of rows painted so far.
    #[must_use]
    pub const fn rows_painted(&self) -> usize {
        self.rows_painted
    }

    /// Paint every cell of `row` at its origin.
    ///
    /// Cells with a tile have the tile composited over the canvas. Cells
    /// with a color but no tile are filled with the flat color. Cells
    /// without a color are skipped.
    pub fn paint_row(&mut self, row: &Row) {
        for cell in &row.cells {
            if let Some(tile) = &cell.tile {
                imageops::overlay(
                    &mut self.image,
                    tile.image(),
                    i64::from(cell.x),
                    i64::from(cell.y),
                );
            } else if let Some(color) = cell.color {
                let pixel = color.to_rgba();
                let x_end = (cell.x + cell.width).min(self.image.width());
                let y_end = (cell.y + cell.height).min(self.image.height());
                for y in cell.y..y_end {
                    for x in cell.x..x_end {
                        self.image.put_pixel(x, y, pixel);
                    }
                }
            }
        }
        self.rows_painted += 1;
    }

    /// Borrow the canvas pixels.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Consume the canvas and return the mosaic image.
    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Cell, ColorKey, Tile};

    fn colored_cell(row: usize, col: usize, size: u32, color: Option<ColorKey>) -> Cell {
        let x = u32::try_from(col).unwrap() * size;
        let y = u32::try_from(row).unwrap() * size;
        Cell {
            row,
            col,
            x,
            y,
            width: size,
            height: size,
            pixels: RgbaImage::new(size, size),
            color,
            tile: None,
        }
    }

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn canvas_excludes_remainder_strip() {
        let canvas = MosaicCanvas::new(dims(100, 50), TileSize::new(30, 20).unwrap());
        assert_eq!(canvas.dimensions(), dims(90, 40));
    }

    #[test]
    fn flat_color_fills_cell() {
        let tile = TileSize::new(4, 4).unwrap();
        let mut canvas = MosaicCanvas::new(dims(8, 4), tile);
        let row = Row {
            index: 0,
            cells: vec![
                colored_cell(0, 0, 4, Some(ColorKey::new(255, 0, 0))),
                colored_cell(0, 1, 4, None),
            ],
        };
        canvas.paint_row(&row);
        let img = canvas.into_image();
        assert_eq!(img.get_pixel(3, 3).0, [255, 0, 0, 255]);
        // Uncolored cell is left transparent.
        assert_eq!(img.get_pixel(4, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn tile_is_drawn_at_cell_origin() {
        let tile_size = TileSize::new(2, 2).unwrap();
        let mut canvas = MosaicCanvas::new(dims(4, 4), tile_size);
        let mut cell = colored_cell(1, 1, 2, Some(ColorKey::new(0, 0, 255)));
        cell.tile = Some(Tile::new(RgbaImage::from_pixel(
            2,
            2,
            image::Rgba([0, 255, 0, 255]),
        )));
        canvas.paint_row(&Row {
            index: 1,
            cells: vec![cell],
        });
        assert_eq!(canvas.rows_painted(), 1);
        let img = canvas.image();
        // The tile wins over the flat color.
        assert_eq!(img.get_pixel(2, 2).0, [0, 255, 0, 255]);
        assert_eq!(img.get_pixel(3, 3).0, [0, 255, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn transparent_tile_pixels_keep_background() {
        let tile_size = TileSize::new(2, 1).unwrap();
        let mut canvas = MosaicCanvas::new(dims(2, 1), tile_size);
        let mut cell = colored_cell(0, 0, 1, None);
        cell.width = 2;
        cell.tile = Some(Tile::new(RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgba([9, 9, 9, 255])
            } else {
                image::Rgba([0, 0, 0, 0])
            }
        })));
        canvas.paint_row(&Row {
            index: 0,
            cells: vec![cell],
        });
        let img = canvas.into_image();
        assert_eq!(img.get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(img.get_pixel(1, 0).0[3], 0);
    }
}
