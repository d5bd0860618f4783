//! Locally rendered tiles.
//!
//! [`ShapeResolver`] draws a [`TileShape`] filled with the key color using
//! `tiny-skia`, which handles anti-aliasing of the ellipse edge.

use tessera_pipeline::{ColorKey, Rgba, RgbaImage, Tile, TileShape, TileSize};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

use crate::resolver::{ResolveError, TileResolver};

/// Renders a solid shape in the key color for every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeResolver {
    shape: TileShape,
}

impl ShapeResolver {
    /// Create a resolver drawing `shape`.
    #[must_use]
    pub const fn new(shape: TileShape) -> Self {
        Self { shape }
    }

    /// The shape this resolver draws.
    #[must_use]
    pub const fn shape(&self) -> TileShape {
        self.shape
    }
}

impl TileResolver for ShapeResolver {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        render_shape(self.shape, key, size).map(Tile::new)
    }
}

/// Render `shape` in `key`'s color onto a transparent `size` image.
///
/// # Errors
///
/// Returns [`ResolveError::Render`] if `tiny-skia` cannot allocate the
/// pixmap or build the shape path.
#[allow(clippy::cast_precision_loss)]
pub fn render_shape(
    shape: TileShape,
    key: ColorKey,
    size: TileSize,
) -> Result<RgbaImage, ResolveError> {
    let (width, height) = (size.width(), size.height());
    let render_error = || ResolveError::Render {
        key,
        size_w: width,
        size_h: height,
    };

    let mut pixmap = Pixmap::new(width, height).ok_or_else(render_error)?;
    let [r, g, b] = key.rgb();

    match shape {
        TileShape::Square => pixmap.fill(Color::from_rgba8(r, g, b, 255)),
        TileShape::Ellipse => {
            let rect = Rect::from_xywh(0.0, 0.0, width as f32, height as f32)
                .ok_or_else(render_error)?;
            let path = PathBuilder::from_oval(rect).ok_or_else(render_error)?;

            let mut paint = Paint::default();
            paint.set_color_rgba8(r, g, b, 255);
            paint.anti_alias = true;

            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    Ok(unpremultiply(&pixmap))
}

/// Convert a pixmap (premultiplied RGBA) to an `RgbaImage` (straight RGBA).
#[allow(clippy::cast_possible_truncation)]
fn unpremultiply(pixmap: &Pixmap) -> RgbaImage {
    let data = pixmap.data();
    let mut img = RgbaImage::new(pixmap.width(), pixmap.height());
    for (i, pixel) in img.pixels_mut().enumerate() {
        let off = i * 4;
        let a = data[off + 3];
        if a == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
        } else {
            // channel = premultiplied * 255 / alpha
            let r = u16::from(data[off]) * 255 / u16::from(a);
            let g = u16::from(data[off + 1]) * 255 / u16::from(a);
            let b = u16::from(data[off + 2]) * 255 / u16::from(a);
            *pixel = Rgba([r as u8, g as u8, b as u8, a]);
        }
    }
    img
}
