//! SVG export serializer.
//!
//! Converts colorized cell records into an SVG string using the [`svg`]
//! crate for document construction and XML escaping. Each cell becomes
//! one `<rect>` (for [`TileShape::Square`]) or one `<ellipse>` inscribed
//! in the cell (for [`TileShape::Ellipse`]), filled with the cell's
//! color key.
//!
//! Optional [`SvgMetadata`] embeds `<title>` and `<desc>` elements.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::Text;
use svg::node::element::{Description, Ellipse, Rectangle, Title};

use tessera_pipeline::{CellRecord, Dimensions, TileShape};

/// Metadata to embed in the SVG document.
///
/// When present, a `<title>` and/or `<desc>` element is emitted
/// immediately after the opening `<svg>` tag. Text values are
/// XML-escaped by the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, typically the source image file stem.
    pub title: Option<&'a str>,

    /// Document description, typically the tile size and worker count.
    pub description: Option<&'a str>,
}

/// Serialize cell records as an SVG mosaic.
///
/// `dimensions` is the mosaic canvas size and becomes the document
/// `width`, `height` and `viewBox`. Cells are emitted in slice order,
/// so later rows paint over earlier ones exactly as the raster canvas
/// does.
#[must_use]
pub fn to_svg(
    cells: &[CellRecord],
    dimensions: Dimensions,
    metadata: &SvgMetadata<'_>,
    shape: TileShape,
) -> String {
    let (w, h) = (dimensions.width, dimensions.height);
    let mut doc = Document::new()
        .set("width", w)
        .set("height", h)
        .set("viewBox", (0, 0, w, h));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }

    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }

    for cell in cells {
        let fill = format!("#{}", cell.color);
        doc = match shape {
            TileShape::Square => doc.add(
                Rectangle::new()
                    .set("x", cell.x)
                    .set("y", cell.y)
                    .set("width", cell.width)
                    .set("height", cell.height)
                    .set("fill", fill),
            ),
            TileShape::Ellipse => {
                let rx = f64::from(cell.width) / 2.0;
                let ry = f64::from(cell.height) / 2.0;
                doc.add(
                    Ellipse::new()
                        .set("cx", f64::from(cell.x) + rx)
                        .set("cy", f64::from(cell.y) + ry)
                        .set("rx", rx)
                        .set("ry", ry)
                        .set("fill", fill),
                )
            }
        };
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
