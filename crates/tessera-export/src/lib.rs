//! tessera-export: Pure format serializers (sans-IO)
//!
//! Converts delivered cell records into output formats. Currently
//! supports SVG.

pub mod svg;

pub use svg::{SvgMetadata, to_svg};
