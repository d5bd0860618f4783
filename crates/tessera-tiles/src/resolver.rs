//! The tile resolver contract.
//!
//! A resolver turns a [`ColorKey`] into a drawable [`Tile`]. The row
//! pipeline shares one resolver between all worker threads, so
//! implementations must be `Send + Sync`. A resolver may render locally,
//! serve from a cache, or fetch from elsewhere; callers only see the
//! result.

use std::sync::Arc;

use tessera_pipeline::{ColorKey, Tile, TileSize};

/// Errors a resolver can report for a single key.
///
/// A failure concerns one cell only; other cells keep their own results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The tile could not be rendered.
    #[error("failed to render {size_w}x{size_h} tile for {key}")]
    Render {
        /// Requested color key.
        key: ColorKey,
        /// Requested tile width.
        size_w: u32,
        /// Requested tile height.
        size_h: u32,
    },

    /// The backing source has no tile for this key.
    #[error("no tile available for {key}: {reason}")]
    Unavailable {
        /// Requested color key.
        key: ColorKey,
        /// Why the source could not supply it.
        reason: String,
    },
}

/// Supplies a drawable tile for a color key.
pub trait TileResolver: Send + Sync {
    /// Resolve the tile for `key`, sized `size`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when no tile can be produced.
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError>;
}

impl<R: TileResolver + ?Sized> TileResolver for Arc<R> {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        (**self).resolve(key, size)
    }
}

impl<R: TileResolver + ?Sized> TileResolver for Box<R> {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        (**self).resolve(key, size)
    }
}
