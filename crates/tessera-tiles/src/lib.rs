//! tessera-tiles: Tile resolvers for tessera mosaics.
//!
//! A resolver supplies the drawable tile for a cell's color key. This
//! crate provides the [`TileResolver`] contract, a locally rendered
//! [`ShapeResolver`], and a memoising [`CachedResolver`] wrapper.

pub mod cache;
pub mod resolver;
pub mod shape;

pub use cache::{CacheStats, CachedResolver};
pub use resolver::{ResolveError, TileResolver};
pub use shape::{ShapeResolver, render_shape};
