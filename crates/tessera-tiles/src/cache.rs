//! Memoising resolver wrapper.
//!
//! Images with large flat areas produce the same color key many times.
//! [`CachedResolver`] resolves each `(key, size)` pair once and hands out
//! shared handles to the same pixels afterwards. Failures are not cached,
//! so a later request for the same key retries the inner resolver.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_pipeline::{ColorKey, Tile, TileSize};

use crate::resolver::{ResolveError, TileResolver};

/// Hit and miss counters of a [`CachedResolver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from the cache.
    pub hits: usize,
    /// Requests forwarded to the inner resolver.
    pub misses: usize,
}

/// Wraps a resolver and remembers every tile it produced.
#[derive(Debug)]
pub struct CachedResolver<R> {
    inner: R,
    tiles: Mutex<HashMap<(ColorKey, TileSize), Tile>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<R: TileResolver> CachedResolver<R> {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            tiles: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Current hit and miss counts.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of distinct tiles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The wrapped resolver.
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }

    // The map stays consistent even if a holder panicked: every insert is
    // a single `entry` call.
    fn lock(&self) -> MutexGuard<'_, HashMap<(ColorKey, TileSize), Tile>> {
        self.tiles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: TileResolver> TileResolver for CachedResolver<R> {
    fn resolve(&self, key: ColorKey, size: TileSize) -> Result<Tile, ResolveError> {
        let cached = self.lock().get(&(key, size)).cloned();
        if let Some(tile) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(tile);
        }

        // Resolve without holding the lock; two workers racing on the same
        // key both render, and the first insert wins.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let tile = self.inner.resolve(key, size)?;
        let mut tiles = self.lock();
        let stored = tiles.entry((key, size)).or_insert(tile).clone();
        log::trace!("cached tile {key} ({} total)", tiles.len());
        Ok(stored)
    }
}
