//! The work a pool worker performs on one row.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_pipeline::{Row, TileSize, average_color_key};
use tessera_tiles::TileResolver;

use crate::error::TaskError;
use crate::pool::AbortSignal;

/// Where tiles are resolved for each cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveStage {
    /// On the worker thread, right after the color key is computed.
    #[default]
    #[serde(rename = "worker")]
    InWorker,
    /// On the orchestrating thread, after the row comes back and before
    /// it is delivered.
    #[serde(rename = "orchestrator")]
    InOrchestrator,
    /// Never; cells carry color keys only.
    #[serde(rename = "skip")]
    Skip,
}

/// Everything a worker needs to process a row, shared by all workers.
pub struct RowContext {
    tile: TileSize,
    sample_stride: usize,
    stage: ResolveStage,
    resolver: Arc<dyn TileResolver>,
}

impl RowContext {
    /// Bundle the per-job row parameters.
    #[must_use]
    pub fn new(
        tile: TileSize,
        sample_stride: usize,
        stage: ResolveStage,
        resolver: Arc<dyn TileResolver>,
    ) -> Self {
        Self {
            tile,
            sample_stride,
            stage,
            resolver,
        }
    }

    /// Configured resolve stage.
    #[must_use]
    pub const fn stage(&self) -> ResolveStage {
        self.stage
    }

    /// Attach a color key to every cell of `row` and, for
    /// [`ResolveStage::InWorker`], its resolved tile.
    ///
    /// `signal` is checked before each cell so a terminated pool stops
    /// the row early.
    ///
    /// # Errors
    ///
    /// [`TaskError::Aborted`] once `signal` is raised, or
    /// [`TaskError::Resolve`] for the first cell the resolver rejects.
    pub fn compute_row(&self, mut row: Row, signal: &AbortSignal) -> Result<Row, TaskError> {
        for cell in &mut row.cells {
            if signal.is_aborted() {
                return Err(TaskError::Aborted);
            }
            let key = average_color_key(&cell.pixels, self.sample_stride);
            cell.color = Some(key);
            if self.stage == ResolveStage::InWorker {
                let tile = self
                    .resolver
                    .resolve(key, self.tile)
                    .map_err(|source| TaskError::Resolve {
                        col: cell.col,
                        source,
                    })?;
                cell.tile = Some(tile);
            }
        }
        Ok(row)
    }

    /// Resolve tiles for a row whose color keys are already attached.
    ///
    /// Used for [`ResolveStage::InOrchestrator`]; cells without a color
    /// key are left as they are.
    ///
    /// # Errors
    ///
    /// [`TaskError::Resolve`] for the first cell the resolver rejects.
    pub fn resolve_row(&self, row: &mut Row) -> Result<(), TaskError> {
        for cell in &mut row.cells {
            let Some(key) = cell.color else { continue };
            let tile = self
                .resolver
                .resolve(key, self.tile)
                .map_err(|source| TaskError::Resolve {
                    col: cell.col,
                    source,
                })?;
            cell.tile = Some(tile);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowContext")
            .field("tile", &self.tile)
            .field("sample_stride", &self.sample_stride)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}
