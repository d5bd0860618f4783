//! Serializable summary of a finished mosaic.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{CellRecord, Dimensions, TileSize};

/// Serde support for `std::time::Duration` as fractional seconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Fails for negative, non-finite, or out-of-range values.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Serde support for `Option<std::time::Duration>` as optional fractional
/// seconds. `None` serializes as `null`.
pub mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize an optional `Duration` as fractional seconds or `null`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    /// Deserialize an optional `Duration` from fractional seconds or `null`.
    ///
    /// # Errors
    ///
    /// Fails for negative, non-finite, or out-of-range values.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(|_| {
                serde::de::Error::custom(
                    "duration seconds must be finite, non-negative, and representable as a Duration",
                )
            })
    }
}

/// Everything needed to reproduce a mosaic without its pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicReport {
    /// Source image dimensions.
    pub source: Dimensions,
    /// Tile size used for slicing.
    pub tile: TileSize,
    /// Mosaic dimensions (whole tiles only).
    pub mosaic: Dimensions,
    /// Number of rows delivered.
    pub rows: usize,
    /// Number of worker threads.
    pub workers: usize,
    /// Wall-clock duration of the job (seconds).
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    /// Colorized cells in delivery order.
    pub cells: Vec<CellRecord>,
}

impl MosaicReport {
    /// Human-readable one-paragraph summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}x{} image -> {}x{} mosaic of {} cells ({} rows, {}x{} tiles, {} workers) in {:.3}s",
            self.source.width,
            self.source.height,
            self.mosaic.width,
            self.mosaic.height,
            self.cells.len(),
            self.rows,
            self.tile.width(),
            self.tile.height(),
            self.workers,
            self.elapsed.as_secs_f64(),
        )
    }
}
