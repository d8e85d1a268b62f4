//! Tile coordinates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Full-resolution origin `(y, x)` of one grid cell.
///
/// Ordered row-major (by `y`, then `x`). The textual key `"{y}_{x}"` is what
/// tile files and prediction tables use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TileCoord {
    pub y: i64,
    pub x: i64,
}

impl TileCoord {
    pub const fn new(y: i64, x: i64) -> Self {
        Self { y, x }
    }

    /// Coordinate `dy` rows and `dx` columns away on a lattice of `step`.
    pub fn offset(&self, dy: i64, dx: i64, step: i64) -> Self {
        Self {
            y: self.y + dy * step,
            x: self.x + dx * step,
        }
    }

    /// The eight lattice neighbors, row-major.
    pub fn neighbors(&self, step: i64) -> [TileCoord; 8] {
        [
            self.offset(-1, -1, step),
            self.offset(-1, 0, step),
            self.offset(-1, 1, step),
            self.offset(0, -1, step),
            self.offset(0, 1, step),
            self.offset(1, -1, step),
            self.offset(1, 0, step),
            self.offset(1, 1, step),
        ]
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.y, self.x)
    }
}

/// A tile key that is not of the form `"{y}_{x}"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid tile key '{0}': expected '{{y}}_{{x}}'")]
pub struct ParseCoordError(pub String);

impl FromStr for TileCoord {
    type Err = ParseCoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Tolerate a file extension, e.g. "1024_2048.png"
        let stem = s.trim().rsplit_once('.').map_or(s.trim(), |(stem, _)| stem);
        let (y, x) = stem
            .split_once('_')
            .ok_or_else(|| ParseCoordError(s.to_string()))?;
        match (y.parse(), x.parse()) {
            (Ok(y), Ok(x)) => Ok(Self { y, x }),
            _ => Err(ParseCoordError(s.to_string())),
        }
    }
}
