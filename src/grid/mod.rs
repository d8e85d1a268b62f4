//! Classification grid: tile coordinates, labels, the dense index view and
//! the persisted prediction table.

mod classification;
mod coord;
mod index;
mod table;

pub use classification::{majority_label, ClassificationGrid, Label};
pub use coord::{ParseCoordError, TileCoord};
pub use index::{GridIndex, NO_DATA};
pub use table::{PredictionRecord, PredictionTable};
