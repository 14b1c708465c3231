//! Per-subject identity and the tile records that flow between steps.

pub mod subject;
pub mod table;
pub mod tile;

pub use subject::{CalibrationOffset, SubjectDescriptor};
pub use table::{read_records, write_records};
pub use tile::{Score, TileRecord, TransformedCoordinate};
