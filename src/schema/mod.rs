//! Schema inference, additive evolution and versioned persistence.

pub mod evolution;
pub mod hints;
pub mod inference;
pub mod store;
pub mod tracker;
pub mod types;

pub use evolution::SchemaChange;
pub use hints::SchemaHints;
pub use inference::ColumnObservations;
pub use store::SchemaStore;
pub use tracker::{InferenceSettings, SchemaTracker};
pub use types::{Column, ColumnType, SchemaVersion};
