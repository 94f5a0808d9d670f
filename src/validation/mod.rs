//! Error taxonomy for the positioning engine

pub mod error;

pub use error::{ErrorSeverity, PositioningError, PositioningResult};
