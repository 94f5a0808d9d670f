//! Core types, constants and the anchor table

pub mod types;
pub mod constants;
pub mod store;

pub use types::*;
pub use constants::*;
pub use store::{AnchorStore, AutoAddPolicy, RecordOutcome};
