//! UWB Tag Positioning
//!
//! 2D positioning of a single ultra-wideband tag from ranges to fixed anchors,
//! with per-anchor bias calibration and exponential smoothing.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use core::{
    Anchor, AnchorStore, AutoAddPolicy, Point2, PositionEstimate, RangeBatch, RangeConstraint,
    RangeObservation, SmoothedEstimate,
};
pub use algorithms::{CalibrationReport, FixKind, SolveReport, Solver, SolverConfig};
pub use processing::{ControlCommand, IngestDecoder, IngestError, InputMessage, Smoother};
pub use validation::{PositioningError, PositioningResult};
pub use utils::{ConfigError, ConfigurationManager, EngineConfig};
pub use api::{
    CalibrationReference, ControlOutcome, EngineHandle, EngineService, EngineUpdate, PositioningEngine, ServiceError,
};
