//! Engine, async service, input sources and output formatting

pub mod engine;
pub mod service;
pub mod formatting;
pub mod input;

pub use engine::{
    AnchorSnapshot, CalibrationReference, EngineSnapshot, EngineUpdate, IngestSummary, PositioningEngine,
};
pub use service::{ControlOutcome, EngineHandle, EngineService, ServiceError, ServiceResult};
pub use formatting::{AnchorTable, EstimateFormatter, FormattedEstimate, JsonFormatter, TextFormatter};
pub use input::{pump_lines, spawn_reader, spawn_stdin_reader, InputEvent, TcpInput};
