//! Measurement decoding and temporal smoothing

pub mod smoother;
pub mod parser;

pub use smoother::Smoother;
pub use parser::{
    ControlCommand, DecodedReport, EstimateKind, IngestDecoder, IngestError, IngestResult, IngestStats,
    InputMessage,
};
