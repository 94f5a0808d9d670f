use std::fmt;
use serde::{Serialize, Deserialize};

/// Error classification for the positioning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositioningError {
    /// Too few anchors with a current range to produce an estimate
    InsufficientAnchors {
        available: usize,
        required: usize,
    },
    /// Calibration against an estimate was requested before any estimate exists
    NoEstimate,
    /// Operator edit referenced an anchor that is not in the table
    UnknownAnchor {
        anchor_id: String,
    },
    /// Operator edit rejected before it reached the anchor table
    InvalidAnchor {
        anchor_id: String,
        reason: String,
    },
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    High,       // No estimate this tick
    Medium,     // Operator request refused
    Warning,    // Potential issue, no immediate impact
}

/// Result type for engine operations
pub type PositioningResult<T> = Result<T, PositioningError>;

impl PositioningError {
    /// Short stable name, used as a log field
    pub fn error_type(&self) -> &'static str {
        match self {
            PositioningError::InsufficientAnchors { .. } => "InsufficientAnchors",
            PositioningError::NoEstimate => "NoEstimate",
            PositioningError::UnknownAnchor { .. } => "UnknownAnchor",
            PositioningError::InvalidAnchor { .. } => "InvalidAnchor",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PositioningError::InsufficientAnchors { .. } => ErrorSeverity::High,
            PositioningError::NoEstimate => ErrorSeverity::Warning,
            PositioningError::UnknownAnchor { .. } => ErrorSeverity::Medium,
            PositioningError::InvalidAnchor { .. } => ErrorSeverity::Medium,
        }
    }

    /// Whether the next tick may succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PositioningError::InsufficientAnchors { .. } | PositioningError::NoEstimate
        )
    }
}

impl fmt::Display for PositioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositioningError::InsufficientAnchors { available, required } => {
                write!(f, "Insufficient anchors: {} active, {} required", available, required)
            }
            PositioningError::NoEstimate => {
                write!(f, "No tag estimate available yet")
            }
            PositioningError::UnknownAnchor { anchor_id } => {
                write!(f, "Unknown anchor {}", anchor_id)
            }
            PositioningError::InvalidAnchor { anchor_id, reason } => {
                write!(f, "Invalid anchor '{}': {}", anchor_id, reason)
            }
        }
    }
}

impl std::error::Error for PositioningError {}
