//! Core data types for the positioning engine

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Planar position in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn from_vector(v: Vector2<f64>) -> Self {
        Self { x: v.x, y: v.y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Range after bias correction, clamped so it is never negative.
pub fn corrected_range(raw_range: f64, bias: f64) -> f64 {
    (raw_range + bias).max(0.0)
}

/// Fixed ranging anchor.
///
/// The position is only ever changed by an explicit operator edit; ingest
/// only touches `last_raw_range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub position: Point2,
    /// Additive range correction (meters)
    pub bias: f64,
    /// Most recent uncorrected range reported for this anchor
    pub last_raw_range: Option<f64>,
}

impl Anchor {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            position: Point2::new(x, y),
            bias: 0.0,
            last_raw_range: None,
        }
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    /// Whether a range has been seen for this anchor
    pub fn is_active(&self) -> bool {
        self.last_raw_range.is_some()
    }

    /// Bias-corrected range, if a range has been seen
    pub fn corrected_range(&self) -> Option<f64> {
        self.last_raw_range.map(|raw| corrected_range(raw, self.bias))
    }
}

/// One range report from the tag to an anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeObservation {
    pub anchor_id: String,
    pub raw_range: f64,
}

impl RangeObservation {
    pub fn new(anchor_id: impl Into<String>, raw_range: f64) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            raw_range,
        }
    }
}

/// Observations delivered together in one tag report
pub type RangeBatch = Vec<RangeObservation>;

/// Anchor position paired with its corrected range; the solver's input unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeConstraint {
    pub position: Point2,
    pub range: f64,
}

impl RangeConstraint {
    pub fn new(x: f64, y: f64, range: f64) -> Self {
        Self {
            position: Point2::new(x, y),
            range,
        }
    }
}

/// Raw solver output for one solve cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
}

impl PositionEstimate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

impl From<Point2> for PositionEstimate {
    fn from(p: Point2) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Exponentially filtered position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedEstimate {
    pub x: f64,
    pub y: f64,
}

impl SmoothedEstimate {
    pub fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrected_range_never_negative() {
        let cases = [(1.0, 0.5), (1.0, -0.5), (0.2, -3.0), (0.0, 0.0), (0.0, -1e-9)];
        for (raw, bias) in cases {
            let r = corrected_range(raw, bias);
            assert!(r >= 0.0, "raw={} bias={} gave {}", raw, bias, r);
        }
        assert_eq!(corrected_range(1.0, 0.5), 1.5);
        assert_eq!(corrected_range(0.2, -3.0), 0.0);
    }

    #[test]
    fn test_anchor_corrected_range_requires_range() {
        let mut anchor = Anchor::new("0x1781", 0.0, 0.0).with_bias(-0.1);
        assert!(!anchor.is_active());
        assert_eq!(anchor.corrected_range(), None);

        anchor.last_raw_range = Some(2.0);
        assert!(anchor.is_active());
        assert!((anchor.corrected_range().unwrap() - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_point_distance() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(Point2::from_vector(b.to_vector()), b);
    }
}
