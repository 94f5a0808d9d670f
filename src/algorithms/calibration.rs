//! Per-anchor range bias calibration
//!
//! With the tag held at a trusted reference point, each anchor's bias is set
//! so its corrected range equals the true geometric distance. Only the anchors
//! that currently have a range are touched; past observations are not revised.

use serde::Serialize;
use tracing::info;

use crate::core::{Anchor, AnchorStore, Point2};

/// Bias change applied to one anchor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasUpdate {
    pub anchor_id: String,
    pub previous_bias: f64,
    pub bias: f64,
}

/// Result of one calibration pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub reference: Point2,
    pub updates: Vec<BiasUpdate>,
}

impl CalibrationReport {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Set `bias = distance(anchor, reference) - raw_range` on every anchor that has a range
pub fn calibrate<'a, I>(anchors: I, reference: Point2) -> CalibrationReport
where
    I: IntoIterator<Item = &'a mut Anchor>,
{
    let updates = anchors
        .into_iter()
        .filter_map(|anchor| {
            let raw = anchor.last_raw_range?;
            let previous_bias = anchor.bias;
            anchor.bias = anchor.position.distance_to(&reference) - raw;
            Some(BiasUpdate {
                anchor_id: anchor.id.clone(),
                previous_bias,
                bias: anchor.bias,
            })
        })
        .collect();

    CalibrationReport { reference, updates }
}

impl AnchorStore {
    /// Calibrate every active anchor against `reference`
    pub fn calibrate(&mut self, reference: Point2) -> CalibrationReport {
        let report = calibrate(self.active_anchors_mut(), reference);
        info!(
            anchors = report.updates.len(),
            x = reference.x,
            y = reference.y,
            "calibrated anchor biases"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AutoAddPolicy;

    #[test]
    fn test_corrected_range_matches_geometry_after_calibration() {
        let mut store = AnchorStore::new(AutoAddPolicy::Locked);
        store.upsert("A1", 0.0, 0.0, Some(0.4)).unwrap();
        store.upsert("A2", 3.0, 0.0, None).unwrap();
        store.upsert("A3", 0.0, 3.0, Some(-0.3)).unwrap();
        store.record_range("A1", 1.62);
        store.record_range("A2", 2.01);
        store.record_range("A3", 2.47);

        let reference = Point2::new(1.1, 0.9);
        let report = store.calibrate(reference);
        assert_eq!(report.updates.len(), 3);

        for (anchor, corrected) in store.active_anchors() {
            let geometric = anchor.position.distance_to(&reference);
            assert!(
                (corrected - geometric).abs() < 1e-12,
                "{}: corrected {} vs geometric {}",
                anchor.id,
                corrected,
                geometric
            );
        }
    }

    #[test]
    fn test_inactive_anchors_untouched() {
        let mut store = AnchorStore::new(AutoAddPolicy::Locked);
        store.upsert("A1", 0.0, 0.0, Some(0.25)).unwrap();
        store.upsert("A2", 3.0, 0.0, Some(0.5)).unwrap();
        store.record_range("A1", 1.0);

        let report = store.calibrate(Point2::new(2.0, 0.0));
        assert_eq!(report.updates.len(), 1);
        assert_eq!(report.updates[0].anchor_id, "A1");
        assert_eq!(report.updates[0].previous_bias, 0.25);
        assert!((report.updates[0].bias - 1.0).abs() < 1e-12);
        assert_eq!(store.get("A2").unwrap().bias, 0.5);
    }

    #[test]
    fn test_calibrate_free_function() {
        let mut anchors = vec![Anchor::new("A1", 0.0, 0.0), Anchor::new("A2", 4.0, 0.0)];
        anchors[0].last_raw_range = Some(3.0);

        let report = calibrate(anchors.iter_mut(), Point2::new(0.0, 2.5));
        assert_eq!(report.updates.len(), 1);
        assert!((anchors[0].bias + 0.5).abs() < 1e-12);
        assert_eq!(anchors[1].bias, 0.0);
        assert!(!report.is_empty());
    }
}
