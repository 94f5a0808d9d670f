//! Anchor table: known anchors, their calibrated bias and latest range
//!
//! The store is plain data. It is owned by a single writer (the engine), so
//! operator edits, range updates and calibration writes never interleave.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{corrected_range, Anchor, Point2, RangeConstraint};
use crate::validation::{PositioningError, PositioningResult};

/// What to do with a range for an anchor id that is not in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoAddPolicy {
    /// Ignore unknown ids; the table only changes through operator edits
    #[default]
    Locked,
    /// Create the anchor at the default position on first sighting
    Permissive,
}

/// Result of applying one range to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Range stored on an existing anchor
    Updated,
    /// Unknown id, anchor created (permissive mode)
    Created,
    /// Unknown id, dropped (locked mode)
    Ignored,
    /// Range was negative or not finite
    Rejected,
}

/// Table of anchors keyed by id
#[derive(Debug, Clone, Default)]
pub struct AnchorStore {
    anchors: BTreeMap<String, Anchor>,
    policy: AutoAddPolicy,
    default_position: Point2,
}

/// Table key for an anchor id: surrounding whitespace is ignored, empty ids are invalid
fn anchor_key(id: &str) -> Option<&str> {
    let id = id.trim();
    (!id.is_empty()).then_some(id)
}

impl AnchorStore {
    pub fn new(policy: AutoAddPolicy) -> Self {
        Self {
            anchors: BTreeMap::new(),
            policy,
            default_position: Point2::default(),
        }
    }

    /// Position used for anchors created by permissive auto-add
    pub fn with_default_position(mut self, position: Point2) -> Self {
        self.default_position = position;
        self
    }

    pub fn policy(&self) -> AutoAddPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: AutoAddPolicy) {
        self.policy = policy;
    }

    /// Create an anchor or overwrite its position and bias.
    ///
    /// An existing `last_raw_range` is preserved. Omitting `bias` keeps the
    /// current bias of an existing anchor and uses zero for a new one.
    /// Returns `true` when the anchor was created.
    pub fn upsert(&mut self, id: &str, x: f64, y: f64, bias: Option<f64>) -> PositioningResult<bool> {
        let Some(id) = anchor_key(id) else {
            return Err(PositioningError::InvalidAnchor {
                anchor_id: id.to_string(),
                reason: "anchor id must not be empty".to_string(),
            });
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(PositioningError::InvalidAnchor {
                anchor_id: id.to_string(),
                reason: format!("position ({}, {}) is not finite", x, y),
            });
        }
        if let Some(b) = bias {
            if !b.is_finite() {
                return Err(PositioningError::InvalidAnchor {
                    anchor_id: id.to_string(),
                    reason: format!("bias {} is not finite", b),
                });
            }
        }

        match self.anchors.get_mut(id) {
            Some(anchor) => {
                anchor.position = Point2::new(x, y);
                if let Some(b) = bias {
                    anchor.bias = b;
                }
                Ok(false)
            }
            None => {
                let anchor = Anchor::new(id, x, y).with_bias(bias.unwrap_or(0.0));
                self.anchors.insert(id.to_string(), anchor);
                Ok(true)
            }
        }
    }

    /// Remove an anchor, returning it if it existed
    pub fn delete(&mut self, id: &str) -> Option<Anchor> {
        self.anchors.remove(anchor_key(id)?)
    }

    /// Store a raw range. Never changes the position of an existing anchor.
    pub fn record_range(&mut self, id: &str, raw_range: f64) -> RecordOutcome {
        let Some(id) = anchor_key(id) else {
            return RecordOutcome::Rejected;
        };
        if !raw_range.is_finite() || raw_range < 0.0 {
            return RecordOutcome::Rejected;
        }

        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.last_raw_range = Some(raw_range);
            return RecordOutcome::Updated;
        }

        match self.policy {
            AutoAddPolicy::Locked => RecordOutcome::Ignored,
            AutoAddPolicy::Permissive => {
                debug!(anchor_id = id, "auto-adding anchor at default position");
                let mut anchor = Anchor::new(id, self.default_position.x, self.default_position.y);
                anchor.last_raw_range = Some(raw_range);
                self.anchors.insert(id.to_string(), anchor);
                RecordOutcome::Created
            }
        }
    }

    /// Anchors with a current range, each paired with its corrected range
    pub fn active_anchors(&self) -> impl Iterator<Item = (&Anchor, f64)> + '_ {
        self.anchors.values().filter_map(|anchor| {
            anchor
                .last_raw_range
                .map(|raw| (anchor, corrected_range(raw, anchor.bias)))
        })
    }

    /// Solver input for the current set of active anchors
    pub fn constraints(&self) -> Vec<RangeConstraint> {
        self.active_anchors()
            .map(|(anchor, range)| RangeConstraint {
                position: anchor.position,
                range,
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_anchors().count()
    }

    /// Mutable access to active anchors, for bias calibration
    pub(crate) fn active_anchors_mut(&mut self) -> impl Iterator<Item = &mut Anchor> + '_ {
        self.anchors.values_mut().filter(|anchor| anchor.is_active())
    }

    pub fn get(&self, id: &str) -> Option<&Anchor> {
        self.anchors.get(anchor_key(id)?)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All anchors in id order
    pub fn iter(&self) -> impl Iterator<Item = &Anchor> + '_ {
        self.anchors.values()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_anchor_store(policy: AutoAddPolicy) -> AnchorStore {
        let mut store = AnchorStore::new(policy);
        store.upsert("0x1781", 0.0, 0.0, None).unwrap();
        store.upsert("0x1782", 3.0, 0.0, Some(0.1)).unwrap();
        store
    }

    #[test]
    fn test_upsert_creates_then_overwrites() {
        let mut store = AnchorStore::new(AutoAddPolicy::Locked);
        assert_eq!(store.upsert("A1", 1.0, 2.0, Some(0.3)), Ok(true));
        assert_eq!(store.upsert("A1", 4.0, 5.0, None), Ok(false));

        let anchor = store.get("A1").unwrap();
        assert_eq!(anchor.position, Point2::new(4.0, 5.0));
        assert_eq!(anchor.bias, 0.3);
    }

    #[test]
    fn test_upsert_preserves_last_range() {
        let mut store = two_anchor_store(AutoAddPolicy::Locked);
        store.record_range("0x1781", 2.5);
        store.upsert("0x1781", 1.0, 1.0, Some(-0.2)).unwrap();

        let anchor = store.get("0x1781").unwrap();
        assert_eq!(anchor.last_raw_range, Some(2.5));
        assert_eq!(anchor.bias, -0.2);
    }

    #[test]
    fn test_upsert_rejects_invalid_input() {
        let mut store = AnchorStore::new(AutoAddPolicy::Locked);
        assert!(store.upsert("  ", 0.0, 0.0, None).is_err());
        assert!(store.upsert("A1", f64::NAN, 0.0, None).is_err());
        assert!(store.upsert("A1", 0.0, 0.0, Some(f64::INFINITY)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete() {
        let mut store = two_anchor_store(AutoAddPolicy::Locked);
        assert!(store.delete("0x1781").is_some());
        assert!(store.delete("0x1781").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_record_range_locked_ignores_unknown() {
        let mut store = two_anchor_store(AutoAddPolicy::Locked);
        assert_eq!(store.record_range("0x9999", 1.0), RecordOutcome::Ignored);
        assert!(!store.contains("0x9999"));
        assert_eq!(store.record_range("0x1781", 1.0), RecordOutcome::Updated);
    }

    #[test]
    fn test_record_range_permissive_creates_at_default() {
        let mut store = AnchorStore::new(AutoAddPolicy::Permissive)
            .with_default_position(Point2::new(-1.0, 2.0));
        assert_eq!(store.record_range("0x0001", 1.5), RecordOutcome::Created);

        let anchor = store.get("0x0001").unwrap();
        assert_eq!(anchor.position, Point2::new(-1.0, 2.0));
        assert_eq!(anchor.last_raw_range, Some(1.5));
    }

    #[test]
    fn test_record_range_never_moves_anchor() {
        for policy in [AutoAddPolicy::Locked, AutoAddPolicy::Permissive] {
            let mut store = two_anchor_store(policy);
            for (i, range) in [0.0, 1.0, 7.5, 100.0, -1.0, f64::NAN].into_iter().enumerate() {
                store.record_range("0x1781", range);
                store.record_range("0x1782", range + i as f64);
                assert_eq!(store.get("0x1781").unwrap().position, Point2::new(0.0, 0.0));
                assert_eq!(store.get("0x1782").unwrap().position, Point2::new(3.0, 0.0));
            }
        }
    }

    #[test]
    fn test_record_range_rejects_invalid() {
        let mut store = two_anchor_store(AutoAddPolicy::Locked);
        assert_eq!(store.record_range("0x1781", -0.5), RecordOutcome::Rejected);
        assert_eq!(store.record_range("0x1781", f64::INFINITY), RecordOutcome::Rejected);
        assert_eq!(store.get("0x1781").unwrap().last_raw_range, None);
    }

    #[test]
    fn test_active_anchors_pairs_corrected_range() {
        let mut store = two_anchor_store(AutoAddPolicy::Locked);
        store.upsert("0x1783", 0.0, 3.0, Some(-5.0)).unwrap();
        assert_eq!(store.active_count(), 0);

        store.record_range("0x1782", 2.0);
        store.record_range("0x1783", 1.0);

        let active: Vec<(String, f64)> = store
            .active_anchors()
            .map(|(a, r)| (a.id.clone(), r))
            .collect();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].0, "0x1782");
        assert!((active[0].1 - 2.1).abs() < 1e-12);
        // Negative correction clamps at zero
        assert_eq!(active[1], ("0x1783".to_string(), 0.0));

        let constraints = store.constraints();
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].position, Point2::new(3.0, 0.0));
    }

    #[test]
    fn test_id_rules_shared_by_all_edits() {
        let mut store = AnchorStore::new(AutoAddPolicy::Permissive);
        assert_eq!(store.record_range("", 1.0), RecordOutcome::Rejected);
        assert_eq!(store.record_range("   ", 1.0), RecordOutcome::Rejected);
        assert!(store.is_empty());

        assert_eq!(store.record_range(" 0x1781 ", 1.0), RecordOutcome::Created);
        assert_eq!(store.record_range("0x1781", 2.0), RecordOutcome::Updated);
        assert_eq!(store.upsert("0x1781\t", 1.0, 1.0, None), Ok(false));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(" 0x1781").unwrap().last_raw_range, Some(2.0));

        assert!(store.delete("").is_none());
        assert!(store.delete(" 0x1781 ").is_some());
        assert!(store.is_empty());
    }
}
