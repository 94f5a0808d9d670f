//! Synchronous positioning engine
//!
//! Owns the anchor table, solver and smoother. All mutation goes through
//! `&mut self`, so a single owner (the service actor, or a test) serializes
//! operator edits, ingest and solve ticks.

use serde::Serialize;
use tracing::{debug, info};

use crate::algorithms::{CalibrationReport, SolveReport, Solver};
use crate::core::{
    Anchor, AnchorStore, AutoAddPolicy, Point2, PositionEstimate, RangeBatch, RangeObservation,
    RecordOutcome, SmoothedEstimate,
};
use crate::processing::Smoother;
use crate::utils::{AnchorConfig, EngineConfig, WarmStartSource};
use crate::validation::{PositioningError, PositioningResult};

/// Where the calibration reference point comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationReference {
    /// Most recent raw solver output
    Raw,
    /// Most recent smoothed estimate
    Smoothed,
    /// Surveyed position supplied by the operator
    Known(Point2),
}

/// Per-batch ingest counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    pub updated: usize,
    pub created: usize,
    pub ignored: usize,
    pub rejected: usize,
}

impl IngestSummary {
    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Ignored => self.ignored += 1,
            RecordOutcome::Rejected => self.rejected += 1,
        }
    }

    fn merge(&mut self, other: IngestSummary) {
        self.updated += other.updated;
        self.created += other.created;
        self.ignored += other.ignored;
        self.rejected += other.rejected;
    }
}

/// Result of one successful solve cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineUpdate {
    /// Counts successful solves, starting at 1
    pub sequence: u64,
    pub raw: PositionEstimate,
    pub smoothed: SmoothedEstimate,
    pub report: SolveReport,
}

/// Read-only view of one anchor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorSnapshot {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub bias: f64,
    pub raw_range: Option<f64>,
    pub corrected_range: Option<f64>,
}

impl From<&Anchor> for AnchorSnapshot {
    fn from(anchor: &Anchor) -> Self {
        Self {
            id: anchor.id.clone(),
            x: anchor.position.x,
            y: anchor.position.y,
            bias: anchor.bias,
            raw_range: anchor.last_raw_range,
            corrected_range: anchor.corrected_range(),
        }
    }
}

impl From<&AnchorSnapshot> for AnchorConfig {
    fn from(snapshot: &AnchorSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            x: snapshot.x,
            y: snapshot.y,
            bias: snapshot.bias,
        }
    }
}

/// Engine state as seen by an operator
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub anchors: Vec<AnchorSnapshot>,
    pub policy: AutoAddPolicy,
    pub last_update: Option<EngineUpdate>,
}

pub struct PositioningEngine {
    config: EngineConfig,
    store: AnchorStore,
    solver: Solver,
    smoother: Smoother,
    last_raw: Option<PositionEstimate>,
    last_update: Option<EngineUpdate>,
    sequence: u64,
}

impl PositioningEngine {
    /// Build an engine and load the configured anchor table
    pub fn from_config(config: EngineConfig) -> PositioningResult<Self> {
        let mut store =
            AnchorStore::new(config.auto_add_policy).with_default_position(config.default_anchor_position);
        for anchor in &config.anchors {
            store.upsert(&anchor.id, anchor.x, anchor.y, Some(anchor.bias))?;
        }

        info!(
            anchors = store.len(),
            policy = ?config.auto_add_policy,
            alpha = config.smoothing_alpha,
            "positioning engine initialized"
        );

        Ok(Self {
            solver: Solver::new(config.solver.clone()),
            smoother: Smoother::new(config.smoothing_alpha),
            store,
            config,
            last_raw: None,
            last_update: None,
            sequence: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &AnchorStore {
        &self.store
    }

    /// Create or move an anchor. Returns true when the anchor is new.
    pub fn upsert_anchor(&mut self, id: &str, x: f64, y: f64, bias: Option<f64>) -> PositioningResult<bool> {
        let created = self.store.upsert(id, x, y, bias)?;
        info!(anchor_id = id, x, y, created, "anchor upserted");
        Ok(created)
    }

    pub fn delete_anchor(&mut self, id: &str) -> PositioningResult<Anchor> {
        let anchor = self.store.delete(id).ok_or_else(|| PositioningError::UnknownAnchor {
            anchor_id: id.to_string(),
        })?;
        info!(anchor_id = id, "anchor deleted");
        Ok(anchor)
    }

    /// Returns the previous policy
    pub fn set_auto_add_policy(&mut self, policy: AutoAddPolicy) -> AutoAddPolicy {
        let previous = self.store.policy();
        self.store.set_policy(policy);
        self.config.auto_add_policy = policy;
        info!(?policy, "auto-add policy changed");
        previous
    }

    /// Record a batch of raw ranges in arrival order
    pub fn ingest(&mut self, batch: &[RangeObservation]) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for observation in batch {
            let outcome = self.store.record_range(&observation.anchor_id, observation.raw_range);
            if outcome == RecordOutcome::Ignored {
                debug!(anchor_id = %observation.anchor_id, "range from unknown anchor ignored");
            }
            summary.record(outcome);
        }
        summary
    }

    /// Drain the batches received since the last tick and solve.
    ///
    /// Returns `None` when no batch arrived, so nothing is emitted.
    pub fn tick<I>(&mut self, batches: I) -> Option<PositioningResult<EngineUpdate>>
    where
        I: IntoIterator<Item = RangeBatch>,
    {
        let mut received = 0usize;
        let mut summary = IngestSummary::default();
        for batch in batches {
            received += 1;
            summary.merge(self.ingest(&batch));
        }

        if received == 0 {
            return None;
        }

        debug!(batches = received, ?summary, "tick");
        Some(self.solve_cycle())
    }

    /// Solve against the current table, then feed the smoother.
    ///
    /// With too few active anchors the smoother is left untouched.
    pub fn solve_cycle(&mut self) -> PositioningResult<EngineUpdate> {
        let constraints = self.store.constraints();
        let required = self.config.min_active_anchors.max(1);
        if constraints.len() < required {
            return Err(PositioningError::InsufficientAnchors {
                available: constraints.len(),
                required,
            });
        }

        let warm_start = match self.config.warm_start {
            WarmStartSource::Raw => self.last_raw.map(|raw| raw.point()),
            WarmStartSource::Smoothed => self.smoother.current().map(|s| s.point()),
        };

        let report = self.solver.solve(&constraints, warm_start)?;
        let smoothed = self.smoother.update(report.estimate);
        self.last_raw = Some(report.estimate);
        self.sequence += 1;

        let update = EngineUpdate {
            sequence: self.sequence,
            raw: report.estimate,
            smoothed,
            report,
        };
        self.last_update = Some(update);
        Ok(update)
    }

    /// Re-derive biases of every anchor with a current range
    pub fn calibrate(&mut self, reference: CalibrationReference) -> PositioningResult<CalibrationReport> {
        let point = match reference {
            CalibrationReference::Raw => self.last_raw.ok_or(PositioningError::NoEstimate)?.point(),
            CalibrationReference::Smoothed => self.smoother.current().ok_or(PositioningError::NoEstimate)?.point(),
            CalibrationReference::Known(point) => point,
        };
        Ok(self.store.calibrate(point))
    }

    /// Anchor table in id order
    pub fn anchors(&self) -> Vec<AnchorSnapshot> {
        self.store.iter().map(AnchorSnapshot::from).collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            anchors: self.anchors(),
            policy: self.store.policy(),
            last_update: self.last_update,
        }
    }

    pub fn last_estimate(&self) -> Option<PositionEstimate> {
        self.last_raw
    }

    pub fn last_update(&self) -> Option<EngineUpdate> {
        self.last_update
    }

    pub fn smoothed(&self) -> Option<SmoothedEstimate> {
        self.smoother.current()
    }
}
