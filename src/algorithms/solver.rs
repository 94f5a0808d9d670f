//! Position solver: picks the fix method from the number of active anchors
//!
//! | anchors | method                                        |
//! |---------|-----------------------------------------------|
//! | 0       | `InsufficientAnchors`                         |
//! | 1       | anchor offset by its range along +x (weak)    |
//! | 2       | circle intersection with continuity fallback  |
//! | 3+      | Huber-weighted Levenberg-Marquardt            |
//!
//! The solver holds no state between calls; the previous estimate is passed
//! in explicitly as the warm start.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithms::bilateration::bilaterate;
use crate::algorithms::multilateration::multilaterate;
use crate::core::constants::*;
use crate::core::{Point2, PositionEstimate, RangeConstraint};
use crate::validation::{PositioningError, PositioningResult};

/// Numerical parameters for the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Huber threshold (meters)
    pub huber_delta: f64,
    /// Initial damping
    pub lambda_initial: f64,
    /// Damping multiplier after an accepted step, in (0, 1)
    pub lambda_decay: f64,
    /// Damping multiplier after a rejected step or singular system, > 1
    pub lambda_growth: f64,
    pub lambda_min: f64,
    pub lambda_max: f64,
    /// Step length cap (meters)
    pub max_step: f64,
    pub max_iterations: u32,
    /// Squared step length (m^2) that ends the iteration
    pub convergence_threshold: f64,
    /// Floor for distances used as divisors (meters)
    pub distance_epsilon: f64,
    /// Determinant below which the damped system is treated as singular
    pub singular_threshold: f64,
    /// Optional bound on the perpendicular offset carried across
    /// non-intersecting two-anchor fixes (meters). `None` leaves it unbounded.
    pub max_carried_offset: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            huber_delta: HUBER_DELTA,
            lambda_initial: LM_LAMBDA_INITIAL,
            lambda_decay: LM_LAMBDA_DECAY,
            lambda_growth: LM_LAMBDA_GROWTH,
            lambda_min: LM_LAMBDA_MIN,
            lambda_max: LM_LAMBDA_MAX,
            max_step: MAX_STEP,
            max_iterations: MAX_ITERATIONS,
            convergence_threshold: CONVERGENCE_THRESHOLD,
            distance_epsilon: DISTANCE_EPSILON,
            singular_threshold: SINGULAR_THRESHOLD,
            max_carried_offset: None,
        }
    }
}

/// How a fix was produced; a rough confidence indicator for consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    /// One anchor: direction is arbitrary, treat as low confidence
    SingleAnchor,
    /// Two anchors with intersecting range circles
    TwoAnchorIntersection,
    /// Two anchors whose circles did not meet; offset carried from the warm start
    TwoAnchorContinuity,
    /// Three or more anchors, robust least squares
    RobustLeastSquares,
}

/// Solver output with diagnostics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub estimate: PositionEstimate,
    pub kind: FixKind,
    pub anchors_used: usize,
    /// Iterations spent by the robust solver (0 for closed-form fixes)
    pub iterations: u32,
    /// False only when the robust solver ran out of iterations
    pub converged: bool,
}

/// Stateless position solver
#[derive(Debug, Clone, Default)]
pub struct Solver {
    config: SolverConfig,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Best-fit position for the given constraints.
    ///
    /// Fails only when `active` is empty.
    pub fn estimate(
        &self,
        active: &[RangeConstraint],
        warm_start: Option<Point2>,
    ) -> PositioningResult<PositionEstimate> {
        self.solve(active, warm_start).map(|report| report.estimate)
    }

    /// Like [`Solver::estimate`], with fix kind and iteration diagnostics
    pub fn solve(
        &self,
        active: &[RangeConstraint],
        warm_start: Option<Point2>,
    ) -> PositioningResult<SolveReport> {
        let report = match active {
            [] => {
                return Err(PositioningError::InsufficientAnchors {
                    available: 0,
                    required: 1,
                })
            }
            [only] => {
                let range = only.range.max(0.0);
                SolveReport {
                    estimate: PositionEstimate::new(only.position.x + range, only.position.y),
                    kind: FixKind::SingleAnchor,
                    anchors_used: 1,
                    iterations: 0,
                    converged: true,
                }
            }
            [first, second] => {
                let outcome = bilaterate(
                    first,
                    second,
                    warm_start,
                    self.config.distance_epsilon,
                    self.config.max_carried_offset,
                );
                SolveReport {
                    estimate: outcome.position.into(),
                    kind: if outcome.intersecting {
                        FixKind::TwoAnchorIntersection
                    } else {
                        FixKind::TwoAnchorContinuity
                    },
                    anchors_used: 2,
                    iterations: 0,
                    converged: true,
                }
            }
            _ => {
                let outcome = multilaterate(active, warm_start, &self.config);
                if !outcome.converged {
                    debug!(
                        iterations = outcome.iterations,
                        cost = outcome.cost,
                        "robust solve hit iteration budget"
                    );
                }
                SolveReport {
                    estimate: outcome.position.into(),
                    kind: FixKind::RobustLeastSquares,
                    anchors_used: active.len(),
                    iterations: outcome.iterations,
                    converged: outcome.converged,
                }
            }
        };

        Ok(report)
    }
}
