//! Robust multilateration for three or more anchors
//!
//! Levenberg-Marquardt over range residuals with Huber weighting. The loop is
//! bounded by the iteration budget and always returns the last accepted
//! point, since a degraded estimate is more useful to a live track than none.

use nalgebra::{Matrix2, Vector2};

use crate::algorithms::solver::SolverConfig;
use crate::core::{Point2, RangeConstraint};

/// Result of a robust solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultilaterationOutcome {
    pub position: Point2,
    /// Iterations spent, including rejected and singular ones
    pub iterations: u32,
    /// Whether the step-size criterion was met inside the budget
    pub converged: bool,
    /// Huber cost at `position`
    pub cost: f64,
}

/// Iteration state threaded through the solver loop
#[derive(Debug, Clone, Copy)]
struct LmState {
    point: Vector2<f64>,
    lambda: f64,
    cost: f64,
    iterations: u32,
    converged: bool,
}

/// Huber weight: 1 inside the threshold, `delta / |r|` beyond it
pub fn huber_weight(residual: f64, delta: f64) -> f64 {
    let magnitude = residual.abs();
    if magnitude <= delta {
        1.0
    } else {
        delta / magnitude
    }
}

/// Huber loss of a single residual (scaled so the quadratic part is `r^2`)
pub fn huber_loss(residual: f64, delta: f64) -> f64 {
    let magnitude = residual.abs();
    if magnitude <= delta {
        residual * residual
    } else {
        delta * delta + 2.0 * delta * (magnitude - delta)
    }
}

/// Total Huber cost of a candidate position
pub fn huber_cost(point: &Vector2<f64>, constraints: &[RangeConstraint], delta: f64) -> f64 {
    constraints
        .iter()
        .map(|c| huber_loss((point - c.position.to_vector()).norm() - c.range, delta))
        .sum()
}

/// Mean of the anchor positions
pub fn centroid(constraints: &[RangeConstraint]) -> Point2 {
    let n = constraints.len().max(1) as f64;
    let sum = constraints
        .iter()
        .fold(Vector2::zeros(), |acc, c| acc + c.position.to_vector());
    Point2::from_vector(sum / n)
}

/// Weighted normal equations `(J^T W J, J^T W r)` at `point`
fn normal_equations(
    point: &Vector2<f64>,
    constraints: &[RangeConstraint],
    config: &SolverConfig,
) -> (Matrix2<f64>, Vector2<f64>) {
    let mut jtj = Matrix2::zeros();
    let mut jtr = Vector2::zeros();

    for constraint in constraints {
        let offset = point - constraint.position.to_vector();
        let distance = offset.norm();
        let (gradient, distance) = if distance < config.distance_epsilon {
            (Vector2::x(), config.distance_epsilon)
        } else {
            (offset / distance, distance)
        };

        let residual = distance - constraint.range;
        let weight = huber_weight(residual, config.huber_delta);

        jtj += gradient * gradient.transpose() * weight;
        jtr += gradient * (weight * residual);
    }

    (jtj, jtr)
}

/// Raise damping after a singular system or a rejected step.
/// The floor lets a zero damping recover.
fn grow_damping(lambda: f64, config: &SolverConfig) -> f64 {
    (lambda * config.lambda_growth).max(config.lambda_min).min(config.lambda_max)
}

/// Solve for the position minimizing the Huber cost.
///
/// Starts at `warm_start`, or at the anchor centroid when there is none.
pub fn multilaterate(
    constraints: &[RangeConstraint],
    warm_start: Option<Point2>,
    config: &SolverConfig,
) -> MultilaterationOutcome {
    let start = warm_start.unwrap_or_else(|| centroid(constraints)).to_vector();
    let mut state = LmState {
        point: start,
        lambda: config.lambda_initial,
        cost: huber_cost(&start, constraints, config.huber_delta),
        iterations: 0,
        converged: false,
    };

    while state.iterations < config.max_iterations {
        state.iterations += 1;

        let (jtj, jtr) = normal_equations(&state.point, constraints, config);
        let damped = jtj + Matrix2::identity() * state.lambda;

        let inverse = if damped.determinant().abs() < config.singular_threshold {
            None
        } else {
            damped.try_inverse()
        };
        let Some(inverse) = inverse else {
            state.lambda = grow_damping(state.lambda, config);
            continue;
        };

        let mut step = -(inverse * jtr);
        let length = step.norm();
        if length > config.max_step {
            step *= config.max_step / length;
        }

        let candidate = state.point + step;
        let candidate_cost = huber_cost(&candidate, constraints, config.huber_delta);

        if candidate_cost <= state.cost {
            state.point = candidate;
            state.cost = candidate_cost;
            state.lambda = (state.lambda * config.lambda_decay).max(config.lambda_min);
            if step.norm_squared() < config.convergence_threshold {
                state.converged = true;
                break;
            }
        } else {
            state.lambda = grow_damping(state.lambda, config);
        }
    }

    MultilaterationOutcome {
        position: Point2::from_vector(state.point),
        iterations: state.iterations,
        converged: state.converged,
        cost: state.cost,
    }
}
