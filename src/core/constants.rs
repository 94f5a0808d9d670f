//! Default tuning parameters for the positioning engine

/// Smallest distance (meters) used as a divisor; guards coincident points
pub const DISTANCE_EPSILON: f64 = 1e-6;

/// Huber threshold (meters): residuals above this are down-weighted
pub const HUBER_DELTA: f64 = 0.25;

/// Initial Levenberg-Marquardt damping
pub const LM_LAMBDA_INITIAL: f64 = 1e-2;
/// Damping multiplier applied after an accepted step
pub const LM_LAMBDA_DECAY: f64 = 0.7;
/// Damping multiplier applied after a rejected step or a singular system
pub const LM_LAMBDA_GROWTH: f64 = 2.0;
pub const LM_LAMBDA_MIN: f64 = 1e-6;
pub const LM_LAMBDA_MAX: f64 = 1e6;

/// Largest step (meters) taken in one iteration
pub const MAX_STEP: f64 = 1.2;

/// Iteration budget for the robust solver
pub const MAX_ITERATIONS: u32 = 25;

/// Squared step length (m^2) below which the solver stops
pub const CONVERGENCE_THRESHOLD: f64 = 1e-6;

/// Determinant below which the damped normal equations count as singular
pub const SINGULAR_THRESHOLD: f64 = 1e-12;

/// Exponential smoothing factor for displayed positions
pub const SMOOTHING_ALPHA: f64 = 0.35;

/// Solve tick period (milliseconds)
pub const TICK_INTERVAL_MS: u64 = 50;
