//! Position estimation and calibration algorithms

pub mod solver;
pub mod bilateration;
pub mod multilateration;
pub mod calibration;

pub use solver::{FixKind, SolveReport, Solver, SolverConfig};
pub use calibration::{calibrate, BiasUpdate, CalibrationReport};
