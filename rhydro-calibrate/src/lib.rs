//! Derivative-free calibration of procedure parameters.
//!
//! The calibrator minimizes a scalar score over the parameter vector of one procedure
//! using the Nelder-Mead downhill simplex. It knows nothing about procedures or
//! topologies: the caller provides an [`ObjectiveRunner`] that maps a parameter vector to
//! a score where lower is better.
//!
//! ```ignore
//! use rhydro_calibrate::{CalibrationConfig, NelderMead};
//!
//! let config = CalibrationConfig::default();
//! let result = NelderMead::new(&config, ranges).run(&runner, &initial)?;
//! println!("best score {} after {} iterations", result.score, result.iterations);
//! ```

pub mod config;
pub mod nelder_mead;
pub mod result;
pub mod runner;

pub use config::{CalibrationConfig, ParameterRange};
pub use nelder_mead::{initial_simplex, NelderMead};
pub use result::CalibrationResult;
pub use runner::ObjectiveRunner;
