use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::parameters::ParameterDefinition;
use rhydro_core::statistics::ObjectiveFunction;
use rhydro_core::timeseries::{FloatValue, Time};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inclusive `(min, max)` bounds of one parameter
pub type ParameterRange = (FloatValue, FloatValue);

/// Calibration settings of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Run the calibration. When false the configured parameters are used as they are.
    pub calibrate: bool,
    /// Output whose statistics feed the objective function, in output declaration order.
    pub result_index: usize,
    pub objective_function: ObjectiveFunction,
    /// Keep every trial vertex within the parameter ranges.
    pub limit: bool,
    /// Standard deviation of the initial simplex, as a fraction of half the range width.
    pub sigma: FloatValue,
    /// Overrides the ranges of the model's parameter definitions, one per parameter.
    pub ranges: Option<Vec<ParameterRange>>,
    /// Iterations improving the best score by less than this count as stagnant.
    pub no_improve_thr: FloatValue,
    pub max_stagnations: usize,
    pub max_iter: usize,
    pub seed: u64,
    /// Write the [`CalibrationResult`](crate::CalibrationResult) to this JSON file.
    pub save_result: Option<PathBuf>,
    /// `(begin, end)` of the window the objective is computed over.
    pub calibration_period: Option<(Time, Time)>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            calibrate: true,
            result_index: 0,
            objective_function: ObjectiveFunction::Rmse,
            limit: true,
            sigma: 0.25,
            ranges: None,
            no_improve_thr: 1e-7,
            max_stagnations: 10,
            max_iter: 5000,
            seed: 0,
            save_result: None,
            calibration_period: None,
        }
    }
}

impl CalibrationConfig {
    /// Bounds of each parameter, from `ranges` or else from the definitions.
    ///
    /// Unbounded definitions give `None`.
    pub fn bounds(
        &self,
        definitions: &[ParameterDefinition],
    ) -> HydroResult<Vec<Option<ParameterRange>>> {
        if !(self.sigma >= 0.0) {
            return Err(HydroError::Configuration(format!(
                "calibration sigma must be non-negative, got {}",
                self.sigma
            )));
        }
        if let Some((begin, end)) = self.calibration_period {
            if begin >= end {
                return Err(HydroError::Configuration(format!(
                    "calibration period begins at {begin} but ends at {end}"
                )));
            }
        }
        match &self.ranges {
            Some(ranges) => {
                if ranges.len() != definitions.len() {
                    return Err(HydroError::Configuration(format!(
                        "calibration ranges has {} entries, expected one per parameter ({})",
                        ranges.len(),
                        definitions.len()
                    )));
                }
                ranges
                    .iter()
                    .zip(definitions)
                    .map(|(&(min, max), d)| {
                        if min > max || min.is_nan() || max.is_nan() {
                            Err(HydroError::Configuration(format!(
                                "invalid range [{min}, {max}] for parameter '{}'",
                                d.name
                            )))
                        } else {
                            Ok(Some((min, max)))
                        }
                    })
                    .collect()
            }
            None => Ok(definitions
                .iter()
                .map(|d| d.is_bounded().then_some((d.min, d.max)))
                .collect()),
        }
    }
}
