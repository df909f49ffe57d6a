use rayon::prelude::*;
use rhydro_core::errors::HydroResult;
use rhydro_core::timeseries::FloatValue;

/// Maps a parameter vector to a score, lower being better.
pub trait ObjectiveRunner: Sync {
    fn n_params(&self) -> usize;

    fn evaluate(&self, parameters: &[FloatValue]) -> HydroResult<FloatValue>;

    /// Evaluate several parameter vectors in parallel, keeping their order.
    fn evaluate_batch(&self, parameter_sets: &[Vec<FloatValue>]) -> Vec<HydroResult<FloatValue>> {
        parameter_sets
            .par_iter()
            .map(|parameters| self.evaluate(parameters))
            .collect()
    }
}

/// Failed or undefined evaluations rank last.
pub(crate) fn score_or_worst(result: HydroResult<FloatValue>) -> FloatValue {
    match result {
        Ok(score) if !score.is_nan() => score,
        Ok(_) => FloatValue::INFINITY,
        Err(e) => {
            log::debug!("evaluation failed: {e}");
            FloatValue::INFINITY
        }
    }
}
