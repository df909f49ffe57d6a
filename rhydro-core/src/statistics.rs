//! Goodness-of-fit statistics and the objective functions built on them.

use crate::timeseries::FloatValue;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsGroup {
    /// Inside the calibration period
    Cal,
    /// Outside of it
    Val,
}

/// Statistics over the paired non-missing `(sim, obs)` samples of one output.
///
/// Quantities that are undefined for the sample (no pairs, zero variance) are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultStatistics {
    pub n: usize,
    pub mse: Option<FloatValue>,
    pub rmse: Option<FloatValue>,
    /// Mean of `sim - obs`
    pub bias: Option<FloatValue>,
    pub mean_obs: Option<FloatValue>,
    pub mean_sim: Option<FloatValue>,
    pub var_obs: Option<FloatValue>,
    pub var_sim: Option<FloatValue>,
    pub stdev_obs: Option<FloatValue>,
    pub stdev_sim: Option<FloatValue>,
    /// `stdev_sim - stdev_obs`
    pub stdev_dif: Option<FloatValue>,
    /// Nash-Sutcliffe efficiency
    pub nse: Option<FloatValue>,
    pub cov: Option<FloatValue>,
    /// Pearson correlation
    pub r: Option<FloatValue>,
    pub oneminusr: Option<FloatValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<StatisticsGroup>,
}

impl ResultStatistics {
    pub fn compute(
        sim: ArrayView1<FloatValue>,
        obs: ArrayView1<FloatValue>,
        group: Option<StatisticsGroup>,
    ) -> Self {
        let pairs: Vec<(FloatValue, FloatValue)> = sim
            .iter()
            .zip(obs.iter())
            .filter(|(s, o)| s.is_finite() && o.is_finite())
            .map(|(s, o)| (*s, *o))
            .collect();
        let n = pairs.len();
        if n == 0 {
            log::warn!("no sim/obs pairs found for statistics computation");
            return Self {
                group,
                ..Default::default()
            };
        }
        let nf = n as FloatValue;

        let mse = pairs.iter().map(|(s, o)| (s - o).powi(2)).sum::<FloatValue>() / nf;
        let bias = pairs.iter().map(|(s, o)| s - o).sum::<FloatValue>() / nf;
        let mean_obs = pairs.iter().map(|(_, o)| o).sum::<FloatValue>() / nf;
        let mean_sim = pairs.iter().map(|(s, _)| s).sum::<FloatValue>() / nf;
        let var_obs = pairs
            .iter()
            .map(|(_, o)| (o - mean_obs).powi(2))
            .sum::<FloatValue>()
            / nf;
        let var_sim = pairs
            .iter()
            .map(|(s, _)| (s - mean_sim).powi(2))
            .sum::<FloatValue>()
            / nf;
        let cov = pairs
            .iter()
            .map(|(s, o)| (o - mean_obs) * (s - mean_sim))
            .sum::<FloatValue>()
            / nf;
        let stdev_obs = var_obs.sqrt();
        let stdev_sim = var_sim.sqrt();

        let nse = (var_obs != 0.0).then(|| 1.0 - mse / var_obs);
        let r = (stdev_obs != 0.0 && stdev_sim != 0.0).then(|| cov / stdev_obs / stdev_sim);

        Self {
            n,
            mse: Some(mse),
            rmse: Some(mse.sqrt()),
            bias: Some(bias),
            mean_obs: Some(mean_obs),
            mean_sim: Some(mean_sim),
            var_obs: Some(var_obs),
            var_sim: Some(var_sim),
            stdev_obs: Some(stdev_obs),
            stdev_sim: Some(stdev_sim),
            stdev_dif: Some(stdev_sim - stdev_obs),
            nse,
            cov: Some(cov),
            r,
            oneminusr: r.map(|r| 1.0 - r),
            group,
        }
    }

    /// Statistics inside `calibration` (group `cal`) and over its complement (group `val`).
    pub fn split(
        sim: &Array1<FloatValue>,
        obs: &Array1<FloatValue>,
        calibration: Range<usize>,
    ) -> (Self, Self) {
        let mask = |inside: bool| -> (Array1<FloatValue>, Array1<FloatValue>) {
            let pick = |values: &Array1<FloatValue>| {
                Array1::from_iter(values.iter().enumerate().map(|(i, v)| {
                    if calibration.contains(&i) == inside {
                        *v
                    } else {
                        FloatValue::NAN
                    }
                }))
            };
            (pick(sim), pick(obs))
        };
        let (cal_sim, cal_obs) = mask(true);
        let (val_sim, val_obs) = mask(false);
        (
            Self::compute(cal_sim.view(), cal_obs.view(), Some(StatisticsGroup::Cal)),
            Self::compute(val_sim.view(), val_obs.view(), Some(StatisticsGroup::Val)),
        )
    }
}

/// Scalar score minimized by the calibrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveFunction {
    #[default]
    Rmse,
    Mse,
    Bias,
    #[serde(alias = "stdev_diff")]
    StdevDif,
    R,
    Nse,
    Cov,
    Oneminusr,
}

impl ObjectiveFunction {
    /// Score normalized so that lower is better. `None` when the statistic is undefined.
    pub fn score(&self, statistics: &ResultStatistics) -> Option<FloatValue> {
        match self {
            ObjectiveFunction::Rmse => statistics.rmse,
            ObjectiveFunction::Mse => statistics.mse,
            ObjectiveFunction::Bias => statistics.bias.map(FloatValue::abs),
            ObjectiveFunction::StdevDif => statistics.stdev_dif.map(FloatValue::abs),
            ObjectiveFunction::R => statistics.r.map(|v| -v),
            ObjectiveFunction::Nse => statistics.nse.map(|v| -v),
            ObjectiveFunction::Cov => statistics.cov.map(|v| -v),
            ObjectiveFunction::Oneminusr => statistics.oneminusr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::array;

    #[test]
    fn perfect_fit() {
        let obs = array![1.0, 2.0, 3.0, 4.0];
        let stats = ResultStatistics::compute(obs.view(), obs.view(), None);
        assert_eq!(stats.n, 4);
        assert_eq!(stats.rmse, Some(0.0));
        assert_eq!(stats.bias, Some(0.0));
        assert_eq!(stats.nse, Some(1.0));
        assert!(is_close!(stats.r.unwrap(), 1.0));
        assert!(is_close!(stats.oneminusr.unwrap(), 0.0, abs_tol = 1e-12));
    }

    #[test]
    fn known_values() {
        let obs = array![1.0, 2.0, 3.0];
        let sim = array![2.0, 3.0, 5.0];
        let stats = ResultStatistics::compute(sim.view(), obs.view(), None);
        // errors 1, 1, 2
        assert!(is_close!(stats.mse.unwrap(), 2.0));
        assert!(is_close!(stats.bias.unwrap(), 4.0 / 3.0));
        assert!(is_close!(stats.mean_sim.unwrap(), 10.0 / 3.0));
        assert!(is_close!(stats.var_obs.unwrap(), 2.0 / 3.0));
        // 1 - mse / var_obs
        assert!(is_close!(stats.nse.unwrap(), -2.0));
    }

    #[test]
    fn skips_missing_and_reports_undefined() {
        let obs = array![f64::NAN, 2.0, 2.0];
        let sim = array![1.0, 3.0, f64::NAN];
        let stats = ResultStatistics::compute(sim.view(), obs.view(), None);
        assert_eq!(stats.n, 1);
        assert_eq!(stats.rmse, Some(1.0));
        assert_eq!(stats.nse, None);
        assert_eq!(stats.r, None);

        let empty = ResultStatistics::compute(sim.view(), Array1::from_elem(3, f64::NAN).view(), None);
        assert_eq!(empty.n, 0);
        assert_eq!(empty.rmse, None);
        assert_eq!(ObjectiveFunction::Rmse.score(&empty), None);
    }

    #[test]
    fn split_by_calibration_period() {
        let obs = array![1.0, 2.0, 3.0, 4.0];
        let sim = array![1.0, 2.0, 4.0, 6.0];
        let (cal, val) = ResultStatistics::split(&sim, &obs, 0..2);
        assert_eq!(cal.n, 2);
        assert_eq!(cal.rmse, Some(0.0));
        assert_eq!(cal.group, Some(StatisticsGroup::Cal));
        assert_eq!(val.n, 2);
        assert!(is_close!(val.bias.unwrap(), 1.5));
        assert_eq!(val.group, Some(StatisticsGroup::Val));
    }

    #[test]
    fn objectives_are_lower_is_better() {
        let stats = ResultStatistics {
            bias: Some(-2.0),
            stdev_dif: Some(-0.5),
            r: Some(0.9),
            nse: Some(0.8),
            cov: Some(1.5),
            rmse: Some(3.0),
            oneminusr: Some(0.1),
            ..Default::default()
        };
        assert_eq!(ObjectiveFunction::Bias.score(&stats), Some(2.0));
        assert_eq!(ObjectiveFunction::StdevDif.score(&stats), Some(0.5));
        assert_eq!(ObjectiveFunction::R.score(&stats), Some(-0.9));
        assert_eq!(ObjectiveFunction::Nse.score(&stats), Some(-0.8));
        assert_eq!(ObjectiveFunction::Cov.score(&stats), Some(-1.5));
        assert_eq!(ObjectiveFunction::Rmse.score(&stats), Some(3.0));
        assert_eq!(ObjectiveFunction::Oneminusr.score(&stats), Some(0.1));

        let parsed: ObjectiveFunction = serde_json::from_str("\"stdev_diff\"").unwrap();
        assert_eq!(parsed, ObjectiveFunction::StdevDif);
    }
}
