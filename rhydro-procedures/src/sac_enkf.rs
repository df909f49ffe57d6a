//! Ensemble Kalman filter around a balance model.
//!
//! Members start from the same state. At every step with an observed discharge the members
//! are perturbed with process noise, compared against the observation through
//! [`BalanceModel::observe`] and nudged by the ensemble Kalman gain. All members then
//! advance, and the reported outputs are the ensemble means.

use crate::balance::{
    balance_boundaries, balance_outputs, forcing, initial_state, BalanceModel,
};
use crate::grp::Grp;
use crate::sacramento::SacramentoSimplified;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::{FloatValue, TimeIndex};
use serde::{Deserialize, Serialize};

/// Balance models the filter can wrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WrappedModel {
    #[serde(alias = "SacramentoSimplifiedProcedureFunction")]
    SacramentoSimplified(SacramentoSimplified),
    #[serde(rename = "GRP", alias = "GRPProcedureFunction")]
    Grp(Grp),
}

fn default_n_members() -> usize {
    30
}

fn default_obs_noise() -> FloatValue {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SacEnKF {
    pub model: WrappedModel,
    #[serde(default = "default_n_members")]
    pub n_members: usize,
    #[serde(default)]
    pub seed: u64,
    /// Standard deviation of the perturbation applied to each state.
    ///
    /// Defaults to 5% of the magnitude of each member's state.
    #[serde(default)]
    pub process_noise: Option<Vec<FloatValue>>,
    /// Standard deviation of the discharge observation error
    #[serde(default = "default_obs_noise")]
    pub obs_noise: FloatValue,
}

impl SacEnKF {
    pub fn new(model: WrappedModel) -> Self {
        Self {
            model,
            n_members: default_n_members(),
            seed: 0,
            process_noise: None,
            obs_noise: default_obs_noise(),
        }
    }

    fn validate(&self, dim: usize) -> HydroResult<()> {
        if self.n_members < 2 {
            return Err(HydroError::Configuration(format!(
                "SacEnKF needs at least 2 members, got {}",
                self.n_members
            )));
        }
        if !(self.obs_noise >= 0.0) {
            return Err(HydroError::Configuration(format!(
                "SacEnKF: obs_noise must be non-negative, got {}",
                self.obs_noise
            )));
        }
        if let Some(noise) = &self.process_noise {
            if noise.len() != dim {
                return Err(HydroError::Configuration(format!(
                    "SacEnKF: process_noise has {} values for {dim} states",
                    noise.len()
                )));
            }
            if noise.iter().any(|sd| !(*sd >= 0.0)) {
                return Err(HydroError::Configuration(
                    "SacEnKF: process_noise must be non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn process_sd(&self, i: usize, x: FloatValue) -> FloatValue {
        match &self.process_noise {
            Some(noise) => noise[i],
            None => 0.05 * x.abs().max(1e-3),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assimilate<M: BalanceModel>(
        &self,
        model: &M,
        parameters: &M::Parameters,
        members: &mut [Vec<FloatValue>],
        observed: FloatValue,
        pma: FloatValue,
        etp: FloatValue,
        step: usize,
        rng: &mut ChaCha8Rng,
    ) -> HydroResult<()> {
        for member in members.iter_mut() {
            for (i, x) in member.iter_mut().enumerate() {
                let z: FloatValue = rng.sample(StandardNormal);
                *x += self.process_sd(i, *x) * z;
            }
            model.constrain(parameters, member);
        }

        let predicted = members
            .iter()
            .map(|m| model.observe(parameters, m, pma, etp, step).map(|out| out.q))
            .collect::<HydroResult<Vec<_>>>()?;

        let n = members.len() as FloatValue;
        let h_mean = predicted.iter().sum::<FloatValue>() / n;
        let var_h = predicted
            .iter()
            .map(|h| (h - h_mean).powi(2))
            .sum::<FloatValue>()
            / (n - 1.0);
        let denominator = var_h + self.obs_noise.powi(2);

        let dim = members[0].len();
        let gain: Vec<FloatValue> = (0..dim)
            .map(|i| {
                if denominator <= 0.0 {
                    return 0.0;
                }
                let x_mean = members.iter().map(|m| m[i]).sum::<FloatValue>() / n;
                let cov = members
                    .iter()
                    .zip(&predicted)
                    .map(|(m, h)| (m[i] - x_mean) * (h - h_mean))
                    .sum::<FloatValue>()
                    / (n - 1.0);
                cov / denominator
            })
            .collect();

        for (member, h) in members.iter_mut().zip(&predicted) {
            let z: FloatValue = rng.sample(StandardNormal);
            let innovation = observed + self.obs_noise * z - h;
            for (x, k) in member.iter_mut().zip(&gain) {
                *x += k * innovation;
            }
            model.constrain(parameters, member);
        }
        Ok(())
    }

    fn filter<M: BalanceModel>(
        &self,
        model: &M,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let prepared = model.prepare(parameters, time_index)?;
        let start = initial_state(model, &prepared, initial)?;
        let names = model.state_names();
        self.validate(names.len())?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut members = vec![start; self.n_members];
        let observations = boundaries.get("q_obs");

        let n = time_index.len();
        let size = self.n_members as FloatValue;
        let mut q = Array1::from_elem(n, FloatValue::NAN);
        let mut smc = Array1::from_elem(n, FloatValue::NAN);
        let mut states = Array2::from_elem((n, names.len()), FloatValue::NAN);
        let mut updates = 0;

        for t in 0..n {
            let (pma, etp) = forcing(boundaries, model.fill_nulls(), t)?;
            if pma.is_nan() || etp.is_nan() {
                if !model.missing_policy().freezes() {
                    for member in members.iter_mut() {
                        member.iter_mut().for_each(|x| *x = FloatValue::NAN);
                    }
                }
            } else if members[0].iter().all(|x| !x.is_nan()) {
                let observed = observations
                    .map(|s| s.at(t as isize))
                    .unwrap_or(FloatValue::NAN);
                if observed.is_finite() {
                    self.assimilate(
                        model,
                        &prepared,
                        &mut members,
                        observed,
                        pma,
                        etp,
                        t,
                        &mut rng,
                    )?;
                    updates += 1;
                }
                let (mut q_sum, mut smc_sum) = (0.0, 0.0);
                for member in members.iter_mut() {
                    let out = model.advance(&prepared, member, pma, etp, t)?;
                    q_sum += out.q;
                    smc_sum += out.smc;
                }
                q[t] = q_sum / size;
                smc[t] = smc_sum / size;
            }
            for (i, x) in mean_state(&members).into_iter().enumerate() {
                states[[t, i]] = x;
            }
        }
        log::debug!(
            "SacEnKF({}): {updates} updates over {n} steps with {} members",
            model.name(),
            self.n_members
        );

        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        Ok(
            FunctionOutput::new(StateVector::named(&name_refs, mean_state(&members)))
                .with_output("q_sim", q)
                .with_output("smc_sim", smc)
                .with_states(states),
        )
    }
}

fn mean_state(members: &[Vec<FloatValue>]) -> Vec<FloatValue> {
    let n = members.len() as FloatValue;
    let dim = members.first().map(Vec::len).unwrap_or(0);
    (0..dim)
        .map(|i| members.iter().map(|m| m[i]).sum::<FloatValue>() / n)
        .collect()
}

impl TransferFunction for SacEnKF {
    fn name(&self) -> &str {
        "SacEnKF"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        balance_boundaries()
    }

    fn output_names(&self) -> Vec<String> {
        balance_outputs()
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        match &self.model {
            WrappedModel::SacramentoSimplified(m) => BalanceModel::parameter_definitions(m),
            WrappedModel::Grp(m) => BalanceModel::parameter_definitions(m),
        }
    }

    fn state_names(&self) -> Vec<String> {
        match &self.model {
            WrappedModel::SacramentoSimplified(m) => BalanceModel::state_names(m),
            WrappedModel::Grp(m) => BalanceModel::state_names(m),
        }
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        match &self.model {
            WrappedModel::SacramentoSimplified(m) => {
                self.filter(m, boundaries, parameters, initial_state, time_index)
            }
            WrappedModel::Grp(m) => {
                self.filter(m, boundaries, parameters, initial_state, time_index)
            }
        }
    }
}
