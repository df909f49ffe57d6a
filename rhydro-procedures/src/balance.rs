//! Shared machinery of the soil-moisture balance models.
//!
//! A balance model turns precipitation (`pma`) and potential evapotranspiration (`etp`) into
//! discharge (`q_sim`) and soil moisture content (`smc_sim`), one step at a time. The
//! [`BalanceModel`] trait is the seam used both by the plain run and by the ensemble
//! Kalman filter.

use ndarray::{Array1, Array2};
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::FunctionOutput;
use rhydro_core::missing::{fill_null, MissingPolicy};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::{FloatValue, TimeIndex};

/// Outputs of a single step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Discharge in m³/s
    pub q: FloatValue,
    /// Soil moisture content fraction
    pub smc: FloatValue,
}

pub trait BalanceModel {
    /// Parameters already validated and converted for stepping.
    type Parameters;

    fn name(&self) -> &str;

    fn parameter_definitions(&self) -> Vec<ParameterDefinition>;

    fn state_names(&self) -> Vec<String>;

    fn fill_nulls(&self) -> bool;

    fn missing_policy(&self) -> MissingPolicy;

    fn prepare(
        &self,
        parameters: &ParameterVector,
        time_index: &TimeIndex,
    ) -> HydroResult<Self::Parameters>;

    fn default_state(&self, parameters: &Self::Parameters) -> Vec<FloatValue>;

    /// Clip `state` to its physical bounds.
    fn constrain(&self, parameters: &Self::Parameters, state: &mut [FloatValue]);

    /// Advance `state` over one step and return the outputs of that step.
    fn advance(
        &self,
        parameters: &Self::Parameters,
        state: &mut [FloatValue],
        pma: FloatValue,
        etp: FloatValue,
        step: usize,
    ) -> HydroResult<StepOutput>;

    /// Outputs `advance` would return from `state`, leaving it untouched.
    fn observe(
        &self,
        parameters: &Self::Parameters,
        state: &[FloatValue],
        pma: FloatValue,
        etp: FloatValue,
        step: usize,
    ) -> HydroResult<StepOutput> {
        let mut trial = state.to_vec();
        self.advance(parameters, &mut trial, pma, etp, step)
    }

    /// Outputs written next to `q_sim` and `smc_sim`.
    fn extra_output_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// One value per [`extra_output_names`](Self::extra_output_names) entry, from the state at
    /// the start of the step. `q_obs` is NaN when no observation is bound or available.
    fn extra_outputs(
        &self,
        _parameters: &Self::Parameters,
        _state: &[FloatValue],
        _q_sim: FloatValue,
        _q_obs: FloatValue,
    ) -> Vec<FloatValue> {
        Vec::new()
    }
}

pub fn balance_boundaries() -> Vec<BoundarySpec> {
    vec![
        BoundarySpec::required("pma"),
        BoundarySpec::required("etp"),
        BoundarySpec::optional("q_obs"),
        BoundarySpec::optional("smc_obs"),
    ]
}

pub fn balance_outputs() -> Vec<String> {
    vec!["q_sim".to_string(), "smc_sim".to_string()]
}

/// The configured initial state, or the model default when none is given.
pub fn initial_state<M: BalanceModel>(
    model: &M,
    parameters: &M::Parameters,
    initial: &StateVector,
) -> HydroResult<Vec<FloatValue>> {
    let names = model.state_names();
    let mut state = if initial.is_empty() {
        model.default_state(parameters)
    } else if initial.len() == names.len() {
        initial.values().to_vec()
    } else {
        return Err(HydroError::Configuration(format!(
            "{} expects {} initial states ({}), got {}",
            model.name(),
            names.len(),
            names.join(", "),
            initial.len()
        )));
    };
    model.constrain(parameters, &mut state);
    Ok(state)
}

/// Boundary values at `t` after applying the fill rule.
pub fn forcing(
    boundaries: &BoundarySet,
    fill_nulls: bool,
    t: usize,
) -> HydroResult<(FloatValue, FloatValue)> {
    let pma = boundaries.require("pma")?.at(t as isize);
    let etp = boundaries.require("etp")?.at(t as isize);
    Ok((fill_null(pma, fill_nulls), fill_null(etp, fill_nulls)))
}

/// Run a balance model over the full window.
pub fn run_balance<M: BalanceModel>(
    model: &M,
    boundaries: &BoundarySet,
    parameters: &ParameterVector,
    initial: &StateVector,
    time_index: &TimeIndex,
) -> HydroResult<FunctionOutput> {
    let prepared = model.prepare(parameters, time_index)?;
    let mut state = initial_state(model, &prepared, initial)?;
    let names = model.state_names();
    let extra_names = model.extra_output_names();

    let n = time_index.len();
    let mut q = Array1::from_elem(n, FloatValue::NAN);
    let mut smc = Array1::from_elem(n, FloatValue::NAN);
    let mut states = Array2::from_elem((n, names.len()), FloatValue::NAN);
    let mut extras = Array2::from_elem((n, extra_names.len()), FloatValue::NAN);
    let mut missing_steps = 0;

    for t in 0..n {
        let (pma, etp) = forcing(boundaries, model.fill_nulls(), t)?;
        if pma.is_nan() || etp.is_nan() {
            missing_steps += 1;
            if !model.missing_policy().freezes() {
                state.iter_mut().for_each(|x| *x = FloatValue::NAN);
            }
        } else if state.iter().all(|x| !x.is_nan()) {
            let start = state.clone();
            let out = model.advance(&prepared, &mut state, pma, etp, t)?;
            q[t] = out.q;
            smc[t] = out.smc;
            if !extra_names.is_empty() {
                let q_obs = boundaries
                    .get("q_obs")
                    .map_or(FloatValue::NAN, |s| s.at(t as isize));
                let values = model.extra_outputs(&prepared, &start, out.q, q_obs);
                for (i, value) in values.into_iter().take(extra_names.len()).enumerate() {
                    extras[[t, i]] = value;
                }
            }
        }
        for (i, x) in state.iter().enumerate() {
            states[[t, i]] = *x;
        }
    }
    if missing_steps > 0 {
        log::warn!(
            "{}: {missing_steps} steps without pma/etp, outputs left missing",
            model.name()
        );
    }

    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut output = FunctionOutput::new(StateVector::named(&name_refs, state))
        .with_output("q_sim", q)
        .with_output("smc_sim", smc)
        .with_states(states);
    for (i, name) in extra_names.iter().enumerate() {
        output = output.with_output(name.as_str(), extras.column(i).to_owned());
    }
    Ok(output)
}

/// Fail with the step index when a state value is not finite.
pub fn check_state(model: &str, state: &[FloatValue], step: usize) -> HydroResult<()> {
    match state.iter().position(|x| !x.is_finite()) {
        Some(i) => Err(HydroError::model(
            model,
            step,
            format!("state {i} became non-finite ({})", state[i]),
        )),
        None => Ok(()),
    }
}
