//! The contract every transfer-function model implements.

use crate::boundary::{BoundarySet, BoundarySpec};
use crate::errors::{HydroError, HydroResult};
use crate::parameters::{ParameterDefinition, ParameterVector, StateVector};
use crate::timeseries::{FloatValue, TimeIndex};
use indexmap::IndexMap;
use ndarray::{Array1, Array2};

/// Outputs of one run of a transfer function over the full window.
#[derive(Debug, Clone, Default)]
pub struct FunctionOutput {
    /// One series per output name, each with one value per index step.
    pub outputs: IndexMap<String, Array1<FloatValue>>,
    /// State after the last step, usable as the initial state of a following run.
    pub final_state: StateVector,
    /// Optional state trajectory, shape `(steps, states)`.
    pub states: Option<Array2<FloatValue>>,
}

impl FunctionOutput {
    pub fn new(final_state: StateVector) -> Self {
        Self {
            outputs: IndexMap::new(),
            final_state,
            states: None,
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, values: Array1<FloatValue>) -> Self {
        self.outputs.insert(name.into(), values);
        self
    }

    pub fn with_states(mut self, states: Array2<FloatValue>) -> Self {
        self.states = Some(states);
        self
    }

    pub fn output(&self, name: &str) -> Option<&Array1<FloatValue>> {
        self.outputs.get(name)
    }
}

/// A discrete-time model mapping boundary series to output series.
///
/// Models run over the whole window in a single call. Each is a left-to-right reduction
/// `(state_t, boundary_t) -> (state_t+1, output_t)` starting from `initial_state`, or from
/// the model's default state when `initial_state` is empty.
pub trait TransferFunction {
    /// Name used in error messages and logs.
    fn name(&self) -> &str;

    fn boundary_specs(&self) -> Vec<BoundarySpec>;

    fn output_names(&self) -> Vec<String>;

    fn parameter_definitions(&self) -> Vec<ParameterDefinition>;

    /// Empty when the state length depends on the configuration.
    fn state_names(&self) -> Vec<String> {
        vec![]
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput>;
}

/// Check that every output has one value per index step.
pub fn check_output_lengths(
    model: &str,
    output: &FunctionOutput,
    time_index: &TimeIndex,
) -> HydroResult<()> {
    for (name, values) in &output.outputs {
        if values.len() != time_index.len() {
            return Err(HydroError::model(
                model,
                values.len().min(time_index.len()),
                format!(
                    "output '{name}' has {} values, expected {}",
                    values.len(),
                    time_index.len()
                ),
            ));
        }
    }
    Ok(())
}
