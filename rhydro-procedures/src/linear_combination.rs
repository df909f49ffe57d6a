//! Weighted sum of any number of named inputs.

use ndarray::Array1;
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::HydroResult;
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::TimeIndex;
use serde::{Deserialize, Serialize};

pub(crate) fn default_inputs() -> Vec<String> {
    vec!["input_1".to_string(), "input_2".to_string()]
}

/// `output[t] = intercept + Σ weight_<name> · <name>[t]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCombination {
    /// Input names, in parameter order. Taken from the configured boundaries when absent.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl Default for LinearCombination {
    fn default() -> Self {
        Self {
            inputs: default_inputs(),
        }
    }
}

impl LinearCombination {
    pub fn new(inputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn inputs(&self) -> Vec<String> {
        if self.inputs.is_empty() {
            default_inputs()
        } else {
            self.inputs.clone()
        }
    }
}

impl TransferFunction for LinearCombination {
    fn name(&self) -> &str {
        "LinearCombination"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        self.inputs().into_iter().map(BoundarySpec::required).collect()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        let mut definitions = vec![ParameterDefinition::unbounded("intercept")];
        definitions.extend(
            self.inputs()
                .iter()
                .map(|name| ParameterDefinition::unbounded(format!("weight_{name}"))),
        );
        definitions
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        _initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let intercept = parameters.require("intercept")?;
        let terms = self
            .inputs()
            .iter()
            .map(|name| -> HydroResult<_> {
                let weight = parameters.require(&format!("weight_{name}"))?;
                Ok((boundaries.require(name)?, weight))
            })
            .collect::<HydroResult<Vec<_>>>()?;

        let output = Array1::from_iter((0..time_index.len()).map(|t| {
            terms
                .iter()
                .fold(intercept, |acc, (series, weight)| {
                    acc + weight * series.at(t as isize)
                })
        }));
        Ok(FunctionOutput::new(StateVector::empty()).with_output("output", output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};
    use rhydro_core::parameters::ValueInput;

    #[test]
    fn weighted_sum_with_intercept() {
        let function = LinearCombination::new(&["input_1"]);
        let input = series(1, &[1.0, 2.0, 3.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input_1", &input);
        let parameters = ParameterVector::from_input(
            &function.parameter_definitions(),
            &ValueInput::List(vec![22.0, 2.0]),
        )
        .unwrap();

        let result = function
            .run(&boundaries, &parameters, &StateVector::empty(), &daily_index(3))
            .unwrap();
        assert_eq!(result.outputs["output"].to_vec(), vec![24.0, 26.0, 28.0]);
    }

    #[test]
    fn two_inputs_and_missing_values() {
        let function = LinearCombination::default();
        let a = series(1, &[1.0, f64::NAN, 1.0]);
        let b = series(2, &[10.0, 10.0, 20.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input_1", &a);
        boundaries.insert("input_2", &b);
        let table: ValueInput = serde_json::from_str(
            r#"{"intercept": 0.0, "weight_input_1": 1.0, "weight_input_2": 0.5}"#,
        )
        .unwrap();
        let parameters =
            ParameterVector::from_input(&function.parameter_definitions(), &table).unwrap();

        let result = function
            .run(&boundaries, &parameters, &StateVector::empty(), &daily_index(3))
            .unwrap();
        let output = &result.outputs["output"];
        assert_eq!(output[0], 6.0);
        assert!(output[1].is_nan());
        assert_eq!(output[2], 11.0);
    }
}
