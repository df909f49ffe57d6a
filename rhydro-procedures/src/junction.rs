//! Confluence of upstream series: the output is the sum of every input.

use crate::linear_combination::default_inputs;
use ndarray::Array1;
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::{FloatValue, TimeIndex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Junction {
    /// `input_1` and `input_2` plus any additional inputs. Taken from the configured
    /// boundaries when absent.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl Junction {
    fn inputs(&self) -> Vec<String> {
        if self.inputs.is_empty() {
            default_inputs()
        } else {
            self.inputs.clone()
        }
    }
}

impl TransferFunction for Junction {
    fn name(&self) -> &str {
        "Junction"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        self.inputs().into_iter().map(BoundarySpec::required).collect()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        vec![]
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        _parameters: &ParameterVector,
        _initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let inputs = self
            .inputs()
            .iter()
            .map(|name| boundaries.require(name).copied())
            .collect::<HydroResult<Vec<_>>>()?;
        if inputs.len() < 2 {
            return Err(HydroError::Configuration(
                "a junction needs at least two inputs".into(),
            ));
        }

        // Any missing input makes the sum missing
        let output = Array1::from_iter(
            (0..time_index.len())
                .map(|t| inputs.iter().map(|s| s.at(t as isize)).sum::<FloatValue>()),
        );
        Ok(FunctionOutput::new(StateVector::empty()).with_output("output", output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};

    #[test]
    fn sums_inputs() {
        let a = series(1, &[1.0, 1.0, 1.0]);
        let b = series(2, &[2.0, 2.0, 2.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input_1", &a);
        boundaries.insert("input_2", &b);

        let result = Junction::default()
            .run(
                &boundaries,
                &ParameterVector::default(),
                &StateVector::empty(),
                &daily_index(3),
            )
            .unwrap();
        assert_eq!(result.outputs["output"].to_vec(), vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn additional_inputs_and_missing() {
        let a = series(1, &[1.0, 1.0]);
        let b = series(2, &[2.0, f64::NAN]);
        let c = series(3, &[4.0, 4.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input_1", &a);
        boundaries.insert("input_2", &b);
        boundaries.insert("input_3", &c);
        let junction = Junction {
            inputs: vec!["input_1".into(), "input_2".into(), "input_3".into()],
        };

        let result = junction
            .run(
                &boundaries,
                &ParameterVector::default(),
                &StateVector::empty(),
                &daily_index(2),
            )
            .unwrap();
        let output = &result.outputs["output"];
        assert_eq!(output[0], 7.0);
        assert!(output[1].is_nan());
    }

    #[test]
    fn unbound_input_is_an_error() {
        let a = series(1, &[1.0, 1.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input_1", &a);
        assert!(Junction::default()
            .run(
                &boundaries,
                &ParameterVector::default(),
                &StateVector::empty(),
                &daily_index(2),
            )
            .is_err());
    }
}
