//! Polynomial transformation of a single input.
//!
//! `output[t] = intercept + Σ coefficient_i · input[t]^i` for `i` in `1..=degree`.

use ndarray::Array1;
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::HydroResult;
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector, ValueInput};
use rhydro_core::timeseries::TimeIndex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polynomial {
    /// Number of coefficients. Inferred from the configured parameters when absent.
    #[serde(default)]
    pub degree: Option<usize>,
}

impl Polynomial {
    pub fn new(degree: usize) -> Self {
        Self {
            degree: Some(degree),
        }
    }

    pub fn degree(&self) -> usize {
        self.degree.unwrap_or(1)
    }

    pub(crate) fn infer_degree(&mut self, parameters: &ValueInput) {
        if self.degree.is_some() {
            return;
        }
        let degree = match parameters {
            // intercept first
            ValueInput::List(values) => values.len().saturating_sub(1),
            ValueInput::Map(table) => table
                .keys()
                .filter(|k| k.starts_with("coefficient_"))
                .count(),
        };
        self.degree = Some(degree.max(1));
    }
}

impl TransferFunction for Polynomial {
    fn name(&self) -> &str {
        "Polynomial"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        vec![BoundarySpec::required("input")]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        let mut definitions = vec![ParameterDefinition::unbounded("intercept")];
        definitions.extend(
            (1..=self.degree()).map(|i| ParameterDefinition::unbounded(format!("coefficient_{i}"))),
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
        let input = boundaries.require("input")?;
        let values = parameters.values();
        let (intercept, coefficients) = match values.split_first() {
            Some((intercept, coefficients)) => (*intercept, coefficients),
            None => (0.0, &[][..]),
        };

        let output = Array1::from_iter((0..time_index.len()).map(|t| {
            let x = input.at(t as isize);
            coefficients
                .iter()
                .enumerate()
                .fold(intercept, |acc, (i, c)| acc + c * x.powi(i as i32 + 1))
        }));
        Ok(FunctionOutput::new(StateVector::empty()).with_output("output", output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};

    fn run(polynomial: &Polynomial, values: &[f64], parameters: Vec<f64>) -> Array1<f64> {
        let buffer = series(1, values);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("input", &buffer);
        let parameters = ParameterVector::from_input(
            &polynomial.parameter_definitions(),
            &ValueInput::List(parameters),
        )
        .unwrap();
        polynomial
            .run(
                &boundaries,
                &parameters,
                &StateVector::empty(),
                &daily_index(values.len()),
            )
            .unwrap()
            .outputs["output"]
            .clone()
    }

    #[test]
    fn quadratic() {
        let output = run(&Polynomial::new(2), &[0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]);
        // 1 + 2x + 3x^2
        assert_eq!(output.to_vec(), vec![1.0, 6.0, 17.0]);
    }

    #[test]
    fn degree_inferred_from_parameters() {
        let mut polynomial = Polynomial::default();
        polynomial.infer_degree(&ValueInput::List(vec![0.5, 1.0, 0.0, 2.0]));
        assert_eq!(polynomial.degree(), 3);
        assert_eq!(polynomial.parameter_definitions()[3].name, "coefficient_3");

        let mut polynomial = Polynomial::default();
        let table: ValueInput =
            serde_json::from_str(r#"{"intercept": 0.0, "coefficient_1": 1.0}"#).unwrap();
        polynomial.infer_degree(&table);
        assert_eq!(polynomial.degree(), 1);
    }

    #[test]
    fn output_depends_only_on_current_input() {
        let polynomial = Polynomial::new(2);
        let base = run(&polynomial, &[1.0, 2.0, 3.0, 4.0], vec![1.0, 0.5, 0.25]);
        let perturbed = run(&polynomial, &[1.0, 9.0, 3.0, f64::NAN], vec![1.0, 0.5, 0.25]);
        assert_eq!(base[0], perturbed[0]);
        assert_ne!(base[1], perturbed[1]);
        assert_eq!(base[2], perturbed[2]);
        assert!(perturbed[3].is_nan());
    }
}
