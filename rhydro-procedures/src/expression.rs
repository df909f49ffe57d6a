//! User-supplied arithmetic expression over named inputs.

use ndarray::Array1;
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::expression::Expression;
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::TimeIndex;
use serde::{Deserialize, Serialize};

/// Names in the expression must be bound. Checking the configuration reports an unbound
/// name as `ExpressionEval`, the same kind evaluation reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionFunction {
    /// e.g. `"0.5 * input_1 + sqrt(input_2)"`
    pub expression: String,
    /// Bound input names. Taken from the configured boundaries when absent.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl ExpressionFunction {
    pub fn new(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
            inputs: vec![],
        }
    }

    fn inputs(&self) -> Vec<String> {
        if self.inputs.is_empty() {
            Expression::parse(&self.expression)
                .map(|e| e.variables().into_iter().collect())
                .unwrap_or_default()
        } else {
            self.inputs.clone()
        }
    }
}

impl TransferFunction for ExpressionFunction {
    fn name(&self) -> &str {
        "Expression"
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
        let expression = Expression::parse(&self.expression)?;
        let mut output = Array1::from_elem(time_index.len(), f64::NAN);
        for (t, value) in output.iter_mut().enumerate() {
            let lookup = |name: &str| boundaries.get(name).map(|s| s.at(t as isize));
            *value = expression.eval(&lookup).map_err(|e| match e {
                HydroError::ExpressionEval(message) => {
                    HydroError::ExpressionEval(format!("step {t}: {message}"))
                }
                other => other,
            })?;
        }
        Ok(FunctionOutput::new(StateVector::empty()).with_output("output", output))
    }
}
