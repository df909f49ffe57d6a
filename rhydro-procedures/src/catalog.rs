//! Selection of a transfer function from configuration.

use crate::expression::ExpressionFunction;
use crate::grp::Grp;
use crate::hecras::HecRas;
use crate::junction::Junction;
use crate::linear_channel::{LinearChannel, UhLinearChannel};
use crate::linear_combination::LinearCombination;
use crate::muskingum::MuskingumChannel;
use crate::polynomial::Polynomial;
use crate::sac_enkf::SacEnKF;
use crate::sacramento::SacramentoSimplified;
use indexmap::IndexMap;
use rhydro_core::boundary::{Binding, BoundarySet, BoundarySpec, OutputBinding};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{
    ParameterDefinition, ParameterVector, StateVector, ValueInput,
};
use rhydro_core::timeseries::TimeIndex;
use serde::{Deserialize, Serialize};

/// Every available model, keyed by `type`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcedureFunction {
    #[serde(alias = "PolynomialTransformationProcedureFunction")]
    Polynomial(Polynomial),
    #[serde(alias = "LinearCombinationProcedureFunction")]
    LinearCombination(LinearCombination),
    /// Linear combinations of `input_1`.. whose inputs are only required before the
    /// forecast date.
    #[serde(alias = "LinearCombination2BProcedureFunction")]
    LinearCombination2B(LinearCombination),
    #[serde(alias = "LinearCombination3BProcedureFunction")]
    LinearCombination3B(LinearCombination),
    #[serde(alias = "LinearCombination4BProcedureFunction")]
    LinearCombination4B(LinearCombination),
    #[serde(alias = "ExpressionProcedureFunction")]
    Expression(ExpressionFunction),
    #[serde(alias = "JunctionProcedureFunction")]
    Junction(Junction),
    #[serde(alias = "MuskingumChannelProcedureFunction")]
    MuskingumChannel(MuskingumChannel),
    #[serde(alias = "LinearChannelProcedureFunction")]
    LinearChannel(LinearChannel),
    #[serde(rename = "UHLinearChannel", alias = "UHLinearChannelProcedureFunction")]
    UhLinearChannel(UhLinearChannel),
    #[serde(rename = "GRP", alias = "GRPProcedureFunction")]
    Grp(Grp),
    #[serde(alias = "SacramentoSimplifiedProcedureFunction")]
    SacramentoSimplified(SacramentoSimplified),
    #[serde(alias = "SacEnkfProcedureFunction")]
    SacEnKF(SacEnKF),
    #[serde(alias = "HecRasProcedureFunction")]
    HecRas(HecRas),
}

impl ProcedureFunction {
    fn inner(&self) -> &dyn TransferFunction {
        match self {
            ProcedureFunction::Polynomial(f) => f,
            ProcedureFunction::LinearCombination(f)
            | ProcedureFunction::LinearCombination2B(f)
            | ProcedureFunction::LinearCombination3B(f)
            | ProcedureFunction::LinearCombination4B(f) => f,
            ProcedureFunction::Expression(f) => f,
            ProcedureFunction::Junction(f) => f,
            ProcedureFunction::MuskingumChannel(f) => f,
            ProcedureFunction::LinearChannel(f) => f,
            ProcedureFunction::UhLinearChannel(f) => f,
            ProcedureFunction::Grp(f) => f,
            ProcedureFunction::SacramentoSimplified(f) => f,
            ProcedureFunction::SacEnKF(f) => f,
            ProcedureFunction::HecRas(f) => f,
        }
    }
}

impl TransferFunction for ProcedureFunction {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        self.inner().boundary_specs()
    }

    fn output_names(&self) -> Vec<String> {
        self.inner().output_names()
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        self.inner().parameter_definitions()
    }

    fn state_names(&self) -> Vec<String> {
        self.inner().state_names()
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        self.inner()
            .run(boundaries, parameters, initial_state, time_index)
    }
}

/// The `function` section of a procedure.
///
/// Model specific fields sit next to `type` in the same table:
///
/// ```toml
/// type = "MuskingumChannel"
/// dt = 1.0
/// parameters = [2.0, 0.2]
/// boundaries = { input = [1, 1] }
/// outputs = { output = [2, 1] }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(flatten)]
    pub model: ProcedureFunction,
    #[serde(default)]
    pub parameters: ValueInput,
    #[serde(default, alias = "init_states")]
    pub initial_states: ValueInput,
    #[serde(default)]
    pub boundaries: IndexMap<String, Binding>,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputBinding>,
}

impl FunctionConfig {
    /// Fill model fields left to be taken from the rest of the configuration.
    ///
    /// Input and output name lists default to the bound names, the polynomial degree and the unit
    /// hydrograph ordinates to the configured parameters.
    pub fn complete(&mut self) {
        let bound: Vec<String> = self.boundaries.keys().cloned().collect();
        match &mut self.model {
            ProcedureFunction::LinearCombination(f) if !bound.is_empty() => {
                if f.inputs.is_empty() {
                    f.inputs = bound;
                }
            }
            ProcedureFunction::LinearCombination2B(f) => warmup_inputs(f, 2, &mut self.boundaries),
            ProcedureFunction::LinearCombination3B(f) => warmup_inputs(f, 3, &mut self.boundaries),
            ProcedureFunction::LinearCombination4B(f) => warmup_inputs(f, 4, &mut self.boundaries),
            ProcedureFunction::Junction(f) => {
                if f.inputs.is_empty() {
                    f.inputs = bound;
                }
            }
            ProcedureFunction::HecRas(f) => {
                if f.inputs.is_empty() {
                    f.inputs = bound;
                }
                if f.outputs.is_empty() {
                    f.outputs = self.outputs.keys().cloned().collect();
                }
            }
            ProcedureFunction::Polynomial(f) => f.infer_degree(&self.parameters),
            ProcedureFunction::UhLinearChannel(f) => f.infer_ordinates(&self.parameters),
            _ => {}
        }
    }

    pub fn parameter_vector(&self) -> HydroResult<ParameterVector> {
        let definitions = self.model.parameter_definitions();
        let bound = match (&self.model, self.parameters.is_empty()) {
            (ProcedureFunction::UhLinearChannel(f), true) => {
                ParameterVector::from_input(&definitions, &ValueInput::List(f.u.clone()))
            }
            _ => ParameterVector::from_input(&definitions, &self.parameters),
        };
        bound.map_err(|e| match e {
            HydroError::Configuration(message) => {
                HydroError::Configuration(format!("{}: {message}", self.model.name()))
            }
            other => other,
        })
    }

    pub fn initial_state(&self) -> HydroResult<StateVector> {
        StateVector::from_input(&self.model.state_names(), &self.initial_states)
    }

    /// Check that the bindings match what the model reads and writes.
    pub fn validate(&self) -> HydroResult<()> {
        let name = self.model.name();
        let specs = self.model.boundary_specs();
        for spec in specs.iter().filter(|s| !s.optional) {
            if !self.boundaries.contains_key(&spec.name) {
                let message = format!("{name}: required boundary '{}' is not bound", spec.name);
                return Err(match self.model {
                    ProcedureFunction::Expression(_) => HydroError::ExpressionEval(message),
                    _ => HydroError::Configuration(message),
                });
            }
        }
        for bound in self.boundaries.keys() {
            if !specs.is_empty() && !specs.iter().any(|s| &s.name == bound) {
                log::warn!("{name}: boundary '{bound}' is not read by the model");
            }
        }
        let outputs = self.model.output_names();
        if let Some(unknown) = self.outputs.keys().find(|o| !outputs.contains(o)) {
            return Err(HydroError::Configuration(format!(
                "{name}: unknown output '{unknown}', expected one of {}",
                outputs.join(", ")
            )));
        }
        self.parameter_vector()?;
        self.initial_state()?;
        Ok(())
    }
}

/// `input_1..=input_n`, every one bound as warmup only.
fn warmup_inputs(f: &mut LinearCombination, n: usize, boundaries: &mut IndexMap<String, Binding>) {
    if f.inputs.is_empty() {
        f.inputs = (1..=n).map(|i| format!("input_{i}")).collect();
    }
    for name in &f.inputs {
        if let Some(binding) = boundaries.get_mut(name) {
            binding.warmup_only = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_json(json: &str) -> FunctionConfig {
        let mut config: FunctionConfig = serde_json::from_str(json).unwrap();
        config.complete();
        config
    }

    #[test]
    fn original_type_names_are_accepted() {
        let config = parse_json(
            r#"{"type": "PolynomialTransformationProcedureFunction",
                "parameters": [0.5, 2.0, 0.1],
                "boundaries": {"input": [1, 1]},
                "outputs": {"output": [2, 1]}}"#,
        );
        assert!(matches!(&config.model, ProcedureFunction::Polynomial(p) if p.degree() == 2));
        assert_eq!(
            config.parameter_vector().unwrap().names().collect::<Vec<_>>(),
            vec!["intercept", "coefficient_1", "coefficient_2"]
        );
        config.validate().unwrap();
    }

    #[test]
    fn toml_function_with_variant_fields() {
        let mut config: FunctionConfig = toml::from_str(
            r#"
type = "SacramentoSimplified"
area = 1000000.0
no_check2 = true
missing_policy = "propagate"
parameters = [100.0, 500.0, 1.5, 0.05, 50.0, 0.01, 1.0, 0.1, 1.2, 1.2]
init_states = [50.0, 250.0, 0.0, 0.0]

[boundaries]
pma = [1, 1]
etp = [1, 2]
q_obs = { node_id = 1, variable_id = 40, optional = true }

[outputs]
q_sim = { node_id = 1, variable_id = 40, overwrite = true }
"#,
        )
        .unwrap();
        config.complete();
        match &config.model {
            ProcedureFunction::SacramentoSimplified(s) => {
                assert!(s.no_check2);
                assert!(!s.missing_policy.freezes());
                assert_eq!(s.area, 1e6);
            }
            other => panic!("unexpected model {other:?}"),
        }
        assert_eq!(config.initial_state().unwrap().get("x2"), Some(250.0));
        assert!(config.boundaries["q_obs"].optional);
        assert!(config.outputs["q_sim"].overwrite);
        config.validate().unwrap();
    }

    #[test]
    fn inputs_follow_bound_boundaries() {
        let config = parse_json(
            r#"{"type": "LinearCombination",
                "parameters": {"intercept": 1.0, "weight_upstream": 0.5, "weight_tributary": 0.3},
                "boundaries": {"upstream": [1, 1], "tributary": [2, 1]}}"#,
        );
        let names: Vec<String> = config
            .model
            .boundary_specs()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["upstream", "tributary"]);
        assert!(config.parameter_vector().is_ok());

        let junction = parse_json(
            r#"{"type": "Junction",
                "boundaries": {"input_1": [1, 1], "input_2": [2, 1], "input_3": [3, 1]}}"#,
        );
        assert_eq!(junction.model.boundary_specs().len(), 3);
    }

    #[test]
    fn warmup_only_linear_combinations() {
        let config = parse_json(
            r#"{"type": "LinearCombination2B", "parameters": [0.0, 1.0, 0.5],
                "boundaries": {"input_1": [1, 1], "input_2": [2, 1]},
                "outputs": {"output": [3, 1]}}"#,
        );
        assert!(matches!(config.model, ProcedureFunction::LinearCombination2B(_)));
        assert!(config.boundaries.values().all(|b| b.warmup_only));
        assert_eq!(
            config.parameter_vector().unwrap().names().collect::<Vec<_>>(),
            vec!["intercept", "weight_input_1", "weight_input_2"]
        );
        config.validate().unwrap();

        let four = parse_json(
            r#"{"type": "LinearCombination4BProcedureFunction",
                "boundaries": {"input_1": [1, 1], "input_2": [2, 1], "input_3": [3, 1]}}"#,
        );
        assert_eq!(four.model.boundary_specs().len(), 4);
        assert!(matches!(four.validate(), Err(HydroError::Configuration(_))));
    }

    #[test]
    fn unit_hydrograph_defaults_to_configured_ordinates() {
        let config = parse_json(
            r#"{"type": "UHLinearChannel", "u": [0.2, 0.5, 0.3],
                "boundaries": {"input": [1, 1]}}"#,
        );
        let parameters = config.parameter_vector().unwrap();
        assert_eq!(parameters.values(), vec![0.2, 0.5, 0.3]);

        let from_parameters = parse_json(
            r#"{"type": "UHLinearChannel", "parameters": [0.6, 0.4],
                "boundaries": {"input": [1, 1]}}"#,
        );
        assert_eq!(from_parameters.model.parameter_definitions().len(), 2);
    }

    #[test]
    fn wiring_errors() {
        let unbound = parse_json(
            r#"{"type": "MuskingumChannel", "parameters": [2.0, 0.2], "boundaries": {}}"#,
        );
        assert!(matches!(unbound.validate(), Err(HydroError::Configuration(_))));

        let bad_output = parse_json(
            r#"{"type": "MuskingumChannel", "parameters": [2.0, 0.2],
                "boundaries": {"input": [1, 1]}, "outputs": {"flow": [2, 1]}}"#,
        );
        assert!(matches!(bad_output.validate(), Err(HydroError::Configuration(_))));

        let short = parse_json(
            r#"{"type": "MuskingumChannel", "parameters": [2.0],
                "boundaries": {"input": [1, 1]}}"#,
        );
        assert!(matches!(short.validate(), Err(HydroError::Configuration(m)) if m.starts_with("MuskingumChannel")));

        let unbound_name = parse_json(
            r#"{"type": "Expression", "expression": "a + c", "boundaries": {"a": [1, 1]}}"#,
        );
        assert!(matches!(
            unbound_name.validate(),
            Err(HydroError::ExpressionEval(m)) if m.contains("'c'")
        ));

        let unknown: Result<FunctionConfig, _> =
            serde_json::from_str(r#"{"type": "GR4J", "parameters": []}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn runs_through_the_enum() {
        let config = parse_json(
            r#"{"type": "Expression", "expression": "2 * a + b",
                "boundaries": {"a": [1, 1], "b": [1, 2]}}"#,
        );
        let a = crate::test_utils::series(1, &[1.0, 2.0]);
        let b = crate::test_utils::series(2, &[0.5, 0.5]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("a", &a);
        boundaries.insert("b", &b);
        let result = config
            .model
            .run(
                &boundaries,
                &config.parameter_vector().unwrap(),
                &StateVector::empty(),
                &crate::test_utils::daily_index(2),
            )
            .unwrap();
        assert_eq!(result.outputs["output"].to_vec(), vec![2.5, 4.5]);
        assert_eq!(config.model.name(), "Expression");
    }
}
