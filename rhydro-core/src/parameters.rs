//! Named parameter and state vectors.

use crate::errors::{HydroError, HydroResult};
use crate::timeseries::FloatValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A model parameter and its default calibration range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub min: FloatValue,
    pub max: FloatValue,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, min: FloatValue, max: FloatValue) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// A parameter without a meaningful range.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, FloatValue::NEG_INFINITY, FloatValue::INFINITY)
    }

    pub fn is_bounded(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }
}

/// Numeric values as given in configuration: a list in declaration order or a name table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueInput {
    List(Vec<FloatValue>),
    Map(IndexMap<String, FloatValue>),
}

impl Default for ValueInput {
    fn default() -> Self {
        ValueInput::List(vec![])
    }
}

impl ValueInput {
    pub fn len(&self) -> usize {
        match self {
            ValueInput::List(values) => values.len(),
            ValueInput::Map(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered named parameter values of one transfer function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterVector(IndexMap<String, FloatValue>);

impl ParameterVector {
    pub fn new(values: IndexMap<String, FloatValue>) -> Self {
        Self(values)
    }

    /// Bind configured values to `definitions`.
    ///
    /// A list must have one value per definition. A table must name every definition and no
    /// other parameter.
    pub fn from_input(
        definitions: &[ParameterDefinition],
        input: &ValueInput,
    ) -> HydroResult<Self> {
        let values = match input {
            ValueInput::List(values) => {
                if values.len() != definitions.len() {
                    return Err(HydroError::Configuration(format!(
                        "expected {} parameters ({}), got {}",
                        definitions.len(),
                        names(definitions),
                        values.len()
                    )));
                }
                definitions
                    .iter()
                    .zip(values)
                    .map(|(d, v)| (d.name.clone(), *v))
                    .collect()
            }
            ValueInput::Map(table) => {
                if let Some(unknown) = table
                    .keys()
                    .find(|k| !definitions.iter().any(|d| &d.name == *k))
                {
                    return Err(HydroError::Configuration(format!(
                        "unknown parameter '{unknown}', expected one of {}",
                        names(definitions)
                    )));
                }
                definitions
                    .iter()
                    .map(|d| {
                        table
                            .get(&d.name)
                            .map(|v| (d.name.clone(), *v))
                            .ok_or_else(|| {
                                HydroError::Configuration(format!(
                                    "missing parameter '{}'",
                                    d.name
                                ))
                            })
                    })
                    .collect::<HydroResult<IndexMap<_, _>>>()?
            }
        };
        Ok(Self(values))
    }

    pub fn get(&self, name: &str) -> Option<FloatValue> {
        self.0.get(name).copied()
    }

    pub fn require(&self, name: &str) -> HydroResult<FloatValue> {
        self.get(name)
            .ok_or_else(|| HydroError::Configuration(format!("missing parameter '{name}'")))
    }

    pub fn values(&self) -> Vec<FloatValue> {
        self.0.values().copied().collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FloatValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A copy with the same names and new values, as proposed by the calibrator.
    pub fn with_values(&self, values: &[FloatValue]) -> HydroResult<Self> {
        if values.len() != self.0.len() {
            return Err(HydroError::Configuration(format!(
                "expected {} parameter values, got {}",
                self.0.len(),
                values.len()
            )));
        }
        Ok(Self(
            self.0
                .keys()
                .cloned()
                .zip(values.iter().copied())
                .collect(),
        ))
    }
}

fn names(definitions: &[ParameterDefinition]) -> String {
    definitions
        .iter()
        .map(|d| d.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ordered model state values. An empty vector means "use the model's default state".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateVector {
    names: Vec<String>,
    values: Vec<FloatValue>,
}

impl StateVector {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn named(names: &[&str], values: Vec<FloatValue>) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            values,
        }
    }

    /// Unnamed values, for models whose state length depends on their configuration.
    pub fn from_values(values: Vec<FloatValue>) -> Self {
        Self {
            names: (0..values.len()).map(|i| format!("state_{i}")).collect(),
            values,
        }
    }

    /// Bind configured initial states to the model's state names.
    ///
    /// A model without fixed names accepts any list. Absent initial states give an empty
    /// vector.
    pub fn from_input(state_names: &[String], input: &ValueInput) -> HydroResult<Self> {
        if input.is_empty() {
            return Ok(Self::empty());
        }
        match input {
            ValueInput::List(values) if state_names.is_empty() => {
                Ok(Self::from_values(values.clone()))
            }
            ValueInput::List(values) => {
                if values.len() != state_names.len() {
                    return Err(HydroError::Configuration(format!(
                        "expected {} initial states ({}), got {}",
                        state_names.len(),
                        state_names.join(", "),
                        values.len()
                    )));
                }
                Ok(Self {
                    names: state_names.to_vec(),
                    values: values.clone(),
                })
            }
            ValueInput::Map(table) => {
                let mut values = Vec::with_capacity(state_names.len());
                for (name, _) in table {
                    if !state_names.contains(name) {
                        return Err(HydroError::Configuration(format!(
                            "unknown state '{name}', expected one of {}",
                            state_names.join(", ")
                        )));
                    }
                }
                for name in state_names {
                    let value = table.get(name).ok_or_else(|| {
                        HydroError::Configuration(format!("missing initial state '{name}'"))
                    })?;
                    values.push(*value);
                }
                Ok(Self {
                    names: state_names.to_vec(),
                    values,
                })
            }
        }
    }

    pub fn values(&self) -> &[FloatValue] {
        &self.values
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<FloatValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
