//! What recurrence models do when a boundary value is missing.

use crate::timeseries::FloatValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// The output is missing at that step and the state holds its last valid value.
    /// The recurrence resumes unchanged once data resumes.
    #[default]
    #[serde(alias = "freeze")]
    FreezeState,
    /// The state itself becomes missing, so every later output is missing too.
    Propagate,
}

impl MissingPolicy {
    pub fn freezes(&self) -> bool {
        matches!(self, MissingPolicy::FreezeState)
    }
}

/// Apply a `fill_nulls` rule to a boundary value: missing becomes zero.
pub fn fill_null(value: FloatValue, fill_nulls: bool) -> FloatValue {
    if fill_nulls && value.is_nan() {
        0.0
    } else {
        value
    }
}
