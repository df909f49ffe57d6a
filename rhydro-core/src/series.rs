//! Value buffers aligned to a [`TimeIndex`].
//!
//! A [`SeriesBuffer`] holds one value per timestamp of the run's index. Missing values are
//! stored as `NaN` and serialized as `null`. Every value carries a [`Provenance`] tag so
//! downstream consumers can tell observations from values written by procedures.

use crate::errors::{HydroError, HydroResult};
use crate::timeseries::{FloatValue, Time, TimeIndex};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node/variable pair within a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub node_id: i64,
    pub variable_id: i64,
}

impl SeriesKey {
    pub fn new(node_id: i64, variable_id: i64) -> Self {
        Self {
            node_id,
            variable_id,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.node_id, self.variable_id)
    }
}

/// Which record of a node/variable a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesRole {
    /// The canonical series. Boundaries are read from here.
    Observed,
    /// The latest output written by a procedure.
    Simulated,
    /// The unregularized record, only replaced by `overwrite_original` outputs.
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Observed,
    /// Written by the procedure with this id
    Computed(String),
    Missing,
}

impl Provenance {
    pub fn is_observed(&self) -> bool {
        matches!(self, Provenance::Observed)
    }
}

/// One node/variable/role series, one value per index timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBuffer {
    key: SeriesKey,
    role: SeriesRole,
    #[serde(with = "nan_as_null")]
    values: Array1<FloatValue>,
    provenance: Vec<Provenance>,
    /// Samples preceding the window start, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    lookback: Vec<FloatValue>,
}

impl SeriesBuffer {
    /// An all-missing buffer of length `len`.
    pub fn missing(key: SeriesKey, role: SeriesRole, len: usize) -> Self {
        Self {
            key,
            role,
            values: Array1::from_elem(len, FloatValue::NAN),
            provenance: vec![Provenance::Missing; len],
            lookback: vec![],
        }
    }

    /// Build a buffer from values that are already aligned to an index.
    ///
    /// Non-missing values are tagged with `provenance`, missing ones with [`Provenance::Missing`].
    pub fn from_values(
        key: SeriesKey,
        role: SeriesRole,
        values: Array1<FloatValue>,
        provenance: Provenance,
    ) -> Self {
        let provenance = values
            .iter()
            .map(|v| {
                if v.is_nan() {
                    Provenance::Missing
                } else {
                    provenance.clone()
                }
            })
            .collect();
        Self {
            key,
            role,
            values,
            provenance,
            lookback: vec![],
        }
    }

    /// Build a buffer from `(timestamp, value)` observations.
    ///
    /// Every timestamp must exactly match an index timestamp. Index timestamps without an
    /// observation are missing.
    pub fn from_observations(
        key: SeriesKey,
        role: SeriesRole,
        time_index: &TimeIndex,
        observations: &[(Time, Option<FloatValue>)],
    ) -> HydroResult<Self> {
        let mut buffer = Self::missing(key, role, time_index.len());
        for (t, value) in observations {
            let i = time_index.position(*t).ok_or_else(|| {
                HydroError::Configuration(format!(
                    "series {key}: timestamp {t} is not on the time index"
                ))
            })?;
            if let Some(value) = value {
                buffer.set(i, *value, Provenance::Observed);
            }
        }
        Ok(buffer)
    }

    pub fn with_lookback(mut self, lookback: Vec<FloatValue>) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn key(&self) -> SeriesKey {
        self.key
    }

    pub fn role(&self) -> SeriesRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &Array1<FloatValue> {
        &self.values
    }

    pub fn provenance(&self) -> &[Provenance] {
        &self.provenance
    }

    pub fn lookback(&self) -> &[FloatValue] {
        &self.lookback
    }

    /// Value at `i`, `None` if missing or out of range.
    pub fn get(&self, i: usize) -> Option<FloatValue> {
        self.values.get(i).copied().filter(|v| !v.is_nan())
    }

    pub fn is_missing(&self, i: usize) -> bool {
        self.get(i).is_none()
    }

    pub fn count_missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// Set the value at `i`. A `NaN` value is stored as missing regardless of `provenance`.
    ///
    /// Out of range writes are ignored.
    pub fn set(&mut self, i: usize, value: FloatValue, provenance: Provenance) {
        if i >= self.values.len() {
            return;
        }
        self.values[i] = value;
        self.provenance[i] = if value.is_nan() {
            Provenance::Missing
        } else {
            provenance
        };
    }

    /// Fill the missing values of this buffer from `other`, leaving present values untouched.
    ///
    /// Returns the number of values filled.
    pub fn fill_missing_from(&mut self, other: &Array1<FloatValue>, provenance: Provenance) -> usize {
        let mut filled = 0;
        for (i, v) in other.iter().enumerate().take(self.values.len()) {
            if self.values[i].is_nan() && !v.is_nan() {
                self.set(i, *v, provenance.clone());
                filled += 1;
            }
        }
        filled
    }

    /// Replace values of this buffer wherever `other` is not missing.
    ///
    /// Returns the number of values replaced.
    pub fn overwrite_from(&mut self, other: &Array1<FloatValue>, provenance: Provenance) -> usize {
        let mut replaced = 0;
        for (i, v) in other.iter().enumerate().take(self.values.len()) {
            if !v.is_nan() {
                self.set(i, *v, provenance.clone());
                replaced += 1;
            }
        }
        replaced
    }

    /// Replace every value, missing ones included.
    pub fn replace_all(&mut self, values: &Array1<FloatValue>, provenance: Provenance) {
        for i in 0..self.values.len() {
            let v = values.get(i).copied().unwrap_or(FloatValue::NAN);
            self.set(i, v, provenance.clone());
        }
    }

    /// Values whose provenance is [`Provenance::Observed`], missing elsewhere.
    pub fn observed_values(&self) -> Array1<FloatValue> {
        Array1::from_iter(self.values.iter().zip(self.provenance.iter()).map(|(v, p)| {
            if p.is_observed() {
                *v
            } else {
                FloatValue::NAN
            }
        }))
    }
}

/// Serialize `NaN` as `null` and back.
mod nan_as_null {
    use crate::timeseries::FloatValue;
    use ndarray::Array1;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        values: &Array1<FloatValue>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let values: Vec<Option<FloatValue>> = values
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect();
        values.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Array1<FloatValue>, D::Error> {
        let values: Vec<Option<FloatValue>> = Vec::deserialize(deserializer)?;
        Ok(Array1::from_iter(
            values.into_iter().map(|v| v.unwrap_or(FloatValue::NAN)),
        ))
    }
}
