//! Boundary and output bindings and their resolution against a [`Topology`].
//!
//! A binding names the node/variable pair a procedure reads or writes. In configuration it is
//! given either as a bare `[node_id, variable_id]` pair or as a table with extra flags.

use crate::errors::{HydroError, HydroResult};
use crate::series::{SeriesBuffer, SeriesKey};
use crate::timeseries::FloatValue;
use crate::topology::{OutputMode, Topology};
use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A named input declared by a transfer function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundarySpec {
    pub name: String,
    pub optional: bool,
}

impl BoundarySpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BindingRepr")]
pub struct Binding {
    pub node_id: i64,
    pub variable_id: i64,
    /// Resolve to nothing instead of failing when the series is absent.
    pub optional: bool,
    /// Only the part of the window before the forecast date must be complete.
    pub warmup_only: bool,
}

impl Binding {
    pub fn new(node_id: i64, variable_id: i64) -> Self {
        Self {
            node_id,
            variable_id,
            optional: false,
            warmup_only: false,
        }
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.node_id, self.variable_id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BindingRepr {
    Pair(i64, i64),
    Table {
        node_id: i64,
        variable_id: i64,
        #[serde(default)]
        optional: bool,
        #[serde(default)]
        warmup_only: bool,
    },
}

impl From<BindingRepr> for Binding {
    fn from(repr: BindingRepr) -> Self {
        match repr {
            BindingRepr::Pair(node_id, variable_id) => Binding::new(node_id, variable_id),
            BindingRepr::Table {
                node_id,
                variable_id,
                optional,
                warmup_only,
            } => Binding {
                node_id,
                variable_id,
                optional,
                warmup_only,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OutputBindingRepr")]
pub struct OutputBinding {
    pub node_id: i64,
    pub variable_id: i64,
    pub overwrite: bool,
    pub overwrite_original: bool,
    pub compute_statistics: bool,
}

impl OutputBinding {
    pub fn new(node_id: i64, variable_id: i64) -> Self {
        Self {
            node_id,
            variable_id,
            overwrite: false,
            overwrite_original: false,
            compute_statistics: true,
        }
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.node_id, self.variable_id)
    }

    pub fn mode(&self) -> OutputMode {
        OutputMode {
            overwrite: self.overwrite,
            overwrite_original: self.overwrite_original,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutputBindingRepr {
    Pair(i64, i64),
    Table {
        node_id: i64,
        variable_id: i64,
        #[serde(default)]
        overwrite: bool,
        #[serde(default)]
        overwrite_original: bool,
        #[serde(default = "default_true")]
        compute_statistics: bool,
    },
}

impl From<OutputBindingRepr> for OutputBinding {
    fn from(repr: OutputBindingRepr) -> Self {
        match repr {
            OutputBindingRepr::Pair(node_id, variable_id) => {
                OutputBinding::new(node_id, variable_id)
            }
            OutputBindingRepr::Table {
                node_id,
                variable_id,
                overwrite,
                overwrite_original,
                compute_statistics,
            } => OutputBinding {
                node_id,
                variable_id,
                overwrite,
                overwrite_original,
                compute_statistics,
            },
        }
    }
}

/// A resolved boundary, borrowing its buffer from the topology.
#[derive(Debug, Clone, Copy)]
pub struct BoundarySeries<'a> {
    pub name: &'a str,
    pub key: SeriesKey,
    pub buffer: &'a SeriesBuffer,
}

impl<'a> BoundarySeries<'a> {
    /// Value at step `i` of the window.
    ///
    /// Negative steps read the lookback, `-1` being the sample just before the window start.
    /// Missing or unavailable samples are `NaN`.
    pub fn at(&self, i: isize) -> FloatValue {
        if i >= 0 {
            self.buffer
                .values()
                .get(i as usize)
                .copied()
                .unwrap_or(FloatValue::NAN)
        } else {
            let lookback = self.buffer.lookback();
            let back = i.unsigned_abs();
            if back <= lookback.len() {
                lookback[lookback.len() - back]
            } else {
                FloatValue::NAN
            }
        }
    }

    pub fn values(&self) -> &'a Array1<FloatValue> {
        self.buffer.values()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn lookback_len(&self) -> usize {
        self.buffer.lookback().len()
    }
}

/// The resolved boundaries of one procedure, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct BoundarySet<'a> {
    series: IndexMap<&'a str, BoundarySeries<'a>>,
}

impl<'a> BoundarySet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'a str, buffer: &'a SeriesBuffer) {
        self.series.insert(
            name,
            BoundarySeries {
                name,
                key: buffer.key(),
                buffer,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&BoundarySeries<'a>> {
        self.series.get(name)
    }

    pub fn require(&self, name: &str) -> HydroResult<&BoundarySeries<'a>> {
        self.get(name).ok_or_else(|| {
            HydroError::Configuration(format!("required boundary '{name}' is not bound"))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.series.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundarySeries<'a>> {
        self.series.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Maps binding names to the topology's buffers. Pure lookup.
pub struct BoundaryResolver;

impl BoundaryResolver {
    pub fn resolve<'a>(
        procedure_id: &str,
        bindings: &'a IndexMap<String, Binding>,
        topology: &'a Topology,
    ) -> HydroResult<BoundarySet<'a>> {
        let time_index = topology.time_index();
        let mut set = BoundarySet::new();
        for (name, binding) in bindings {
            let buffer = match topology.canonical(binding.key()) {
                Some(buffer) => buffer,
                None if binding.optional => {
                    log::debug!(
                        "procedure {procedure_id}: optional boundary '{name}' {} is absent",
                        binding.key()
                    );
                    continue;
                }
                None => {
                    return Err(HydroError::UnresolvedBoundary {
                        procedure: procedure_id.to_string(),
                        name: name.clone(),
                        node_id: binding.node_id,
                        variable_id: binding.variable_id,
                    })
                }
            };

            if !binding.optional {
                let missing = (0..buffer.len())
                    .filter(|&i| !(binding.warmup_only && time_index.is_forecast(i)))
                    .filter(|&i| buffer.is_missing(i))
                    .count();
                if missing > 0 {
                    log::warn!(
                        "procedure {procedure_id}: boundary '{name}' {} has {missing} missing values",
                        binding.key()
                    );
                }
            }
            set.insert(name.as_str(), buffer);
        }
        Ok(set)
    }

    /// Check that every output targets a node of the topology.
    pub fn resolve_outputs(
        procedure_id: &str,
        outputs: &IndexMap<String, OutputBinding>,
        topology: &Topology,
    ) -> HydroResult<()> {
        for (name, output) in outputs {
            if topology.node(output.node_id).is_none() {
                return Err(HydroError::UnresolvedBoundary {
                    procedure: procedure_id.to_string(),
                    name: name.clone(),
                    node_id: output.node_id,
                    variable_id: output.variable_id,
                });
            }
        }
        Ok(())
    }
}
