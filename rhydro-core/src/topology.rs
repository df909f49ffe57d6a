//! The nodes of a run and their series buffers.
//!
//! A [`Topology`] is the single owner of every [`SeriesBuffer`] in a run. Procedures never
//! hold mutable references into it; they read boundaries through the resolver and write
//! their outputs back with [`Topology::write_output`].

use crate::errors::{HydroError, HydroResult};
use crate::series::{Provenance, SeriesBuffer, SeriesKey, SeriesRole};
use crate::timeseries::{FloatValue, TimeIndex};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A station, basin or any other point where variables are observed or simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Node {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            variables: vec![],
        }
    }

    pub fn with_variable(mut self, id: i64, name: Option<&str>) -> Self {
        self.add_variable(id, name);
        self
    }

    fn add_variable(&mut self, id: i64, name: Option<&str>) {
        if !self.variables.iter().any(|v| v.id == id) {
            self.variables.push(Variable {
                id,
                name: name.map(str::to_string),
            });
        }
    }
}

/// How a procedure output is merged into the topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMode {
    /// Replace canonical values wherever the simulation is not missing.
    pub overwrite: bool,
    /// Apply the same replacement to the original record.
    pub overwrite_original: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    time_index: Arc<TimeIndex>,
    nodes: Vec<Node>,
    #[serde(with = "buffer_list")]
    buffers: BTreeMap<(SeriesKey, SeriesRole), SeriesBuffer>,
}

impl Topology {
    pub fn new(time_index: Arc<TimeIndex>) -> Self {
        Self {
            time_index,
            nodes: vec![],
            buffers: BTreeMap::new(),
        }
    }

    pub fn time_index(&self) -> &Arc<TimeIndex> {
        &self.time_index
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: i64) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Add a node, merging its variables into an existing node with the same id.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => {
                for variable in node.variables {
                    existing.add_variable(variable.id, variable.name.as_deref());
                }
                if existing.name.is_none() {
                    existing.name = node.name;
                }
            }
            None => self.nodes.push(node),
        }
    }

    /// Insert a buffer, replacing any buffer with the same key and role.
    ///
    /// The node is registered if it is not already part of the topology.
    pub fn insert(&mut self, buffer: SeriesBuffer) -> HydroResult<()> {
        if buffer.len() != self.time_index.len() {
            return Err(HydroError::Configuration(format!(
                "series {} has {} values but the time index has {} steps",
                buffer.key(),
                buffer.len(),
                self.time_index.len()
            )));
        }
        let key = buffer.key();
        self.ensure_variable(key);
        self.buffers.insert((key, buffer.role()), buffer);
        Ok(())
    }

    pub fn buffer(&self, key: SeriesKey, role: SeriesRole) -> Option<&SeriesBuffer> {
        self.buffers.get(&(key, role))
    }

    /// The series boundaries read from.
    pub fn canonical(&self, key: SeriesKey) -> Option<&SeriesBuffer> {
        self.buffer(key, SeriesRole::Observed)
    }

    pub fn simulated(&self, key: SeriesKey) -> Option<&SeriesBuffer> {
        self.buffer(key, SeriesRole::Simulated)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &SeriesBuffer> {
        self.buffers.values()
    }

    /// Write a procedure output into the topology.
    ///
    /// The simulated buffer is always replaced. Missing canonical values are then filled
    /// from the simulation unless `mode.overwrite` is set, in which case every non-missing
    /// simulated value replaces the canonical one. `mode.overwrite_original` also applies
    /// that replacement to the original record.
    pub fn write_output(
        &mut self,
        key: SeriesKey,
        values: &Array1<FloatValue>,
        procedure_id: &str,
        mode: OutputMode,
    ) -> HydroResult<()> {
        let len = self.time_index.len();
        if values.len() != len {
            return Err(HydroError::Configuration(format!(
                "procedure {procedure_id}: output {key} has {} values but the time index has {len} steps",
                values.len()
            )));
        }
        self.ensure_variable(key);
        let provenance = Provenance::Computed(procedure_id.to_string());

        let simulated = self.entry(key, SeriesRole::Simulated);
        simulated.replace_all(values, provenance.clone());

        let canonical = self.entry(key, SeriesRole::Observed);
        let written = if mode.overwrite {
            canonical.overwrite_from(values, provenance.clone())
        } else {
            canonical.fill_missing_from(values, provenance.clone())
        };
        log::debug!("procedure {procedure_id}: wrote {written} canonical values to {key}");

        if mode.overwrite_original {
            self.entry(key, SeriesRole::Original)
                .overwrite_from(values, provenance);
        }
        Ok(())
    }

    fn entry(&mut self, key: SeriesKey, role: SeriesRole) -> &mut SeriesBuffer {
        let len = self.time_index.len();
        self.buffers
            .entry((key, role))
            .or_insert_with(|| SeriesBuffer::missing(key, role, len))
    }

    fn ensure_variable(&mut self, key: SeriesKey) {
        match self.nodes.iter_mut().find(|n| n.id == key.node_id) {
            Some(node) => node.add_variable(key.variable_id, None),
            None => self.nodes.push(Node {
                id: key.node_id,
                name: None,
                variables: vec![Variable {
                    id: key.variable_id,
                    name: None,
                }],
            }),
        }
    }
}

/// Buffers are serialized as a flat list; each buffer already carries its key and role.
mod buffer_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        buffers: &BTreeMap<(SeriesKey, SeriesRole), SeriesBuffer>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(buffers.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(SeriesKey, SeriesRole), SeriesBuffer>, D::Error> {
        let list: Vec<SeriesBuffer> = Vec::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|b| ((b.key(), b.role()), b))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::Interval;
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    fn topology() -> Topology {
        let index = TimeIndex::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
            Interval::days(1),
        )
        .unwrap();
        let mut topology = Topology::new(Arc::new(index));
        topology
            .insert(SeriesBuffer::from_values(
                SeriesKey::new(1, 1),
                SeriesRole::Observed,
                array![1.0, f64::NAN, 3.0],
                Provenance::Observed,
            ))
            .unwrap();
        topology
    }

    #[test]
    fn insert_checks_length() {
        let mut topology = topology();
        let result = topology.insert(SeriesBuffer::missing(
            SeriesKey::new(1, 2),
            SeriesRole::Observed,
            2,
        ));
        assert!(matches!(result, Err(HydroError::Configuration(_))));
        assert!(topology.node(1).is_some());
    }

    #[test]
    fn default_write_fills_gaps_only() {
        let mut topology = topology();
        let key = SeriesKey::new(1, 1);
        topology
            .write_output(key, &array![10.0, 20.0, 30.0], "p", OutputMode::default())
            .unwrap();

        let canonical = topology.canonical(key).unwrap();
        assert_eq!(canonical.values(), &array![1.0, 20.0, 3.0]);
        assert_eq!(canonical.provenance()[0], Provenance::Observed);
        assert_eq!(canonical.provenance()[1], Provenance::Computed("p".to_string()));
        assert_eq!(
            topology.simulated(key).unwrap().values(),
            &array![10.0, 20.0, 30.0]
        );
        assert!(topology.buffer(key, SeriesRole::Original).is_none());
    }

    #[test]
    fn overwrite_replaces_canonical_and_original() {
        let mut topology = topology();
        let key = SeriesKey::new(1, 1);
        topology
            .write_output(
                key,
                &array![10.0, f64::NAN, 30.0],
                "p",
                OutputMode {
                    overwrite: true,
                    overwrite_original: true,
                },
            )
            .unwrap();

        let canonical = topology.canonical(key).unwrap();
        assert_eq!(canonical.get(0), Some(10.0));
        assert!(canonical.is_missing(1));
        assert_eq!(canonical.get(2), Some(30.0));

        let original = topology.buffer(key, SeriesRole::Original).unwrap();
        assert_eq!(original.get(0), Some(10.0));
        assert!(original.is_missing(1));
    }

    #[test]
    fn write_creates_canonical_buffer_and_node() {
        let mut topology = topology();
        let key = SeriesKey::new(7, 3);
        topology
            .write_output(key, &array![1.0, 2.0, 3.0], "p", OutputMode::default())
            .unwrap();

        assert_eq!(topology.canonical(key).unwrap().get(2), Some(3.0));
        assert_eq!(topology.node(7).unwrap().variables[0].id, 3);
    }

    #[test]
    fn write_rejects_wrong_length() {
        let mut topology = topology();
        let result = topology.write_output(
            SeriesKey::new(1, 1),
            &array![1.0],
            "p",
            OutputMode::default(),
        );
        assert!(result.is_err());
    }
}
