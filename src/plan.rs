//! An ordered chain of procedures run against one topology.
//!
//! A [`Plan`] is built from a [`PlanConfig`], read from a TOML or JSON file, or from a
//! topology assembled elsewhere with [`Plan::with_topology`]. All of the wiring is checked
//! by [`Plan::validate`] before the first procedure runs.

use crate::procedure::{OutputStatistics, Procedure, ProcedureConfig};
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use rhydro_calibrate::CalibrationResult;
use rhydro_core::boundary::BoundaryResolver;
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::TransferFunction;
use rhydro_core::parameters::ParameterVector;
use rhydro_core::series::{Provenance, SeriesBuffer, SeriesKey, SeriesRole};
use rhydro_core::timeseries::{FloatValue, Interval, Time, TimeIndex};
use rhydro_core::topology::{Node, Topology};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Values of a series, either aligned to the time index or as `(timestamp, value)` pairs.
///
/// `null` or `NaN` values are missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValues {
    Aligned(Vec<Option<FloatValue>>),
    Timed(Vec<(Time, Option<FloatValue>)>),
}

impl SeriesValues {
    fn buffer(&self, key: SeriesKey, role: SeriesRole, index: &TimeIndex) -> HydroResult<SeriesBuffer> {
        match self {
            SeriesValues::Aligned(values) => {
                if values.len() != index.len() {
                    return Err(HydroError::Configuration(format!(
                        "series {key} has {} values but the time index has {} steps",
                        values.len(),
                        index.len()
                    )));
                }
                let values: Vec<FloatValue> =
                    values.iter().map(|v| v.unwrap_or(FloatValue::NAN)).collect();
                Ok(SeriesBuffer::from_values(
                    key,
                    role,
                    values.into(),
                    Provenance::Observed,
                ))
            }
            SeriesValues::Timed(observations) => {
                let observations: Vec<(Time, Option<FloatValue>)> = observations
                    .iter()
                    .map(|(t, v)| (*t, v.filter(|v| !v.is_nan())))
                    .collect();
                SeriesBuffer::from_observations(key, role, index, &observations)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// The canonical series. A variable without values is only written by procedures.
    #[serde(default)]
    pub values: Option<SeriesValues>,
    /// Values preceding the first timestamp, oldest first.
    #[serde(default)]
    pub lookback: Vec<FloatValue>,
    /// The unregularized record.
    #[serde(default)]
    pub original: Option<SeriesValues>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub timestart: Time,
    pub timeend: Time,
    /// Falls back to the plan's `time_interval`.
    #[serde(default)]
    pub time_step: Option<Interval>,
    #[serde(default)]
    pub forecast_date: Option<Time>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl TopologyConfig {
    pub fn build(&self, time_interval: Option<Interval>, forecast_date: Option<Time>) -> HydroResult<Topology> {
        let step = self.time_step.or(time_interval).ok_or_else(|| {
            HydroError::Configuration(
                "the topology has no time_step and the plan no time_interval".to_string(),
            )
        })?;
        let index = TimeIndex::new(self.timestart, self.timeend, step)?
            .with_forecast_date(self.forecast_date.or(forecast_date));
        let mut topology = Topology::new(Arc::new(index));

        for node in &self.nodes {
            let mut built = Node {
                id: node.id,
                name: node.name.clone(),
                variables: vec![],
            };
            for variable in &node.variables {
                built = built.with_variable(variable.id, variable.name.as_deref());
            }
            topology.add_node(built);

            for variable in &node.variables {
                let key = SeriesKey::new(node.id, variable.id);
                let index = Arc::clone(topology.time_index());
                if let Some(values) = &variable.values {
                    let buffer = values
                        .buffer(key, SeriesRole::Observed, &index)?
                        .with_lookback(variable.lookback.clone());
                    topology.insert(buffer)?;
                }
                if let Some(original) = &variable.original {
                    topology.insert(original.buffer(key, SeriesRole::Original, &index)?)?;
                }
            }
        }
        Ok(topology)
    }
}

/// Order procedures run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// As listed in the configuration
    #[default]
    Declared,
    /// Producers of a series run before the procedures reading it.
    Dependency,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanConfig {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub forecast_date: Option<Time>,
    #[serde(default)]
    pub time_interval: Option<Interval>,
    /// Required unless the topology is passed to [`Plan::with_topology`].
    #[serde(default)]
    pub topology: Option<TopologyConfig>,
    #[serde(default)]
    pub procedures: Vec<ProcedureConfig>,
    /// Write the [`PlanReport`] to this JSON file.
    #[serde(default)]
    pub output_stats: Option<PathBuf>,
    #[serde(default)]
    pub execution_order: ExecutionOrder,
}

impl PlanConfig {
    /// Read a plan configuration, as TOML or JSON depending on the file extension.
    ///
    /// Unknown function types and malformed tables are configuration errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> HydroResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let error = |e: String| HydroError::Configuration(format!("{}: {e}", path.display()));
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| error(e.to_string())),
            Some("json") => serde_json::from_str(&content).map_err(|e| error(e.to_string())),
            _ => Err(HydroError::Configuration(format!(
                "{}: plan files must have a .toml or .json extension",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureReport {
    pub id: String,
    pub function: String,
    /// Parameters of the final run
    pub parameters: ParameterVector,
    pub statistics: Vec<OutputStatistics>,
    #[serde(default)]
    pub calibration: Option<CalibrationResult>,
}

/// Results of a plan execution, one entry per procedure in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub forecast_date: Option<Time>,
    pub procedures: Vec<ProcedureReport>,
}

impl PlanReport {
    pub fn procedure(&self, id: &str) -> Option<&ProcedureReport> {
        self.procedures.iter().find(|p| p.id == id)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HydroResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| HydroError::Serialization(format!("{}: {e}", path.display())))?;
        writer.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Plan {
    name: String,
    id: Option<String>,
    forecast_date: Option<Time>,
    topology: Topology,
    procedures: Vec<Procedure>,
    output_stats: Option<PathBuf>,
    execution_order: ExecutionOrder,
}

impl Plan {
    pub fn from_config(mut config: PlanConfig) -> HydroResult<Self> {
        let topology = match config.topology.take() {
            Some(topology) => topology.build(config.time_interval, config.forecast_date)?,
            None => {
                return Err(HydroError::Configuration(format!(
                    "plan '{}' has no topology",
                    config.name
                )))
            }
        };
        Self::with_topology(config, topology)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> HydroResult<Self> {
        Self::from_config(PlanConfig::from_file(path)?)
    }

    /// Build a plan around an already assembled topology.
    ///
    /// A `topology` section of `config` is ignored.
    pub fn with_topology(config: PlanConfig, topology: Topology) -> HydroResult<Self> {
        let mut seen = HashSet::new();
        let mut procedures = Vec::with_capacity(config.procedures.len());
        for procedure in config.procedures {
            if !seen.insert(procedure.id.clone()) {
                return Err(HydroError::Configuration(format!(
                    "plan '{}': duplicate procedure id '{}'",
                    config.name, procedure.id
                )));
            }
            procedures.push(Procedure::new(procedure)?);
        }
        Ok(Self {
            name: config.name,
            id: config.id,
            forecast_date: config.forecast_date,
            topology,
            procedures,
            output_stats: config.output_stats,
            execution_order: config.execution_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Consume the plan, keeping the topology with every output written back.
    pub fn into_topology(self) -> Topology {
        self.topology
    }

    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    pub fn procedure(&self, id: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.id() == id)
    }

    pub fn procedure_mut(&mut self, id: &str) -> Option<&mut Procedure> {
        self.procedures.iter_mut().find(|p| p.id() == id)
    }

    /// Indexes of the procedures in the order they run.
    pub fn order(&self) -> HydroResult<Vec<usize>> {
        match self.execution_order {
            ExecutionOrder::Declared => Ok((0..self.procedures.len()).collect()),
            ExecutionOrder::Dependency => self.dependency_order(),
        }
    }

    fn dependency_order(&self) -> HydroResult<Vec<usize>> {
        let mut graph: Graph<usize, SeriesKey> = Graph::new();
        let nodes: Vec<NodeIndex> = (0..self.procedures.len())
            .map(|i| graph.add_node(i))
            .collect();

        let mut producers: HashMap<SeriesKey, Vec<usize>> = HashMap::new();
        for (i, procedure) in self.procedures.iter().enumerate() {
            for key in procedure.output_keys() {
                producers.entry(key).or_default().push(i);
            }
        }
        for (consumer, procedure) in self.procedures.iter().enumerate() {
            for key in procedure.input_keys() {
                for &producer in producers.get(&key).into_iter().flatten() {
                    // A procedure updating its own input does not depend on itself
                    if producer != consumer {
                        graph.add_edge(nodes[producer], nodes[consumer], key);
                    }
                }
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let id = self.procedures[graph[cycle.node_id()]].id();
            HydroError::Configuration(format!(
                "plan '{}': procedure '{id}' is part of a dependency cycle",
                self.name
            ))
        })?;
        Ok(sorted.into_iter().map(|node| graph[node]).collect())
    }

    /// Check the wiring of every procedure without running any.
    ///
    /// A required boundary must either have a canonical series in the topology or be
    /// written by a procedure running before it.
    pub fn validate(&self) -> HydroResult<()> {
        let order = self.order()?;
        let mut available: BTreeSet<SeriesKey> = self
            .topology
            .buffers()
            .filter(|b| b.role() == SeriesRole::Observed)
            .map(|b| b.key())
            .collect();

        for i in order {
            let procedure = &self.procedures[i];
            let bindings = &procedure.config().function.boundaries;
            for (name, binding) in bindings {
                let key = binding.key();
                if !available.contains(&key) && !procedure.is_optional(key) {
                    let error = HydroError::UnresolvedBoundary {
                        procedure: procedure.id().to_string(),
                        name: name.clone(),
                        node_id: binding.node_id,
                        variable_id: binding.variable_id,
                    };
                    return Err(error.in_plan(&self.name, procedure.id()));
                }
            }
            BoundaryResolver::resolve_outputs(
                procedure.id(),
                &procedure.config().function.outputs,
                &self.topology,
            )
            .map_err(|e| e.in_plan(&self.name, procedure.id()))?;
            available.extend(procedure.output_keys());
        }
        Ok(())
    }

    /// Validate, then calibrate and run every procedure in order.
    ///
    /// The first failing procedure aborts the plan.
    pub fn execute(&mut self) -> HydroResult<PlanReport> {
        self.validate()?;
        let order = self.order()?;
        log::info!(
            "plan '{}': running {} procedures",
            self.name,
            self.procedures.len()
        );

        let mut reports = Vec::with_capacity(order.len());
        for i in order {
            let procedure = &mut self.procedures[i];
            let id = procedure.id().to_string();
            procedure
                .calibrate(&self.topology)
                .map_err(|e| e.in_plan(&self.name, &id))?;
            procedure
                .run(&mut self.topology)
                .map_err(|e| e.in_plan(&self.name, &id))?;
            reports.push(ProcedureReport {
                id,
                function: procedure.function().name().to_string(),
                parameters: procedure.parameters().clone(),
                statistics: procedure.statistics().to_vec(),
                calibration: procedure.calibration_result().cloned(),
            });
        }

        let report = PlanReport {
            plan: self.name.clone(),
            id: self.id.clone(),
            forecast_date: self.forecast_date,
            procedures: reports,
        };
        if let Some(path) = &self.output_stats {
            report.save(path)?;
        }
        log::info!("plan '{}': done", self.name);
        Ok(report)
    }
}
