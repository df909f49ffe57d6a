//! A configured transfer function bound to the topology.

use indexmap::IndexMap;
use ndarray::Array1;
use rhydro_calibrate::{CalibrationConfig, CalibrationResult, NelderMead, ObjectiveRunner};
use rhydro_core::boundary::BoundaryResolver;
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{check_output_lengths, FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterVector, StateVector};
use rhydro_core::series::SeriesKey;
use rhydro_core::statistics::ResultStatistics;
use rhydro_core::timeseries::{FloatValue, Time};
use rhydro_core::topology::Topology;
use rhydro_procedures::{FunctionConfig, ProcedureFunction};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcedureConfig {
    pub id: String,
    pub function: FunctionConfig,
    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,
    /// Write the outputs, statistics and final state of each run to this JSON file.
    #[serde(default)]
    pub save_results: Option<PathBuf>,
}

/// Statistics of one output against the observed values of its target series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStatistics {
    pub output: String,
    pub node_id: i64,
    pub variable_id: i64,
    /// A single entry, or the `cal` and `val` entries when a calibration period is set.
    pub statistics: Vec<ResultStatistics>,
}

#[derive(Serialize)]
struct SavedResults<'a> {
    procedure: &'a str,
    parameters: &'a ParameterVector,
    final_state: &'a StateVector,
    statistics: &'a [OutputStatistics],
    times: Vec<Time>,
    outputs: IndexMap<&'a str, Vec<Option<FloatValue>>>,
}

#[derive(Debug)]
pub struct Procedure {
    config: ProcedureConfig,
    parameters: ParameterVector,
    initial_state: StateVector,
    final_state: Option<StateVector>,
    statistics: Vec<OutputStatistics>,
    calibration_result: Option<CalibrationResult>,
}

impl Procedure {
    /// Build a procedure, checking its wiring against the model.
    pub fn new(mut config: ProcedureConfig) -> HydroResult<Self> {
        config.function.complete();
        config
            .function
            .validate()
            .map_err(|e| prefix(e, &config.id))?;
        let parameters = config.function.parameter_vector()?;
        let initial_state = config.function.initial_state()?;
        if let Some(calibration) = &config.calibration {
            calibration.bounds(&config.function.model.parameter_definitions())?;
            if calibration.result_index >= config.function.outputs.len() {
                return Err(HydroError::Configuration(format!(
                    "procedure {}: calibration result_index {} but only {} outputs",
                    config.id,
                    calibration.result_index,
                    config.function.outputs.len()
                )));
            }
        }
        Ok(Self {
            config,
            parameters,
            initial_state,
            final_state: None,
            statistics: vec![],
            calibration_result: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ProcedureConfig {
        &self.config
    }

    pub fn function(&self) -> &ProcedureFunction {
        &self.config.function.model
    }

    pub fn parameters(&self) -> &ParameterVector {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: ParameterVector) {
        self.parameters = parameters;
    }

    pub fn set_initial_state(&mut self, state: StateVector) {
        self.initial_state = state;
    }

    /// State after the last run, usable to warm start a following run.
    pub fn final_state(&self) -> Option<&StateVector> {
        self.final_state.as_ref()
    }

    pub fn statistics(&self) -> &[OutputStatistics] {
        &self.statistics
    }

    pub fn calibration_result(&self) -> Option<&CalibrationResult> {
        self.calibration_result.as_ref()
    }

    /// Series read by the procedure.
    pub fn input_keys(&self) -> impl Iterator<Item = SeriesKey> + '_ {
        self.config.function.boundaries.values().map(|b| b.key())
    }

    /// Series written by the procedure.
    pub fn output_keys(&self) -> impl Iterator<Item = SeriesKey> + '_ {
        self.config.function.outputs.values().map(|o| o.key())
    }

    /// Whether a boundary may stay unresolved, i.e. it is optional.
    pub(crate) fn is_optional(&self, key: SeriesKey) -> bool {
        self.config
            .function
            .boundaries
            .values()
            .filter(|b| b.key() == key)
            .all(|b| b.optional)
    }

    fn wants_calibration(&self) -> Option<&CalibrationConfig> {
        self.config.calibration.as_ref().filter(|c| c.calibrate)
    }

    /// Run the function with `parameters` without writing anything back.
    pub fn evaluate(
        &self,
        topology: &Topology,
        parameters: &ParameterVector,
    ) -> HydroResult<FunctionOutput> {
        let boundaries =
            BoundaryResolver::resolve(self.id(), &self.config.function.boundaries, topology)?;
        let output = self.function().run(
            &boundaries,
            parameters,
            &self.initial_state,
            topology.time_index(),
        )?;
        check_output_lengths(self.function().name(), &output, topology.time_index())?;
        Ok(output)
    }

    fn calibration_window(&self, topology: &Topology) -> Option<Range<usize>> {
        self.config
            .calibration
            .as_ref()
            .and_then(|c| c.calibration_period)
            .map(|(begin, end)| topology.time_index().window(begin, end))
    }

    /// Statistics of every output against the observed values of its target series.
    ///
    /// Must be called before the outputs are written back, so that only observations are
    /// compared with the simulation.
    pub fn compute_statistics(
        &self,
        topology: &Topology,
        output: &FunctionOutput,
    ) -> HydroResult<Vec<OutputStatistics>> {
        let window = self.calibration_window(topology);
        let mut all = vec![];
        for (name, binding) in &self.config.function.outputs {
            if !binding.compute_statistics {
                continue;
            }
            let sim = self.output_values(output, name)?;
            let obs = observed(topology, binding.key());
            let statistics = match &window {
                Some(window) => {
                    let (cal, val) = ResultStatistics::split(sim, &obs, window.clone());
                    vec![cal, val]
                }
                None => vec![ResultStatistics::compute(sim.view(), obs.view(), None)],
            };
            all.push(OutputStatistics {
                output: name.clone(),
                node_id: binding.node_id,
                variable_id: binding.variable_id,
                statistics,
            });
        }
        Ok(all)
    }

    fn output_values<'o>(
        &self,
        output: &'o FunctionOutput,
        name: &str,
    ) -> HydroResult<&'o Array1<FloatValue>> {
        output.output(name).ok_or_else(|| {
            HydroError::model(
                self.function().name(),
                0,
                format!("no output named '{name}'"),
            )
        })
    }

    /// Objective score of `parameters` over the calibration window, lower is better.
    pub fn score(&self, topology: &Topology, parameters: &ParameterVector) -> HydroResult<FloatValue> {
        let calibration = self.config.calibration.clone().unwrap_or_default();
        let (name, binding) = self
            .config
            .function
            .outputs
            .get_index(calibration.result_index)
            .ok_or_else(|| {
                HydroError::Calibration(format!(
                    "procedure {}: no output at result_index {}",
                    self.id(),
                    calibration.result_index
                ))
            })?;
        let output = self.evaluate(topology, parameters)?;
        let sim = self.output_values(&output, name)?;
        let obs = observed(topology, binding.key());
        let statistics = match self.calibration_window(topology) {
            Some(window) => ResultStatistics::split(sim, &obs, window).0,
            None => ResultStatistics::compute(sim.view(), obs.view(), None),
        };
        calibration
            .objective_function
            .score(&statistics)
            .ok_or_else(|| {
                HydroError::Calibration(format!(
                    "procedure {}: {:?} is undefined over {} paired values",
                    self.id(),
                    calibration.objective_function,
                    statistics.n
                ))
            })
    }

    /// Calibrate the parameters against the current topology when calibration is enabled.
    ///
    /// The best parameters replace the configured ones.
    pub fn calibrate(&mut self, topology: &Topology) -> HydroResult<Option<&CalibrationResult>> {
        let Some(calibration) = self.wants_calibration().cloned() else {
            return Ok(None);
        };
        let bounds = calibration.bounds(&self.function().parameter_definitions())?;
        log::debug!(
            "procedure {}: calibrating {} parameters against {:?}",
            self.id(),
            self.parameters.len(),
            calibration.objective_function
        );
        let runner = ProcedureObjective {
            procedure: self,
            topology,
        };
        let result = NelderMead::new(&calibration, bounds).run(&runner, &self.parameters.values())?;
        self.parameters = self.parameters.with_values(&result.parameters)?;
        if let Some(path) = &calibration.save_result {
            result.save(path)?;
        }
        log::info!(
            "procedure {}: calibrated score {} after {} iterations",
            self.id(),
            result.score,
            result.iterations
        );
        self.calibration_result = Some(result);
        Ok(self.calibration_result.as_ref())
    }

    /// Run the function and write its outputs back into `topology`.
    pub fn run(&mut self, topology: &mut Topology) -> HydroResult<()> {
        log::debug!("procedure {}: running {}", self.id(), self.function().name());
        let output = self.evaluate(topology, &self.parameters)?;
        let statistics = self.compute_statistics(topology, &output)?;

        for (name, binding) in &self.config.function.outputs {
            let values = self.output_values(&output, name)?;
            topology.write_output(binding.key(), values, &self.config.id, binding.mode())?;
        }
        self.statistics = statistics;
        self.final_state = Some(output.final_state.clone());

        if let Some(path) = &self.config.save_results {
            self.save_results(path, topology, &output)?;
        }
        log::info!(
            "procedure {}: wrote {} outputs",
            self.id(),
            self.config.function.outputs.len()
        );
        Ok(())
    }

    fn save_results(
        &self,
        path: &Path,
        topology: &Topology,
        output: &FunctionOutput,
    ) -> HydroResult<()> {
        let saved = SavedResults {
            procedure: self.id(),
            parameters: &self.parameters,
            final_state: &output.final_state,
            statistics: &self.statistics,
            times: topology.time_index().times().collect(),
            outputs: output
                .outputs
                .iter()
                .map(|(name, values)| {
                    let values = values
                        .iter()
                        .map(|v| Some(*v).filter(|v| !v.is_nan()))
                        .collect();
                    (name.as_str(), values)
                })
                .collect(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &saved)
            .map_err(|e| HydroError::Serialization(format!("{}: {e}", path.display())))?;
        writer.flush()?;
        Ok(())
    }
}

/// Values of the canonical series that come from observations.
fn observed(topology: &Topology, key: SeriesKey) -> Array1<FloatValue> {
    topology
        .canonical(key)
        .map(|buffer| buffer.observed_values())
        .unwrap_or_else(|| Array1::from_elem(topology.time_index().len(), FloatValue::NAN))
}

fn prefix(error: HydroError, procedure: &str) -> HydroError {
    match error {
        HydroError::Configuration(message) => {
            HydroError::Configuration(format!("procedure {procedure}: {message}"))
        }
        other => other,
    }
}

struct ProcedureObjective<'a> {
    procedure: &'a Procedure,
    topology: &'a Topology,
}

impl ObjectiveRunner for ProcedureObjective<'_> {
    fn n_params(&self) -> usize {
        self.procedure.parameters.len()
    }

    fn evaluate(&self, parameters: &[FloatValue]) -> HydroResult<FloatValue> {
        let parameters = self.procedure.parameters.with_values(parameters)?;
        self.procedure.score(self.topology, &parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use is_close::is_close;
    use rhydro_core::series::{Provenance, SeriesBuffer, SeriesRole};
    use rhydro_core::timeseries::{Interval, TimeIndex};
    use std::sync::Arc;

    fn topology(n: usize) -> Topology {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::days(n as i64 - 1);
        Topology::new(Arc::new(
            TimeIndex::new(start, end, Interval::days(1)).unwrap(),
        ))
    }

    fn observed_series(node_id: i64, variable_id: i64, values: &[f64]) -> SeriesBuffer {
        SeriesBuffer::from_values(
            SeriesKey::new(node_id, variable_id),
            SeriesRole::Observed,
            values.to_vec().into(),
            Provenance::Observed,
        )
    }

    fn polynomial(calibration: &str) -> Procedure {
        let json = format!(
            r#"{{"id": "rating",
                "function": {{"type": "Polynomial", "parameters": [0.0, 1.0],
                    "boundaries": {{"input": [1, 1]}}, "outputs": {{"output": [2, 1]}}}}
                {calibration}}}"#
        );
        Procedure::new(serde_json::from_str(&json).unwrap()).unwrap()
    }

    #[test]
    fn statistics_use_observations_before_write_back() {
        let mut topology = topology(4);
        topology
            .insert(observed_series(1, 1, &[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        topology
            .insert(observed_series(2, 1, &[1.0, f64::NAN, 3.0, f64::NAN]))
            .unwrap();
        let mut procedure = polynomial("");
        procedure.run(&mut topology).unwrap();

        let stats = &procedure.statistics()[0].statistics[0];
        assert_eq!(stats.n, 2);
        assert_eq!(stats.rmse, Some(0.0));
        // gaps filled from the simulation
        let canonical = topology.canonical(SeriesKey::new(2, 1)).unwrap();
        assert_eq!(canonical.values().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(!canonical.provenance()[1].is_observed());

        // filled values are not observations on a second run
        procedure.run(&mut topology).unwrap();
        assert_eq!(procedure.statistics()[0].statistics[0].n, 2);
        assert!(procedure.final_state().is_some());
    }

    #[test]
    fn calibration_recovers_a_linear_rating() {
        let mut topology = topology(10);
        let input: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let target: Vec<f64> = input.iter().map(|x| 1.5 + 2.0 * x).collect();
        topology.insert(observed_series(1, 1, &input)).unwrap();
        topology.insert(observed_series(2, 1, &target)).unwrap();

        let mut procedure = polynomial(
            r#", "calibration": {"ranges": [[-5.0, 5.0], [0.0, 5.0]], "no_improve_thr": 1e-12, "max_stagnations": 40}"#,
        );
        let result = procedure.calibrate(&topology).unwrap().unwrap().clone();
        assert!(result.score < 1e-3);
        let parameters = procedure.parameters();
        assert!(is_close!(parameters.get("intercept").unwrap(), 1.5, abs_tol = 1e-2));
        assert!(is_close!(parameters.get("coefficient_1").unwrap(), 2.0, abs_tol = 1e-2));
    }

    #[test]
    fn calibration_period_splits_statistics() {
        let mut topology = topology(4);
        topology
            .insert(observed_series(1, 1, &[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        topology
            .insert(observed_series(2, 1, &[1.0, 2.0, 3.0, 5.0]))
            .unwrap();
        let mut procedure = polynomial(
            r#", "calibration": {"calibrate": false,
                "calibration_period": ["2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z"]}"#,
        );
        assert!(procedure.calibrate(&topology).unwrap().is_none());
        procedure.run(&mut topology).unwrap();
        let stats = &procedure.statistics()[0].statistics;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].rmse, Some(0.0));
        assert!(stats[1].rmse.unwrap() > 0.0);
    }

    #[test]
    fn results_are_saved_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rating.json");
        let mut topology = topology(2);
        topology.insert(observed_series(1, 1, &[1.0, f64::NAN])).unwrap();
        let mut procedure = polynomial(&format!(
            r#", "save_results": {}"#,
            serde_json::to_string(&path).unwrap()
        ));
        procedure.run(&mut topology).unwrap();

        let saved: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(saved["procedure"], "rating");
        assert_eq!(saved["outputs"]["output"], serde_json::json!([1.0, null]));
        assert_eq!(saved["times"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn bad_result_index_is_rejected() {
        let config: ProcedureConfig = serde_json::from_str(
            r#"{"id": "rating",
                "function": {"type": "Polynomial", "parameters": [0.0, 1.0],
                    "boundaries": {"input": [1, 1]}, "outputs": {"output": [2, 1]}},
                "calibration": {"result_index": 3}}"#,
        )
        .unwrap();
        assert!(matches!(
            Procedure::new(config),
            Err(HydroError::Configuration(_))
        ));
    }
}
