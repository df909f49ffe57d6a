//! Adapter to an external hydraulic solver.
//!
//! The boundaries of the window are marshalled into a [`HydraulicRequest`] and handed to the
//! configured [`HydraulicSolver`] backend. Its [`HydraulicResponse`] is checked against the
//! time index and the configured outputs. The state vector is opaque and passed through.

use indexmap::IndexMap;
use ndarray::Array1;
use rhydro_core::boundary::{BoundarySet, BoundarySpec};
use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::function::{FunctionOutput, TransferFunction};
use rhydro_core::parameters::{ParameterDefinition, ParameterVector, StateVector};
use rhydro_core::timeseries::{FloatValue, Time, TimeIndex};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::Command;

/// Boundary file written for the external executable
pub const REQUEST_FILE: &str = "boundaries.json";
/// File the external executable is expected to write
pub const RESPONSE_FILE: &str = "outputs.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydraulicRequest {
    pub times: Vec<Time>,
    /// Missing samples are `null`
    pub boundaries: IndexMap<String, Vec<Option<FloatValue>>>,
    pub initial_state: Vec<FloatValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydraulicResponse {
    pub outputs: IndexMap<String, Vec<Option<FloatValue>>>,
    #[serde(default)]
    pub final_state: Vec<FloatValue>,
}

/// A hydraulic solver backend, selected in configuration by its `backend` key.
#[typetag::serde(tag = "backend")]
pub trait HydraulicSolver: Debug + Send + Sync {
    fn solve(&self, request: &HydraulicRequest) -> HydroResult<HydraulicResponse>;
}

/// Exchanges JSON files with an executable run in `work_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileExchange {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

#[typetag::serde]
impl HydraulicSolver for FileExchange {
    fn solve(&self, request: &HydraulicRequest) -> HydroResult<HydraulicResponse> {
        std::fs::create_dir_all(&self.work_dir)?;
        let request_path = self.work_dir.join(REQUEST_FILE);
        let writer = BufWriter::new(File::create(&request_path)?);
        serde_json::to_writer_pretty(writer, request)
            .map_err(|e| HydroError::Serialization(format!("{}: {e}", request_path.display())))?;

        log::debug!(
            "running {} {:?} in {}",
            self.executable,
            self.args,
            self.work_dir.display()
        );
        let status = Command::new(&self.executable)
            .args(&self.args)
            .current_dir(&self.work_dir)
            .status()?;
        if !status.success() {
            return Err(HydroError::model(
                "HecRas",
                0,
                format!("{} exited with {status}", self.executable),
            ));
        }

        let response_path = self.work_dir.join(RESPONSE_FILE);
        let reader = BufReader::new(File::open(&response_path)?);
        serde_json::from_reader(reader)
            .map_err(|e| HydroError::Serialization(format!("{}: {e}", response_path.display())))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HecRas {
    pub solver: Box<dyn HydraulicSolver>,
    /// Output names read from the response. Taken from the configured outputs when absent.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Boundary names sent to the solver. Every bound boundary is sent when empty.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl HecRas {
    fn request(
        &self,
        boundaries: &BoundarySet,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydraulicRequest {
        let n = time_index.len();
        let boundaries = boundaries
            .iter()
            .filter(|b| self.inputs.is_empty() || self.inputs.iter().any(|i| i == b.name))
            .map(|b| {
                let values = (0..n)
                    .map(|t| Some(b.at(t as isize)).filter(|v| !v.is_nan()))
                    .collect();
                (b.name.to_string(), values)
            })
            .collect();
        HydraulicRequest {
            times: time_index.times().collect(),
            boundaries,
            initial_state: initial_state.values().to_vec(),
        }
    }
}

impl TransferFunction for HecRas {
    fn name(&self) -> &str {
        "HecRas"
    }

    fn boundary_specs(&self) -> Vec<BoundarySpec> {
        self.inputs.iter().map(BoundarySpec::required).collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        vec![]
    }

    fn run(
        &self,
        boundaries: &BoundarySet,
        _parameters: &ParameterVector,
        initial_state: &StateVector,
        time_index: &TimeIndex,
    ) -> HydroResult<FunctionOutput> {
        let request = self.request(boundaries, initial_state, time_index);
        let mut response = self.solver.solve(&request)?;

        let n = time_index.len();
        let mut result = FunctionOutput::new(StateVector::from_values(response.final_state));
        for name in &self.outputs {
            let values = response.outputs.shift_remove(name).ok_or_else(|| {
                HydroError::model(self.name(), 0, format!("solver returned no output '{name}'"))
            })?;
            if values.len() != n {
                return Err(HydroError::model(
                    self.name(),
                    values.len().min(n),
                    format!(
                        "output '{name}' has {} values for {n} steps",
                        values.len()
                    ),
                ));
            }
            let values: Array1<FloatValue> = values
                .into_iter()
                .map(|v| v.unwrap_or(FloatValue::NAN))
                .collect();
            result = result.with_output(name.clone(), values);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_index, series};

    /// Doubles the `flow` boundary into `stage` and counts its calls in the state.
    #[derive(Debug, Serialize, Deserialize)]
    struct Doubling {
        #[serde(default)]
        truncate: bool,
    }

    #[typetag::serde]
    impl HydraulicSolver for Doubling {
        fn solve(&self, request: &HydraulicRequest) -> HydroResult<HydraulicResponse> {
            let mut stage: Vec<Option<f64>> = request.boundaries["flow"]
                .iter()
                .map(|v| v.map(|v| 2.0 * v))
                .collect();
            if self.truncate {
                stage.pop();
            }
            let calls = request.initial_state.first().copied().unwrap_or(0.0);
            Ok(HydraulicResponse {
                outputs: IndexMap::from([("stage".to_string(), stage)]),
                final_state: vec![calls + 1.0],
            })
        }
    }

    fn adapter(solver: Box<dyn HydraulicSolver>) -> HecRas {
        HecRas {
            solver,
            outputs: vec!["stage".to_string()],
            inputs: vec![],
        }
    }

    #[test]
    fn marshals_boundaries_and_state() {
        let flow = series(1, &[1.0, f64::NAN, 3.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("flow", &flow);
        let hecras = adapter(Box::new(Doubling { truncate: false }));

        let request = hecras.request(
            &boundaries,
            &StateVector::from_values(vec![4.0]),
            &daily_index(3),
        );
        assert_eq!(request.times.len(), 3);
        assert_eq!(request.boundaries["flow"], vec![Some(1.0), None, Some(3.0)]);

        let result = hecras
            .run(
                &boundaries,
                &ParameterVector::default(),
                &StateVector::from_values(vec![4.0]),
                &daily_index(3),
            )
            .unwrap();
        let stage = &result.outputs["stage"];
        assert_eq!(stage[0], 2.0);
        assert!(stage[1].is_nan());
        assert_eq!(stage[2], 6.0);
        assert_eq!(result.final_state.values(), &[5.0]);
    }

    #[test]
    fn misaligned_response_is_rejected() {
        let flow = series(1, &[1.0, 2.0, 3.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("flow", &flow);
        let result = adapter(Box::new(Doubling { truncate: true })).run(
            &boundaries,
            &ParameterVector::default(),
            &StateVector::empty(),
            &daily_index(3),
        );
        assert!(matches!(result, Err(HydroError::ModelEvaluation { .. })));

        let mut missing = adapter(Box::new(Doubling { truncate: false }));
        missing.outputs = vec!["discharge".to_string()];
        let result = missing.run(
            &boundaries,
            &ParameterVector::default(),
            &StateVector::empty(),
            &daily_index(3),
        );
        assert!(matches!(result, Err(HydroError::ModelEvaluation { .. })));
    }

    #[test]
    fn solver_selected_by_backend() {
        let hecras: HecRas = serde_json::from_str(
            r#"{"solver": {"backend": "FileExchange", "executable": "ras", "work_dir": "/tmp/ras"},
                "outputs": ["stage"]}"#,
        )
        .unwrap();
        assert_eq!(hecras.output_names(), vec!["stage"]);
        assert!(format!("{:?}", hecras.solver).contains("FileExchange"));
    }

    #[cfg(unix)]
    #[test]
    fn file_exchange_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let solver = FileExchange {
            executable: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"printf '{"outputs": {"stage": [1.5, null]}, "final_state": [9.0]}' > outputs.json"#
                    .to_string(),
            ],
            work_dir: dir.path().to_path_buf(),
        };
        let flow = series(1, &[1.0, 2.0]);
        let mut boundaries = BoundarySet::new();
        boundaries.insert("flow", &flow);

        let result = adapter(Box::new(solver))
            .run(
                &boundaries,
                &ParameterVector::default(),
                &StateVector::empty(),
                &daily_index(2),
            )
            .unwrap();
        assert_eq!(result.outputs["stage"][0], 1.5);
        assert!(result.outputs["stage"][1].is_nan());
        assert_eq!(result.final_state.values(), &[9.0]);

        let written: HydraulicRequest = serde_json::from_reader(
            File::open(dir.path().join(REQUEST_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(written.boundaries["flow"], vec![Some(1.0), Some(2.0)]);
    }
}
