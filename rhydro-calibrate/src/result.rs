use rhydro_core::errors::{HydroError, HydroResult};
use rhydro_core::timeseries::FloatValue;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub parameters: Vec<FloatValue>,
    pub score: FloatValue,
    pub iterations: usize,
    /// False when the iteration limit was reached before the score stagnated.
    pub converged: bool,
    /// Best score after each iteration
    pub history: Vec<FloatValue>,
}

impl CalibrationResult {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> HydroResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| HydroError::Serialization(format!("{}: {e}", path.display())))?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HydroResult<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader)
            .map_err(|e| HydroError::Serialization(format!("{}: {e}", path.display())))
    }
}
