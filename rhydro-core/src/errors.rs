use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum HydroError {
    /// Malformed or inconsistent configuration, detected before any procedure runs.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("procedure {procedure}: boundary '{name}' (node {node_id}, variable {variable_id}) has no series in the topology")]
    UnresolvedBoundary {
        procedure: String,
        name: String,
        node_id: i64,
        variable_id: i64,
    },
    /// Numeric failure inside a transfer function.
    #[error("{model} failed at step {step}: {message}")]
    ModelEvaluation {
        model: String,
        step: usize,
        message: String,
    },
    #[error("expression evaluation failed: {0}")]
    ExpressionEval(String),
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A fatal error raised while executing a plan, with the plan and procedure context.
    #[error("plan '{plan}', procedure '{procedure}': {source}")]
    Plan {
        plan: String,
        procedure: String,
        #[source]
        source: Box<HydroError>,
    },
}

impl HydroError {
    pub fn model(model: &str, step: usize, message: impl Into<String>) -> Self {
        HydroError::ModelEvaluation {
            model: model.to_string(),
            step,
            message: message.into(),
        }
    }

    /// Wrap this error with the plan and procedure it was raised in.
    pub fn in_plan(self, plan: &str, procedure: &str) -> Self {
        match self {
            // Already carries its context
            HydroError::Plan { .. } => self,
            other => HydroError::Plan {
                plan: plan.to_string(),
                procedure: procedure.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Convenience type for `Result<T, HydroError>`.
pub type HydroResult<T> = Result<T, HydroError>;
