//! Error types shared by every model component.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LemError>;

/// Errors raised by grid construction, the process components and the driver.
#[derive(Error, Debug)]
pub enum LemError {
    /// Structurally invalid setup: bad dimensions, shape mismatch, no outlet.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required parameter key was absent from a parameter map.
    #[error("Missing required parameter '{key}'")]
    MissingParameter { key: String },

    /// A parameter was present but outside its valid range.
    #[error("Invalid parameter '{key}' = {value}: {reason}")]
    InvalidParameter {
        key: String,
        value: f64,
        reason: String,
    },

    /// A non-finite value escaped a numerical kernel.
    #[error("Numerical instability in {stage}: {detail}")]
    NumericalInstability { stage: &'static str, detail: String },

    /// The storm sequence ended before the requested model time.
    #[error("Input exhausted at t={elapsed} before requested t={requested}")]
    ExhaustedInput { elapsed: f64, requested: f64 },

    /// A failure inside one stage of a driver step.
    #[error("Stage '{stage}' failed at t={time}: {source}")]
    Stage {
        stage: &'static str,
        time: f64,
        #[source]
        source: Box<LemError>,
    },

    /// Checkpoint or parameter JSON could not be encoded/decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LemError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid(key: impl Into<String>, value: f64, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            key: key.into(),
            value,
            reason: reason.into(),
        }
    }

    /// Attach the stage name and model time to an error raised inside a step.
    pub fn in_stage(self, stage: &'static str, time: f64) -> Self {
        Self::Stage {
            stage,
            time,
            source: Box::new(self),
        }
    }

    /// Name of the stage that failed, if this error came from a driver step.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
