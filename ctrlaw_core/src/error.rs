use ctrlaw_traits::LivenessStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LawError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timeout waiting for channel i/o")]
    Timeout,
    #[error("non-finite value during {stage} on channel {channel}")]
    NonFinite {
        stage: &'static str,
        channel: String,
    },
    #[error("liveness check returned {0}")]
    Liveness(LivenessStatus),
    #[error("cancelled")]
    Cancelled,
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing value provider")]
    MissingProvider,
    #[error("missing correction matrix")]
    MissingMatrix,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("compensation actuators overlap primary actuators: {0}")]
    OverlappingActuators(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
