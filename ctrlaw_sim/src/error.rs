use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("channel i/o timeout on {0}")]
    Timeout(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("channel disconnected: {0}")]
    Disconnected(String),
    #[error("plant shape mismatch: {0}")]
    Shape(String),
    #[error("value count {values} does not match name count {names}")]
    Arity { names: usize, values: usize },
}

pub type Result<T> = std::result::Result<T, SimError>;
