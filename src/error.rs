use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("input table is empty")]
    EmptyTable,

    #[error("invalid matrix dimension: expected {expected} columns, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    #[error("feature columns do not match training columns: expected {expected:?}, got {got:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("{0} has not been trained")]
    NotTrained(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, FusionError>;
