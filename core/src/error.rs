#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric name must not be empty")]
    EmptyName,

    #[error("metric value must be a finite number, got {0}")]
    NonFiniteValue(f64),

    #[error("a batch message needs at least one data point")]
    EmptyBatch,

    #[error("failed to encode batch message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
