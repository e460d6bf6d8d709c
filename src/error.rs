use reqwest::header::InvalidHeaderValue;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] custom_metrics_exporter_core::Error),

    #[error("increment must not be negative, got {0}")]
    NegativeIncrement(i64),

    #[error("api key must not be blank")]
    MissingApiKey,

    #[error("api key is not a valid header value: {0}")]
    InvalidApiKey(#[from] InvalidHeaderValue),

    #[error("failed to deliver metrics: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("flush interval must be greater than zero")]
    ZeroFlushInterval,

    #[error("the aggregator must be started from within a tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, Error>;
