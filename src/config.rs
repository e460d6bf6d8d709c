use crate::{
    aggregator::{
        AggregatorBuilder,
        TransportDefined,
    },
    http_transport::{
        ApiKeyDefined,
        HttpPostTransport,
        DEFAULT_ENDPOINT,
    },
    Aggregator,
    MetricMode,
    Result,
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    time::Duration,
};

/// Aggregator settings as they appear in a configuration file.
///
/// ```json
/// {
///   "api_key": "...",
///   "instance": "web-1",
///   "flush_interval_secs": 60,
///   "metrics": { "requests": "per_second", "latency_ms": "average" }
/// }
/// ```
#[derive(Deserialize, Clone)]
pub struct AggregatorConfig {
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Metric modes to declare before the first flush.
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricMode>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl AggregatorConfig {
    pub fn new(api_key: impl ToString) -> Self {
        Self {
            api_key: api_key.to_string(),
            endpoint: default_endpoint(),
            instance: None,
            flush_interval_secs: default_flush_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            metrics: BTreeMap::new(),
        }
    }

    /// The HTTP transport described by this config, logging delivery failures.
    pub fn transport(&self) -> Result<HttpPostTransport<ApiKeyDefined>> {
        let mut transport = HttpPostTransport::new()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .endpoint(&self.endpoint);
        if let Some(instance) = &self.instance {
            transport = transport.instance(instance);
        }
        transport.api_key(&self.api_key)
    }

    /// An aggregator builder ready to be started.
    pub fn builder(&self) -> Result<AggregatorBuilder<TransportDefined<HttpPostTransport<ApiKeyDefined>>>> {
        let mut builder = Aggregator::builder().flush_interval(Duration::from_secs(self.flush_interval_secs));
        if let Some(instance) = &self.instance {
            builder = builder.instance(instance);
        }
        for (name, mode) in &self.metrics {
            builder = builder.setup_metric(name, *mode);
        }
        Ok(builder.transport(self.transport()?))
    }
}

impl std::fmt::Debug for AggregatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("instance", &self.instance)
            .field("flush_interval_secs", &self.flush_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("metrics", &self.metrics)
            .finish()
    }
}
