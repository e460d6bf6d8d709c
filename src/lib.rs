/*!

# custom-metrics-exporter

Aggregates in-process counters and delivers them to a custom metrics ingestion endpoint.

Application code increments named counters as often as it likes. Nothing is sent at that point: once per flush interval
(one minute by default, the rate the ingestion service accepts) every counter is frozen and reset, summarized into a
single data point and the whole set is posted as one JSON batch.

Each counter has a [`MetricMode`]:

- [`MetricMode::Total`] reports the sum of the window (the default for [`Aggregator::increment`]).
- [`MetricMode::Average`] reports the rounded mean of the window (the default for [`Aggregator::add`]).
- [`MetricMode::PerSecond`] reports the sum divided by the length of the window in seconds.

Delivery is best effort. A batch the endpoint does not accept with `201 Created` is handed to a [`FailureCallback`]
and dropped, transport errors are logged. There are no retries.

Example:

```rust,no_run
use custom_metrics_exporter::{Aggregator, HttpPostTransport, MetricMode, StatusCode};
use std::time::Duration;

# async fn run() -> custom_metrics_exporter::Result<()> {
let transport = HttpPostTransport::new()
    .failure_callback(|name: Option<&str>, status: StatusCode, body: &str| {
        eprintln!("metrics rejected: {status} {body} ({name:?})");
    })
    .api_key("my-api-key")?;

let aggregator = Aggregator::builder()
    .flush_interval(Duration::from_secs(60))
    .instance("web-1")
    .setup_metric("requests", MetricMode::PerSecond)
    .transport(transport)
    .start()?;

aggregator.increment("requests")?;
aggregator.add("response_time_ms", 42)?;

// Hand out the registry to other components.
let registry = aggregator.registry().clone();
registry.increment_by("bytes_sent", 512)?;

aggregator.stop().await;
# Ok(())
# }
```

Code instrumented with the [`metrics`] macros can feed the same aggregator through [`Aggregator::recorder`].

*/

mod aggregator;
mod config;
mod counter;
mod error;
mod failure;
mod http_transport;
mod recorder;
mod registry;

pub use aggregator::{
    Aggregator,
    AggregatorBuilder,
    TransportDefined,
    TransportUndefined,
    DEFAULT_FLUSH_INTERVAL,
};
pub use config::AggregatorConfig;
pub use counter::{
    per_second_rate,
    MetricCounter,
    MetricMode,
    Snapshot,
};
pub use custom_metrics_exporter_core::{
    util_time,
    BatchMessage,
    DataPoint,
    MetricValue,
    PROTO_VERSION,
};
pub use error::{
    Error,
    Result,
};
pub use failure::{
    FailureCallback,
    LogFailureCallback,
};
pub use http_transport::{
    ApiKeyDefined,
    ApiKeyUndefined,
    Delivery,
    HttpPostTransport,
    Transport,
    API_KEY_HEADER,
    DEFAULT_ENDPOINT,
};
pub use recorder::AggregatorRecorder;
pub use registry::Registry;
pub use reqwest::StatusCode;

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate scopeguard;
