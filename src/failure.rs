use reqwest::StatusCode;

/// Gets told about batches the ingestion endpoint did not accept.
///
/// `metric_name` is `None` for batch submissions and the metric's name for
/// single-value submissions. Any `Fn(Option<&str>, StatusCode, &str)` closure
/// can be used as a callback.
pub trait FailureCallback: Send + Sync {
    fn on_delivery_failure(&self, metric_name: Option<&str>, status: StatusCode, body: &str);
}

/// Default callback, emits an error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureCallback;

impl FailureCallback for LogFailureCallback {
    fn on_delivery_failure(&self, metric_name: Option<&str>, status: StatusCode, body: &str) {
        match metric_name {
            Some(metric_name) => error!(%status, %body, %metric_name, "sending metric failed"),
            None => error!(%status, %body, "sending metrics batch failed"),
        }
    }
}

impl<F> FailureCallback for F
where
    F: Fn(Option<&str>, StatusCode, &str) + Send + Sync,
{
    fn on_delivery_failure(&self, metric_name: Option<&str>, status: StatusCode, body: &str) {
        self(metric_name, status, body)
    }
}
