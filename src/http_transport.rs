use crate::{
    Error,
    FailureCallback,
    LogFailureCallback,
    Result,
};
use chrono::prelude::*;
use custom_metrics_exporter_core::{
    util_time,
    BatchMessage,
    DataPoint,
    MetricValue,
};
use reqwest::{
    header::{
        HeaderValue,
        CONTENT_TYPE,
    },
    StatusCode,
};
use std::{
    future::Future,
    sync::Arc,
    time::Duration,
};

pub const DEFAULT_ENDPOINT: &str = "https://custom-gateway.stackdriver.com/v1/custom";
pub const API_KEY_HEADER: &str = "x-stackdriver-apikey";

/// How the ingestion endpoint answered a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The endpoint answered `201 Created`.
    Accepted,
    /// Any other status. The failure callback has already been invoked.
    Rejected(StatusCode),
}

/// Delivers batches of data points.
///
/// An `Err` means the batch could not be delivered at all (connection, TLS,
/// timeout, encoding), a rejection by the endpoint is an `Ok(Delivery::Rejected)`.
pub trait Transport: Send + Sync {
    fn send_batch(&self, data_points: Vec<DataPoint>) -> impl Future<Output = Result<Delivery>> + Send;
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

#[doc(hidden)]
pub struct ApiKeyUndefined;
#[doc(hidden)]
pub struct ApiKeyDefined {
    client: reqwest::Client,
    api_key: HeaderValue,
}

/// Posts batches as JSON to the custom metrics endpoint.
pub struct HttpPostTransport<T> {
    endpoint: String,
    timeout: Duration,
    instance: Option<String>,
    failure_callback: Arc<dyn FailureCallback>,
    api_key: T,
}

impl Default for HttpPostTransport<ApiKeyUndefined> {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
            instance: None,
            failure_callback: Arc::new(LogFailureCallback),
            api_key: ApiKeyUndefined,
        }
    }
}

impl<T> HttpPostTransport<T> {
    /// Set the URL batches are posted to.
    pub fn endpoint(mut self, endpoint: impl ToString) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Instance tag used by [`HttpPostTransport::send_single`] when none is given.
    pub fn instance(mut self, instance: impl ToString) -> Self {
        self.instance = Some(instance.to_string());
        self
    }

    /// Set the callback that is told about rejected submissions.
    pub fn failure_callback(mut self, callback: impl FailureCallback + 'static) -> Self {
        self.failure_callback = Arc::new(callback);
        self
    }
}

impl HttpPostTransport<ApiKeyUndefined> {
    pub fn new() -> Self {
        Default::default()
    }

    /// How long a single request may take, including reading the response.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the API key and build the HTTP client.
    pub fn api_key(self, api_key: impl AsRef<str>) -> Result<HttpPostTransport<ApiKeyDefined>> {
        let Self {
            endpoint,
            timeout,
            instance,
            failure_callback,
            api_key: ApiKeyUndefined,
        } = self;

        let api_key = api_key.as_ref().trim();
        if api_key.is_empty() {
            return Err(Error::MissingApiKey);
        }
        let mut api_key = HeaderValue::from_str(api_key)?;
        api_key.set_sensitive(true);

        let client = reqwest::Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(HttpPostTransport {
            endpoint,
            timeout,
            instance,
            failure_callback,
            api_key: ApiKeyDefined { client, api_key },
        })
    }
}

impl HttpPostTransport<ApiKeyDefined> {
    /// Send a single value. A rejection reports `name` to the failure callback.
    pub async fn send_single(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        collected_at: Option<DateTime<Utc>>,
        instance: Option<&str>,
    ) -> Result<Delivery> {
        let instance = instance.or(self.instance.as_deref()).map(ToOwned::to_owned);
        let data_point = DataPoint::new(name, value, collected_at.unwrap_or_else(util_time::now), instance)?;
        self.post(Some(name), BatchMessage::single(data_point)).await
    }

    async fn post(&self, metric_name: Option<&str>, message: BatchMessage) -> Result<Delivery> {
        let ApiKeyDefined { client, api_key } = &self.api_key;
        let n = message.len();
        let body = message.to_json()?;

        trace!(endpoint = %self.endpoint, %n, "posting metrics");
        let res = client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, api_key.clone())
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::CREATED {
            return Ok(Delivery::Accepted);
        }

        let text = res.text().await.unwrap_or_else(|err| {
            debug!(?err, "failed to read response body");
            String::new()
        });
        self.failure_callback.on_delivery_failure(metric_name, status, &text);

        Ok(Delivery::Rejected(status))
    }
}

impl Transport for HttpPostTransport<ApiKeyDefined> {
    async fn send_batch(&self, data_points: Vec<DataPoint>) -> Result<Delivery> {
        let message = BatchMessage::new(data_points)?;
        self.post(None, message).await
    }
}

impl<T> std::fmt::Debug for HttpPostTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPostTransport")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}
