use crate::{
    http_transport::{
        ApiKeyDefined,
        HttpPostTransport,
    },
    AggregatorRecorder,
    Delivery,
    Error,
    MetricMode,
    Registry,
    Result,
    Transport,
};
use futures::FutureExt as _;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{
        interval_at,
        Instant,
        MissedTickBehavior,
    },
};
use tokio_util::sync::CancellationToken;

/// The reference ingestion service accepts custom metrics once per minute.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

#[doc(hidden)]
pub struct TransportUndefined;
#[doc(hidden)]
pub struct TransportDefined<T>(T);

/// A builder for an [`Aggregator`].
pub struct AggregatorBuilder<T> {
    flush_interval: Duration,
    instance: Option<String>,
    metrics: Vec<(String, MetricMode)>,
    transport: T,
}

impl Default for AggregatorBuilder<TransportUndefined> {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            instance: None,
            metrics: Vec::new(),
            transport: TransportUndefined,
        }
    }
}

impl<T> AggregatorBuilder<T> {
    /// How often counters are frozen and sent.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Instance tag attached to every data point.
    pub fn instance(mut self, instance: impl ToString) -> Self {
        self.instance = Some(instance.to_string());
        self
    }

    /// Declare the mode of a metric before the aggregator starts.
    pub fn setup_metric(mut self, name: impl ToString, mode: MetricMode) -> Self {
        self.metrics.push((name.to_string(), mode));
        self
    }
}

impl AggregatorBuilder<TransportUndefined> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Deliver batches through `transport`.
    pub fn transport<T: Transport>(self, transport: T) -> AggregatorBuilder<TransportDefined<T>> {
        AggregatorBuilder {
            flush_interval: self.flush_interval,
            instance: self.instance,
            metrics: self.metrics,
            transport: TransportDefined(transport),
        }
    }

    /// Deliver batches to the default endpoint using `api_key`.
    pub fn api_key(
        self,
        api_key: impl AsRef<str>,
    ) -> Result<AggregatorBuilder<TransportDefined<HttpPostTransport<ApiKeyDefined>>>> {
        let transport = HttpPostTransport::new().api_key(api_key)?;
        Ok(self.transport(transport))
    }
}

impl<T: Transport + 'static> AggregatorBuilder<TransportDefined<T>> {
    /// Start flushing on the tokio runtime this is called from.
    pub fn start(self) -> Result<Aggregator<T>> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        self.start_on(&runtime)
    }

    /// Start flushing on `runtime`. The runtime needs its time driver enabled.
    pub fn start_on(self, runtime: &Handle) -> Result<Aggregator<T>> {
        let Self {
            flush_interval,
            instance,
            metrics,
            transport: TransportDefined(transport),
        } = self;

        if flush_interval.is_zero() {
            return Err(Error::ZeroFlushInterval);
        }

        let registry = Registry::new();
        for (name, mode) in &metrics {
            registry.setup_metric(name, *mode)?;
        }

        let flusher = Arc::new(Flusher {
            registry: registry.clone(),
            transport,
            instance,
            lock: tokio::sync::Mutex::new(()),
        });
        let token = CancellationToken::new();

        let task = runtime.spawn({
            let flusher = flusher.clone();
            let token = token.clone();
            async move {
                run_flush_loop(flusher, token, flush_interval).await;
            }
        });

        Ok(Aggregator {
            registry,
            flusher,
            token,
            task: Some(task),
        })
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

/// Accumulates counters and sends them as one batch per flush interval.
///
/// Dropping the aggregator stops the background flush without waiting for it,
/// [`Aggregator::stop`] waits for an in-flight delivery to finish.
pub struct Aggregator<T = HttpPostTransport<ApiKeyDefined>> {
    registry: Registry,
    flusher: Arc<Flusher<T>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Aggregator<HttpPostTransport<ApiKeyDefined>> {
    /// Create a new builder for an [`Aggregator`].
    pub fn builder() -> AggregatorBuilder<TransportUndefined> {
        AggregatorBuilder::new()
    }
}

impl<T: Transport> Aggregator<T> {
    /// See [`Registry::increment`].
    pub fn increment(&self, name: &str) -> Result<()> {
        self.registry.increment(name)
    }

    /// See [`Registry::increment_by`].
    pub fn increment_by(&self, name: &str, by: i64) -> Result<()> {
        self.registry.increment_by(name, by)
    }

    /// See [`Registry::add`].
    pub fn add(&self, name: &str, amount: i64) -> Result<()> {
        self.registry.add(name, amount)
    }

    /// See [`Registry::setup_metric`].
    pub fn setup_metric(&self, name: &str, mode: MetricMode) -> Result<()> {
        self.registry.setup_metric(name, mode)
    }

    /// The counters of this aggregator. Clone it to hand it to other components.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A [`metrics::Recorder`] feeding this aggregator.
    pub fn recorder(&self) -> AggregatorRecorder {
        AggregatorRecorder::new(self.registry.clone())
    }

    /// Run one flush cycle now. Waits for a periodic flush that is currently
    /// running. Returns `None` if no metric is registered.
    pub async fn flush_now(&self) -> Result<Option<Delivery>> {
        self.flusher.flush().await
    }

    /// Stop the periodic flush and wait for the background task to end.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!(?err, "metrics flush task failed");
            }
        }
    }
}

impl<T> Drop for Aggregator<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<T> std::fmt::Debug for Aggregator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("registry", &self.registry)
            .field("instance", &self.flusher.instance)
            .finish_non_exhaustive()
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

struct Flusher<T> {
    registry: Registry,
    transport: T,
    instance: Option<String>,
    /// Flush cycles never overlap.
    lock: tokio::sync::Mutex<()>,
}

impl<T: Transport> Flusher<T> {
    async fn flush(&self) -> Result<Option<Delivery>> {
        let _guard = self.lock.lock().await;

        let data_points = self.registry.freeze_all(self.instance.as_deref());
        if data_points.is_empty() {
            trace!("no metrics registered, nothing to send");
            return Ok(None);
        }

        let n = data_points.len();
        trace!(%n, "sending metrics");
        let delivery = self.transport.send_batch(data_points).await?;
        match delivery {
            Delivery::Accepted => debug!(%n, "metrics batch delivered"),
            Delivery::Rejected(status) => warn!(%n, %status, "metrics batch rejected, dropping it"),
        }

        Ok(Some(delivery))
    }
}

async fn run_flush_loop<T: Transport>(flusher: Arc<Flusher<T>>, token: CancellationToken, flush_interval: Duration) {
    debug!(?flush_interval, "starting metrics aggregator");
    defer! {
        debug!("metrics aggregator stopped");
    }

    let mut ticks = interval_at(Instant::now() + flush_interval, flush_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                break;
            }

            _ = ticks.tick() => {
                match AssertUnwindSafe(flusher.flush()).catch_unwind().await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => error!(?err, "failed to send metrics, dropping batch"),
                    Err(panic) => error!(panic = %panic_message(&*panic), "metrics flush panicked"),
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use custom_metrics_exporter_core::{
        DataPoint,
        MetricValue,
    };
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };
    use tokio::sync::mpsc;

    #[derive(Clone, Copy)]
    enum FirstCall {
        Succeeds,
        Fails,
        Panics,
    }

    /// Forwards every batch to a channel.
    struct RecordingTransport {
        tx: mpsc::UnboundedSender<Vec<DataPoint>>,
        calls: AtomicUsize,
        first_call: FirstCall,
    }

    impl RecordingTransport {
        fn new(first_call: FirstCall) -> (Self, mpsc::UnboundedReceiver<Vec<DataPoint>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Self {
                tx,
                calls: AtomicUsize::new(0),
                first_call,
            };
            (transport, rx)
        }
    }

    impl Transport for RecordingTransport {
        async fn send_batch(&self, data_points: Vec<DataPoint>) -> Result<Delivery> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.tx.send(data_points);
            match (call, self.first_call) {
                (0, FirstCall::Fails) => Err(Error::MissingApiKey),
                (0, FirstCall::Panics) => panic!("transport exploded"),
                _ => Ok(Delivery::Accepted),
            }
        }
    }

    fn start(first_call: FirstCall) -> (Aggregator<RecordingTransport>, mpsc::UnboundedReceiver<Vec<DataPoint>>) {
        let (transport, rx) = RecordingTransport::new(first_call);
        let aggregator = Aggregator::builder()
            .flush_interval(Duration::from_secs(3))
            .transport(transport)
            .start()
            .unwrap();
        (aggregator, rx)
    }

    fn value_of(points: &[DataPoint], name: &str) -> MetricValue {
        points
            .iter()
            .find(|point| point.name() == name)
            .unwrap_or_else(|| panic!("no data point named {name}"))
            .value()
    }

    #[tokio::test(start_paused = true)]
    async fn each_tick_reports_only_its_own_window() {
        let (aggregator, mut batches) = start(FirstCall::Succeeds);

        for _ in 0..100 {
            aggregator.increment("foo").unwrap();
        }
        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name(), "foo");
        assert_eq!(batch[0].value(), MetricValue::Integer(100));

        for _ in 0..25 {
            aggregator.increment("foo").unwrap();
        }
        let batch = batches.recv().await.unwrap();
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(25));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn totals_and_averages_share_one_batch() {
        let (aggregator, mut batches) = start(FirstCall::Succeeds);

        for _ in 0..100 {
            aggregator.increment_by("foo", 2).unwrap();
            aggregator.add("bar", 2500).unwrap();
        }

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(200));
        assert_eq!(value_of(&batch, "bar"), MetricValue::Integer(2500));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_sends_nothing() {
        let (aggregator, mut batches) = start(FirstCall::Succeeds);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(batches.try_recv().is_err());

        aggregator.increment("foo").unwrap();
        let batch = batches.recv().await.unwrap();
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(1));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_does_not_stop_flushing() {
        let (aggregator, mut batches) = start(FirstCall::Fails);

        aggregator.increment_by("foo", 5).unwrap();
        let batch = batches.recv().await.unwrap();
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(5));

        aggregator.increment_by("foo", 7).unwrap();
        let batch = batches.recv().await.unwrap();
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(7));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_delivery_does_not_stop_flushing() {
        let (aggregator, mut batches) = start(FirstCall::Panics);

        aggregator.increment_by("foo", 5).unwrap();
        batches.recv().await.unwrap();

        aggregator.increment_by("foo", 7).unwrap();
        let batch = batches.recv().await.unwrap();
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(7));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn instance_and_declared_metrics_are_applied() {
        let (transport, mut batches) = RecordingTransport::new(FirstCall::Succeeds);
        let aggregator = Aggregator::builder()
            .flush_interval(Duration::from_secs(3))
            .instance("web-1")
            .setup_metric("hits", MetricMode::PerSecond)
            .transport(transport)
            .start()
            .unwrap();

        assert_eq!(aggregator.registry().get("hits").unwrap().mode(), MetricMode::PerSecond);

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].instance(), Some("web-1"));
        assert_eq!(batch[0].value(), MetricValue::Integer(0));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_sends_immediately() {
        let (aggregator, mut batches) = start(FirstCall::Succeeds);
        assert_eq!(aggregator.flush_now().await.unwrap(), None);

        aggregator.increment_by("foo", 3).unwrap();
        assert_eq!(aggregator.flush_now().await.unwrap(), Some(Delivery::Accepted));
        let batch = batches.try_recv().unwrap();
        assert_eq!(value_of(&batch, "foo"), MetricValue::Integer(3));

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_flush_task() {
        let (aggregator, mut batches) = start(FirstCall::Succeeds);
        let registry = aggregator.registry().clone();

        aggregator.stop().await;
        registry.increment("foo").unwrap();

        // The transport is dropped together with the task.
        assert!(batches.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_the_flush_task() {
        let (aggregator, mut batches) = start(FirstCall::Succeeds);
        aggregator.increment("foo").unwrap();
        drop(aggregator);

        assert!(batches.recv().await.is_none());
    }

    #[test]
    fn start_needs_a_runtime() {
        let (transport, _batches) = RecordingTransport::new(FirstCall::Succeeds);
        let result = Aggregator::builder().transport(transport).start();
        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[test]
    fn start_on_an_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let (transport, _batches) = RecordingTransport::new(FirstCall::Succeeds);
        let aggregator = Aggregator::builder()
            .transport(transport)
            .start_on(runtime.handle())
            .unwrap();
        aggregator.increment("foo").unwrap();

        runtime.block_on(aggregator.stop());
    }

    #[tokio::test]
    async fn zero_flush_interval_is_rejected() {
        let (transport, _batches) = RecordingTransport::new(FirstCall::Succeeds);
        let result = Aggregator::builder()
            .flush_interval(Duration::ZERO)
            .transport(transport)
            .start();
        assert!(matches!(result, Err(Error::ZeroFlushInterval)));
    }
}
