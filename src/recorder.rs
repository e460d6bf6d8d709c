use crate::Registry;
use metrics::{
    Counter,
    CounterFn,
    Gauge,
    Histogram,
    HistogramFn,
    Key,
    KeyName,
    Metadata,
    Recorder,
    SetRecorderError,
    SharedString,
    Unit,
};
use std::sync::Arc;

/// Feeds metrics recorded through the [`metrics`] macros into a [`Registry`].
///
/// Counters become [`crate::MetricMode::Total`] counters and histograms become
/// [`crate::MetricMode::Average`] counters, with samples rounded to integers.
/// Gauges and labels are not supported and dropped.
#[derive(Debug, Clone)]
pub struct AggregatorRecorder {
    registry: Registry,
}

impl AggregatorRecorder {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Install this recorder as the global recorder.
    pub fn install(self) -> Result<(), SetRecorderError<Self>> {
        metrics::set_global_recorder(self)
    }
}

impl Recorder for AggregatorRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        trace!(?key, "ignoring counter description");
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        trace!(?key, "ignoring gauge description");
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        trace!(?key, "ignoring histogram description");
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(Handle::new(key, self.registry.clone())))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        debug!(?key, "gauges are not aggregated");
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(Handle::new(key, self.registry.clone())))
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

struct Handle {
    name: String,
    registry: Registry,
}

impl Handle {
    fn new(key: &Key, registry: Registry) -> Handle {
        Handle {
            name: key.name().to_string(),
            registry,
        }
    }
}

impl CounterFn for Handle {
    fn increment(&self, value: u64) {
        let by = i64::try_from(value).unwrap_or(i64::MAX);
        if let Err(err) = self.registry.increment_by(&self.name, by) {
            warn!(?err, name = %self.name, "dropping counter increment");
        }
    }

    fn absolute(&self, value: u64) {
        trace!(name = %self.name, %value, "absolute counter values are not aggregated");
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        if let Err(err) = self.registry.add(&self.name, value.round() as i64) {
            warn!(?err, name = %self.name, "dropping histogram sample");
        }
    }
}
