use crate::{
    counter::per_second_rate,
    Error,
    MetricCounter,
    MetricMode,
    Result,
};
use custom_metrics_exporter_core::{
    util_time,
    validate_name,
    DataPoint,
};
use dashmap::{
    mapref::entry::Entry,
    DashMap,
};
use std::sync::Arc;

/// The set of counters of an aggregator, keyed by metric name.
///
/// Cheap to clone, clones share the same counters. Each counter is locked
/// separately so updating one metric never waits on another.
#[derive(Clone, Default)]
pub struct Registry {
    counters: Arc<DashMap<String, Arc<MetricCounter>>>,
}

impl Registry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Increment the counter `name` by one. Creates a [`MetricMode::Total`]
    /// counter if it does not exist yet.
    pub fn increment(&self, name: &str) -> Result<()> {
        self.increment_by(name, 1)
    }

    /// Increment the counter `name` by `by`, which must not be negative.
    pub fn increment_by(&self, name: &str, by: i64) -> Result<()> {
        if by < 0 {
            return Err(Error::NegativeIncrement(by));
        }
        self.get_or_create(name, MetricMode::Total)?.increment(by)
    }

    /// Add a sample to the counter `name`. Creates a [`MetricMode::Average`]
    /// counter if it does not exist yet.
    pub fn add(&self, name: &str, amount: i64) -> Result<()> {
        self.get_or_create(name, MetricMode::Average)?.add(amount);
        Ok(())
    }

    /// Declare the mode of a metric ahead of its first use.
    ///
    /// Does nothing if the counter already exists with the same mode. If it
    /// exists with a different mode it is replaced and whatever it accumulated
    /// since the last flush is dropped.
    pub fn setup_metric(&self, name: &str, mode: MetricMode) -> Result<()> {
        validate_name(name)?;

        match self.counters.entry(name.to_owned()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get().mode();
                if existing != mode {
                    warn!(%name, ?existing, ?mode, "metric mode changed, unflushed values are discarded");
                    entry.insert(Arc::new(MetricCounter::new(name, mode)));
                }
            }
            Entry::Vacant(entry) => {
                trace!(%name, ?mode, "registering metric");
                entry.insert(Arc::new(MetricCounter::new(name, mode)));
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<MetricCounter>> {
        self.counters.get(name).map(|counter| Arc::clone(counter.value()))
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn get_or_create(&self, name: &str, mode: MetricMode) -> Result<Arc<MetricCounter>> {
        if let Some(counter) = self.get(name) {
            return Ok(counter);
        }

        validate_name(name)?;
        let counter = self
            .counters
            .entry(name.to_owned())
            .or_insert_with(|| {
                trace!(%name, ?mode, "registering metric");
                Arc::new(MetricCounter::new(name, mode))
            });
        Ok(Arc::clone(counter.value()))
    }

    /// Freeze and reset every counter and turn each one into a data point
    /// tagged with `instance`.
    pub fn freeze_all(&self, instance: Option<&str>) -> Vec<DataPoint> {
        // Collect first so no map shard stays locked while counters are frozen.
        let counters = self
            .counters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();

        counters
            .iter()
            .filter_map(|counter| {
                let snapshot = counter.freeze_and_reset();
                let value = match counter.mode() {
                    MetricMode::PerSecond => {
                        per_second_rate(snapshot.value, util_time::elapsed_since(snapshot.window_start))
                    }
                    MetricMode::Total | MetricMode::Average => snapshot.value,
                };

                DataPoint::new(
                    counter.name(),
                    value,
                    snapshot.window_start,
                    instance.map(ToOwned::to_owned),
                )
                .map_err(|err| error!(?err, name = %counter.name(), "dropping metric"))
                .ok()
            })
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}
