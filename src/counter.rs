use crate::{
    Error,
    Result,
};
use chrono::prelude::*;
use custom_metrics_exporter_core::util_time;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Duration;

/// How the values accumulated during one flush window are turned into the
/// reported value.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricMode {
    /// Reports the sum of everything added during the window.
    #[default]
    Total,
    /// Reports the rounded mean of all values added during the window, `0` if
    /// nothing was added.
    Average,
    /// Reports the sum divided by the seconds the window lasted, rounded.
    PerSecond,
}

/// The frozen state of a counter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Sum for [`MetricMode::Total`] and [`MetricMode::PerSecond`], mean for
    /// [`MetricMode::Average`]. The rate conversion happens at flush time.
    pub value: i64,
    pub window_start: DateTime<Utc>,
}

struct Window {
    started_at: DateTime<Utc>,
    sum: i64,
    count: u64,
}

impl Window {
    fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            sum: 0,
            count: 0,
        }
    }

    fn record(&mut self, amount: i64) {
        self.sum = self.sum.saturating_add(amount);
        self.count = self.count.saturating_add(1);
    }
}

/// A named accumulator. Updates and [`MetricCounter::freeze_and_reset`] are
/// serialized by one lock per counter, so every update lands either fully in
/// the frozen window or fully in the next one.
pub struct MetricCounter {
    name: String,
    mode: MetricMode,
    window: Mutex<Window>,
}

impl MetricCounter {
    pub fn new(name: impl Into<String>, mode: MetricMode) -> Self {
        Self::with_window_start(name, mode, util_time::now())
    }

    pub(crate) fn with_window_start(name: impl Into<String>, mode: MetricMode, started_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            mode,
            window: Mutex::new(Window::starting_at(started_at)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> MetricMode {
        self.mode
    }

    pub fn increment(&self, by: i64) -> Result<()> {
        if by < 0 {
            return Err(Error::NegativeIncrement(by));
        }
        self.window.lock().record(by);
        Ok(())
    }

    pub fn add(&self, amount: i64) {
        self.window.lock().record(amount);
    }

    /// Captures the current window and starts a new one.
    pub fn freeze_and_reset(&self) -> Snapshot {
        let (sum, count, window_start) = {
            let mut window = self.window.lock();
            let frozen = std::mem::replace(&mut *window, Window::starting_at(util_time::now()));
            (frozen.sum, frozen.count, frozen.started_at)
        };

        let value = match self.mode {
            MetricMode::Total | MetricMode::PerSecond => sum,
            MetricMode::Average => average(sum, count),
        };

        Snapshot { value, window_start }
    }
}

impl std::fmt::Debug for MetricCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.window.lock();
        f.debug_struct("MetricCounter")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("sum", &window.sum)
            .field("count", &window.count)
            .finish()
    }
}

fn average(sum: i64, count: u64) -> i64 {
    if count == 0 {
        return 0;
    }
    (sum as f64 / count as f64).round() as i64
}

/// Converts a window sum into a per-second rate. Windows shorter than a second
/// count as one second.
pub fn per_second_rate(sum: i64, elapsed: Duration) -> i64 {
    let seconds = elapsed.as_secs_f64().max(1.0);
    (sum as f64 / seconds).round() as i64
}
