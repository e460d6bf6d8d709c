use chrono::prelude::*;
use std::time::Duration;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Wall clock time that passed since `start`. Zero if `start` lies in the future.
pub fn elapsed_since(start: DateTime<Utc>) -> Duration {
    (now() - start).to_std().unwrap_or_default()
}
