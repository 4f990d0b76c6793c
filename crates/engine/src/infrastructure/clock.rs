//! Wall clock used to timestamp finished queue items.

use chrono::{DateTime, Utc};

use crate::infrastructure::ports::ClockPort;

/// System clock - uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for testing.
#[cfg(test)]
pub struct FixedClock(std::sync::Mutex<DateTime<Utc>>);

#[cfg(test)]
impl FixedClock {
    /// Clock reading `secs` seconds after the Unix epoch.
    pub fn at(secs: i64) -> Self {
        Self(std::sync::Mutex::new(
            DateTime::from_timestamp(secs, 0).expect("timestamp in range"),
        ))
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock().expect("clock lock");
        *now += chrono::Duration::seconds(secs);
    }
}

#[cfg(test)]
impl ClockPort for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("clock lock")
    }
}
