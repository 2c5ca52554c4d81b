use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::sync::atomic::{AtomicI64, Ordering};

/// One reading of the clock: epoch seconds plus local hour and day of week
/// (0 = Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub timestamp: i64,
    pub hour: u32,
    pub dow: u32,
}

impl Stamp {
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            timestamp: at.timestamp(),
            hour: at.hour(),
            dow: at.weekday().num_days_from_sunday(),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Stamp;
}

/// Local wall clock whose timestamps never go backwards.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Stamp {
        let mut stamp = Stamp::from_datetime(&Local::now());
        let previous = self.last.fetch_max(stamp.timestamp, Ordering::AcqRel);
        stamp.timestamp = stamp.timestamp.max(previous);
        stamp
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    stamp: parking_lot::Mutex<Stamp>,
}

impl FixedClock {
    pub fn new(timestamp: i64, hour: u32, dow: u32) -> Self {
        Self {
            stamp: parking_lot::Mutex::new(Stamp {
                timestamp,
                hour,
                dow,
            }),
        }
    }

    pub fn set(&self, stamp: Stamp) {
        *self.stamp.lock() = stamp;
    }

    pub fn advance(&self, seconds: i64) {
        self.stamp.lock().timestamp += seconds;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Stamp {
        *self.stamp.lock()
    }
}
