//! Clock alignment with the backend
//!
//! The backend hands out its reference time with every configuration. Poll
//! results are stamped with the adjusted clock so a skewed local clock does
//! not shift the time windows the correlation engine works with.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

pub trait TimeAdjustment: Send + Sync {
    /// Record the backend's current time as the reference
    fn set_master_time(&self, master_time: DateTime<Utc>);

    /// Translate a local timestamp into backend time
    fn adjust_time(&self, local: DateTime<Utc>) -> DateTime<Utc>;

    fn now(&self) -> DateTime<Utc> {
        self.adjust_time(Utc::now())
    }
}

/// Keeps a fixed offset between the local and the backend clock
#[derive(Debug, Default)]
pub struct OffsetTimeAdjustment {
    offset_ms: AtomicI64,
}

impl OffsetTimeAdjustment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.offset_ms.load(Ordering::Relaxed))
    }

    fn set_master_time_at(&self, master_time: DateTime<Utc>, local_now: DateTime<Utc>) {
        let offset = master_time - local_now;
        if offset.num_seconds().abs() > 0 {
            debug!("local clock differs from backend by {}ms", offset.num_milliseconds());
        }
        self.offset_ms
            .store(offset.num_milliseconds(), Ordering::Relaxed);
    }
}

impl TimeAdjustment for OffsetTimeAdjustment {
    fn set_master_time(&self, master_time: DateTime<Utc>) {
        self.set_master_time_at(master_time, Utc::now());
    }

    fn adjust_time(&self, local: DateTime<Utc>) -> DateTime<Utc> {
        local + self.offset()
    }
}
