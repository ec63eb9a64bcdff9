//! Evaluation statistics.
//!
//! Several fields (min/avg/max startup time, counts that must stay
//! consistent with one another) need to move together, so this favors a
//! single mutex over a cluster of atomics.

use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct FilterStatistics {
    pub objs_processed: u64,
    pub objs_dropped: u64,
    pub objs_passed: u64,
    pub objs_cache_dropped: u64,
    pub objs_cache_passed: u64,
    pub objs_unloadable: u64,
    pub objs_terminate: u64,
    pub execution_us: u64,
    pub startup_us_min: u64,
    pub startup_us_max: u64,
    startup_us_total: u64,
    startup_samples: u64,
}

impl FilterStatistics {
    pub fn startup_us_avg(&self) -> u64 {
        self.startup_us_total.checked_div(self.startup_samples).unwrap_or(0)
    }
}

/// Thread-safe accumulator for one filter's statistics.
pub struct Statistics {
    inner: Mutex<FilterStatistics>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FilterStatistics::default()),
        }
    }

    pub fn snapshot(&self) -> FilterStatistics {
        *self.inner.lock().unwrap()
    }

    pub fn record_processed(&self) {
        self.inner.lock().unwrap().objs_processed += 1;
    }

    pub fn record_dropped(&self) {
        self.inner.lock().unwrap().objs_dropped += 1;
    }

    pub fn record_passed(&self) {
        self.inner.lock().unwrap().objs_passed += 1;
    }

    pub fn record_cache_dropped(&self) {
        self.inner.lock().unwrap().objs_cache_dropped += 1;
    }

    pub fn record_cache_passed(&self) {
        self.inner.lock().unwrap().objs_cache_passed += 1;
    }

    pub fn record_unloadable(&self) {
        self.inner.lock().unwrap().objs_unloadable += 1;
    }

    pub fn record_terminate(&self) {
        self.inner.lock().unwrap().objs_terminate += 1;
    }

    pub fn record_execution_time(&self, d: Duration) {
        self.inner.lock().unwrap().execution_us += d.as_micros() as u64;
    }

    /// Folds one worker startup sample into the running min/avg/max.
    pub fn record_startup_time(&self, d: Duration) {
        let us = d.as_micros() as u64;
        let mut s = self.inner.lock().unwrap();
        s.startup_us_min = if s.startup_samples == 0 {
            us
        } else {
            s.startup_us_min.min(us)
        };
        s.startup_us_max = s.startup_us_max.max(us);
        s.startup_us_total += us;
        s.startup_samples += 1;
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}
