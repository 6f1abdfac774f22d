//
// metrics.rs
//
// Categorized counters and diagnostic-latency timers
//

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Global categorized counters, keyed by (category, tag).
static CATEGORY_COUNTERS: OnceLock<Mutex<HashMap<(&'static str, &'static str), u64>>> =
    OnceLock::new();

fn counters() -> &'static Mutex<HashMap<(&'static str, &'static str), u64>> {
    CATEGORY_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Increment a categorized production counter, e.g.
/// `category_counter_inc("lsp.slow_path_reason", "changed_definition")`.
pub fn category_counter_inc(category: &'static str, tag: &'static str) {
    let mut guard = counters().lock().unwrap();
    *guard.entry((category, tag)).or_insert(0) += 1;
}

/// Current value of a categorized counter. Zero if never incremented.
pub fn category_counter_value(category: &'static str, tag: &'static str) -> u64 {
    let guard = counters().lock().unwrap();
    guard.get(&(category, tag)).copied().unwrap_or(0)
}

/// A timer attributing end-to-end latency to a named operation.
///
/// Reports at debug level when dropped unless canceled first. Forking a
/// timer yields a new handle with the same start instant, so latency
/// attribution can follow canceled work into the update that superseded it.
#[derive(Debug)]
pub struct LatencyTimer {
    name: &'static str,
    start: Instant,
    canceled: bool,
}

impl LatencyTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            canceled: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Suppress reporting for this handle.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// A new handle measuring from the same start instant. Whether a fork of
    /// an already-reported timer is meaningful is the owner's policy; the
    /// fork itself always starts out armed.
    pub fn fork(&self) -> Self {
        Self {
            name: self.name,
            start: self.start,
            canceled: false,
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        if !self.canceled {
            log::debug!("{} took {:?}", self.name, self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let before = category_counter_value("test.metrics", "bump");
        category_counter_inc("test.metrics", "bump");
        category_counter_inc("test.metrics", "bump");
        assert_eq!(category_counter_value("test.metrics", "bump"), before + 2);
    }

    #[test]
    fn test_counter_unknown_is_zero() {
        assert_eq!(category_counter_value("test.metrics", "never_touched"), 0);
    }

    #[test]
    fn test_timer_fork_shares_start() {
        let timer = LatencyTimer::new("op");
        std::thread::sleep(Duration::from_millis(5));
        let mut fork = timer.fork();
        assert!(fork.elapsed() >= Duration::from_millis(5));
        assert!(!fork.is_canceled());
        fork.cancel();
        assert!(fork.is_canceled());
    }
}
