//! # Keyed log throttle.
//!
//! Background intervals tick every few seconds and would flood the log with
//! identical "skipping" lines. [`LogThrottle`] answers one question: has the
//! given key been allowed within the last `window`? Call sites gate their
//! log statements on [`LogThrottle::allow`].
//!
//! One throttle instance lives on the
//! [`SchedulerContext`](crate::SchedulerContext); keys are plain strings such
//! as `"disabled:Worker.produce"` or `"paused:Worker"`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter for repeated log lines, keyed by string.
pub struct LogThrottle {
    last: Mutex<HashMap<String, Instant>>,
}

impl LogThrottle {
    /// Creates an empty throttle.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `key` has not been allowed within the last `window`,
    /// and records the current instant for it.
    ///
    /// The first call for any key always returns `true`.
    pub fn allow(&self, key: &str, window: Duration) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap();
        match last.get(key) {
            Some(prev) if now.duration_since(*prev) < window => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_is_allowed() {
        let throttle = LogThrottle::new();
        assert!(throttle.allow("k", Duration::from_secs(60)));
    }

    #[test]
    fn test_second_call_within_window_is_suppressed() {
        let throttle = LogThrottle::new();
        assert!(throttle.allow("k", Duration::from_secs(60)));
        assert!(!throttle.allow("k", Duration::from_secs(60)));
    }

    #[test]
    fn test_keys_are_independent() {
        let throttle = LogThrottle::new();
        assert!(throttle.allow("a", Duration::from_secs(60)));
        assert!(throttle.allow("b", Duration::from_secs(60)));
    }

    #[test]
    fn test_allowed_again_after_window() {
        let throttle = LogThrottle::new();
        assert!(throttle.allow("k", Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.allow("k", Duration::from_millis(10)));
    }
}
