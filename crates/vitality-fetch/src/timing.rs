//! Adaptive per-origin timeouts and the blocked-origin cool-down.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TIMEOUT_FLOOR_MS: u64 = 5_000;
const TIMEOUT_CEILING_MS: u64 = 45_000;
const SAMPLE_WINDOW: usize = 50;
const TIMEOUTS_BEFORE_PIN: u32 = 3;

struct OriginStats {
    samples: VecDeque<u64>,
    consecutive_timeouts: u32,
    pinned_until: Option<Instant>,
}

impl OriginStats {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            consecutive_timeouts: 0,
            pinned_until: None,
        }
    }

    fn p90(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.9).ceil() as usize;
        Some(sorted[idx.saturating_sub(1).min(sorted.len() - 1)])
    }
}

/// Tracks successful response times per origin and derives the request
/// timeout: `clamp(max(5000, p90 * 3), 5000, 45000)`. Three consecutive
/// timeouts pin the origin at the ceiling for a fixed window.
pub struct ResponseTracker {
    pin_window: Duration,
    stats: Mutex<HashMap<String, OriginStats>>,
}

impl ResponseTracker {
    pub fn new(pin_window: Duration) -> Self {
        Self {
            pin_window,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, origin: &str, elapsed_ms: u64) {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats
            .entry(origin.to_string())
            .or_insert_with(OriginStats::new);
        if entry.samples.len() == SAMPLE_WINDOW {
            entry.samples.pop_front();
        }
        entry.samples.push_back(elapsed_ms);
        entry.consecutive_timeouts = 0;
    }

    pub fn record_timeout(&self, origin: &str) {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats
            .entry(origin.to_string())
            .or_insert_with(OriginStats::new);
        entry.consecutive_timeouts += 1;
        if entry.consecutive_timeouts >= TIMEOUTS_BEFORE_PIN {
            entry.pinned_until = Some(Instant::now() + self.pin_window);
        }
    }

    pub fn timeout_for(&self, origin: &str) -> Duration {
        let stats = self.stats.lock().unwrap();
        let Some(entry) = stats.get(origin) else {
            return Duration::from_millis(TIMEOUT_FLOOR_MS);
        };
        if let Some(until) = entry.pinned_until {
            if Instant::now() < until {
                return Duration::from_millis(TIMEOUT_CEILING_MS);
            }
        }
        let derived = entry
            .p90()
            .map(|p90| (p90.saturating_mul(3)).max(TIMEOUT_FLOOR_MS))
            .unwrap_or(TIMEOUT_FLOOR_MS);
        Duration::from_millis(derived.clamp(TIMEOUT_FLOOR_MS, TIMEOUT_CEILING_MS))
    }
}

/// Short-lived in-memory cool-down for origins that blocked us. Subsequent
/// requests short-circuit with `Blocked` until the entry expires.
pub struct BlockedCooldown {
    ttl: Duration,
    origins: Mutex<HashMap<String, Instant>>,
}

impl BlockedCooldown {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            origins: Mutex::new(HashMap::new()),
        }
    }

    pub fn mark(&self, origin: &str) {
        self.origins
            .lock()
            .unwrap()
            .insert(origin.to_string(), Instant::now() + self.ttl);
    }

    pub fn is_cooling(&self, origin: &str) -> bool {
        let mut origins = self.origins.lock().unwrap();
        match origins.get(origin) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                origins.remove(origin);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_origin_gets_floor_timeout() {
        let tracker = ResponseTracker::new(Duration::from_secs(600));
        assert_eq!(
            tracker.timeout_for("new.example"),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn slow_origin_scales_to_p90_times_three() {
        let tracker = ResponseTracker::new(Duration::from_secs(600));
        for _ in 0..10 {
            tracker.record_success("slow.example", 4_000);
        }
        assert_eq!(
            tracker.timeout_for("slow.example"),
            Duration::from_millis(12_000)
        );
    }

    #[test]
    fn timeout_is_clamped_to_ceiling() {
        let tracker = ResponseTracker::new(Duration::from_secs(600));
        for _ in 0..10 {
            tracker.record_success("glacial.example", 30_000);
        }
        assert_eq!(
            tracker.timeout_for("glacial.example"),
            Duration::from_millis(45_000)
        );
    }

    #[test]
    fn three_timeouts_pin_the_ceiling() {
        let tracker = ResponseTracker::new(Duration::from_secs(600));
        tracker.record_success("flaky.example", 100);
        for _ in 0..3 {
            tracker.record_timeout("flaky.example");
        }
        assert_eq!(
            tracker.timeout_for("flaky.example"),
            Duration::from_millis(45_000)
        );
    }

    #[test]
    fn success_resets_the_timeout_streak() {
        let tracker = ResponseTracker::new(Duration::from_secs(600));
        tracker.record_timeout("x.example");
        tracker.record_timeout("x.example");
        tracker.record_success("x.example", 100);
        tracker.record_timeout("x.example");
        assert_eq!(
            tracker.timeout_for("x.example"),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn cooldown_expires() {
        let cooldown = BlockedCooldown::new(Duration::from_millis(20));
        cooldown.mark("blocked.example");
        assert!(cooldown.is_cooling("blocked.example"));
        assert!(!cooldown.is_cooling("other.example"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(!cooldown.is_cooling("blocked.example"));
    }
}
