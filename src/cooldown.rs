//! Per-(room, label) suppression window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default suppression window between two events for the same room and label.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CooldownKey {
    room: String,
    label: String,
}

impl CooldownKey {
    fn new(room: &str, label: &str) -> Self {
        Self {
            room: room.to_string(),
            label: label.trim().to_lowercase(),
        }
    }
}

/// Deduplicates repeated sightings of the same label in the same room.
///
/// One map shared by all workers behind a single mutex. The lock covers the
/// lookup and update only. Windows are measured on the monotonic clock, so
/// wall-clock steps (DST, NTP) neither extend nor shorten them.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_emitted: Mutex<HashMap<CooldownKey, Instant>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true and records `now` when the key is new or its last emission
    /// is more than one window old. Returns false without touching state otherwise.
    ///
    /// A `now` earlier than the recorded emission (a frame captured before one
    /// that another worker already recorded) counts as inside the window.
    pub fn should_emit(&self, room: &str, label: &str, now: Instant) -> bool {
        let key = CooldownKey::new(room, label);
        let mut last_emitted = self
            .last_emitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = last_emitted.get(&key) {
            let expired = match now.checked_duration_since(*last) {
                Some(elapsed) => elapsed > self.window,
                None => false,
            };
            if !expired {
                return false;
            }
        }
        last_emitted.insert(key, now);
        true
    }

    /// Last emission recorded for a key, if any.
    pub fn last_emitted(&self, room: &str, label: &str) -> Option<Instant> {
        let key = CooldownKey::new(room, label);
        self.last_emitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .copied()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock(Instant);

    impl Clock {
        fn new() -> Self {
            Clock(Instant::now())
        }

        fn at(&self, offset_s: u64) -> Instant {
            self.0 + Duration::from_secs(offset_s)
        }
    }

    #[test]
    fn second_sighting_inside_window_is_suppressed() {
        let clock = Clock::new();
        let tracker = CooldownTracker::new(Duration::from_secs(120));
        assert!(tracker.should_emit("lab", "cell phone", clock.at(0)));
        assert!(!tracker.should_emit("lab", "cell phone", clock.at(60)));
    }

    #[test]
    fn sighting_after_window_emits_again() {
        let clock = Clock::new();
        let tracker = CooldownTracker::new(Duration::from_secs(120));
        assert!(tracker.should_emit("lab", "cell phone", clock.at(0)));
        assert!(tracker.should_emit("lab", "cell phone", clock.at(130)));
    }

    #[test]
    fn exact_window_boundary_is_still_suppressed() {
        let clock = Clock::new();
        let tracker = CooldownTracker::new(Duration::from_secs(120));
        assert!(tracker.should_emit("lab", "phone", clock.at(0)));
        assert!(!tracker.should_emit("lab", "phone", clock.at(120)));
        assert!(tracker.should_emit("lab", "phone", clock.at(121)));
    }

    #[test]
    fn suppressed_call_does_not_extend_window() {
        let clock = Clock::new();
        let tracker = CooldownTracker::new(Duration::from_secs(120));
        assert!(tracker.should_emit("lab", "phone", clock.at(0)));
        assert!(!tracker.should_emit("lab", "phone", clock.at(100)));
        assert_eq!(tracker.last_emitted("lab", "phone"), Some(clock.at(0)));
        assert!(tracker.should_emit("lab", "phone", clock.at(130)));
    }

    #[test]
    fn keys_are_independent_per_room_and_label() {
        let clock = Clock::new();
        let tracker = CooldownTracker::new(Duration::from_secs(120));
        assert!(tracker.should_emit("lab", "phone", clock.at(0)));
        assert!(tracker.should_emit("office", "phone", clock.at(1)));
        assert!(tracker.should_emit("lab", "mobile phone", clock.at(2)));
        assert!(!tracker.should_emit("lab", "Phone", clock.at(3)));
    }

    #[test]
    fn out_of_order_capture_is_inside_window() {
        let clock = Clock::new();
        let tracker = CooldownTracker::new(Duration::from_secs(120));
        assert!(tracker.should_emit("lab", "phone", clock.at(500)));
        assert!(!tracker.should_emit("lab", "phone", clock.at(0)));
    }
}
