use crate::config::RestartConfig;
use std::time::{Duration, SystemTime};

/// Automatic restart policy applied to crashed services
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether crashed services are restarted at all
    pub enabled: bool,
    /// Maximum number of restarts within the time window
    pub max_restarts: usize,
    /// Sliding window for counting restarts (in seconds)
    pub window_secs: u64,
    /// Delay before the first restart (in seconds)
    pub initial_delay_secs: u64,
    pub backoff: Backoff,
}

impl RestartPolicy {
    /// Policy that never restarts anything
    pub fn disabled() -> Self {
        Self::from_config(&RestartConfig::default())
    }

    pub fn from_config(config: &RestartConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_restarts: config.max_restarts,
            window_secs: config.window_secs,
            initial_delay_secs: config.delay_secs,
            backoff: Backoff::Exponential {
                max_delay_secs: config.max_delay_secs,
            },
        }
    }

    /// Check if another restart is allowed given the restart history
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        if !self.enabled {
            return false;
        }

        tracker.count_recent_restarts(self.window_secs) < self.max_restarts
    }

    /// Delay before the next restart attempt
    pub fn delay(&self, tracker: &RestartTracker) -> Duration {
        let recent = tracker.count_recent_restarts(self.window_secs);
        self.backoff.delay(self.initial_delay_secs, recent)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Backoff strategy for restart delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    /// initial * 2^attempt, capped
    Exponential { max_delay_secs: u64 },
}

impl Backoff {
    pub fn delay(&self, initial_delay_secs: u64, attempt: usize) -> Duration {
        match self {
            Backoff::Fixed => Duration::from_secs(initial_delay_secs),
            Backoff::Exponential { max_delay_secs } => {
                let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
                let delay_secs = initial_delay_secs
                    .saturating_mul(2_u64.saturating_pow(exponent))
                    .min(*max_delay_secs);
                Duration::from_secs(delay_secs)
            }
        }
    }
}

/// Restart history of one service, kept across its process records
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    restart_times: Vec<SystemTime>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_restart(&mut self) {
        self.record_restart_at(SystemTime::now());
    }

    pub fn record_restart_at(&mut self, at: SystemTime) {
        self.restart_times.push(at);
    }

    /// Total restarts recorded since the tracker was created
    pub fn restart_count(&self) -> usize {
        self.restart_times.len()
    }

    /// Count restarts within the given window (in seconds)
    pub fn count_recent_restarts(&self, window_secs: u64) -> usize {
        let now = SystemTime::now();
        let window = Duration::from_secs(window_secs);

        self.restart_times
            .iter()
            .filter(|&&time| {
                now.duration_since(time)
                    .map(|d| d < window)
                    .unwrap_or(true)
            })
            .count()
    }

    pub fn last_restart_time(&self) -> Option<SystemTime> {
        self.restart_times.last().copied()
    }

    /// Drop history older than the window so the tracker stays small
    pub fn prune(&mut self, window_secs: u64) {
        let now = SystemTime::now();
        let window = Duration::from_secs(window_secs);

        self.restart_times.retain(|&time| {
            now.duration_since(time)
                .map(|d| d < window)
                .unwrap_or(true)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(max_restarts: usize, delay_secs: u64) -> RestartPolicy {
        RestartPolicy::from_config(&RestartConfig {
            enabled: true,
            max_restarts,
            window_secs: 300,
            delay_secs,
            max_delay_secs: 60,
        })
    }

    #[test]
    fn test_disabled_policy_never_restarts() {
        let policy = RestartPolicy::disabled();
        assert!(!policy.should_restart(&RestartTracker::new()));
    }

    #[test]
    fn test_should_restart_until_limit() {
        let policy = enabled(3, 1);
        let mut tracker = RestartTracker::new();

        assert!(policy.should_restart(&tracker));
        tracker.record_restart();
        assert!(policy.should_restart(&tracker));
        tracker.record_restart();
        assert!(policy.should_restart(&tracker));
        tracker.record_restart();
        assert!(!policy.should_restart(&tracker));
    }

    #[test]
    fn test_old_restarts_fall_out_of_window() {
        let policy = enabled(1, 1);
        let mut tracker = RestartTracker::new();
        tracker.record_restart_at(SystemTime::now() - Duration::from_secs(600));

        assert_eq!(tracker.count_recent_restarts(300), 0);
        assert!(policy.should_restart(&tracker));

        tracker.prune(300);
        assert_eq!(tracker.restart_count(), 0);
    }

    #[test]
    fn test_backoff_fixed() {
        let backoff = Backoff::Fixed;
        assert_eq!(backoff.delay(5, 0), Duration::from_secs(5));
        assert_eq!(backoff.delay(5, 10), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = Backoff::Exponential { max_delay_secs: 60 };
        assert_eq!(backoff.delay(1, 0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1, 1), Duration::from_secs(2));
        assert_eq!(backoff.delay(1, 3), Duration::from_secs(8));
        // 1 * 2^6 = 64, capped at 60
        assert_eq!(backoff.delay(1, 6), Duration::from_secs(60));
        assert_eq!(backoff.delay(1, 100), Duration::from_secs(60));
    }

    #[test]
    fn test_policy_delay_grows_with_history() {
        let policy = enabled(10, 1);
        let mut tracker = RestartTracker::new();

        assert_eq!(policy.delay(&tracker), Duration::from_secs(1));
        tracker.record_restart();
        assert_eq!(policy.delay(&tracker), Duration::from_secs(2));
        tracker.record_restart();
        assert_eq!(policy.delay(&tracker), Duration::from_secs(4));
    }
}
