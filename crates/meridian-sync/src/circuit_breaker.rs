use std::time::{Duration, Instant};

/// Per-remote-endpoint circuit breaker (spec §4.5 "Remote endpoint
/// unreachable: circuit breaker opens after `threshold` consecutive
/// failures, closes after cooldown; polling pauses while open").
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Whether a poll should be attempted right now. Transitions the
    /// breaker closed automatically once the cooldown has elapsed.
    pub fn should_attempt(&mut self) -> bool {
        match self.opened_at {
            Some(opened) if opened.elapsed() >= self.cooldown => {
                self.opened_at = None;
                self.consecutive_failures = 0;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold && self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(cb.should_attempt());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.should_attempt());
    }

    #[test]
    fn success_resets_failure_count() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
    }

    #[test]
    fn closes_after_cooldown_elapses() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.should_attempt());
        assert!(!cb.is_open());
    }
}
