use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open { opened_at: DateTime<Utc> },
    /// Cooldown elapsed; cycles run again with the counter reset
    HalfOpen,
}

/// What a recorded failure did to the circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Below the threshold: back off briefly and retry
    Backoff { consecutive_failures: u32 },
    /// The circuit just opened
    Opened { consecutive_failures: u32 },
}

/// Consecutive-failure circuit breaker for the settlement cycle.
///
/// Opens on exactly the `threshold`-th consecutive failure and stays open for
/// `cooldown`. After that the counter restarts from zero and cycles run again:
/// a success closes it and a failure is failure 1 of a new run.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    state: BreakerState,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            state: BreakerState::Closed,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a cycle may run at `now`. An open circuit whose cooldown has
    /// elapsed moves to half-open with the failure count reset.
    pub fn allow(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Open { opened_at } => {
                if now - opened_at >= self.cooldown {
                    self.state = BreakerState::HalfOpen;
                    self.consecutive_failures = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::Closed | BreakerState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) -> FailureOutcome {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.threshold {
            self.state = BreakerState::Open { opened_at: now };
            FailureOutcome::Opened {
                consecutive_failures: self.consecutive_failures,
            }
        } else {
            self.state = BreakerState::Closed;
            FailureOutcome::Backoff {
                consecutive_failures: self.consecutive_failures,
            }
        }
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            BreakerState::Open { opened_at } => Some(opened_at),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_opens_exactly_on_threshold() {
        let mut breaker = CircuitBreaker::new(5, Duration::minutes(5));

        for n in 1..5 {
            assert_eq!(
                breaker.record_failure(t0()),
                FailureOutcome::Backoff { consecutive_failures: n }
            );
            assert_eq!(breaker.state(), BreakerState::Closed);
        }

        assert_eq!(
            breaker.record_failure(t0()),
            FailureOutcome::Opened { consecutive_failures: 5 }
        );
        assert_eq!(breaker.opened_at(), Some(t0()));
    }

    #[test]
    fn test_success_resets_the_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::minutes(5));
        breaker.record_failure(t0());
        breaker.record_failure(t0());
        breaker.record_success();

        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(matches!(breaker.record_failure(t0()), FailureOutcome::Backoff { .. }));
    }

    #[test]
    fn test_stays_open_until_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::minutes(5));
        breaker.record_failure(t0());

        assert!(!breaker.allow(t0() + Duration::minutes(4)));
        assert!(matches!(breaker.state(), BreakerState::Open { .. }));

        assert!(breaker.allow(t0() + Duration::minutes(5)));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_failure_after_cooldown_starts_a_new_count() {
        let mut breaker = CircuitBreaker::new(5, Duration::minutes(5));
        for _ in 0..5 {
            breaker.record_failure(t0());
        }
        let later = t0() + Duration::minutes(6);
        assert!(breaker.allow(later));

        assert_eq!(
            breaker.record_failure(later),
            FailureOutcome::Backoff { consecutive_failures: 1 }
        );
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow(later + Duration::minutes(1)));

        for n in 2..5 {
            assert_eq!(
                breaker.record_failure(later),
                FailureOutcome::Backoff { consecutive_failures: n }
            );
        }
        assert_eq!(
            breaker.record_failure(later),
            FailureOutcome::Opened { consecutive_failures: 5 }
        );
    }

    #[test]
    fn test_success_after_cooldown_closes() {
        let mut breaker = CircuitBreaker::new(2, Duration::minutes(5));
        breaker.record_failure(t0());
        breaker.record_failure(t0());
        assert!(breaker.allow(t0() + Duration::minutes(5)));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
