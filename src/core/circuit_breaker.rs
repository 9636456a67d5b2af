use chrono::{DateTime, Utc};

/// Three-state latch used to short-circuit requests to a repeatedly-failing
/// endpoint. Structurally the same shape as the teacher's
/// `services::rpc::circuit_breaker::CircuitBreaker` (state, counters,
/// opened-at timestamp, transition helpers with `tracing` logs), but the
/// open-transition trigger here is a fixed consecutive-failure count rather
/// than a rolling failure rate, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the `gateway_rpc_circuit_breaker_state`
    /// gauge (0=closed, 1=half-open, 2=open).
    pub fn as_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
    open_threshold: u32,
    retry_after: chrono::Duration,
}

const OPEN_THRESHOLD: u32 = 3;
const RETRY_AFTER_SECS: i64 = 30;

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            next_retry_time: None,
            open_threshold: OPEN_THRESHOLD,
            retry_after: chrono::Duration::seconds(RETRY_AFTER_SECS),
        }
    }
}

impl CircuitBreaker {
    /// Mutating check: if open and the retry deadline has passed, transition
    /// to half-open and allow the request through.
    pub fn check_and_allow(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.next_retry_time.map(|t| now >= t).unwrap_or(false) {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker half-open: testing recovery");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.next_retry_time = None;
                tracing::info!("circuit breaker closed: endpoint recovered");
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        match self.state {
            CircuitState::HalfOpen => {
                self.open(now);
            }
            CircuitState::Closed => {
                if self.consecutive_failures >= self.open_threshold {
                    self.open(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.next_retry_time = Some(now + self.retry_after);
        tracing::warn!(
            consecutive_failures = self.consecutive_failures,
            "circuit breaker opened"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_three_consecutive_failures() {
        let mut cb = CircuitBreaker::default();
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state, CircuitState::Closed);
        cb.record_failure(now);
        assert_eq!(cb.state, CircuitState::Open);
    }

    #[test]
    fn half_open_only_after_retry_deadline() {
        let mut cb = CircuitBreaker::default();
        let t0 = Utc::now();
        for _ in 0..3 {
            cb.record_failure(t0);
        }
        assert!(!cb.check_and_allow(t0));
        let later = t0 + chrono::Duration::seconds(31);
        assert!(cb.check_and_allow(later));
        assert_eq!(cb.state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_failure_reopens() {
        let mut cb = CircuitBreaker::default();
        let t0 = Utc::now();
        for _ in 0..3 {
            cb.record_failure(t0);
        }
        cb.check_and_allow(t0 + chrono::Duration::seconds(31));
        cb.record_success();
        assert_eq!(cb.state, CircuitState::Closed);

        for _ in 0..3 {
            cb.record_failure(t0);
        }
        cb.check_and_allow(t0 + chrono::Duration::seconds(31));
        cb.record_failure(t0 + chrono::Duration::seconds(31));
        assert_eq!(cb.state, CircuitState::Open);
        assert!(cb.next_retry_time.unwrap() > t0 + chrono::Duration::seconds(31));
    }

    #[test]
    fn success_resets_consecutive_failures_in_closed_state() {
        let mut cb = CircuitBreaker::default();
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_success();
        assert_eq!(cb.consecutive_failures, 0);
        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state, CircuitState::Closed);
    }
}
