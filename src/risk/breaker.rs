use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::RiskError;

/// Snapshot of the circuit breaker, as exposed by `RiskManager::get_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub triggered: bool,
    pub reason: Option<String>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub resume_at: Option<DateTime<Utc>>,
    pub consecutive_rejects: u32,
    pub consecutive_api_errors: u32,
}

/// Global trading halt.
///
/// Two states: OK and TRIGGERED. Triggering stamps `resume_at`; the breaker
/// resets itself the first time it is consulted at or after that instant,
/// or immediately on a forced reset.
///
/// Not internally synchronized. The owning `RiskManager` mutates it under
/// its own lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_consecutive_rejects: u32,
    max_consecutive_api_errors: u32,
    max_api_unhealthy: Duration,
    cooldown: Duration,

    triggered: bool,
    reason: Option<String>,
    triggered_at: Option<DateTime<Utc>>,
    resume_at: Option<DateTime<Utc>>,
    consecutive_rejects: u32,
    consecutive_api_errors: u32,
    api_unhealthy_since: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(
        max_consecutive_rejects: u32,
        max_consecutive_api_errors: u32,
        max_api_unhealthy_secs: u64,
        cooldown_secs: u64,
    ) -> Self {
        Self {
            max_consecutive_rejects,
            max_consecutive_api_errors,
            max_api_unhealthy: Duration::seconds(max_api_unhealthy_secs as i64),
            cooldown: Duration::seconds(cooldown_secs as i64),
            triggered: false,
            reason: None,
            triggered_at: None,
            resume_at: None,
            consecutive_rejects: 0,
            consecutive_api_errors: 0,
            api_unhealthy_since: None,
        }
    }

    /// Whether trading is currently blocked. Auto-resets once `resume_at`
    /// has passed, so a call at or after that instant reports OK.
    pub fn is_triggered(&mut self, now: DateTime<Utc>) -> bool {
        if self.triggered {
            if let Some(resume_at) = self.resume_at {
                if now >= resume_at {
                    info!("Circuit breaker cooldown elapsed, resuming trading");
                    self.reset();
                    return false;
                }
            }
            return true;
        }
        false
    }

    pub fn trip(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        let resume_at = now + self.cooldown;
        error!(
            reason = %reason,
            resume_at = %resume_at,
            "CIRCUIT BREAKER TRIGGERED: all trading halted"
        );
        self.triggered = true;
        self.reason = Some(reason);
        self.triggered_at = Some(now);
        self.resume_at = Some(resume_at);
    }

    /// Manual operator reset, effective immediately.
    pub fn force_reset(&mut self) {
        info!("Circuit breaker force-reset by operator");
        self.reset();
    }

    fn reset(&mut self) {
        self.triggered = false;
        self.reason = None;
        self.triggered_at = None;
        self.resume_at = None;
        self.consecutive_rejects = 0;
        self.consecutive_api_errors = 0;
        self.api_unhealthy_since = None;
    }

    /// Record a terminal order rejection. Trips at the configured streak.
    pub fn record_reject(&mut self, now: DateTime<Utc>) {
        self.consecutive_rejects += 1;
        if self.consecutive_rejects >= self.max_consecutive_rejects && !self.triggered {
            self.trip(
                RiskError::ConsecutiveRejects {
                    count: self.consecutive_rejects,
                    threshold: self.max_consecutive_rejects,
                }
                .to_string(),
                now,
            );
        }
    }

    /// A successful order clears the rejection streak.
    pub fn record_success(&mut self) {
        self.consecutive_rejects = 0;
    }

    /// Carry a rejection streak over from a persisted snapshot. Does not
    /// trip; the next reject re-checks the threshold.
    pub fn restore_rejects(&mut self, count: u32) {
        self.consecutive_rejects = count;
    }

    /// Feed an API health report. Trips on an error streak or on a
    /// sustained unhealthy window.
    pub fn record_api_health(&mut self, healthy: bool, now: DateTime<Utc>) {
        if healthy {
            self.consecutive_api_errors = 0;
            self.api_unhealthy_since = None;
            return;
        }

        self.consecutive_api_errors += 1;
        let unhealthy_since = *self.api_unhealthy_since.get_or_insert(now);

        if self.triggered {
            return;
        }

        if self.consecutive_api_errors >= self.max_consecutive_api_errors {
            self.trip(
                format!("{} consecutive API errors", self.consecutive_api_errors),
                now,
            );
        } else if now - unhealthy_since >= self.max_api_unhealthy {
            self.trip(
                format!(
                    "API unhealthy for {}s",
                    (now - unhealthy_since).num_seconds()
                ),
                now,
            );
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            triggered: self.triggered,
            reason: self.reason.clone(),
            triggered_at: self.triggered_at,
            resume_at: self.resume_at,
            consecutive_rejects: self.consecutive_rejects,
            consecutive_api_errors: self.consecutive_api_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, 3, 120, 300)
    }

    #[test]
    fn test_trips_on_consecutive_rejects() {
        let mut cb = breaker();
        let now = Utc::now();
        cb.record_reject(now);
        cb.record_reject(now);
        assert!(!cb.is_triggered(now));
        cb.record_reject(now);
        assert!(cb.is_triggered(now));
        assert_eq!(cb.snapshot().resume_at, Some(now + Duration::seconds(300)));
    }

    #[test]
    fn test_success_clears_reject_streak() {
        let mut cb = breaker();
        let now = Utc::now();
        cb.record_reject(now);
        cb.record_reject(now);
        cb.record_success();
        cb.record_reject(now);
        assert!(!cb.is_triggered(now));
    }

    #[test]
    fn test_auto_reset_after_resume_at() {
        let mut cb = breaker();
        let now = Utc::now();
        cb.trip("test", now);
        assert!(cb.is_triggered(now + Duration::seconds(299)));
        assert!(!cb.is_triggered(now + Duration::seconds(300)));
        // counters cleared on reset
        assert_eq!(cb.snapshot().consecutive_rejects, 0);
    }

    #[test]
    fn test_trips_on_api_error_streak() {
        let mut cb = breaker();
        let now = Utc::now();
        cb.record_api_health(false, now);
        cb.record_api_health(false, now);
        cb.record_api_health(false, now);
        assert!(cb.is_triggered(now));
    }

    #[test]
    fn test_trips_on_sustained_unhealthy_window() {
        let mut cb = CircuitBreaker::new(3, 10, 120, 300);
        let now = Utc::now();
        cb.record_api_health(false, now);
        cb.record_api_health(false, now + Duration::seconds(121));
        assert!(cb.is_triggered(now + Duration::seconds(121)));
    }

    #[test]
    fn test_healthy_report_clears_unhealthy_window() {
        let mut cb = CircuitBreaker::new(3, 10, 120, 300);
        let now = Utc::now();
        cb.record_api_health(false, now);
        cb.record_api_health(true, now + Duration::seconds(60));
        cb.record_api_health(false, now + Duration::seconds(121));
        assert!(!cb.is_triggered(now + Duration::seconds(121)));
    }

    #[test]
    fn test_force_reset() {
        let mut cb = breaker();
        let now = Utc::now();
        cb.trip("manual test", now);
        cb.force_reset();
        assert!(!cb.is_triggered(now));
    }
}
