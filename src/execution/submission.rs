use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SubmissionConfig;
use crate::error::SubmitError;
use crate::exchange::{classify_response, ExchangeOutcome, RawResponse};

/// Per-call inputs to `submit`. Market/token ids scope the balance and
/// market cooldowns; the fingerprint drives duplicate suppression.
#[derive(Debug, Clone, Default)]
pub struct SubmitParams {
    pub size_usd: Decimal,
    pub market_id: Option<String>,
    pub token_id: Option<String>,
    pub order_fingerprint: Option<String>,
}

/// Result of one `submit` call, preflight rejections included.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub success: bool,
    pub order_id: Option<String>,
    pub code: Option<String>,
    pub reason: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Whether the engine may retry within the same execution attempt
    pub retryable: bool,
}

impl SubmissionOutcome {
    fn accepted(order_id: String) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            code: None,
            reason: None,
            cooldown_until: None,
            retryable: false,
        }
    }

    fn blocked(code: &str, reason: String, until: Option<DateTime<Utc>>) -> Self {
        Self {
            success: false,
            order_id: None,
            code: Some(code.to_string()),
            reason: Some(reason),
            cooldown_until: until,
            retryable: false,
        }
    }

    fn retryable(code: &str, reason: String) -> Self {
        Self {
            success: false,
            order_id: None,
            code: Some(code.to_string()),
            reason: Some(reason),
            cooldown_until: None,
            retryable: true,
        }
    }
}

struct SubmissionState {
    last_submission_at: Option<DateTime<Utc>>,
    /// Wire-call timestamps within the rolling hour
    submission_times: VecDeque<DateTime<Utc>>,
    market_cooldowns: HashMap<String, DateTime<Utc>>,
    /// Keyed "market:token"; armed by balance/allowance rejections
    balance_cooldowns: HashMap<String, DateTime<Utc>>,
    /// Fingerprint -> suppressed until
    fingerprints: HashMap<String, DateTime<Utc>>,
    upstream_block_until: Option<DateTime<Utc>>,
    auth_block_until: Option<DateTime<Utc>>,
    /// Correlation ids already logged at warn level
    logged_block_ids: HashSet<String>,
}

/// Rate-limits submissions and classifies wire responses into cooldowns.
///
/// One instance per risk domain, owned by the orchestrator and shared by
/// reference with every component that submits.
pub struct SubmissionController {
    config: SubmissionConfig,
    state: Mutex<SubmissionState>,
}

impl SubmissionController {
    pub fn new(config: SubmissionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SubmissionState {
                last_submission_at: None,
                submission_times: VecDeque::new(),
                market_cooldowns: HashMap::new(),
                balance_cooldowns: HashMap::new(),
                fingerprints: HashMap::new(),
                upstream_block_until: None,
                auth_block_until: None,
                logged_block_ids: HashSet::new(),
            }),
        }
    }

    /// Gate and execute one wire submission. `place_order` runs only when
    /// every preflight check passes; its response is classified here and
    /// nowhere else.
    pub async fn submit<F, Fut>(&self, params: SubmitParams, place_order: F) -> SubmissionOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<RawResponse>>,
    {
        let now = Utc::now();

        {
            let mut state = self.state.lock().await;
            if let Some(outcome) = self.preflight(&mut state, &params, now) {
                debug!(code = ?outcome.code, "Submission blocked in preflight");
                return outcome;
            }
        }

        let response = place_order().await;

        let mut state = self.state.lock().await;
        let now = Utc::now();

        // Every wire call counts toward the rolling hourly cap, failed
        // or not
        state.submission_times.push_back(now);

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return SubmissionOutcome::retryable("NETWORK_ERROR", e.to_string());
            }
        };

        let outcome = classify_response(&response, &self.config.classifier);

        // Only a terminal outcome paces the pipeline. A retryable failure
        // must leave the interval and market gates open for the caller's
        // own backoff retry
        if !matches!(outcome, ExchangeOutcome::Rejected { .. }) {
            state.last_submission_at = Some(now);
            if let Some(market_id) = &params.market_id {
                state.market_cooldowns.insert(
                    market_id.clone(),
                    now + Duration::milliseconds(self.config.market_cooldown_ms as i64),
                );
            }
        }

        match outcome {
            ExchangeOutcome::Accepted { order_id } => {
                if let Some(fp) = &params.order_fingerprint {
                    state.fingerprints.insert(
                        fp.clone(),
                        now + Duration::milliseconds(self.config.market_cooldown_ms as i64),
                    );
                }
                info!(order_id = %order_id, "Order accepted by exchange");
                SubmissionOutcome::accepted(order_id)
            }
            ExchangeOutcome::UpstreamBlocked { correlation_id } => {
                let until = now + Duration::seconds(self.config.block_cooldown_secs as i64);
                state.upstream_block_until = Some(until);
                self.log_block(&mut state, correlation_id.as_deref(), until);
                SubmissionOutcome::blocked(
                    "CLOUDFLARE_BLOCK",
                    format!(
                        "{} (correlation id {})",
                        SubmitError::UpstreamBlocked { until },
                        correlation_id.as_deref().unwrap_or("unknown")
                    ),
                    Some(until),
                )
            }
            ExchangeOutcome::Unauthorized => {
                let until = now + Duration::seconds(self.config.auth_cooldown_secs as i64);
                state.auth_block_until = Some(until);
                warn!(until = %until, "Authentication failure, pausing submissions");
                SubmissionOutcome::blocked(
                    "AUTH_UNAUTHORIZED",
                    SubmitError::AuthCooldown { until }.to_string(),
                    Some(until),
                )
            }
            ExchangeOutcome::InsufficientBalance { reason } => {
                let until = now + Duration::seconds(self.config.balance_cooldown_secs as i64);
                let key = balance_key(&params);
                warn!(key = %key, until = %until, "Balance/allowance rejection");
                state.balance_cooldowns.insert(key, until);
                SubmissionOutcome::blocked("INSUFFICIENT_BALANCE", reason, Some(until))
            }
            ExchangeOutcome::Rejected { status, reason } => {
                debug!(status, reason = %reason, "Order not accepted");
                SubmissionOutcome::retryable("NOT_ACCEPTED", format!("HTTP {status}: {reason}"))
            }
        }
    }

    /// Preflight checks, in order. Returns the first failure, if any.
    fn preflight(
        &self,
        state: &mut SubmissionState,
        params: &SubmitParams,
        now: DateTime<Utc>,
    ) -> Option<SubmissionOutcome> {
        if params.size_usd < self.config.min_size_usd {
            return Some(SubmissionOutcome::blocked(
                "ORDER_TOO_SMALL",
                format!(
                    "size {} below minimum {}",
                    params.size_usd, self.config.min_size_usd
                ),
                None,
            ));
        }

        let key = balance_key(params);
        if let Some(&until) = state.balance_cooldowns.get(&key) {
            if now < until {
                return Some(SubmissionOutcome::blocked(
                    "INSUFFICIENT_BALANCE",
                    format!("balance cooldown for {key}"),
                    Some(until),
                ));
            }
        }

        if let Some(until) = state.upstream_block_until {
            if now < until {
                return Some(SubmissionOutcome::blocked(
                    "CLOUDFLARE_BLOCK",
                    "upstream block cooldown active".to_string(),
                    Some(until),
                ));
            }
        }

        if let Some(until) = state.auth_block_until {
            if now < until {
                return Some(SubmissionOutcome::blocked(
                    "AUTH_UNAUTHORIZED",
                    "authentication cooldown active".to_string(),
                    Some(until),
                ));
            }
        }

        if let Some(fp) = &params.order_fingerprint {
            if let Some(&until) = state.fingerprints.get(fp) {
                if now < until {
                    // Re-arm with jitter so herds of identical retries
                    // spread out instead of re-colliding
                    let base_ms = self.config.market_cooldown_ms as f64;
                    let jittered = base_ms * rand::thread_rng().gen_range(0.8..=1.2);
                    let new_until = now + Duration::milliseconds(jittered as i64);
                    state.fingerprints.insert(fp.clone(), new_until);
                    return Some(SubmissionOutcome::blocked(
                        "DUPLICATE_ORDER",
                        "identical order suppressed".to_string(),
                        Some(new_until),
                    ));
                }
            }
        }

        if let Some(last) = state.last_submission_at {
            let min_gap = Duration::milliseconds(self.config.min_interval_ms as i64);
            if now - last < min_gap {
                return Some(SubmissionOutcome::blocked(
                    "RATE_LIMIT_INTERVAL",
                    format!("minimum interval {}ms not elapsed", self.config.min_interval_ms),
                    Some(last + min_gap),
                ));
            }
        }

        let hour_ago = now - Duration::hours(1);
        while state
            .submission_times
            .front()
            .map_or(false, |&t| t < hour_ago)
        {
            state.submission_times.pop_front();
        }
        if state.submission_times.len() >= self.config.max_per_hour as usize {
            let until = state
                .submission_times
                .front()
                .map(|&t| t + Duration::hours(1));
            return Some(SubmissionOutcome::blocked(
                "RATE_LIMIT_HOURLY",
                SubmitError::RateLimited(format!(
                    "{} submissions in the last hour",
                    state.submission_times.len()
                ))
                .to_string(),
                until,
            ));
        }

        if let Some(market_id) = &params.market_id {
            if let Some(&until) = state.market_cooldowns.get(market_id) {
                if now < until {
                    return Some(SubmissionOutcome::blocked(
                        "MARKET_COOLDOWN",
                        format!("market {market_id} in cooldown"),
                        Some(until),
                    ));
                }
            }
        }

        None
    }

    /// Upstream blocks repeat in bursts; the first sighting of a
    /// correlation id is loud, repeats are not.
    fn log_block(
        &self,
        state: &mut SubmissionState,
        correlation_id: Option<&str>,
        until: DateTime<Utc>,
    ) {
        let id = correlation_id.unwrap_or("unknown");
        if state.logged_block_ids.insert(id.to_string()) {
            warn!(
                correlation_id = %id,
                until = %until,
                "Upstream block detected, pausing all submissions"
            );
        } else {
            debug!(correlation_id = %id, "Upstream block repeat");
        }
        if state.logged_block_ids.len() > 100 {
            state.logged_block_ids.clear();
        }
    }

    /// Copy the controller's persistable fields into a snapshot.
    pub async fn export_snapshot(&self, snapshot: &mut crate::persistence::StateSnapshot) {
        let state = self.state.lock().await;
        snapshot.market_cooldowns = state.market_cooldowns.clone();
        snapshot.recent_trades = state.submission_times.iter().copied().collect();
    }

    /// Seed a fresh controller from a persisted snapshot, so market
    /// cooldowns and the rolling hourly window survive a restart.
    pub async fn restore_snapshot(&self, snapshot: &crate::persistence::StateSnapshot) {
        let mut state = self.state.lock().await;
        state.market_cooldowns = snapshot.market_cooldowns.clone();
        state.submission_times = snapshot.recent_trades.iter().copied().collect();
    }

    /// Drop expired cooldown entries. Called once per orchestrator tick.
    pub async fn prune_expired(&self) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.market_cooldowns.retain(|_, &mut until| now < until);
        state.balance_cooldowns.retain(|_, &mut until| now < until);
        state.fingerprints.retain(|_, &mut until| now < until);
        if state.upstream_block_until.map_or(false, |u| now >= u) {
            state.upstream_block_until = None;
        }
        if state.auth_block_until.map_or(false, |u| now >= u) {
            state.auth_block_until = None;
        }
    }
}

fn balance_key(params: &SubmitParams) -> String {
    format!(
        "{}:{}",
        params.market_id.as_deref().unwrap_or("-"),
        params.token_id.as_deref().unwrap_or("-")
    )
}
