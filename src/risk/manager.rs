use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::RiskConfig;
use crate::error::RiskError;
use crate::domain::{
    OrderRequest, OrderResult, OrderSide, PositionState, RejectReason, TrackedPosition,
};
use crate::risk::breaker::{CircuitBreaker, CircuitBreakerState};
use crate::risk::cooldown::{CooldownKey, CooldownTable, InFlightTable};

/// Strategy id whose SELL orders bypass every gate once the position loss
/// exceeds the panic threshold. Liquidation must never be blocked.
pub const PANIC_STRATEGY_ID: &str = "PANIC_LIQUIDATION";

/// Admission-control verdict. Consumed once by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: String,
    pub reject: Option<RejectReason>,
    /// Reduced notional when a cap leaves a tradeable remainder
    pub adjusted_size_usd: Option<Decimal>,
    pub warnings: Vec<String>,
}

impl RiskDecision {
    fn approved(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
            reject: None,
            adjusted_size_usd: None,
            warnings: Vec::new(),
        }
    }

    fn rejected(reject: RejectReason, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            reject: Some(reject),
            adjusted_size_usd: None,
            warnings: Vec::new(),
        }
    }
}

/// Per-strategy disable flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitch {
    pub reason: String,
    pub killed_at: DateTime<Utc>,
}

/// Outcome of a PnL sanity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub token_id: String,
    pub reported_pnl: Decimal,
    pub executable_value: Decimal,
    pub expected_pnl: Decimal,
    pub discrepancy_pct: Decimal,
    pub flagged: bool,
    pub halted: bool,
}

/// Full state snapshot for operators and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStateSnapshot {
    pub total_exposure_usd: Decimal,
    pub exposure_by_market: HashMap<String, Decimal>,
    pub exposure_by_category: HashMap<String, Decimal>,
    pub circuit_breaker: CircuitBreakerState,
    pub halted_markets: Vec<String>,
    pub killed_strategies: Vec<String>,
    pub realized_pnl_usd: Decimal,
    pub open_positions: usize,
    pub active_cooldowns: usize,
    pub in_flight_locks: usize,
    pub global_kill: bool,
}

/// Everything the manager mutates, behind one lock so an evaluate call
/// sees a consistent view across exposure, cooldowns, locks and breaker.
struct RiskState {
    breaker: CircuitBreaker,
    cooldowns: CooldownTable,
    locks: InFlightTable,
    positions: HashMap<String, TrackedPosition>,
    total_exposure: Decimal,
    exposure_by_market: HashMap<String, Decimal>,
    exposure_by_category: HashMap<String, Decimal>,
    killed_strategies: HashMap<String, KillSwitch>,
    halted_markets: HashMap<String, String>,
    manual_kill: bool,
    realized_pnl: Decimal,
}

/// Admission-control gate. Every candidate order passes through
/// `evaluate` before the execution engine may touch the wire.
pub struct RiskManager {
    config: RiskConfig,
    state: RwLock<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.max_consecutive_rejects,
            config.max_consecutive_api_errors,
            config.max_api_unhealthy_secs,
            config.circuit_breaker_cooldown_secs,
        );
        let locks = InFlightTable::new(
            config.in_flight_lock_timeout_ms,
            config.post_order_cooldown_ms,
        );
        Self {
            config,
            state: RwLock::new(RiskState {
                breaker,
                cooldowns: CooldownTable::new(),
                locks,
                positions: HashMap::new(),
                total_exposure: Decimal::ZERO,
                exposure_by_market: HashMap::new(),
                exposure_by_category: HashMap::new(),
                killed_strategies: HashMap::new(),
                halted_markets: HashMap::new(),
                manual_kill: false,
                realized_pnl: Decimal::ZERO,
            }),
        }
    }

    // ==================== Admission Control ====================

    /// Gate a candidate order. Checks run in a fixed order and
    /// short-circuit on the first failure; the panic override runs first
    /// and skips everything else.
    pub async fn evaluate(
        &self,
        request: &OrderRequest,
        category: Option<&str>,
        position_loss_pct: Option<Decimal>,
    ) -> RiskDecision {
        let now = Utc::now();
        let key = CooldownKey::new(request.token_id.clone(), request.side);
        let mut state = self.state.write().await;

        // Panic liquidation bypasses every gate, breaker included
        if request.side == OrderSide::Sell
            && request.strategy_id == PANIC_STRATEGY_ID
            && position_loss_pct.map_or(false, |loss| loss >= self.config.panic_loss_pct)
        {
            warn!(
                token_id = %request.token_id,
                loss_pct = %position_loss_pct.unwrap_or_default(),
                "PANIC_LIQUIDATION override: approving sell without further checks"
            );
            state.locks.acquire(key, &request.strategy_id, now);
            return RiskDecision::approved("PANIC_LIQUIDATION override");
        }

        if self.global_kill_active(&state) {
            info!(token_id = %request.token_id, "Order blocked: global kill switch active");
            return RiskDecision::rejected(
                RejectReason::KillSwitchActive,
                "global kill switch active",
            );
        }

        if let Some(kill) = state.killed_strategies.get(&request.strategy_id) {
            info!(
                strategy_id = %request.strategy_id,
                reason = %kill.reason,
                "Order blocked: strategy killed"
            );
            return RiskDecision::rejected(
                RejectReason::StrategyKilled,
                format!("strategy killed: {}", kill.reason),
            );
        }

        if let Some(halt_reason) = state.halted_markets.get(&request.market_id) {
            info!(
                market_id = %request.market_id,
                reason = %halt_reason,
                "Order blocked: market halted"
            );
            return RiskDecision::rejected(
                RejectReason::MarketHalted,
                RiskError::TradingHalted {
                    reason: halt_reason.clone(),
                }
                .to_string(),
            );
        }

        if state.breaker.is_triggered(now) {
            let snapshot = state.breaker.snapshot();
            return RiskDecision::rejected(
                RejectReason::CircuitBreaker,
                format!(
                    "circuit breaker triggered until {}",
                    snapshot
                        .resume_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "manual reset".to_string())
                ),
            );
        }

        if let Some(entry) = state.cooldowns.active(&key, now) {
            debug!(key = %key, until = %entry.until, "Order blocked: hard cooldown");
            return RiskDecision::rejected(
                RejectReason::CooldownHard,
                format!("cooldown until {} ({})", entry.until.to_rfc3339(), entry.reason),
            );
        }

        if state.locks.is_blocked(&key, now) {
            debug!(key = %key, "Order blocked: IN_FLIGHT_LOCKED");
            return RiskDecision::rejected(
                RejectReason::InFlightLocked,
                format!("IN_FLIGHT_LOCKED for {key}"),
            );
        }

        if request.size_usd < self.config.min_order_usd {
            return RiskDecision::rejected(
                RejectReason::OrderTooSmall,
                format!(
                    "size {} below minimum {}",
                    request.size_usd, self.config.min_order_usd
                ),
            );
        }

        if let Some(slippage) = request.expected_slippage_cents {
            if slippage > self.config.max_slippage_cents {
                return RiskDecision::rejected(
                    RejectReason::SlippageTooHigh,
                    format!(
                        "expected slippage {slippage}c above maximum {}c",
                        self.config.max_slippage_cents
                    ),
                );
            }
        }

        let mut adjusted: Option<Decimal> = None;
        let mut warnings = Vec::new();

        // Exposure caps apply to buys only; sells reduce exposure
        if request.side == OrderSide::Buy {
            let mut effective = request.size_usd;

            if state.total_exposure + effective > self.config.max_exposure_usd {
                let remainder = self.config.max_exposure_usd - state.total_exposure;
                if remainder >= self.config.min_order_usd {
                    effective = remainder;
                    adjusted = Some(remainder);
                } else {
                    info!(
                        total = %state.total_exposure,
                        requested = %request.size_usd,
                        "Order blocked: total exposure cap"
                    );
                    return RiskDecision::rejected(
                        RejectReason::ExposureLimit,
                        RiskError::MaxExposureExceeded {
                            limit: self.config.max_exposure_usd,
                            projected: state.total_exposure + request.size_usd,
                        }
                        .to_string(),
                    );
                }
            }

            let market_exposure = state
                .exposure_by_market
                .get(&request.market_id)
                .copied()
                .unwrap_or_default();
            if market_exposure + effective > self.config.max_exposure_per_market_usd {
                let remainder = self.config.max_exposure_per_market_usd - market_exposure;
                if remainder >= self.config.min_order_usd {
                    effective = effective.min(remainder);
                    adjusted = Some(effective);
                } else {
                    info!(
                        market_id = %request.market_id,
                        market_exposure = %market_exposure,
                        "Order blocked: per-market exposure cap"
                    );
                    return RiskDecision::rejected(
                        RejectReason::MarketExposureLimit,
                        RiskError::MaxExposureExceeded {
                            limit: self.config.max_exposure_per_market_usd,
                            projected: market_exposure + effective,
                        }
                        .to_string(),
                    );
                }
            }

            // Category caps only warn
            if let Some(category) = category {
                let category_exposure = state
                    .exposure_by_category
                    .get(category)
                    .copied()
                    .unwrap_or_default();
                if category_exposure + effective > self.config.max_exposure_per_category_usd {
                    warnings.push(format!(
                        "category '{category}' exposure {} would exceed soft cap {}",
                        category_exposure + effective,
                        self.config.max_exposure_per_category_usd
                    ));
                }
            }
        }

        let drawdown_pct = self.drawdown_pct(&state);
        if drawdown_pct >= self.config.max_drawdown_pct {
            state
                .breaker
                .trip(format!("session drawdown {drawdown_pct:.2}%"), now);
            return RiskDecision::rejected(
                RejectReason::DrawdownLimit,
                RiskError::DrawdownLimit {
                    drawdown_pct,
                    limit_pct: self.config.max_drawdown_pct,
                }
                .to_string(),
            );
        }

        state.locks.acquire(key, &request.strategy_id, now);

        let mut decision = RiskDecision::approved(match adjusted {
            Some(size) => format!("approved with size adjusted to {size}"),
            None => "approved".to_string(),
        });
        decision.adjusted_size_usd = adjusted;
        decision.warnings = warnings;
        decision
    }

    /// Feed back the final outcome of an approved order. Always releases
    /// the in-flight lock into its post-order cooldown, success or not.
    pub async fn record_order_result(
        &self,
        request: &OrderRequest,
        result: &OrderResult,
        category: Option<&str>,
    ) {
        let now = Utc::now();
        let key = CooldownKey::new(request.token_id.clone(), request.side);
        let mut state = self.state.write().await;

        state.locks.complete(&key, now);

        if let Some(until) = result.cooldown_until {
            let reason = result
                .reject_code
                .clone()
                .unwrap_or_else(|| "submission cooldown".to_string());
            state.cooldowns.set(key, until, reason);
        }

        if result.success {
            state.breaker.record_success();
            match request.side {
                OrderSide::Buy => {
                    self.apply_exposure_delta(&mut state, request, category, request.size_usd)
                }
                OrderSide::Sell => {
                    self.apply_exposure_delta(&mut state, request, category, -request.size_usd)
                }
            }
        } else {
            state.breaker.record_reject(now);
        }
    }

    fn apply_exposure_delta(
        &self,
        state: &mut RiskState,
        request: &OrderRequest,
        category: Option<&str>,
        delta: Decimal,
    ) {
        state.total_exposure = (state.total_exposure + delta).max(Decimal::ZERO);
        let market = state
            .exposure_by_market
            .entry(request.market_id.clone())
            .or_default();
        *market = (*market + delta).max(Decimal::ZERO);
        if let Some(category) = category {
            let entry = state
                .exposure_by_category
                .entry(category.to_string())
                .or_default();
            *entry = (*entry + delta).max(Decimal::ZERO);
        }
        debug!(
            total = %state.total_exposure,
            market_id = %request.market_id,
            delta = %delta,
            "Exposure updated"
        );
    }

    // ==================== Positions & PnL ====================

    /// Refresh a tracked position, reclassifying dust and keeping the
    /// exposure sums consistent with the DUST/RESOLVED exclusion.
    pub async fn update_position(&self, mut position: TrackedPosition) {
        let mut state = self.state.write().await;

        if position.state != PositionState::Resolved
            && position.current_value < self.config.dust_threshold_usd
        {
            if position.state != PositionState::Dust {
                debug!(
                    token_id = %position.token_id,
                    value = %position.current_value,
                    "Position reclassified as dust"
                );
            }
            position.state = PositionState::Dust;
        }

        let old_contribution = state
            .positions
            .get(&position.token_id)
            .filter(|p| p.counts_toward_exposure())
            .map(|p| p.current_value)
            .unwrap_or_default();
        let new_contribution = if position.counts_toward_exposure() {
            position.current_value
        } else {
            Decimal::ZERO
        };
        let delta = new_contribution - old_contribution;

        state.total_exposure = (state.total_exposure + delta).max(Decimal::ZERO);
        let market = state
            .exposure_by_market
            .entry(position.market_id.clone())
            .or_default();
        *market = (*market + delta).max(Decimal::ZERO);

        state.positions.insert(position.token_id.clone(), position);
    }

    /// Record a realized PnL delta against the session bankroll.
    pub async fn record_realized_pnl(&self, delta: Decimal) {
        let mut state = self.state.write().await;
        state.realized_pnl += delta;
        info!(delta = %delta, session_pnl = %state.realized_pnl, "Realized PnL recorded");
    }

    /// Live positions with the worst unrealized loss first. Dust and
    /// resolved positions never appear.
    pub async fn get_worst_loss_positions(&self, limit: usize) -> Vec<TrackedPosition> {
        let state = self.state.read().await;
        let mut live: Vec<TrackedPosition> = state
            .positions
            .values()
            .filter(|p| p.counts_toward_exposure())
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            a.unrealized_pnl_pct()
                .cmp(&b.unrealized_pnl_pct())
        });
        live.truncate(limit);
        live
    }

    /// Sanity-check a reported PnL figure against what the book says the
    /// position is actually worth. A large discrepancy flags the result
    /// and, when configured, halts the position's market.
    pub async fn reconcile_pnl(
        &self,
        token_id: &str,
        reported_pnl: Decimal,
        best_bid: Decimal,
        size: Decimal,
    ) -> ReconciliationResult {
        let mut state = self.state.write().await;

        let (cost_basis, market_id) = state
            .positions
            .get(token_id)
            .map(|p| (p.cost_basis, p.market_id.clone()))
            .unwrap_or((Decimal::ZERO, String::new()));

        let executable_value = best_bid * size;
        let expected_pnl = executable_value - cost_basis;
        let discrepancy = (reported_pnl - expected_pnl).abs();
        let discrepancy_pct = if cost_basis.is_zero() {
            if discrepancy.is_zero() {
                Decimal::ZERO
            } else {
                Decimal::ONE_HUNDRED
            }
        } else {
            discrepancy / cost_basis * Decimal::ONE_HUNDRED
        };

        let flagged = discrepancy_pct >= self.config.reconciliation_threshold_pct;
        let mut halted = false;

        if flagged {
            warn!(
                token_id = %token_id,
                reported = %reported_pnl,
                expected = %expected_pnl,
                discrepancy_pct = %discrepancy_pct,
                "PnL reconciliation discrepancy"
            );
            if self.config.halt_on_reconciliation_failure && !market_id.is_empty() {
                error!(
                    market_id = %market_id,
                    "MARKET HALTED by PnL reconciliation failure; \
                     call unhalt_market to resume"
                );
                state.halted_markets.insert(
                    market_id,
                    format!("PnL reconciliation discrepancy {discrepancy_pct:.1}%"),
                );
                halted = true;
            }
        }

        ReconciliationResult {
            token_id: token_id.to_string(),
            reported_pnl,
            executable_value,
            expected_pnl,
            discrepancy_pct,
            flagged,
            halted,
        }
    }

    // ==================== Operator Controls ====================

    pub async fn kill_strategy(&self, strategy_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        error!(strategy_id = %strategy_id, reason = %reason, "Strategy killed");
        self.state.write().await.killed_strategies.insert(
            strategy_id.to_string(),
            KillSwitch {
                reason,
                killed_at: Utc::now(),
            },
        );
    }

    pub async fn revive_strategy(&self, strategy_id: &str) {
        if self
            .state
            .write()
            .await
            .killed_strategies
            .remove(strategy_id)
            .is_some()
        {
            info!(strategy_id = %strategy_id, "Strategy revived");
        }
    }

    pub async fn set_global_kill(&self, active: bool) {
        if active {
            error!("GLOBAL KILL SWITCH ENGAGED: all trading halted until cleared");
        } else {
            info!("Global kill switch cleared");
        }
        self.state.write().await.manual_kill = active;
    }

    pub async fn unhalt_market(&self, market_id: &str) {
        if self
            .state
            .write()
            .await
            .halted_markets
            .remove(market_id)
            .is_some()
        {
            info!(market_id = %market_id, "Market unhalted by operator");
        }
    }

    pub async fn force_reset_circuit_breaker(&self) {
        self.state.write().await.breaker.force_reset();
    }

    /// Report exchange API health; repeated failures trip the breaker.
    pub async fn report_api_health(&self, healthy: bool) {
        self.state
            .write()
            .await
            .breaker
            .record_api_health(healthy, Utc::now());
    }

    /// Arm a hard cooldown directly, e.g. from the execution engine's
    /// classification of a terminal failure.
    pub async fn set_cooldown(
        &self,
        key: CooldownKey,
        until: DateTime<Utc>,
        reason: impl Into<String>,
    ) {
        self.state.write().await.cooldowns.set(key, until, reason);
    }

    /// Sweep expired cooldowns and dead locks. Called once per tick.
    pub async fn prune_expired(&self) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let cooldowns = state.cooldowns.prune(now);
        let locks = state.locks.prune(now);
        if cooldowns + locks > 0 {
            debug!(cooldowns, locks, "Pruned expired risk entries");
        }
    }

    /// Copy the manager's persistable fields into a snapshot.
    pub async fn export_snapshot(&self, snapshot: &mut crate::persistence::StateSnapshot) {
        let state = self.state.read().await;
        snapshot.exposure_by_market = state.exposure_by_market.clone();
        snapshot.wallet_exposure_usd = state.total_exposure;
        snapshot.consecutive_failures = state.breaker.snapshot().consecutive_rejects;
    }

    /// Seed a fresh manager from a persisted snapshot. Positions and
    /// cooldowns rebuild from the exchange; only the exposure book and
    /// the rejection streak carry over.
    pub async fn restore_snapshot(&self, snapshot: &crate::persistence::StateSnapshot) {
        let mut state = self.state.write().await;
        state.exposure_by_market = snapshot.exposure_by_market.clone();
        state.total_exposure = snapshot.wallet_exposure_usd;
        state.breaker.restore_rejects(snapshot.consecutive_failures);
        info!(
            exposure = %state.total_exposure,
            markets = state.exposure_by_market.len(),
            "Risk state restored from snapshot"
        );
    }

    pub async fn get_state(&self) -> RiskStateSnapshot {
        let state = self.state.read().await;
        RiskStateSnapshot {
            total_exposure_usd: state.total_exposure,
            exposure_by_market: state.exposure_by_market.clone(),
            exposure_by_category: state.exposure_by_category.clone(),
            circuit_breaker: state.breaker.snapshot(),
            halted_markets: state.halted_markets.keys().cloned().collect(),
            killed_strategies: state.killed_strategies.keys().cloned().collect(),
            realized_pnl_usd: state.realized_pnl,
            open_positions: state
                .positions
                .values()
                .filter(|p| p.counts_toward_exposure())
                .count(),
            active_cooldowns: state.cooldowns.len(),
            in_flight_locks: state.locks.len(),
            global_kill: self.global_kill_active(&state),
        }
    }

    // ==================== Internals ====================

    /// The file check is deliberately uncached: touching the kill file
    /// must take effect on the very next evaluate call.
    fn global_kill_active(&self, state: &RiskState) -> bool {
        state.manual_kill || self.config.kill_switch_file.exists()
    }

    fn drawdown_pct(&self, state: &RiskState) -> Decimal {
        let loss = (-state.realized_pnl).max(Decimal::ZERO);
        if self.config.session_bankroll_usd.is_zero() {
            return Decimal::ZERO;
        }
        loss / self.config.session_bankroll_usd * Decimal::ONE_HUNDRED
    }
}
