use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type on the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Fill Or Kill: complete immediate fill or cancel
    Fok,
    /// Good Till Cancelled
    Gtc,
    /// Good Till Date
    Gtd,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Fok => write!(f, "FOK"),
            OrderType::Gtc => write!(f, "GTC"),
            OrderType::Gtd => write!(f, "GTD"),
        }
    }
}

/// Final status of a submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Order accepted by the exchange
    Submitted,
    /// Order rejected before or during submission
    Rejected,
    /// Submission failed after exhausting retries
    Failed,
}

/// Reasons the risk gate can reject an order.
///
/// The `Display` form is the stable code recorded in results and audit
/// entries; callers match on the string in logs and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    KillSwitchActive,
    StrategyKilled,
    MarketHalted,
    CircuitBreaker,
    CooldownHard,
    InFlightLocked,
    OrderTooSmall,
    SlippageTooHigh,
    ExposureLimit,
    MarketExposureLimit,
    DrawdownLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::KillSwitchActive => "KILL_SWITCH_ACTIVE",
            RejectReason::StrategyKilled => "STRATEGY_KILLED",
            RejectReason::MarketHalted => "MARKET_HALTED",
            RejectReason::CircuitBreaker => "CIRCUIT_BREAKER",
            RejectReason::CooldownHard => "COOLDOWN_HARD",
            RejectReason::InFlightLocked => "IN_FLIGHT_LOCKED",
            RejectReason::OrderTooSmall => "ORDER_TOO_SMALL",
            RejectReason::SlippageTooHigh => "SLIPPAGE_TOO_HIGH",
            RejectReason::ExposureLimit => "EXPOSURE_LIMIT",
            RejectReason::MarketExposureLimit => "MARKET_EXPOSURE_LIMIT",
            RejectReason::DrawdownLimit => "DRAWDOWN_LIMIT",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Candidate order proposed by a strategy.
///
/// Immutable input to the risk gate and execution engine; one is created
/// per strategy tick and never mutated (size adjustments travel in the
/// risk decision, not here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub strategy_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    /// Shares
    pub size: Decimal,
    /// Limit price in probability units (0..1)
    pub price: Decimal,
    /// Notional in USD
    pub size_usd: Decimal,
    pub order_type: OrderType,
    /// Expected slippage versus the signal price, in cents
    pub expected_slippage_cents: Option<Decimal>,
}

impl OrderRequest {
    pub fn new(
        strategy_id: impl Into<String>,
        market_id: impl Into<String>,
        token_id: impl Into<String>,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        order_type: OrderType,
    ) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.into(),
            market_id: market_id.into(),
            token_id: token_id.into(),
            side,
            size,
            price,
            size_usd: size * price,
            order_type,
            expected_slippage_cents: None,
        }
    }

    pub fn with_expected_slippage_cents(mut self, cents: Decimal) -> Self {
        self.expected_slippage_cents = Some(cents);
        self
    }

    /// Stable fingerprint of the logical order, used for duplicate
    /// suppression. Two requests with the same instrument, side, size and
    /// price hash identically regardless of client order id.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.token_id.as_bytes());
        hasher.update(self.side.to_string().as_bytes());
        hasher.update(self.size.to_string().as_bytes());
        hasher.update(self.price.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Outcome of a submission attempt, fed back into the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub status: OrderStatus,
    pub reject_code: Option<String>,
    pub reason: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
}

impl OrderResult {
    pub fn submitted(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            status: OrderStatus::Submitted,
            reject_code: None,
            reason: None,
            cooldown_until: None,
            order_id: Some(order_id.into()),
        }
    }

    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            status: OrderStatus::Rejected,
            reject_code: Some(code.into()),
            reason: Some(reason.into()),
            cooldown_until: None,
            order_id: None,
        }
    }

    pub fn failed(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            status: OrderStatus::Failed,
            reject_code: Some(code.into()),
            reason: Some(reason.into()),
            cooldown_until: None,
            order_id: None,
        }
    }

    pub fn with_cooldown_until(mut self, until: DateTime<Utc>) -> Self {
        self.cooldown_until = Some(until);
        self
    }
}
