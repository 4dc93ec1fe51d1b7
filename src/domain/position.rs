use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionState {
    /// Live position, counts toward exposure
    Open,
    /// Below the dust threshold, excluded from exposure
    Dust,
    /// Market resolved, excluded from exposure
    Resolved,
}

/// Position snapshot as reported by the exchange plus our own bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub token_id: String,
    pub market_id: String,
    pub state: PositionState,
    /// USD spent acquiring the position
    pub cost_basis: Decimal,
    /// Current mark-to-market value in USD
    pub current_value: Decimal,
    pub size: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl TrackedPosition {
    /// Counts toward exposure only while the position is live.
    pub fn counts_toward_exposure(&self) -> bool {
        self.state == PositionState::Open
    }

    /// Unrealized PnL as a percentage of cost basis. Zero-cost positions
    /// report zero rather than dividing by zero.
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if self.cost_basis.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_value - self.cost_basis) / self.cost_basis * Decimal::ONE_HUNDRED
    }
}

/// Kind of token an allowance applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    /// USDC collateral
    Collateral,
    /// Outcome (conditional) tokens
    Conditional,
}

/// Balance and spending allowance for one asset, as reported by the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceInfo {
    pub asset: AssetType,
    pub balance: Decimal,
    pub allowance: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl AllowanceInfo {
    /// Spendable USD is limited by both balance and approved allowance.
    pub fn spendable(&self) -> Decimal {
        self.balance.min(self.allowance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos(state: PositionState) -> TrackedPosition {
        TrackedPosition {
            token_id: "t1".into(),
            market_id: "m1".into(),
            state,
            cost_basis: dec!(10),
            current_value: dec!(12),
            size: dec!(20),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_dust_and_resolved_excluded_from_exposure() {
        assert!(pos(PositionState::Open).counts_toward_exposure());
        assert!(!pos(PositionState::Dust).counts_toward_exposure());
        assert!(!pos(PositionState::Resolved).counts_toward_exposure());
    }

    #[test]
    fn test_spendable_is_min_of_balance_and_allowance() {
        let info = AllowanceInfo {
            asset: AssetType::Collateral,
            balance: dec!(100),
            allowance: dec!(40),
            fetched_at: Utc::now(),
        };
        assert_eq!(info.spendable(), dec!(40));
    }
}
