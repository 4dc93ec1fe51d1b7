use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How the base stake reacts to edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// Base stake scaled by edge_bps / 100
    Linear,
    /// Base stake used as-is
    Fixed,
}

/// Inputs to one sizing decision.
#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub mode: SizingMode,
    pub base_usd: Decimal,
    pub edge_bps: Decimal,
    pub max_position_usd: Decimal,
    pub max_wallet_exposure_usd: Decimal,
    pub current_market_exposure_usd: Decimal,
    pub current_wallet_exposure_usd: Decimal,
}

/// Position size in USD: the (possibly edge-scaled) stake clamped by the
/// per-position cap, remaining per-market room and remaining wallet room,
/// floored at zero.
pub fn compute_size_usd(inputs: &SizingInputs) -> Decimal {
    let target = match inputs.mode {
        SizingMode::Linear => inputs.base_usd * inputs.edge_bps / Decimal::ONE_HUNDRED,
        SizingMode::Fixed => inputs.base_usd,
    };

    let market_room =
        (inputs.max_position_usd - inputs.current_market_exposure_usd).max(Decimal::ZERO);
    let wallet_room =
        (inputs.max_wallet_exposure_usd - inputs.current_wallet_exposure_usd).max(Decimal::ZERO);

    target.min(market_room).min(wallet_room).max(Decimal::ZERO)
}
