use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::TwoLegConfig;
use crate::domain::{AllowanceInfo, AssetType, OrderRequest, OrderResult, OrderSide, OrderType};
use crate::error::Result;
use crate::exchange::ExchangeClient;
use crate::execution::engine::ExecutionEngine;

/// One side of a two-leg plan.
#[derive(Debug, Clone)]
pub struct LegPlan {
    pub token_id: String,
    pub price: Decimal,
    pub size: Decimal,
}

/// Buy both outcomes of the same market when their combined price leaves
/// an edge below 1.
#[derive(Debug, Clone)]
pub struct TwoLegPlan {
    pub strategy_id: String,
    pub market_id: String,
    pub leg_a: LegPlan,
    pub leg_b: LegPlan,
}

/// Terminal outcome of a two-leg execution.
#[derive(Debug)]
pub enum TwoLegOutcome {
    Completed {
        first_leg: OrderResult,
        second_leg: OrderResult,
    },
    /// Plan never started (price floor, allowance)
    Rejected { reason: String },
    FirstLegFailed(OrderResult),
    /// First leg filled, second leg deliberately skipped. The position is
    /// left one-sided rather than forcing a losing fill.
    SecondLegAborted {
        reason: String,
        first_leg: OrderResult,
    },
    SecondLegFailed {
        first_leg: OrderResult,
        second_leg: OrderResult,
    },
}

struct AllowanceCache {
    cached: Option<AllowanceInfo>,
    last_approval_attempt: Option<DateTime<Utc>>,
}

/// Executes both legs of a sum-below-one opportunity, cheaper leg first,
/// with a fresh-price guard before committing the second leg.
pub struct TwoLegExecutor {
    config: TwoLegConfig,
    engine: Arc<ExecutionEngine>,
    exchange: Arc<dyn ExchangeClient>,
    allowance: Mutex<AllowanceCache>,
}

impl TwoLegExecutor {
    pub fn new(
        config: TwoLegConfig,
        engine: Arc<ExecutionEngine>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        Self {
            config,
            engine,
            exchange,
            allowance: Mutex::new(AllowanceCache {
                cached: None,
                last_approval_attempt: None,
            }),
        }
    }

    pub async fn execute(&self, plan: TwoLegPlan) -> Result<TwoLegOutcome> {
        for leg in [&plan.leg_a, &plan.leg_b] {
            if leg.price < self.config.min_leg_price {
                return Ok(TwoLegOutcome::Rejected {
                    reason: format!(
                        "leg {} priced {} below floor {}",
                        leg.token_id, leg.price, self.config.min_leg_price
                    ),
                });
            }
        }

        let notional = plan.leg_a.price * plan.leg_a.size + plan.leg_b.price * plan.leg_b.size;
        if let Some(reason) = self.ensure_allowance(notional).await? {
            return Ok(TwoLegOutcome::Rejected { reason });
        }

        // Cheaper leg first: it is the harder fill and the smaller loss
        // if the plan dies after one leg
        let (first, second) = if plan.leg_a.price <= plan.leg_b.price {
            (&plan.leg_a, &plan.leg_b)
        } else {
            (&plan.leg_b, &plan.leg_a)
        };

        info!(
            market_id = %plan.market_id,
            first = %first.token_id,
            second = %second.token_id,
            "Executing two-leg plan, cheaper leg first"
        );

        let first_result = self
            .engine
            .execute_order(leg_request(&plan, first), None, None)
            .await;
        if !first_result.success {
            return Ok(TwoLegOutcome::FirstLegFailed(first_result));
        }

        // Both books again: the world moved while leg one filled
        let _first_book = self.exchange.get_order_book(&first.token_id).await?;
        let second_book = self.exchange.get_order_book(&second.token_id).await?;

        let Some(fresh_ask) = second_book.best_ask() else {
            warn!(token_id = %second.token_id, "No asks for second leg, aborting");
            return Ok(TwoLegOutcome::SecondLegAborted {
                reason: "second_leg_guard: no asks available".to_string(),
                first_leg: first_result,
            });
        };

        let drift = (fresh_ask - second.price).abs();
        if drift > self.config.slippage_tolerance {
            warn!(
                token_id = %second.token_id,
                planned = %second.price,
                fresh = %fresh_ask,
                "second_leg_guard: price drift beyond tolerance, leaving one-sided"
            );
            return Ok(TwoLegOutcome::SecondLegAborted {
                reason: format!(
                    "second_leg_guard: price moved {drift} beyond tolerance {}",
                    self.config.slippage_tolerance
                ),
                first_leg: first_result,
            });
        }

        let combined = first.price + fresh_ask;
        let expected_profit = (Decimal::ONE - combined) * second.size;
        if expected_profit < self.config.min_expected_profit_usd {
            warn!(
                market_id = %plan.market_id,
                expected_profit = %expected_profit,
                "second_leg_guard: recomputed profit below minimum, leaving one-sided"
            );
            return Ok(TwoLegOutcome::SecondLegAborted {
                reason: format!(
                    "second_leg_guard: expected profit {expected_profit} below {}",
                    self.config.min_expected_profit_usd
                ),
                first_leg: first_result,
            });
        }

        let mut second_plan = second.clone();
        second_plan.price = fresh_ask;
        let second_result = self
            .engine
            .execute_order(leg_request(&plan, &second_plan), None, None)
            .await;

        if second_result.success {
            Ok(TwoLegOutcome::Completed {
                first_leg: first_result,
                second_leg: second_result,
            })
        } else {
            Ok(TwoLegOutcome::SecondLegFailed {
                first_leg: first_result,
                second_leg: second_result,
            })
        }
    }

    /// Spendable-funds check for the combined notional, served from a
    /// short-lived cache. Returns a rejection reason when funds are short;
    /// approval attempts are rate-limited so repeated shortfalls cannot
    /// spam duplicate on-chain approvals.
    async fn ensure_allowance(&self, notional: Decimal) -> Result<Option<String>> {
        let mut cache = self.allowance.lock().await;
        let now = Utc::now();

        let stale = cache
            .cached
            .as_ref()
            .map_or(true, |info| {
                now - info.fetched_at >= Duration::seconds(self.config.allowance_cache_secs as i64)
            });
        if stale {
            let info = self
                .exchange
                .get_balance_allowance(AssetType::Collateral)
                .await?;
            cache.cached = Some(info);
        }

        let spendable = cache
            .cached
            .as_ref()
            .map(|info| info.spendable())
            .unwrap_or_default();
        if spendable >= notional {
            return Ok(None);
        }

        let cooldown = Duration::seconds(self.config.approval_cooldown_secs as i64);
        if let Some(last) = cache.last_approval_attempt {
            if now - last < cooldown {
                return Ok(Some(format!(
                    "allowance {spendable} below notional {notional}; approval attempt in cooldown"
                )));
            }
        }
        cache.last_approval_attempt = Some(now);
        warn!(
            spendable = %spendable,
            notional = %notional,
            "Allowance short of two-leg notional, approval requested"
        );
        Ok(Some(format!(
            "allowance {spendable} below notional {notional}; approval requested, retry later"
        )))
    }
}

fn leg_request(plan: &TwoLegPlan, leg: &LegPlan) -> OrderRequest {
    OrderRequest::new(
        &plan.strategy_id,
        &plan.market_id,
        &leg.token_id,
        OrderSide::Buy,
        leg.size,
        leg.price,
        OrderType::Fok,
    )
}
