//! End-to-end flow through the public API: strategy proposal, risk gate,
//! execution engine, submission controller, stub exchange.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use polygate::domain::{AllowanceInfo, AssetType, OrderType};
use polygate::exchange::{PriceLevel, SignedOrder};
use polygate::{
    AppConfig, CycleOrchestrator, ExchangeClient, ExecutionEngine, OrderBook, OrderRequest,
    OrderSide, Proposal, RawResponse, RiskManager, Strategy, SubmissionController,
};

/// Exchange stub that accepts everything and serves a flat book.
struct StubExchange {
    ask: Decimal,
}

#[async_trait]
impl ExchangeClient for StubExchange {
    async fn get_order_book(&self, token_id: &str) -> polygate::Result<OrderBook> {
        Ok(OrderBook {
            token_id: token_id.to_string(),
            bids: vec![PriceLevel {
                price: self.ask - dec!(0.02),
                size: dec!(500),
            }],
            asks: vec![PriceLevel {
                price: self.ask,
                size: dec!(500),
            }],
        })
    }

    async fn create_order(&self, request: &OrderRequest) -> polygate::Result<SignedOrder> {
        Ok(SignedOrder {
            client_order_id: request.client_order_id.clone(),
            token_id: request.token_id.clone(),
            payload: serde_json::json!({"token": request.token_id}),
        })
    }

    async fn post_order(
        &self,
        order: &SignedOrder,
        _order_type: OrderType,
    ) -> polygate::Result<RawResponse> {
        Ok(RawResponse {
            status: 200,
            body: format!(r#"{{"orderID":"live-{}"}}"#, order.token_id),
            headers: HashMap::new(),
        })
    }

    async fn get_balance_allowance(&self, asset: AssetType) -> polygate::Result<AllowanceInfo> {
        Ok(AllowanceInfo {
            asset,
            balance: dec!(10000),
            allowance: dec!(10000),
            fetched_at: Utc::now(),
        })
    }
}

/// Proposes one fixed-size buy per tick for each configured token.
struct BuyEverything {
    tokens: Vec<String>,
}

#[async_trait]
impl Strategy for BuyEverything {
    fn id(&self) -> &str {
        "buy_everything"
    }

    fn instruments(&self) -> Vec<String> {
        self.tokens.clone()
    }

    async fn propose(&self, books: &HashMap<String, OrderBook>) -> Vec<Proposal> {
        self.tokens
            .iter()
            .filter_map(|token| {
                let ask = books.get(token)?.best_ask()?;
                Some(Proposal {
                    request: OrderRequest::new(
                        "buy_everything",
                        format!("mkt-{token}"),
                        token,
                        OrderSide::Buy,
                        dec!(10),
                        ask,
                        OrderType::Fok,
                    ),
                    category: Some("politics".to_string()),
                    position_loss_pct: None,
                })
            })
            .collect()
    }
}

fn build_orchestrator(kill_file: PathBuf) -> CycleOrchestrator {
    build_orchestrator_with_cooldown(kill_file, 0)
}

fn build_orchestrator_with_cooldown(
    kill_file: PathBuf,
    post_order_cooldown_ms: u64,
) -> CycleOrchestrator {
    let mut app = AppConfig::default_config();
    app.risk.kill_switch_file = kill_file;
    app.risk.max_exposure_usd = dec!(100);
    app.risk.max_exposure_per_market_usd = dec!(20);
    app.risk.post_order_cooldown_ms = post_order_cooldown_ms;
    app.submission.min_interval_ms = 0;
    app.submission.market_cooldown_ms = 0;
    assert!(app.validate().is_ok());

    let exchange: Arc<dyn ExchangeClient> = Arc::new(StubExchange { ask: dec!(0.40) });
    let risk = Arc::new(RiskManager::new(app.risk));
    let submission = Arc::new(SubmissionController::new(app.submission));
    let engine = Arc::new(ExecutionEngine::new(
        app.execution,
        Arc::clone(&risk),
        Arc::clone(&submission),
        Arc::clone(&exchange),
    ));
    CycleOrchestrator::new(app.orchestrator, risk, engine, submission, exchange)
}

fn scratch_kill_file() -> PathBuf {
    std::env::temp_dir().join(format!("polygate-kill-{}", uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn full_tick_executes_proposals_and_books_exposure() {
    let orch = build_orchestrator(scratch_kill_file());
    orch.register(Arc::new(BuyEverything {
        tokens: vec!["alpha".to_string(), "beta".to_string()],
    }))
    .await;

    orch.tick_once().await;

    // two buys of 10 shares at 0.40 each
    let state = orch.risk().get_state().await;
    assert_eq!(state.total_exposure_usd, dec!(8));
    assert_eq!(state.exposure_by_market.get("mkt-alpha"), Some(&dec!(4)));
    assert_eq!(state.exposure_by_category.get("politics"), Some(&dec!(8)));

    let audit = orch.engine().recent_audit(10).await;
    assert_eq!(audit.len(), 2);
    assert!(audit.iter().all(|record| record.success));
}

#[tokio::test]
async fn kill_switch_file_halts_trading_until_removed() {
    let kill_file = scratch_kill_file();
    let orch = build_orchestrator(kill_file.clone());
    orch.register(Arc::new(BuyEverything {
        tokens: vec!["alpha".to_string()],
    }))
    .await;

    std::fs::write(&kill_file, "halt").expect("write kill file");
    orch.tick_once().await;
    assert_eq!(orch.risk().get_state().await.total_exposure_usd, dec!(0));

    let audit = orch.engine().recent_audit(10).await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].reject_code.as_deref(), Some("RISK_REJECTED"));

    // removing the file re-opens trading on the very next tick
    std::fs::remove_file(&kill_file).expect("remove kill file");
    orch.tick_once().await;
    assert_eq!(orch.risk().get_state().await.total_exposure_usd, dec!(4));
}

#[tokio::test]
async fn duplicate_proposals_in_one_tick_hit_the_in_flight_lock() {
    // a long post-order cooldown keeps the lock alive across the tick
    let orch = build_orchestrator_with_cooldown(scratch_kill_file(), 60_000);
    orch.register(Arc::new(BuyEverything {
        tokens: vec!["alpha".to_string(), "alpha".to_string()],
    }))
    .await;

    orch.tick_once().await;

    // one fill, one lock rejection for the same (token, side)
    let state = orch.risk().get_state().await;
    assert_eq!(state.total_exposure_usd, dec!(4));

    let audit = orch.engine().recent_audit(10).await;
    assert_eq!(audit.len(), 2);
    let rejects: Vec<_> = audit.iter().filter(|r| !r.success).collect();
    assert_eq!(rejects.len(), 1);
    assert!(rejects[0]
        .risk_reason
        .contains("IN_FLIGHT_LOCKED"));
}

#[tokio::test]
async fn operator_controls_round_trip() {
    let orch = build_orchestrator(scratch_kill_file());
    let risk = orch.risk();

    risk.kill_strategy("buy_everything", "misbehaving").await;
    orch.register(Arc::new(BuyEverything {
        tokens: vec!["alpha".to_string()],
    }))
    .await;

    orch.tick_once().await;
    assert_eq!(risk.get_state().await.total_exposure_usd, dec!(0));

    risk.revive_strategy("buy_everything").await;
    orch.tick_once().await;
    assert_eq!(risk.get_state().await.total_exposure_usd, dec!(4));
}
