use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::domain::OrderRequest;
use crate::exchange::{ExchangeClient, OrderBook};
use crate::execution::{ExecutionEngine, SubmissionController};
use crate::risk::RiskManager;

/// A candidate order with the context the risk gate needs.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub request: OrderRequest,
    pub category: Option<String>,
    pub position_loss_pct: Option<Decimal>,
}

/// A signal producer. Strategies only propose; admission and submission
/// stay with the risk manager and execution engine.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;

    /// Lower runs earlier within a tick.
    fn priority(&self) -> u32 {
        100
    }

    fn enabled(&self) -> bool {
        true
    }

    /// Tokens whose order books should be prefetched for this tick.
    fn instruments(&self) -> Vec<String>;

    async fn propose(&self, books: &HashMap<String, OrderBook>) -> Vec<Proposal>;
}

/// Drives the trading loop: one tick per interval, strategies strictly
/// sequential inside a tick, every candidate order funneled through the
/// single risk gate and execution engine.
///
/// Owns the submission controller and risk manager and hands out `Arc`s,
/// so independent orchestrators (paper vs live) never share state.
pub struct CycleOrchestrator {
    config: OrchestratorConfig,
    strategies: RwLock<Vec<Arc<dyn Strategy>>>,
    risk: Arc<RiskManager>,
    engine: Arc<ExecutionEngine>,
    submission: Arc<SubmissionController>,
    exchange: Arc<dyn ExchangeClient>,
    shutdown: AtomicBool,
}

impl CycleOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        risk: Arc<RiskManager>,
        engine: Arc<ExecutionEngine>,
        submission: Arc<SubmissionController>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        Self {
            config,
            strategies: RwLock::new(Vec::new()),
            risk,
            engine,
            submission,
            exchange,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn risk(&self) -> Arc<RiskManager> {
        Arc::clone(&self.risk)
    }

    pub fn engine(&self) -> Arc<ExecutionEngine> {
        Arc::clone(&self.engine)
    }

    pub fn submission(&self) -> Arc<SubmissionController> {
        Arc::clone(&self.submission)
    }

    pub async fn register(&self, strategy: Arc<dyn Strategy>) {
        let mut strategies = self.strategies.write().await;
        info!(strategy_id = %strategy.id(), priority = strategy.priority(), "Strategy registered");
        strategies.push(strategy);
        strategies.sort_by_key(|s| s.priority());
    }

    pub async fn unregister(&self, strategy_id: &str) {
        let mut strategies = self.strategies.write().await;
        strategies.retain(|s| s.id() != strategy_id);
    }

    /// Request a stop. Honored at the next tick boundary; an order
    /// already in flight runs to completion.
    pub fn shutdown(&self) {
        info!("Orchestrator shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Tick loop. A slow tick delays the next one instead of letting
    /// ticks overlap.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.config.tick_interval_ms, "Orchestrator started");

        loop {
            ticker.tick().await;
            if self.is_shutdown() {
                break;
            }
            self.tick_once().await;
        }

        info!("Orchestrator stopped");
    }

    /// Run until Ctrl-C, then stop at the tick boundary. The tick loop
    /// is pinned, not dropped: an order already in flight when the
    /// signal arrives runs to completion before this returns.
    pub async fn run_until_ctrl_c(&self) {
        let run = self.run();
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => return,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                self.shutdown();
            }
        }
        run.await;
    }

    /// One full pass: prune sweeps, then every enabled strategy in
    /// priority order, strictly one at a time.
    pub async fn tick_once(&self) {
        self.risk.prune_expired().await;
        self.engine.prune_expired().await;
        self.submission.prune_expired().await;

        let strategies: Vec<Arc<dyn Strategy>> =
            self.strategies.read().await.iter().cloned().collect();

        for strategy in strategies {
            if !strategy.enabled() {
                continue;
            }
            if self.is_shutdown() {
                break;
            }
            self.run_strategy(strategy.as_ref()).await;
        }
    }

    async fn run_strategy(&self, strategy: &dyn Strategy) {
        let books = self.prefetch_books(strategy.instruments()).await;
        let proposals = strategy.propose(&books).await;
        debug!(
            strategy_id = %strategy.id(),
            proposals = proposals.len(),
            "Strategy pass"
        );

        // Orders run sequentially; parallelism stops at market data
        for proposal in proposals {
            let result = self
                .engine
                .execute_order(
                    proposal.request,
                    proposal.category.as_deref(),
                    proposal.position_loss_pct,
                )
                .await;
            if !result.success {
                debug!(
                    strategy_id = %strategy.id(),
                    code = ?result.reject_code,
                    "Proposal did not execute"
                );
            }
        }
    }

    /// Fetch order books for independent instruments with bounded
    /// parallelism. I/O throughput only; decisions stay sequential.
    async fn prefetch_books(&self, token_ids: Vec<String>) -> HashMap<String, OrderBook> {
        let fetches = stream::iter(token_ids)
            .map(|token_id| {
                let exchange = Arc::clone(&self.exchange);
                async move {
                    let book = exchange.get_order_book(&token_id).await;
                    (token_id, book)
                }
            })
            .buffer_unordered(self.config.book_prefetch_limit)
            .collect::<Vec<_>>()
            .await;

        let mut books = HashMap::new();
        for (token_id, result) in fetches {
            match result {
                Ok(book) => {
                    self.risk.report_api_health(true).await;
                    books.insert(token_id, book);
                }
                Err(e) => {
                    warn!(token_id = %token_id, error = %e, "Order book fetch failed");
                    self.risk.report_api_health(false).await;
                }
            }
        }
        books
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::{
        AllowanceInfo, AssetType, OrderSide, OrderType, TrackedPosition,
    };
    use crate::exchange::{PriceLevel, RawResponse, SignedOrder};
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex;

    struct AcceptingExchange;

    #[async_trait]
    impl ExchangeClient for AcceptingExchange {
        async fn get_order_book(&self, token_id: &str) -> crate::error::Result<OrderBook> {
            Ok(OrderBook {
                token_id: token_id.to_string(),
                bids: vec![PriceLevel { price: dec!(0.48), size: dec!(100) }],
                asks: vec![PriceLevel { price: dec!(0.52), size: dec!(100) }],
            })
        }

        async fn create_order(
            &self,
            request: &OrderRequest,
        ) -> crate::error::Result<SignedOrder> {
            Ok(SignedOrder {
                client_order_id: request.client_order_id.clone(),
                token_id: request.token_id.clone(),
                payload: serde_json::json!({}),
            })
        }

        async fn post_order(
            &self,
            order: &SignedOrder,
            _order_type: OrderType,
        ) -> crate::error::Result<RawResponse> {
            Ok(RawResponse {
                status: 200,
                body: format!(r#"{{"orderID":"oid-{}"}}"#, order.token_id),
                headers: StdHashMap::new(),
            })
        }

        async fn get_balance_allowance(
            &self,
            asset: AssetType,
        ) -> crate::error::Result<AllowanceInfo> {
            Ok(AllowanceInfo {
                asset,
                balance: dec!(1000),
                allowance: dec!(1000),
                fetched_at: chrono::Utc::now(),
            })
        }
    }

    /// Appends its id to a shared trace on every pass.
    struct TracingStrategy {
        id: String,
        priority: u32,
        trace: Arc<Mutex<Vec<String>>>,
        token: String,
    }

    #[async_trait]
    impl Strategy for TracingStrategy {
        fn id(&self) -> &str {
            &self.id
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn instruments(&self) -> Vec<String> {
            vec![self.token.clone()]
        }

        async fn propose(&self, books: &HashMap<String, OrderBook>) -> Vec<Proposal> {
            self.trace.lock().await.push(self.id.clone());
            let Some(book) = books.get(&self.token) else {
                return vec![];
            };
            let Some(ask) = book.best_ask() else {
                return vec![];
            };
            vec![Proposal {
                request: OrderRequest::new(
                    &self.id,
                    "mkt-1",
                    &self.token,
                    OrderSide::Buy,
                    dec!(4),
                    ask,
                    OrderType::Fok,
                ),
                category: None,
                position_loss_pct: None,
            }]
        }
    }

    fn orchestrator() -> CycleOrchestrator {
        let mut app = AppConfig::default_config();
        app.risk.kill_switch_file = std::path::PathBuf::from("/nonexistent/kill-test");
        app.risk.post_order_cooldown_ms = 0;
        app.submission.min_interval_ms = 0;
        app.submission.market_cooldown_ms = 0;
        app.orchestrator.tick_interval_ms = 5;

        let exchange: Arc<dyn ExchangeClient> = Arc::new(AcceptingExchange);
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

    #[tokio::test]
    async fn test_strategies_run_in_priority_order() {
        let orch = orchestrator();
        let trace = Arc::new(Mutex::new(Vec::new()));

        for (id, priority, token) in
            [("late", 20u32, "t-late"), ("early", 5, "t-early"), ("mid", 10, "t-mid")]
        {
            orch.register(Arc::new(TracingStrategy {
                id: id.to_string(),
                priority,
                trace: Arc::clone(&trace),
                token: token.to_string(),
            }))
            .await;
        }

        orch.tick_once().await;
        assert_eq!(*trace.lock().await, vec!["early", "mid", "late"]);
    }

    #[tokio::test]
    async fn test_proposals_flow_through_engine_to_exposure() {
        let orch = orchestrator();
        let trace = Arc::new(Mutex::new(Vec::new()));
        orch.register(Arc::new(TracingStrategy {
            id: "solo".to_string(),
            priority: 1,
            trace,
            token: "t1".to_string(),
        }))
        .await;

        orch.tick_once().await;

        // 4 shares at the 0.52 ask
        let state = orch.risk().get_state().await;
        assert_eq!(state.total_exposure_usd, dec!(2.08));
    }

    #[tokio::test]
    async fn test_unregister_removes_strategy() {
        let orch = orchestrator();
        let trace = Arc::new(Mutex::new(Vec::new()));
        orch.register(Arc::new(TracingStrategy {
            id: "gone".to_string(),
            priority: 1,
            trace: Arc::clone(&trace),
            token: "t1".to_string(),
        }))
        .await;
        orch.unregister("gone").await;

        orch.tick_once().await;
        assert!(trace.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let orch = Arc::new(orchestrator());
        let runner = Arc::clone(&orch);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        orch.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run should stop after shutdown")
            .expect("run task should not panic");
    }

    #[tokio::test]
    async fn test_run_until_ctrl_c_honors_shutdown() {
        let orch = Arc::new(orchestrator());
        let runner = Arc::clone(&orch);
        let handle = tokio::spawn(async move { runner.run_until_ctrl_c().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        orch.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop after shutdown")
            .expect("loop task should not panic");
    }

    #[tokio::test]
    async fn test_tick_prunes_expired_state() {
        let orch = orchestrator();
        orch.risk()
            .update_position(TrackedPosition {
                token_id: "t1".into(),
                market_id: "mkt-1".into(),
                state: crate::domain::PositionState::Open,
                cost_basis: dec!(5),
                current_value: dec!(5),
                size: dec!(10),
                last_updated: chrono::Utc::now(),
            })
            .await;
        // a tick with no strategies still performs the sweeps
        orch.tick_once().await;
        assert_eq!(orch.risk().get_state().await.open_positions, 1);
    }
}
