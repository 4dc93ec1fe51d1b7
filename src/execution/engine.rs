use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::domain::{OrderRequest, OrderResult, RejectReason};
use crate::error::SubmitError;
use crate::exchange::ExchangeClient;
use crate::execution::audit::{AuditLog, AuditRecord};
use crate::execution::submission::{SubmissionController, SubmitParams};
use crate::risk::{CooldownKey, RiskDecision, RiskManager};

/// Drives one order from risk gate to wire: admission, size adjustment,
/// bounded retry with exponential backoff, result feedback and audit.
pub struct ExecutionEngine {
    config: ExecutionConfig,
    risk: Arc<RiskManager>,
    submission: Arc<SubmissionController>,
    exchange: Arc<dyn ExchangeClient>,
    /// Fast-path cooldowns consulted before the risk manager is touched
    cooldown_cache: Mutex<HashMap<CooldownKey, DateTime<Utc>>>,
    audit: Mutex<AuditLog>,
}

impl ExecutionEngine {
    pub fn new(
        config: ExecutionConfig,
        risk: Arc<RiskManager>,
        submission: Arc<SubmissionController>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        let audit_max = config.audit_max_entries;
        Self {
            config,
            risk,
            submission,
            exchange,
            cooldown_cache: Mutex::new(HashMap::new()),
            audit: Mutex::new(AuditLog::new(audit_max)),
        }
    }

    pub async fn execute_order(
        &self,
        request: OrderRequest,
        category: Option<&str>,
        position_loss_pct: Option<Decimal>,
    ) -> OrderResult {
        let key = CooldownKey::new(request.token_id.clone(), request.side);

        // Fast path: a cached cooldown rejects without waking the risk
        // manager at all
        if let Some(until) = self.cached_cooldown(&key).await {
            debug!(key = %key, until = %until, "Rejected from cooldown cache");
            let result = OrderResult::rejected(
                RejectReason::CooldownHard.as_str(),
                format!("cooldown until {}", until.to_rfc3339()),
            );
            self.append_audit(&request, &cache_decision(until), &result)
                .await;
            return result;
        }

        let decision = self.risk.evaluate(&request, category, position_loss_pct).await;
        for warning in &decision.warnings {
            warn!(token_id = %request.token_id, "{warning}");
        }

        if !decision.approved {
            let result = OrderResult::rejected("RISK_REJECTED", decision.reason.clone());
            self.append_audit(&request, &decision, &result).await;
            return result;
        }

        // Reduced size from the risk decision replaces the requested one
        let mut request = request;
        if let Some(adjusted_usd) = decision.adjusted_size_usd {
            info!(
                token_id = %request.token_id,
                from = %request.size_usd,
                to = %adjusted_usd,
                "Order size adjusted by risk gate"
            );
            if !request.price.is_zero() {
                request.size = adjusted_usd / request.price;
            }
            request.size_usd = adjusted_usd;
        }

        let result = self.submit_with_retry(&request, &key).await;

        // Exactly once per approved order, success or failure
        self.risk
            .record_order_result(&request, &result, category)
            .await;
        self.append_audit(&request, &decision, &result).await;
        result
    }

    async fn submit_with_retry(&self, request: &OrderRequest, key: &CooldownKey) -> OrderResult {
        let params = SubmitParams {
            size_usd: request.size_usd,
            market_id: Some(request.market_id.clone()),
            token_id: Some(request.token_id.clone()),
            order_fingerprint: Some(request.fingerprint()),
        };

        let mut last_failure: Option<OrderResult> = None;

        for attempt in 1..=self.config.max_retries {
            let exchange = Arc::clone(&self.exchange);
            let outcome = self
                .submission
                .submit(params.clone(), || async move {
                    let signed = exchange.create_order(request).await?;
                    exchange.post_order(&signed, request.order_type).await
                })
                .await;

            if outcome.success {
                let order_id = outcome.order_id.unwrap_or_default();
                info!(
                    token_id = %request.token_id,
                    order_id = %order_id,
                    attempt,
                    "Order submitted"
                );
                return OrderResult::submitted(order_id);
            }

            let code = outcome.code.unwrap_or_else(|| "UNKNOWN".to_string());
            let reason = outcome.reason.unwrap_or_default();

            // A cooldown is a hard stop: cache it and give up
            if let Some(until) = outcome.cooldown_until {
                self.cooldown_cache
                    .lock()
                    .await
                    .insert(key.clone(), until);
                return OrderResult::failed(code, reason).with_cooldown_until(until);
            }

            if !outcome.retryable {
                return OrderResult::failed(code, reason);
            }

            debug!(
                token_id = %request.token_id,
                attempt,
                code = %code,
                "Submission failed, will retry"
            );
            last_failure = Some(OrderResult::failed(code, reason));

            if attempt < self.config.max_retries {
                let delay = self.config.retry_delay_ms * 2u64.pow(attempt as u32 - 1);
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }
        }

        warn!(
            token_id = %request.token_id,
            attempts = self.config.max_retries,
            "Order failed after exhausting retries"
        );
        let mut result = last_failure.unwrap_or_else(|| {
            OrderResult::failed(
                "UNKNOWN",
                SubmitError::MaxRetriesExceeded {
                    attempts: self.config.max_retries,
                }
                .to_string(),
            )
        });
        result.reject_code = Some(format!(
            "MAX_RETRIES_EXCEEDED:{}",
            result.reject_code.as_deref().unwrap_or("UNKNOWN")
        ));
        result
    }

    async fn cached_cooldown(&self, key: &CooldownKey) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let cache = self.cooldown_cache.lock().await;
        cache.get(key).copied().filter(|&until| now < until)
    }

    async fn append_audit(
        &self,
        request: &OrderRequest,
        decision: &RiskDecision,
        result: &OrderResult,
    ) {
        self.audit
            .lock()
            .await
            .append(AuditRecord::new(request, decision, result));
    }

    /// Newest audit records first.
    pub async fn recent_audit(&self, limit: usize) -> Vec<AuditRecord> {
        self.audit
            .lock()
            .await
            .recent(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Drop expired fast-path cooldowns. Called once per tick.
    pub async fn prune_expired(&self) {
        let now = Utc::now();
        self.cooldown_cache
            .lock()
            .await
            .retain(|_, &mut until| now < until);
    }
}

fn cache_decision(until: DateTime<Utc>) -> RiskDecision {
    RiskDecision {
        approved: false,
        reason: format!("cooldown cache hit until {}", until.to_rfc3339()),
        reject: Some(RejectReason::CooldownHard),
        adjusted_size_usd: None,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::{AllowanceInfo, AssetType, OrderSide, OrderStatus, OrderType};
    use crate::exchange::{OrderBook, RawResponse, SignedOrder};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted exchange: pops one canned response per post_order call.
    struct ScriptedExchange {
        responses: Mutex<Vec<RawResponse>>,
        posts: AtomicU32,
    }

    impl ScriptedExchange {
        fn new(mut responses: Vec<RawResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                posts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedExchange {
        async fn get_order_book(&self, token_id: &str) -> crate::error::Result<OrderBook> {
            Ok(OrderBook {
                token_id: token_id.to_string(),
                ..Default::default()
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
            _order: &SignedOrder,
            _order_type: OrderType,
        ) -> crate::error::Result<RawResponse> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .responses
                .lock()
                .await
                .pop()
                .expect("script exhausted"))
        }

        async fn get_balance_allowance(
            &self,
            asset: AssetType,
        ) -> crate::error::Result<AllowanceInfo> {
            Ok(AllowanceInfo {
                asset,
                balance: dec!(1000),
                allowance: dec!(1000),
                fetched_at: Utc::now(),
            })
        }
    }

    fn ok_response() -> RawResponse {
        RawResponse {
            status: 200,
            body: r#"{"orderID":"0xabc"}"#.to_string(),
            headers: StdHashMap::new(),
        }
    }

    fn not_accepted() -> RawResponse {
        RawResponse {
            status: 500,
            body: "upstream hiccup".to_string(),
            headers: StdHashMap::new(),
        }
    }

    fn engine_with(responses: Vec<RawResponse>) -> (ExecutionEngine, Arc<RiskManager>) {
        let mut app = AppConfig::default_config();
        app.risk.kill_switch_file = std::path::PathBuf::from("/nonexistent/kill-test");
        app.risk.post_order_cooldown_ms = 0;
        app.submission.min_interval_ms = 0;
        app.submission.market_cooldown_ms = 0;
        app.execution.retry_delay_ms = 1;

        let risk = Arc::new(RiskManager::new(app.risk));
        let submission = Arc::new(SubmissionController::new(app.submission));
        let exchange = Arc::new(ScriptedExchange::new(responses));
        let engine = ExecutionEngine::new(app.execution, Arc::clone(&risk), submission, exchange);
        (engine, risk)
    }

    fn request() -> OrderRequest {
        OrderRequest::new(
            "edge_scanner",
            "mkt-1",
            "t1",
            OrderSide::Buy,
            dec!(10),
            dec!(0.5),
            OrderType::Fok,
        )
    }

    #[tokio::test]
    async fn test_successful_order_updates_exposure_and_audit() {
        let (engine, risk) = engine_with(vec![ok_response()]);

        let result = engine.execute_order(request(), None, None).await;
        assert!(result.success);
        assert_eq!(result.status, OrderStatus::Submitted);
        assert_eq!(result.order_id.as_deref(), Some("0xabc"));

        assert_eq!(risk.get_state().await.total_exposure_usd, dec!(5));
        let audit = engine.recent_audit(10).await;
        assert_eq!(audit.len(), 1);
        assert!(audit[0].success);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let (engine, _risk) = engine_with(vec![not_accepted(), ok_response()]);
        let result = engine.execute_order(request(), None, None).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_retry_survives_default_market_cooldown() {
        // market_cooldown_ms stays at its default: a transient 500 must
        // not arm it against the engine's own second attempt
        let mut app = AppConfig::default_config();
        app.risk.kill_switch_file = std::path::PathBuf::from("/nonexistent/kill-test");
        app.risk.post_order_cooldown_ms = 0;
        app.submission.min_interval_ms = 0;
        app.execution.retry_delay_ms = 1;

        let risk = Arc::new(RiskManager::new(app.risk));
        let submission = Arc::new(SubmissionController::new(app.submission));
        let exchange = Arc::new(ScriptedExchange::new(vec![not_accepted(), ok_response()]));
        let engine = ExecutionEngine::new(app.execution, risk, submission, exchange);

        let result = engine.execute_order(request(), None, None).await;
        assert!(result.success, "retry failed: {:?}", result.reject_code);
        assert_eq!(result.order_id.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_and_count_against_breaker() {
        let (engine, risk) =
            engine_with(vec![not_accepted(), not_accepted(), not_accepted()]);
        let result = engine.execute_order(request(), None, None).await;
        assert!(!result.success);
        assert_eq!(result.status, OrderStatus::Failed);
        assert!(result
            .reject_code
            .as_deref()
            .unwrap()
            .starts_with("MAX_RETRIES_EXCEEDED"));

        assert_eq!(risk.get_state().await.circuit_breaker.consecutive_rejects, 1);
        assert_eq!(risk.get_state().await.total_exposure_usd, dec!(0));
    }

    #[tokio::test]
    async fn test_cooldown_response_is_cached_for_fast_path() {
        let blocked = RawResponse {
            status: 403,
            body: "Attention Required! | Cloudflare".to_string(),
            headers: StdHashMap::new(),
        };
        let (engine, _risk) = engine_with(vec![blocked]);

        let result = engine.execute_order(request(), None, None).await;
        assert!(!result.success);
        assert_eq!(result.reject_code.as_deref(), Some("CLOUDFLARE_BLOCK"));
        assert!(result.cooldown_until.is_some());

        // second attempt dies in the cooldown cache, no wire call
        let result = engine.execute_order(request(), None, None).await;
        assert_eq!(result.status, OrderStatus::Rejected);
        assert_eq!(result.reject_code.as_deref(), Some("COOLDOWN_HARD"));
    }

    #[tokio::test]
    async fn test_risk_rejection_short_circuits() {
        let (engine, risk) = engine_with(vec![]);
        risk.kill_strategy("edge_scanner", "test").await;

        let result = engine.execute_order(request(), None, None).await;
        assert!(!result.success);
        assert_eq!(result.reject_code.as_deref(), Some("RISK_REJECTED"));
        assert!(result.reason.as_deref().unwrap().contains("strategy killed"));
    }

    #[tokio::test]
    async fn test_rejected_order_never_touches_the_exchange() {
        use crate::exchange::traits::MockExchangeClient;

        let mut mock = MockExchangeClient::new();
        mock.expect_create_order().times(0);
        mock.expect_post_order().times(0);

        let mut app = AppConfig::default_config();
        app.risk.kill_switch_file = std::path::PathBuf::from("/nonexistent/kill-test");
        let risk = Arc::new(RiskManager::new(app.risk));
        let submission = Arc::new(SubmissionController::new(app.submission));
        let engine = ExecutionEngine::new(
            app.execution,
            Arc::clone(&risk),
            submission,
            Arc::new(mock),
        );

        risk.kill_strategy("edge_scanner", "test").await;
        let result = engine.execute_order(request(), None, None).await;
        assert_eq!(result.reject_code.as_deref(), Some("RISK_REJECTED"));
    }

    #[tokio::test]
    async fn test_adjusted_size_flows_to_submission_and_exposure() {
        let mut app = AppConfig::default_config();
        app.risk.kill_switch_file = std::path::PathBuf::from("/nonexistent/kill-test");
        app.risk.max_exposure_per_market_usd = dec!(4);
        app.risk.max_exposure_usd = dec!(100);
        app.submission.min_interval_ms = 0;
        let risk = Arc::new(RiskManager::new(app.risk));
        let submission = Arc::new(SubmissionController::new(app.submission));
        let exchange = Arc::new(ScriptedExchange::new(vec![ok_response()]));
        let engine = ExecutionEngine::new(app.execution, Arc::clone(&risk), submission, exchange);

        // 10 shares at 0.5 is 5 USD; market cap 4 trims it
        let result = engine.execute_order(request(), None, None).await;
        assert!(result.success);
        assert_eq!(risk.get_state().await.total_exposure_usd, dec!(4));

        let audit = engine.recent_audit(1).await;
        assert_eq!(audit[0].adjusted_size_usd, Some(dec!(4)));
        assert_eq!(audit[0].size_usd, dec!(4));
    }
}
