use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{OrderRequest, OrderResult, OrderSide};
use crate::risk::RiskDecision;

/// One append-only record per execution attempt. The schema is fixed;
/// where the records end up (file, database) is the embedder's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub size_usd: Decimal,
    pub risk_approved: bool,
    pub risk_reason: String,
    pub adjusted_size_usd: Option<Decimal>,
    pub success: bool,
    pub reject_code: Option<String>,
    pub order_id: Option<String>,
}

impl AuditRecord {
    pub fn new(request: &OrderRequest, decision: &RiskDecision, result: &OrderResult) -> Self {
        Self {
            timestamp: Utc::now(),
            strategy_id: request.strategy_id.clone(),
            market_id: request.market_id.clone(),
            token_id: request.token_id.clone(),
            side: request.side,
            size: request.size,
            price: request.price,
            size_usd: request.size_usd,
            risk_approved: decision.approved,
            risk_reason: decision.reason.clone(),
            adjusted_size_usd: decision.adjusted_size_usd,
            success: result.success,
            reject_code: result.reject_code.clone(),
            order_id: result.order_id.clone(),
        }
    }
}

/// Bounded in-memory audit trail. Past `max_entries` the oldest half is
/// dropped, keeping trim cost amortized instead of per-append.
#[derive(Debug)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
    max_entries: usize,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Vec::new(),
            max_entries: max_entries.max(2),
        }
    }

    pub fn append(&mut self, record: AuditRecord) {
        self.records.push(record);
        if self.records.len() > self.max_entries {
            let keep_from = self.records.len() - self.max_entries / 2;
            self.records.drain(..keep_from);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Newest records first.
    pub fn recent(&self, limit: usize) -> Vec<&AuditRecord> {
        self.records.iter().rev().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderType;
    use rust_decimal_macros::dec;

    fn record(tag: &str) -> AuditRecord {
        let request = OrderRequest::new(
            tag,
            "mkt-1",
            "t1",
            OrderSide::Buy,
            dec!(10),
            dec!(0.5),
            OrderType::Fok,
        );
        let decision = RiskDecision {
            approved: true,
            reason: "approved".into(),
            reject: None,
            adjusted_size_usd: None,
            warnings: vec![],
        };
        AuditRecord::new(&request, &decision, &OrderResult::submitted("oid"))
    }

    #[test]
    fn test_trims_to_newest_half_when_full() {
        let mut log = AuditLog::new(10);
        for i in 0..11 {
            log.append(record(&format!("s{i}")));
        }
        // 11 entries trims down to the newest 5
        assert_eq!(log.len(), 5);
        let recent = log.recent(5);
        assert_eq!(recent[0].strategy_id, "s10");
        assert_eq!(recent[4].strategy_id, "s6");
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let mut log = AuditLog::new(100);
        log.append(record("a"));
        log.append(record("b"));
        let recent = log.recent(1);
        assert_eq!(recent[0].strategy_id, "b");
    }
}
