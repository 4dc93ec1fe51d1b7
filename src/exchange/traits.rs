use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{AllowanceInfo, AssetType, OrderRequest, OrderType};
use crate::error::Result;

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book for a single outcome token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|l| l.price).max()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|l| l.price).min()
    }
}

/// Order after it has been signed by the external signer collaborator.
/// Opaque to this core apart from the ids used for correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedOrder {
    pub client_order_id: String,
    pub token_id: String,
    pub payload: serde_json::Value,
}

/// Raw exchange response. The transport layer hands this back untouched;
/// `classify_response` is the only place that interprets it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Wire-level exchange collaborator. Implemented outside this crate; the
/// core only consumes it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook>;

    async fn create_order(&self, request: &OrderRequest) -> Result<SignedOrder>;

    async fn post_order(&self, order: &SignedOrder, order_type: OrderType) -> Result<RawResponse>;

    async fn get_balance_allowance(&self, asset: AssetType) -> Result<AllowanceInfo>;
}
