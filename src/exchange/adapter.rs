use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::OrderSpec;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Signing error: {0}")]
    Signing(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// The venue answered but refused the order.
    #[error("Order rejected: {0}")]
    Rejected(String),
}

impl ExchangeError {
    /// Text recorded in the order log for a failed submission.
    pub fn failure_reason(&self) -> String {
        match self {
            ExchangeError::Rejected(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: u64,
    pub average_filled_price: Option<Decimal>,
    pub t_ack: i64,
}

/// One row of the venue's order history, as the venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub product_id: String,
    pub side: String,
    pub base_size: Option<String>,
    pub average_filled_price: Option<String>,
    pub order_type: String,
    pub status: String,
    pub created_time: Option<String>,
}

/// An open perpetual position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSummary {
    pub product_id: String,
    pub side: String,
    pub net_size: String,
    pub entry_price: Option<String>,
    pub mark_price: Option<String>,
    pub notional: Option<String>,
    pub pnl: Option<String>,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Submit a compiled order. A venue-side refusal is `ExchangeError::Rejected`.
    async fn place_order(&self, order: &OrderSpec) -> Result<OrderAck, ExchangeError>;

    /// Average fill price of a placed order, `None` while nothing has filled.
    async fn average_filled_price(
        &self,
        exchange_order_id: &str,
    ) -> Result<Option<Decimal>, ExchangeError>;

    /// Full order record by venue id.
    async fn order_details(&self, exchange_order_id: &str) -> Result<Value, ExchangeError>;

    /// Most recent orders, newest first.
    async fn recent_orders(&self, limit: usize) -> Result<Vec<OrderSummary>, ExchangeError>;

    async fn positions(&self) -> Result<Vec<PositionSummary>, ExchangeError>;

    /// Get exchange name (e.g., "Coinbase Advanced")
    fn name(&self) -> &str;
}
