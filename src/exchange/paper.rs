use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::collections::VecDeque;
use tracing::info;

use crate::exchange::adapter::{
    ExchangeAdapter, ExchangeError, OrderAck, OrderSummary, PositionSummary,
};
use crate::model::OrderSpec;

/// Orders the paper venue remembers before dropping the oldest.
pub const DEFAULT_PAPER_HISTORY: usize = 1_000;

struct PaperOrder {
    exchange_order_id: String,
    spec: OrderSpec,
    fill: Option<Decimal>,
    created: DateTime<Utc>,
}

impl PaperOrder {
    fn summary(&self) -> OrderSummary {
        OrderSummary {
            order_id: self.exchange_order_id.clone(),
            product_id: self.spec.product_id.clone(),
            side: self.spec.side.to_string(),
            base_size: Some(self.spec.amount()),
            average_filled_price: self.fill.map(|p| p.to_string()),
            order_type: self.spec.order_style().to_string(),
            status: "FILLED".to_string(),
            created_time: Some(self.created.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

/// Venue that accepts everything and fills at a fixed price.
///
/// Backs `dry_run` mode and the workflow tests. Limit-priced orders fill at
/// their limit; market orders fill at `fill_price` when one is set. Only
/// the most recent `history` orders are kept. It holds no positions.
pub struct PaperExchange {
    fill_price: Mutex<Option<Decimal>>,
    reject_reason: Mutex<Option<String>>,
    history: usize,
    submitted: Mutex<VecDeque<OrderSpec>>,
    orders: Mutex<VecDeque<PaperOrder>>,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::with_history(DEFAULT_PAPER_HISTORY)
    }
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: usize) -> Self {
        Self {
            fill_price: Mutex::new(None),
            reject_reason: Mutex::new(None),
            history: history.max(1),
            submitted: Mutex::new(VecDeque::new()),
            orders: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_fill_price(price: Decimal) -> Self {
        let paper = Self::new();
        paper.set_fill_price(Some(price));
        paper
    }

    pub fn set_fill_price(&self, price: Option<Decimal>) {
        *self.fill_price.lock() = price;
    }

    /// Refuse every following order with `reason` until cleared.
    pub fn reject_with(&self, reason: Option<&str>) {
        *self.reject_reason.lock() = reason.map(str::to_string);
    }

    /// Orders received, accepted or not, oldest first.
    pub fn submitted(&self) -> Vec<OrderSpec> {
        self.submitted.lock().iter().cloned().collect()
    }

    fn remember<T>(&self, queue: &Mutex<VecDeque<T>>, item: T) {
        let mut queue = queue.lock();
        if queue.len() >= self.history {
            queue.pop_front();
        }
        queue.push_back(item);
    }

    fn unknown(exchange_order_id: &str) -> ExchangeError {
        ExchangeError::Api(format!("Unknown order {}", exchange_order_id))
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn place_order(&self, order: &OrderSpec) -> Result<OrderAck, ExchangeError> {
        self.remember(&self.submitted, order.clone());

        if let Some(reason) = self.reject_reason.lock().clone() {
            return Err(ExchangeError::Rejected(reason));
        }

        let exchange_order_id = format!("paper-{}", order.client_order_id);
        let fill = order
            .configuration
            .limit_price()
            .or(*self.fill_price.lock());
        self.remember(
            &self.orders,
            PaperOrder {
                exchange_order_id: exchange_order_id.clone(),
                spec: order.clone(),
                fill,
                created: Utc::now(),
            },
        );

        info!(
            client_order_id = order.client_order_id,
            product_id = %order.product_id,
            side = %order.side,
            style = %order.order_style(),
            fill = ?fill,
            "📄 Paper order accepted"
        );

        Ok(OrderAck {
            exchange_order_id,
            client_order_id: order.client_order_id,
            average_filled_price: fill,
            t_ack: Utc::now().timestamp_millis(),
        })
    }

    async fn average_filled_price(
        &self,
        exchange_order_id: &str,
    ) -> Result<Option<Decimal>, ExchangeError> {
        self.orders
            .lock()
            .iter()
            .find(|o| o.exchange_order_id == exchange_order_id)
            .map(|o| o.fill)
            .ok_or_else(|| Self::unknown(exchange_order_id))
    }

    async fn order_details(&self, exchange_order_id: &str) -> Result<Value, ExchangeError> {
        let orders = self.orders.lock();
        let order = orders
            .iter()
            .find(|o| o.exchange_order_id == exchange_order_id)
            .ok_or_else(|| Self::unknown(exchange_order_id))?;

        let mut details = serde_json::to_value(order.summary())
            .map_err(|e| ExchangeError::Api(e.to_string()))?;
        details["client_order_id"] = json!(order.spec.client_order_id.to_string());
        details["order_configuration"] = order.spec.configuration.to_payload();
        Ok(details)
    }

    async fn recent_orders(&self, limit: usize) -> Result<Vec<OrderSummary>, ExchangeError> {
        Ok(self
            .orders
            .lock()
            .iter()
            .rev()
            .take(limit)
            .map(PaperOrder::summary)
            .collect())
    }

    async fn positions(&self) -> Result<Vec<PositionSummary>, ExchangeError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "Paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderConfiguration, OrderSize, Side};
    use rust_decimal_macros::dec;

    fn market(id: u64) -> OrderSpec {
        OrderSpec {
            client_order_id: id,
            product_id: "SOL-PERP-INTX".into(),
            side: Side::Buy,
            configuration: OrderConfiguration::MarketIoc { size: OrderSize::Base(dec!(10)) },
            leverage: None,
            margin_type: None,
        }
    }

    #[test]
    fn fills_market_orders_at_configured_price() {
        let paper = PaperExchange::with_fill_price(dec!(1.544));
        let ack = tokio_test::block_on(paper.place_order(&market(1001))).unwrap();

        assert_eq!(ack.exchange_order_id, "paper-1001");
        assert_eq!(ack.average_filled_price, Some(dec!(1.544)));
        assert_eq!(
            tokio_test::block_on(paper.average_filled_price("paper-1001")).unwrap(),
            Some(dec!(1.544))
        );
        assert_eq!(paper.submitted().len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let paper = PaperExchange::with_history(2);
        paper.set_fill_price(Some(dec!(1.5)));
        for id in 1001..=1003 {
            paper.place_order(&market(id)).await.unwrap();
        }

        assert_eq!(paper.submitted().len(), 2);
        assert!(paper.average_filled_price("paper-1001").await.is_err());
        assert_eq!(paper.average_filled_price("paper-1003").await.unwrap(), Some(dec!(1.5)));

        let recent = paper.recent_orders(10).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["paper-1003", "paper-1002"]);
    }

    #[tokio::test]
    async fn order_details_describe_the_order() {
        let paper = PaperExchange::with_fill_price(dec!(2.25));
        paper.place_order(&market(1010)).await.unwrap();

        let details = paper.order_details("paper-1010").await.unwrap();
        assert_eq!(details["client_order_id"], "1010");
        assert_eq!(details["product_id"], "SOL-PERP-INTX");
        assert_eq!(details["average_filled_price"], "2.25");
        assert_eq!(details["order_configuration"]["market_market_ioc"]["base_size"], "10");
        assert!(paper.order_details("paper-9").await.is_err());
        assert!(paper.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejection_is_reported_and_recorded() {
        let paper = PaperExchange::new();
        paper.reject_with(Some("INSUFFICIENT_FUND"));

        let err = paper.place_order(&market(1002)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(ref r) if r == "INSUFFICIENT_FUND"));
        assert_eq!(err.failure_reason(), "INSUFFICIENT_FUND");
        assert_eq!(paper.submitted()[0].client_order_id, 1002);

        paper.reject_with(None);
        let ack = paper.place_order(&market(1003)).await.unwrap();
        assert_eq!(ack.average_filled_price, None);
    }
}
