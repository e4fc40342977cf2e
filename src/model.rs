use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("side must be BUY or SELL, got '{}'", other)),
        }
    }
}

/// Validated trade instruction produced from an inbound alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeIntent {
    pub action: Side,
    pub symbol: String,
    pub entry_price: Decimal,
    #[serde(default)]
    pub stop_loss_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStyle {
    MarketIoc,
    LimitGtc,
    LimitGtd,
    LimitFok,
    StopLimitGtc,
    StopLimitGtd,
    BracketGtc,
    BracketGtd,
}

impl OrderStyle {
    pub const ALL: [OrderStyle; 8] = [
        OrderStyle::MarketIoc,
        OrderStyle::LimitGtc,
        OrderStyle::LimitGtd,
        OrderStyle::LimitFok,
        OrderStyle::StopLimitGtc,
        OrderStyle::StopLimitGtd,
        OrderStyle::BracketGtc,
        OrderStyle::BracketGtd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStyle::MarketIoc => "MARKET_IOC",
            OrderStyle::LimitGtc => "LIMIT_GTC",
            OrderStyle::LimitGtd => "LIMIT_GTD",
            OrderStyle::LimitFok => "LIMIT_FOK",
            OrderStyle::StopLimitGtc => "STOP_LIMIT_GTC",
            OrderStyle::StopLimitGtd => "STOP_LIMIT_GTD",
            OrderStyle::BracketGtc => "BRACKET_GTC",
            OrderStyle::BracketGtd => "BRACKET_GTD",
        }
    }

    /// Key of the `order_configuration` object in the Coinbase Advanced Trade API.
    pub fn configuration_key(&self) -> &'static str {
        match self {
            OrderStyle::MarketIoc => "market_market_ioc",
            OrderStyle::LimitGtc => "limit_limit_gtc",
            OrderStyle::LimitGtd => "limit_limit_gtd",
            OrderStyle::LimitFok => "limit_limit_fok",
            OrderStyle::StopLimitGtc => "stop_limit_stop_limit_gtc",
            OrderStyle::StopLimitGtd => "stop_limit_stop_limit_gtd",
            OrderStyle::BracketGtc => "trigger_bracket_gtc",
            OrderStyle::BracketGtd => "trigger_bracket_gtd",
        }
    }

    pub fn is_good_til_date(&self) -> bool {
        matches!(
            self,
            OrderStyle::LimitGtd | OrderStyle::StopLimitGtd | OrderStyle::BracketGtd
        )
    }

    /// Styles that accept either `base_size` or `quote_size`. The rest are base-only.
    pub fn accepts_quote_size(&self) -> bool {
        matches!(
            self,
            OrderStyle::MarketIoc | OrderStyle::LimitGtc | OrderStyle::LimitGtd | OrderStyle::LimitFok
        )
    }
}

impl fmt::Display for OrderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopDirection {
    #[serde(rename = "STOP_DIRECTION_STOP_UP")]
    StopUp,
    #[serde(rename = "STOP_DIRECTION_STOP_DOWN")]
    StopDown,
}

impl StopDirection {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            StopDirection::StopUp => "STOP_DIRECTION_STOP_UP",
            StopDirection::StopDown => "STOP_DIRECTION_STOP_DOWN",
        }
    }
}

impl FromStr for StopDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("STOP_DIRECTION_").unwrap_or(&upper) {
            "STOP_UP" => Ok(StopDirection::StopUp),
            "STOP_DOWN" => Ok(StopDirection::StopDown),
            _ => Err(format!("stop_direction must be STOP_UP or STOP_DOWN, got '{}'", s.trim())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    Cross,
    Isolated,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Cross => "CROSS",
            MarginType::Isolated => "ISOLATED",
        }
    }
}

impl FromStr for MarginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CROSS" => Ok(MarginType::Cross),
            "ISOLATED" => Ok(MarginType::Isolated),
            other => Err(format!("margin_type must be CROSS or ISOLATED, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSize {
    Base(Decimal),
    Quote(Decimal),
}

impl OrderSize {
    pub fn amount(&self) -> Decimal {
        match self {
            OrderSize::Base(v) | OrderSize::Quote(v) => *v,
        }
    }

    fn write_into(&self, obj: &mut Map<String, Value>) {
        match self {
            OrderSize::Base(v) => obj.insert("base_size".into(), Value::String(v.to_string())),
            OrderSize::Quote(v) => obj.insert("quote_size".into(), Value::String(v.to_string())),
        };
    }
}

/// One variant per order style. Each carries exactly the parameter set the
/// exchange accepts for that style.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderConfiguration {
    MarketIoc {
        size: OrderSize,
    },
    LimitGtc {
        size: OrderSize,
        limit_price: Decimal,
        post_only: bool,
    },
    LimitGtd {
        size: OrderSize,
        limit_price: Decimal,
        end_time: DateTime<Utc>,
        post_only: bool,
    },
    LimitFok {
        size: OrderSize,
        limit_price: Decimal,
    },
    StopLimitGtc {
        base_size: Decimal,
        limit_price: Decimal,
        stop_price: Decimal,
        stop_direction: StopDirection,
    },
    StopLimitGtd {
        base_size: Decimal,
        limit_price: Decimal,
        stop_price: Decimal,
        stop_direction: StopDirection,
        end_time: DateTime<Utc>,
    },
    BracketGtc {
        base_size: Decimal,
        limit_price: Decimal,
        stop_trigger_price: Decimal,
    },
    BracketGtd {
        base_size: Decimal,
        limit_price: Decimal,
        stop_trigger_price: Decimal,
        end_time: DateTime<Utc>,
    },
}

impl OrderConfiguration {
    pub fn style(&self) -> OrderStyle {
        match self {
            OrderConfiguration::MarketIoc { .. } => OrderStyle::MarketIoc,
            OrderConfiguration::LimitGtc { .. } => OrderStyle::LimitGtc,
            OrderConfiguration::LimitGtd { .. } => OrderStyle::LimitGtd,
            OrderConfiguration::LimitFok { .. } => OrderStyle::LimitFok,
            OrderConfiguration::StopLimitGtc { .. } => OrderStyle::StopLimitGtc,
            OrderConfiguration::StopLimitGtd { .. } => OrderStyle::StopLimitGtd,
            OrderConfiguration::BracketGtc { .. } => OrderStyle::BracketGtc,
            OrderConfiguration::BracketGtd { .. } => OrderStyle::BracketGtd,
        }
    }

    pub fn size(&self) -> OrderSize {
        match self {
            OrderConfiguration::MarketIoc { size }
            | OrderConfiguration::LimitGtc { size, .. }
            | OrderConfiguration::LimitGtd { size, .. }
            | OrderConfiguration::LimitFok { size, .. } => *size,
            OrderConfiguration::StopLimitGtc { base_size, .. }
            | OrderConfiguration::StopLimitGtd { base_size, .. }
            | OrderConfiguration::BracketGtc { base_size, .. }
            | OrderConfiguration::BracketGtd { base_size, .. } => OrderSize::Base(*base_size),
        }
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderConfiguration::MarketIoc { .. } => None,
            OrderConfiguration::LimitGtc { limit_price, .. }
            | OrderConfiguration::LimitGtd { limit_price, .. }
            | OrderConfiguration::LimitFok { limit_price, .. }
            | OrderConfiguration::StopLimitGtc { limit_price, .. }
            | OrderConfiguration::StopLimitGtd { limit_price, .. }
            | OrderConfiguration::BracketGtc { limit_price, .. }
            | OrderConfiguration::BracketGtd { limit_price, .. } => Some(*limit_price),
        }
    }

    /// Nested parameter object for this style, without the style key.
    pub fn parameters(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        self.size().write_into(&mut obj);

        if let Some(price) = self.limit_price() {
            obj.insert("limit_price".into(), Value::String(price.to_string()));
        }

        match self {
            OrderConfiguration::MarketIoc { .. } | OrderConfiguration::LimitFok { .. } => {}
            OrderConfiguration::LimitGtc { post_only, .. } => {
                obj.insert("post_only".into(), Value::Bool(*post_only));
            }
            OrderConfiguration::LimitGtd { end_time, post_only, .. } => {
                obj.insert("end_time".into(), Value::String(format_end_time(end_time)));
                obj.insert("post_only".into(), Value::Bool(*post_only));
            }
            OrderConfiguration::StopLimitGtc { stop_price, stop_direction, .. } => {
                obj.insert("stop_price".into(), Value::String(stop_price.to_string()));
                obj.insert("stop_direction".into(), Value::String(stop_direction.as_api_str().into()));
            }
            OrderConfiguration::StopLimitGtd { stop_price, stop_direction, end_time, .. } => {
                obj.insert("stop_price".into(), Value::String(stop_price.to_string()));
                obj.insert("stop_direction".into(), Value::String(stop_direction.as_api_str().into()));
                obj.insert("end_time".into(), Value::String(format_end_time(end_time)));
            }
            OrderConfiguration::BracketGtc { stop_trigger_price, .. } => {
                obj.insert("stop_trigger_price".into(), Value::String(stop_trigger_price.to_string()));
            }
            OrderConfiguration::BracketGtd { stop_trigger_price, end_time, .. } => {
                obj.insert("stop_trigger_price".into(), Value::String(stop_trigger_price.to_string()));
                obj.insert("end_time".into(), Value::String(format_end_time(end_time)));
            }
        }
        obj
    }

    /// `{ "<style key>": { ...parameters } }`, as sent in `order_configuration`.
    pub fn to_payload(&self) -> Value {
        let mut outer = Map::new();
        outer.insert(self.style().configuration_key().into(), Value::Object(self.parameters()));
        Value::Object(outer)
    }
}

fn format_end_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Fully-formed order ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub client_order_id: u64,
    pub product_id: String,
    pub side: Side,
    pub configuration: OrderConfiguration,
    pub leverage: Option<String>,
    pub margin_type: Option<MarginType>,
}

impl OrderSpec {
    pub fn order_style(&self) -> OrderStyle {
        self.configuration.style()
    }

    /// Amount as recorded in the order log.
    pub fn amount(&self) -> String {
        self.configuration.size().amount().to_string()
    }

    pub fn to_request_body(&self) -> Value {
        let mut body = json!({
            "client_order_id": self.client_order_id.to_string(),
            "product_id": self.product_id,
            "side": self.side.as_str(),
            "order_configuration": self.configuration.to_payload(),
        });
        if let Some(leverage) = &self.leverage {
            body["leverage"] = Value::String(leverage.clone());
        }
        if let Some(margin_type) = &self.margin_type {
            body["margin_type"] = Value::String(margin_type.as_str().into());
        }
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Executed,
    Failed(String),
}

impl OrderOutcome {
    pub const FAILED_PREFIX: &'static str = "failed reason: ";

    pub fn is_executed(&self) -> bool {
        matches!(self, OrderOutcome::Executed)
    }
}

impl fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderOutcome::Executed => f.write_str("executed"),
            OrderOutcome::Failed(reason) => write!(f, "{}{}", Self::FAILED_PREFIX, reason),
        }
    }
}

impl FromStr for OrderOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "executed" {
            Ok(OrderOutcome::Executed)
        } else if let Some(reason) = s.strip_prefix(Self::FAILED_PREFIX) {
            Ok(OrderOutcome::Failed(reason.to_string()))
        } else if let Some(reason) = s.strip_prefix("failed_") {
            // older rows used `failed_<reason>`
            Ok(OrderOutcome::Failed(reason.to_string()))
        } else {
            Err(format!("unrecognised outcome '{}'", s))
        }
    }
}

/// One row of the append-only order log.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLogEntry {
    pub client_order_id: u64,
    pub timestamp: DateTime<Utc>,
    pub action: Side,
    pub symbol: String,
    pub amount: String,
    pub outcome: OrderOutcome,
}

impl OrderLogEntry {
    pub fn for_order(spec: &OrderSpec, timestamp: DateTime<Utc>, outcome: OrderOutcome) -> Self {
        Self {
            client_order_id: spec.client_order_id,
            timestamp,
            action: spec.side,
            symbol: spec.product_id.clone(),
            amount: spec.amount(),
            outcome,
        }
    }
}

/// Result of one order workflow, as printed by the CLI and returned by the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub local_order_id: u64,
    pub exchange_order_id: Option<String>,
    pub average_filled_price: Option<Decimal>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub exit_code: i32,
}
