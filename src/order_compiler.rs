use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::model::{
    MarginType, OrderConfiguration, OrderSize, OrderSpec, OrderStyle, Side, StopDirection,
    TradeIntent,
};
use crate::persistence::{OrderLog, OrderLogError};

// Constants
pub const DEFAULT_BASELINE_ORDER_ID: u64 = 1000;

pub const BASE_SIZE: &str = "base_size";
pub const QUOTE_SIZE: &str = "quote_size";
pub const LIMIT_PRICE: &str = "limit_price";
pub const STOP_PRICE: &str = "stop_price";
pub const STOP_DIRECTION: &str = "stop_direction";
pub const STOP_TRIGGER_PRICE: &str = "stop_trigger_price";
pub const END_TIME: &str = "end_time";
pub const POST_ONLY: &str = "post_only";

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unsupported order style: {0}")]
    UnsupportedStyle(String),
    #[error("{style} requires parameter '{parameter}'")]
    MissingRequiredParameter { style: OrderStyle, parameter: String },
    #[error("{style} does not accept parameter '{parameter}'")]
    UnexpectedParameter { style: OrderStyle, parameter: String },
    #[error("Invalid value for {parameter}: '{value}' ({reason})")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    #[error("Invalid end_time '{value}': {reason}")]
    InvalidEndTime { value: String, reason: String },
    #[error("No client order id left after {last}")]
    IdSpaceExhausted { last: u64 },
    #[error(transparent)]
    Log(#[from] OrderLogError),
}

impl FromStr for OrderStyle {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        if normalized == "MARKET" {
            return Ok(OrderStyle::MarketIoc);
        }
        OrderStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == normalized)
            .ok_or_else(|| CompileError::UnsupportedStyle(s.trim().to_string()))
    }
}

/// Named order parameters. Keys are normalised to `snake_case`, so
/// `limit-price`, `LIMIT_PRICE` and `limit_price` are the same key.
/// Empty values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleParams {
    values: BTreeMap<String, String>,
}

impl StyleParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into().trim().to_string();
        if !value.is_empty() {
            self.values.insert(normalize_key(key), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize_key(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy every entry of `higher` over this set; `higher` wins on conflicts.
    pub fn overlay(&mut self, higher: &StyleParams) {
        for (k, v) in &higher.values {
            self.values.insert(k.clone(), v.clone());
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for StyleParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = StyleParams::new();
        for (k, v) in iter {
            params.insert(k.as_ref(), v);
        }
        params
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

/// Per-style parameter contract, mirroring the exchange's order_configuration schema.
struct StyleContract {
    quote_size_allowed: bool,
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

fn contract(style: OrderStyle) -> StyleContract {
    let (required, optional): (&'static [&'static str], &'static [&'static str]) = match style {
        OrderStyle::MarketIoc => (&[], &[]),
        OrderStyle::LimitGtc => (&[LIMIT_PRICE], &[POST_ONLY]),
        OrderStyle::LimitGtd => (&[LIMIT_PRICE, END_TIME], &[POST_ONLY]),
        OrderStyle::LimitFok => (&[LIMIT_PRICE], &[]),
        OrderStyle::StopLimitGtc => (&[LIMIT_PRICE, STOP_PRICE, STOP_DIRECTION], &[]),
        OrderStyle::StopLimitGtd => (&[LIMIT_PRICE, STOP_PRICE, STOP_DIRECTION, END_TIME], &[]),
        OrderStyle::BracketGtc => (&[LIMIT_PRICE, STOP_TRIGGER_PRICE], &[]),
        OrderStyle::BracketGtd => (&[LIMIT_PRICE, STOP_TRIGGER_PRICE, END_TIME], &[]),
    };
    StyleContract {
        quote_size_allowed: style.accepts_quote_size(),
        required,
        optional,
    }
}

/// Every parameter name the style accepts, sizes included.
pub fn accepted_parameters(style: OrderStyle) -> Vec<&'static str> {
    let c = contract(style);
    let mut names = vec![BASE_SIZE];
    if c.quote_size_allowed {
        names.push(QUOTE_SIZE);
    }
    names.extend_from_slice(c.required);
    names.extend_from_slice(c.optional);
    names
}

/// Validate `params` against the style's contract and build the tagged configuration.
///
/// Checks run in a fixed order: size, required parameters, unexpected
/// parameters, then value parsing. `now` is the reference instant for
/// `end_time`.
pub fn build_configuration(
    style: OrderStyle,
    params: &StyleParams,
    now: DateTime<Utc>,
) -> Result<OrderConfiguration, CompileError> {
    let c = contract(style);

    let has_base = params.contains(BASE_SIZE);
    let has_quote = params.contains(QUOTE_SIZE);
    if !has_base && !(c.quote_size_allowed && has_quote) {
        let parameter = if c.quote_size_allowed {
            format!("{} or {}", BASE_SIZE, QUOTE_SIZE)
        } else {
            BASE_SIZE.to_string()
        };
        return Err(CompileError::MissingRequiredParameter { style, parameter });
    }

    if let Some(missing) = c.required.iter().find(|name| !params.contains(name)) {
        return Err(CompileError::MissingRequiredParameter {
            style,
            parameter: missing.to_string(),
        });
    }

    let accepted = accepted_parameters(style);
    if let Some(extra) = params.keys().find(|k| !accepted.contains(k)) {
        return Err(CompileError::UnexpectedParameter {
            style,
            parameter: extra.to_string(),
        });
    }

    if has_base && has_quote {
        return Err(CompileError::InvalidParameter {
            parameter: format!("{}/{}", BASE_SIZE, QUOTE_SIZE),
            value: format!(
                "{}/{}",
                params.get(BASE_SIZE).unwrap_or_default(),
                params.get(QUOTE_SIZE).unwrap_or_default()
            ),
            reason: "supply exactly one of base_size or quote_size".to_string(),
        });
    }

    let size = if has_base {
        OrderSize::Base(positive_decimal(params, BASE_SIZE)?)
    } else {
        OrderSize::Quote(positive_decimal(params, QUOTE_SIZE)?)
    };

    let configuration = match style {
        OrderStyle::MarketIoc => OrderConfiguration::MarketIoc { size },
        OrderStyle::LimitGtc => OrderConfiguration::LimitGtc {
            size,
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
            post_only: post_only(params)?,
        },
        OrderStyle::LimitGtd => OrderConfiguration::LimitGtd {
            size,
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
            end_time: future_end_time(params, now)?,
            post_only: post_only(params)?,
        },
        OrderStyle::LimitFok => OrderConfiguration::LimitFok {
            size,
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
        },
        OrderStyle::StopLimitGtc => OrderConfiguration::StopLimitGtc {
            base_size: size.amount(),
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
            stop_price: positive_decimal(params, STOP_PRICE)?,
            stop_direction: stop_direction(params)?,
        },
        OrderStyle::StopLimitGtd => OrderConfiguration::StopLimitGtd {
            base_size: size.amount(),
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
            stop_price: positive_decimal(params, STOP_PRICE)?,
            stop_direction: stop_direction(params)?,
            end_time: future_end_time(params, now)?,
        },
        OrderStyle::BracketGtc => OrderConfiguration::BracketGtc {
            base_size: size.amount(),
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
            stop_trigger_price: positive_decimal(params, STOP_TRIGGER_PRICE)?,
        },
        OrderStyle::BracketGtd => OrderConfiguration::BracketGtd {
            base_size: size.amount(),
            limit_price: positive_decimal(params, LIMIT_PRICE)?,
            stop_trigger_price: positive_decimal(params, STOP_TRIGGER_PRICE)?,
            end_time: future_end_time(params, now)?,
        },
    };
    Ok(configuration)
}

fn invalid(parameter: &str, value: &str, reason: impl Into<String>) -> CompileError {
    CompileError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn positive_decimal(params: &StyleParams, key: &str) -> Result<Decimal, CompileError> {
    let raw = params.get(key).unwrap_or_default();
    let value = Decimal::from_str(raw).map_err(|e| invalid(key, raw, e.to_string()))?;
    if value <= Decimal::ZERO {
        return Err(invalid(key, raw, "must be greater than zero"));
    }
    Ok(value)
}

fn post_only(params: &StyleParams) -> Result<bool, CompileError> {
    match params.get(POST_ONLY) {
        None => Ok(false),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid(POST_ONLY, raw, "expected true or false")),
        },
    }
}

fn stop_direction(params: &StyleParams) -> Result<StopDirection, CompileError> {
    let raw = params.get(STOP_DIRECTION).unwrap_or_default();
    raw.parse::<StopDirection>()
        .map_err(|reason| invalid(STOP_DIRECTION, raw, reason))
}

fn future_end_time(params: &StyleParams, now: DateTime<Utc>) -> Result<DateTime<Utc>, CompileError> {
    let raw = params.get(END_TIME).unwrap_or_default();
    let end_time = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| CompileError::InvalidEndTime {
            value: raw.to_string(),
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    if end_time <= now {
        return Err(CompileError::InvalidEndTime {
            value: raw.to_string(),
            reason: format!("must be after {}", now.to_rfc3339()),
        });
    }
    Ok(end_time)
}

#[derive(Debug, Clone)]
pub struct OrderCompilerConfig {
    /// Id the sequence continues from when the log holds no rows.
    pub baseline_order_id: u64,
    pub leverage: Option<String>,
    pub margin_type: Option<MarginType>,
}

impl Default for OrderCompilerConfig {
    fn default() -> Self {
        Self {
            baseline_order_id: DEFAULT_BASELINE_ORDER_ID,
            leverage: None,
            margin_type: None,
        }
    }
}

/// Turns trade intents into exchange-ready orders and owns client order id allocation.
///
/// Allocation reads the shared order log and is not atomic with the later
/// append: callers that can run concurrently must serialise
/// compile → submit → append (see `ExecutionPipeline`).
#[derive(Clone)]
pub struct OrderCompiler {
    config: OrderCompilerConfig,
    log: Arc<dyn OrderLog>,
    ctx: Arc<ExecutionContext>,
}

impl OrderCompiler {
    pub fn new(
        config: Option<OrderCompilerConfig>,
        log: Arc<dyn OrderLog>,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        let config = config.unwrap_or_default();

        info!(
            baseline_order_id = config.baseline_order_id,
            leverage = ?config.leverage,
            margin_type = ?config.margin_type,
            "OrderCompiler initialized"
        );

        Self { config, log, ctx }
    }

    pub fn compile(
        &self,
        intent: &TradeIntent,
        style: OrderStyle,
        params: &StyleParams,
    ) -> Result<OrderSpec, CompileError> {
        self.compile_order(intent.action, &intent.symbol, style, params)
    }

    /// Compile an order that did not come from an alert.
    pub fn compile_order(
        &self,
        side: Side,
        product_id: &str,
        style: OrderStyle,
        params: &StyleParams,
    ) -> Result<OrderSpec, CompileError> {
        let configuration = build_configuration(style, params, self.ctx.time.now())?;
        let client_order_id = self.next_client_order_id()?;

        let spec = OrderSpec {
            client_order_id,
            product_id: product_id.to_string(),
            side,
            configuration,
            leverage: self.config.leverage.clone(),
            margin_type: self.config.margin_type,
        };

        debug!(
            client_order_id,
            product_id,
            style = %style,
            payload = %spec.configuration.to_payload(),
            "Order compiled"
        );
        Ok(spec)
    }

    pub fn next_client_order_id(&self) -> Result<u64, CompileError> {
        let last = self
            .log
            .read_last_id()?
            .unwrap_or(self.config.baseline_order_id);
        last.checked_add(1)
            .ok_or(CompileError::IdSpaceExhausted { last })
    }
}
