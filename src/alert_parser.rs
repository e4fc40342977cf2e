use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Side, TradeIntent};
use crate::symbol_map::SymbolMap;

pub const FIELD_DELIMITER: char = ';';

/// Fractional digits the charting side is configured to emit.
pub const EXPECTED_PRICE_SCALE: u32 = 3;

const MIN_FIELDS: usize = 3;
const MAX_FIELDS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("Malformed alert: {0}")]
    MalformedAlert(String),
    #[error("Invalid price for {field}: '{value}'")]
    InvalidPrice { field: &'static str, value: String },
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Invalid stop loss {stop_loss} for {action} entry at {entry}")]
    InvalidStopLoss {
        action: Side,
        entry: Decimal,
        stop_loss: Decimal,
    },
}

#[derive(Clone)]
pub struct AlertParser {
    symbols: Arc<SymbolMap>,
}

impl AlertParser {
    pub fn new(symbols: Arc<SymbolMap>) -> Self {
        Self { symbols }
    }

    pub fn parse(&self, alert_text: &str) -> Result<TradeIntent, AlertError> {
        parse_alert(alert_text, &self.symbols)
    }
}

/// Parse `ACTION;SYMBOL;ENTRY[;STOP_LOSS[;TAKE_PROFIT]]` into a validated intent.
pub fn parse_alert(alert_text: &str, symbols: &SymbolMap) -> Result<TradeIntent, AlertError> {
    let fields: Vec<&str> = alert_text.trim().split(FIELD_DELIMITER).map(str::trim).collect();

    if !(MIN_FIELDS..=MAX_FIELDS).contains(&fields.len()) {
        return Err(AlertError::MalformedAlert(format!(
            "expected {} to {} '{}'-separated fields, got {}",
            MIN_FIELDS,
            MAX_FIELDS,
            FIELD_DELIMITER,
            fields.len()
        )));
    }

    let action = fields[0]
        .parse::<Side>()
        .map_err(AlertError::MalformedAlert)?;

    let symbol = resolve_symbol(fields[1], symbols)?;

    if fields[2].is_empty() {
        return Err(AlertError::MalformedAlert("entry price is required".to_string()));
    }
    let entry_price = parse_price("entry_price", fields[2])?;
    let stop_loss_price = optional_price("stop_loss_price", fields.get(3).copied())?;
    let take_profit_price = optional_price("take_profit_price", fields.get(4).copied())?;

    if let Some(stop_loss) = stop_loss_price {
        let on_loss_side = match action {
            Side::Buy => stop_loss < entry_price,
            Side::Sell => stop_loss > entry_price,
        };
        if !on_loss_side {
            return Err(AlertError::InvalidStopLoss {
                action,
                entry: entry_price,
                stop_loss,
            });
        }
    }

    let intent = TradeIntent {
        action,
        symbol,
        entry_price,
        stop_loss_price,
        take_profit_price,
    };
    debug!(?intent, "Alert parsed");
    Ok(intent)
}

fn resolve_symbol(raw: &str, symbols: &SymbolMap) -> Result<String, AlertError> {
    if raw.is_empty() {
        return Err(AlertError::MalformedAlert("symbol is required".to_string()));
    }
    // Hyphenated symbols are already exchange-native.
    if raw.contains('-') {
        return Ok(raw.to_string());
    }
    symbols
        .lookup(raw)
        .map(str::to_string)
        .ok_or_else(|| AlertError::UnknownSymbol(raw.to_string()))
}

fn optional_price(field: &'static str, raw: Option<&str>) -> Result<Option<Decimal>, AlertError> {
    match raw {
        None | Some("") => Ok(None),
        Some(value) => parse_price(field, value).map(Some),
    }
}

fn parse_price(field: &'static str, raw: &str) -> Result<Decimal, AlertError> {
    let invalid = || AlertError::InvalidPrice {
        field,
        value: raw.to_string(),
    };

    let price = Decimal::from_str(raw).map_err(|_| invalid())?;
    if price <= Decimal::ZERO {
        return Err(invalid());
    }
    if price.scale() > EXPECTED_PRICE_SCALE {
        warn!(field, value = raw, "Price carries more fractional digits than expected");
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbols() -> SymbolMap {
        SymbolMap::from_entries([("SOLUSDC", "SOL-PERP-INTX"), ("BTCUSDC", "BTC-PERP-INTX")]).unwrap()
    }

    #[test]
    fn parses_entry_only_alert() {
        let intent = parse_alert("BUY;SOLUSDC;1.543", &symbols()).unwrap();
        assert_eq!(
            intent,
            TradeIntent {
                action: Side::Buy,
                symbol: "SOL-PERP-INTX".into(),
                entry_price: dec!(1.543),
                stop_loss_price: None,
                take_profit_price: None,
            }
        );
    }

    #[test]
    fn keeps_decimal_scale() {
        let intent = parse_alert("sell;BTCUSDC;64000.100;64500.250;62000.000", &symbols()).unwrap();
        assert_eq!(intent.action, Side::Sell);
        assert_eq!(intent.entry_price.to_string(), "64000.100");
        assert_eq!(intent.stop_loss_price.unwrap().to_string(), "64500.250");
        assert_eq!(intent.take_profit_price.unwrap().to_string(), "62000.000");
    }

    #[test]
    fn tolerates_short_fractions() {
        let intent = parse_alert("BUY;SOLUSDC;2;1.5", &symbols()).unwrap();
        assert_eq!(intent.entry_price, dec!(2));
        assert_eq!(intent.stop_loss_price, Some(dec!(1.5)));
    }

    #[test]
    fn stop_loss_must_sit_on_the_loss_side() {
        let err = parse_alert("BUY;SOLUSDC;1.543;1.600", &symbols()).unwrap_err();
        assert!(matches!(err, AlertError::InvalidStopLoss { action: Side::Buy, .. }));

        let short = parse_alert("SELL;SOLUSDC;1.543;1.600", &symbols()).unwrap();
        assert_eq!(short.stop_loss_price, Some(dec!(1.600)));

        let equal = parse_alert("SELL;SOLUSDC;1.543;1.543", &symbols()).unwrap_err();
        assert!(matches!(equal, AlertError::InvalidStopLoss { .. }));
    }

    #[test]
    fn empty_optionals_are_absent() {
        let intent = parse_alert("BUY;SOLUSDC;1.543;;1.700", &symbols()).unwrap();
        assert_eq!(intent.stop_loss_price, None);
        assert_eq!(intent.take_profit_price, Some(dec!(1.700)));

        let trailing = parse_alert("BUY;SOLUSDC;1.543;\n", &symbols()).unwrap();
        assert_eq!(trailing.stop_loss_price, None);
    }

    #[test]
    fn hyphenated_symbols_pass_through() {
        let intent = parse_alert("BUY;ETH-PERP-INTX;3000.5", &SymbolMap::new()).unwrap();
        assert_eq!(intent.symbol, "ETH-PERP-INTX");
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let err = parse_alert("BUY;DOGEUSDC;0.123", &symbols()).unwrap_err();
        assert_eq!(err, AlertError::UnknownSymbol("DOGEUSDC".into()));
    }

    #[test]
    fn rejects_malformed_shapes() {
        for text in ["", "BUY;SOLUSDC", "BUY;SOLUSDC;1;0.5;2;9", "HOLD;SOLUSDC;1.5", "BUY;;1.5", "BUY;SOLUSDC;"] {
            let err = parse_alert(text, &symbols()).unwrap_err();
            assert!(matches!(err, AlertError::MalformedAlert(_)), "{:?} -> {:?}", text, err);
        }
    }

    #[test]
    fn rejects_non_numeric_and_non_positive_prices() {
        let err = parse_alert("BUY;SOLUSDC;abc", &symbols()).unwrap_err();
        assert_eq!(
            err,
            AlertError::InvalidPrice { field: "entry_price", value: "abc".into() }
        );

        let err = parse_alert("BUY;SOLUSDC;1.5;-1", &symbols()).unwrap_err();
        assert!(matches!(err, AlertError::InvalidPrice { field: "stop_loss_price", .. }));

        let err = parse_alert("BUY;SOLUSDC;0", &symbols()).unwrap_err();
        assert!(matches!(err, AlertError::InvalidPrice { .. }));
    }
}
