//! Protective exit legs for a filled market entry.
//!
//! After the entry fills, a stop-limit leg guards the downside and a limit
//! leg takes profit at `risk × rr` away from the fill.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::model::{Side, StopDirection};
use crate::order_compiler::{BASE_SIZE, LIMIT_PRICE, STOP_DIRECTION, STOP_PRICE, StyleParams};

/// Gap between the stop trigger and its limit, as a fraction (0.5%).
pub const STOP_LOSS_BUFFER: Decimal = Decimal::from_parts(5, 0, 0, false, 3);
/// Decimals for entry and take-profit prices.
pub const PRICE_PRECISION: u32 = 4;
/// Decimals for the stop-loss limit price.
pub const STOP_LOSS_PRICE_PRECISION: u32 = 3;

const SUMMARY_COL_WIDTH: usize = 15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradePlanError {
    #[error("Invalid stop loss {stop_loss} for {side} entry filled at {entry}")]
    InvalidStopLoss {
        side: Side,
        entry: Decimal,
        stop_loss: Decimal,
    },
    #[error("Risk/reward ratio must be positive, got {0}")]
    InvalidRiskReward(Decimal),
    #[error("Entry order {client_order_id} reported no average fill price")]
    NoFillPrice { client_order_id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtectivePlan {
    /// Side of the entry order.
    pub side: Side,
    pub product_id: String,
    pub base_size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_trigger: Decimal,
    pub stop_loss_limit: Decimal,
    pub take_profit_price: Decimal,
    pub rr_ratio: Decimal,
}

/// Work out both exit legs from the entry fill.
///
/// `take_profit` overrides the risk/reward target when the alert carried one.
pub fn plan_protective_legs(
    side: Side,
    product_id: &str,
    base_size: Decimal,
    entry_price: Decimal,
    stop_loss: Decimal,
    take_profit: Option<Decimal>,
    rr_ratio: Decimal,
) -> Result<ProtectivePlan, TradePlanError> {
    if rr_ratio <= Decimal::ZERO {
        return Err(TradePlanError::InvalidRiskReward(rr_ratio));
    }

    let risk = match side {
        Side::Buy => entry_price - stop_loss,
        Side::Sell => stop_loss - entry_price,
    };
    if risk <= Decimal::ZERO {
        return Err(TradePlanError::InvalidStopLoss {
            side,
            entry: entry_price,
            stop_loss,
        });
    }

    let computed_tp = match side {
        Side::Buy => entry_price + risk * rr_ratio,
        Side::Sell => entry_price - risk * rr_ratio,
    };
    let take_profit_price = take_profit.unwrap_or(computed_tp).round_dp(PRICE_PRECISION);

    let stop_loss_limit = match side {
        Side::Buy => stop_loss * (Decimal::ONE - STOP_LOSS_BUFFER),
        Side::Sell => stop_loss * (Decimal::ONE + STOP_LOSS_BUFFER),
    }
    .round_dp(STOP_LOSS_PRICE_PRECISION);

    Ok(ProtectivePlan {
        side,
        product_id: product_id.to_string(),
        base_size,
        entry_price,
        stop_loss_trigger: stop_loss,
        stop_loss_limit,
        take_profit_price,
        rr_ratio,
    })
}

impl ProtectivePlan {
    pub fn exit_side(&self) -> Side {
        self.side.opposite()
    }

    /// Longs stop out on a falling price, shorts on a rising one.
    pub fn stop_direction(&self) -> StopDirection {
        match self.side {
            Side::Buy => StopDirection::StopDown,
            Side::Sell => StopDirection::StopUp,
        }
    }

    /// Parameters of the STOP_LIMIT_GTC stop-loss leg.
    pub fn stop_loss_params(&self) -> StyleParams {
        StyleParams::new()
            .with(BASE_SIZE, self.base_size.to_string())
            .with(LIMIT_PRICE, self.stop_loss_limit.to_string())
            .with(STOP_PRICE, self.stop_loss_trigger.to_string())
            .with(STOP_DIRECTION, self.stop_direction().as_api_str())
    }

    /// Parameters of the LIMIT_GTC take-profit leg.
    pub fn take_profit_params(&self) -> StyleParams {
        StyleParams::new()
            .with(BASE_SIZE, self.base_size.to_string())
            .with(LIMIT_PRICE, self.take_profit_price.to_string())
    }

    fn position_label(&self) -> &'static str {
        match self.side {
            Side::Buy => "LONG",
            Side::Sell => "SHORT",
        }
    }

    fn distance_pct(&self, price: Decimal) -> Decimal {
        ((price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED).round_dp(1)
    }
}

fn format_price(value: Decimal) -> String {
    value.round_dp(PRICE_PRECISION).normalize().to_string()
}

fn format_percent(value: Decimal) -> String {
    let v = value.normalize();
    if v > Decimal::ZERO {
        format!("+{}%", v)
    } else {
        format!("{}%", v)
    }
}

/// Financial summary table, take-profit column first for longs and
/// stop-loss column first for shorts.
impl fmt::Display for ProtectivePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = SUMMARY_COL_WIDTH;
        let tp = (
            "Take Profit",
            format_price(self.take_profit_price),
            format_percent(self.distance_pct(self.take_profit_price)),
        );
        let sl = (
            "Stop Loss",
            format_price(self.stop_loss_trigger),
            format_percent(self.distance_pct(self.stop_loss_trigger)),
        );
        let (left, right) = match self.side {
            Side::Buy => (tp, sl),
            Side::Sell => (sl, tp),
        };

        writeln!(f, "===== FINANCIAL SUMMARY =====")?;
        writeln!(
            f,
            "Product: {} | Size: {} | Side: {} | Risk-Profit Ratio: {}",
            self.product_id,
            self.base_size,
            self.position_label(),
            self.rr_ratio.to_string().replace('.', ",")
        )?;
        writeln!(f, "{:10}{:<w$}{:<w$}{:<w$}", "", left.0, "Entry Price", right.0)?;
        writeln!(
            f,
            "{:10}{:<w$}{:<w$}{:<w$}",
            "Price",
            left.1,
            format_price(self.entry_price),
            right.1
        )?;
        writeln!(f, "{:10}{:<w$}{:<w$}{:<w$}", "Diff", left.2, "0%", right.2)?;
        write!(f, "{}", "=".repeat(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_plan_math() {
        let plan = plan_protective_legs(
            Side::Buy,
            "SOL-PERP-INTX",
            dec!(10),
            dec!(1.5432),
            dec!(1.51),
            None,
            dec!(2.0),
        )
        .unwrap();

        // risk 0.0332, tp = 1.5432 + 0.0664
        assert_eq!(plan.take_profit_price, dec!(1.6096));
        // 1.51 * 0.995 = 1.50245
        assert_eq!(plan.stop_loss_limit, dec!(1.502));
        assert_eq!(plan.stop_loss_trigger, dec!(1.51));
        assert_eq!(plan.exit_side(), Side::Sell);
        assert_eq!(plan.stop_direction(), StopDirection::StopDown);
    }

    #[test]
    fn short_plan_is_mirrored() {
        let plan = plan_protective_legs(
            Side::Sell,
            "NEO-PERP-INTX",
            dec!(1),
            dec!(100),
            dec!(105),
            None,
            dec!(2),
        )
        .unwrap();

        assert_eq!(plan.take_profit_price, dec!(90));
        assert_eq!(plan.stop_loss_limit, dec!(105.525));
        assert_eq!(plan.exit_side(), Side::Buy);
        assert_eq!(plan.stop_direction(), StopDirection::StopUp);
    }

    #[test]
    fn alert_take_profit_wins() {
        let plan = plan_protective_legs(
            Side::Buy,
            "SOL-PERP-INTX",
            dec!(1),
            dec!(100),
            dec!(95),
            Some(dec!(120.123456)),
            dec!(2),
        )
        .unwrap();
        assert_eq!(plan.take_profit_price, dec!(120.1235));
    }

    #[test]
    fn stop_on_wrong_side_of_fill_is_rejected() {
        let err = plan_protective_legs(
            Side::Buy,
            "SOL-PERP-INTX",
            dec!(1),
            dec!(100),
            dec!(100.5),
            None,
            dec!(2),
        )
        .unwrap_err();
        assert!(matches!(err, TradePlanError::InvalidStopLoss { side: Side::Buy, .. }));

        let err = plan_protective_legs(Side::Sell, "X-PERP", dec!(1), dec!(100), dec!(100), None, dec!(2))
            .unwrap_err();
        assert!(matches!(err, TradePlanError::InvalidStopLoss { .. }));

        let err = plan_protective_legs(Side::Buy, "X-PERP", dec!(1), dec!(100), dec!(95), None, dec!(0))
            .unwrap_err();
        assert_eq!(err, TradePlanError::InvalidRiskReward(dec!(0)));
    }

    #[test]
    fn leg_parameters() {
        let plan = plan_protective_legs(Side::Buy, "NEO-PERP-INTX", dec!(2), dec!(100), dec!(95), None, dec!(2))
            .unwrap();

        let stop = plan.stop_loss_params();
        assert_eq!(stop.get(BASE_SIZE), Some("2"));
        assert_eq!(stop.get(STOP_PRICE), Some("95"));
        assert_eq!(stop.get(LIMIT_PRICE), Some("94.525"));
        assert_eq!(stop.get(STOP_DIRECTION), Some("STOP_DIRECTION_STOP_DOWN"));

        let tp = plan.take_profit_params();
        assert_eq!(tp.get(LIMIT_PRICE), Some("110"));
        assert!(!tp.contains(STOP_PRICE));
    }

    #[test]
    fn summary_lists_distances_from_entry() {
        let plan = plan_protective_legs(Side::Buy, "NEO-PERP-INTX", dec!(1), dec!(100), dec!(95), None, dec!(2.0))
            .unwrap();
        let text = plan.to_string();

        assert!(text.starts_with("===== FINANCIAL SUMMARY ====="));
        assert!(text.contains("Side: LONG | Risk-Profit Ratio: 2,0"));
        assert!(text.contains("+10%"));
        assert!(text.contains("-5%"));
        let header = text.lines().nth(2).unwrap();
        assert!(header.find("Take Profit").unwrap() < header.find("Stop Loss").unwrap());
    }
}
