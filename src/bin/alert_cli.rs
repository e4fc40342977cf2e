//! Alert execution CLI.
//!
//! Commands:
//! - `parse`: validate an alert string and print the trade intent
//! - `alert`: run an alert through the full pipeline
//! - `order`: place a single order of any style
//! - `trade`: market entry followed by stop-loss and take-profit legs
//! - `history`: print the order log
//! - `order-info`: print one exchange order as JSON
//! - `info`: recent exchange orders and open perpetual positions

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tracing::{error, warn};

use alert_execution_rs::alert_parser::AlertParser;
use alert_execution_rs::config::Settings;
use alert_execution_rs::model::{OrderStyle, Side};
use alert_execution_rs::order_compiler::{
    BASE_SIZE, CompileError, END_TIME, LIMIT_PRICE, POST_ONLY, STOP_DIRECTION, STOP_PRICE,
    STOP_TRIGGER_PRICE, StyleParams,
};
use alert_execution_rs::persistence::CsvOrderLog;
use alert_execution_rs::exchange::{OrderSummary, PositionSummary};
use alert_execution_rs::pipeline::{ExecutionPipeline, WorkflowError, exchange_from_settings};
use alert_execution_rs::symbol_map::SymbolMap;
use alert_execution_rs::telemetry;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "alert-cli", about = "Alert execution CLI for Coinbase Advanced Trade")]
struct Cli {
    /// Extra configuration file layered over config/config and config/local.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Route orders to the paper exchange instead of Coinbase.
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate an alert (`ACTION;SYMBOL;ENTRY[;STOP_LOSS[;TAKE_PROFIT]]`) and print the intent.
    Parse {
        alert: String,
    },
    /// Run an alert through parse, compile, submit and log.
    Alert {
        alert: String,

        /// Order style. Defaults to the configured style.
        #[arg(long)]
        style: Option<String>,

        /// Named style parameter, `key=value`. Repeatable; wins over values derived from the alert.
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
    /// Place a single order. Defaults to MARKET_IOC.
    Order(OrderArgs),
    /// Market entry, then a buffered stop-loss and a risk/reward take-profit.
    Trade(TradeArgs),
    /// Print the order log, oldest first.
    History {
        /// Only the last N rows.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print one order, by exchange order id, as single-line JSON.
    OrderInfo {
        exchange_order_id: String,
    },
    /// Show the latest exchange orders and open perpetual positions.
    Info {
        /// Rows per table.
        #[arg(default_value_t = 3)]
        number: usize,
    },
}

#[derive(Args, Debug)]
struct OrderArgs {
    /// Side (BUY or SELL), if used positionally.
    pos_side: Option<String>,
    /// Product code (e.g. BTC-USD), if used positionally.
    pos_product: Option<String>,
    /// Order amount (base size), if used positionally.
    pos_amount: Option<String>,

    #[arg(long)]
    side: Option<String>,
    #[arg(long)]
    product: Option<String>,
    /// Base size (quantity) to trade.
    #[arg(long)]
    amount: Option<String>,

    /// Order style, e.g. market, limit_gtc, stop_limit_gtd, bracket_gtc.
    #[arg(long, default_value = "market")]
    option: String,

    /// Shortcut for --option limit_gtc.
    #[arg(long, default_value_t = false)]
    limit_gtc: bool,
    /// Shortcut for --option limit_fok.
    #[arg(long, default_value_t = false)]
    limit_fok: bool,
    /// Shortcut for --option market_ioc.
    #[arg(long, default_value_t = false)]
    market_ioc: bool,
    /// Shortcut for --option limit_gtd.
    #[arg(long, default_value_t = false)]
    limit_gtd: bool,

    #[arg(long)]
    limit_price: Option<String>,
    #[arg(long)]
    stop_price: Option<String>,
    /// STOP_UP / STOP_DOWN (or the STOP_DIRECTION_ spellings).
    #[arg(long)]
    stop_direction: Option<String>,
    /// true / false, limit orders only.
    #[arg(long)]
    post_only: Option<String>,
    /// RFC 3339 expiry for GTD styles.
    #[arg(long)]
    end_time: Option<String>,
    #[arg(long)]
    stop_trigger_price: Option<String>,
}

#[derive(Debug, PartialEq)]
struct ResolvedOrder {
    side: Side,
    product: String,
    amount: String,
    style: OrderStyle,
    params: StyleParams,
}

impl OrderArgs {
    /// Named flags win over positional arguments.
    fn resolve(&self) -> Result<ResolvedOrder, String> {
        let side = self
            .side
            .as_ref()
            .or(self.pos_side.as_ref())
            .ok_or("Missing side (BUY or SELL). Use positional or --side.")?
            .parse::<Side>()?;
        let product = self
            .product
            .as_ref()
            .or(self.pos_product.as_ref())
            .ok_or("Missing product (e.g. BTC-USD). Use positional or --product.")?
            .trim()
            .to_ascii_uppercase();
        let amount = self
            .amount
            .as_ref()
            .or(self.pos_amount.as_ref())
            .ok_or("Missing amount (base size). Use positional or --amount.")?
            .trim()
            .to_string();

        let style = self.style().map_err(|e| e.to_string())?;

        let mut params = StyleParams::new().with(BASE_SIZE, amount.clone());
        for (key, value) in [
            (LIMIT_PRICE, &self.limit_price),
            (STOP_PRICE, &self.stop_price),
            (STOP_DIRECTION, &self.stop_direction),
            (POST_ONLY, &self.post_only),
            (END_TIME, &self.end_time),
            (STOP_TRIGGER_PRICE, &self.stop_trigger_price),
        ] {
            if let Some(v) = value {
                params.insert(key, v.as_str());
            }
        }

        Ok(ResolvedOrder {
            side,
            product,
            amount,
            style,
            params,
        })
    }

    /// Shortcut flags override `--option`; the last one listed wins.
    fn style(&self) -> Result<OrderStyle, CompileError> {
        let shortcuts = [
            (self.limit_gtc, OrderStyle::LimitGtc),
            (self.limit_fok, OrderStyle::LimitFok),
            (self.market_ioc, OrderStyle::MarketIoc),
            (self.limit_gtd, OrderStyle::LimitGtd),
        ];
        match shortcuts.iter().rev().find(|(set, _)| *set) {
            Some((_, style)) => Ok(*style),
            None => self.option.parse(),
        }
    }
}

#[derive(Args, Debug)]
struct TradeArgs {
    /// Position side: LONG or SHORT (BUY / SELL accepted).
    #[arg(long)]
    side: String,
    /// Instrument code, e.g. NEO-PERP-INTX.
    #[arg(long)]
    product: String,
    /// Order size (base quantity).
    #[arg(long)]
    size: Decimal,
    /// Price at which the stop loss triggers.
    #[arg(long)]
    stop_loss_price: Decimal,
    /// Explicit take profit instead of the risk/reward target.
    #[arg(long)]
    take_profit_price: Option<Decimal>,
    /// Risk/reward ratio for the take profit. Defaults to the configured ratio (2.0).
    #[arg(long)]
    rr_ratio: Option<Decimal>,
}

fn parse_position_side(raw: &str) -> Result<Side, String> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "LONG" | "BUY" => Ok(Side::Buy),
        "SHORT" | "SELL" => Ok(Side::Sell),
        other => Err(format!("Invalid side '{}'. Use LONG or SHORT.", other)),
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the failed-order report when there is one and exit non-zero.
fn fail(err: WorkflowError) -> ! {
    error!("{}", err);
    if let Some(report) = err.failure_report() {
        if let Ok(text) = serde_json::to_string_pretty(report) {
            println!("{}", text);
        }
    }
    process::exit(1);
}

/// Plain ASCII table, columns as wide as their widest cell.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let separator = format!(
        "+{}+",
        widths.iter().map(|w| "-".repeat(w + 2)).collect::<Vec<_>>().join("+")
    );
    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!(" {:<width$} ", c, width = *w))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = vec![separator.clone(), line(headers.to_vec()), separator.clone()];
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.push(separator);
    out.join("\n")
}

fn na(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "N/A".to_string())
}

fn orders_table(orders: &[OrderSummary]) -> String {
    let rows: Vec<Vec<String>> = orders
        .iter()
        .map(|o| {
            vec![
                o.product_id.clone(),
                o.side.clone(),
                na(&o.base_size),
                na(&o.average_filled_price),
                o.order_type.clone(),
                o.status.clone(),
                na(&o.created_time),
                o.order_id.clone(),
            ]
        })
        .collect();
    render_table(
        &["Product", "Side", "Size", "Price", "Type", "Status", "Time", "Order ID"],
        &rows,
    )
}

fn positions_table(positions: &[PositionSummary]) -> String {
    let rows: Vec<Vec<String>> = positions
        .iter()
        .map(|p| {
            vec![
                p.product_id.clone(),
                na(&p.entry_price),
                na(&p.mark_price),
                p.net_size.clone(),
                na(&p.notional),
                na(&p.pnl),
                p.side.clone(),
            ]
        })
        .collect();
    render_table(
        &["Symbol", "Entry Price", "Current Price", "Size", "Total Value", "PnL", "Side"],
        &rows,
    )
}

fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.dry_run {
        settings.execution.dry_run = true;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing(true);

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match &cli.command {
        Commands::Parse { alert } => {
            let parser = AlertParser::new(Arc::new(SymbolMap::from_config(&settings.symbols)?));
            match parser.parse(alert) {
                Ok(intent) => print_json(&intent)?,
                Err(e) => fail(e.into()),
            }
        }
        Commands::Alert { alert, style, params } => {
            let pipeline = ExecutionPipeline::from_settings(&settings)?;
            let style = match style.as_deref().map(str::parse::<OrderStyle>).transpose() {
                Ok(style) => style,
                Err(e) => fail(e.into()),
            };
            let named: StyleParams = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            match pipeline.handle_alert(alert, style, &named).await {
                Ok(run) => {
                    if let Some(summary) = &run.summary {
                        eprintln!("{}", summary);
                    }
                    print_json(&run)?;
                    if run.exit_code() != 0 {
                        process::exit(1);
                    }
                }
                Err(e) => fail(e),
            }
        }
        Commands::Order(args) => {
            let order = match args.resolve() {
                Ok(order) => order,
                Err(message) => {
                    error!("{}", message);
                    process::exit(1);
                }
            };
            let pipeline = ExecutionPipeline::from_settings(&settings)?;
            match pipeline
                .execute(order.side, &order.product, order.style, &order.params)
                .await
            {
                Ok(report) => print_json(&report)?,
                Err(e) => fail(e),
            }
        }
        Commands::Trade(args) => {
            let side = match parse_position_side(&args.side) {
                Ok(side) => side,
                Err(message) => {
                    error!("{}", message);
                    process::exit(1);
                }
            };
            let pipeline = ExecutionPipeline::from_settings(&settings)?;
            let rr_ratio = args.rr_ratio.unwrap_or(pipeline.settings().rr_ratio);
            match pipeline
                .execute_trade_plan(
                    side,
                    &args.product.trim().to_ascii_uppercase(),
                    args.size,
                    args.stop_loss_price,
                    args.take_profit_price,
                    rr_ratio,
                )
                .await
            {
                Ok(run) => {
                    print_json(&run.reports())?;
                    // summary goes last, without log prefixes
                    println!("{}", run.plan);
                    if run.exit_code() != 0 {
                        process::exit(1);
                    }
                }
                Err(e) => fail(e),
            }
        }
        Commands::History { limit } => {
            let log = CsvOrderLog::new(settings.execution.order_log_path());
            let entries = log.entries()?;
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for entry in entries.iter().skip(skip) {
                println!(
                    "{},{},{},{},{},{}",
                    entry.client_order_id,
                    entry.timestamp.to_rfc3339(),
                    entry.action,
                    entry.symbol,
                    entry.amount,
                    entry.outcome
                );
            }
        }
        Commands::OrderInfo { exchange_order_id } => {
            let exchange = exchange_from_settings(&settings)?;
            match exchange.order_details(exchange_order_id).await {
                Ok(order) => println!("{}", serde_json::to_string(&order)?),
                Err(e) => {
                    error!(exchange_order_id = %exchange_order_id, "Order lookup failed: {}", e);
                    process::exit(1);
                }
            }
        }
        Commands::Info { number } => {
            let exchange = exchange_from_settings(&settings)?;
            let orders = exchange.recent_orders(*number).await?;
            if !orders.is_empty() {
                println!("{}", orders_table(&orders));
            }
            match exchange.positions().await {
                Ok(positions) if !positions.is_empty() => {
                    let shown = positions.len().min(*number);
                    println!("{}", positions_table(&positions[..shown]));
                }
                Ok(_) => {}
                Err(e) => warn!("Positions unavailable: {}", e),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_args(argv: &[&str]) -> OrderArgs {
        let mut full = vec!["alert-cli", "order"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Order(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn positional_arguments() {
        let order = order_args(&["BUY", "btc-usd", "10"]).resolve().unwrap();
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.product, "BTC-USD");
        assert_eq!(order.amount, "10");
        assert_eq!(order.style, OrderStyle::MarketIoc);
        assert_eq!(order.params.get(BASE_SIZE), Some("10"));
    }

    #[test]
    fn named_flags_win_over_positionals() {
        let order = order_args(&["BUY", "BTC-USD", "10", "--side", "SELL", "--amount", "0.5"])
            .resolve()
            .unwrap();
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.product, "BTC-USD");
        assert_eq!(order.amount, "0.5");
    }

    #[test]
    fn missing_side_is_reported() {
        let err = order_args(&["--product", "BTC-USD", "--amount", "1"]).resolve().unwrap_err();
        assert!(err.contains("Missing side"));
    }

    #[test]
    fn style_flags_and_parameters() {
        let order = order_args(&[
            "--side", "SELL", "--product", "ETH-USD", "--amount", "0.05",
            "--option", "stop_limit_gtd",
            "--limit-price", "1700", "--stop-price", "1800",
            "--stop-direction", "STOP_DIRECTION_STOP_DOWN",
            "--end-time", "2030-06-10T12:00:00Z",
        ])
        .resolve()
        .unwrap();

        assert_eq!(order.style, OrderStyle::StopLimitGtd);
        assert_eq!(order.params.get(STOP_PRICE), Some("1800"));
        assert_eq!(order.params.get(END_TIME), Some("2030-06-10T12:00:00Z"));
        assert!(!order.params.contains(POST_ONLY));
    }

    #[test]
    fn shortcut_overrides_option() {
        let args = order_args(&["BUY", "BTC-USD", "1", "--option", "bracket_gtc", "--limit-fok"]);
        assert_eq!(args.style().unwrap(), OrderStyle::LimitFok);

        let args = order_args(&["BUY", "BTC-USD", "1", "--limit-gtc", "--limit-gtd"]);
        assert_eq!(args.style().unwrap(), OrderStyle::LimitGtd);

        let args = order_args(&["BUY", "BTC-USD", "1", "--option", "limit_ioc"]);
        assert!(matches!(args.style(), Err(CompileError::UnsupportedStyle(_))));
    }

    #[test]
    fn info_commands_parse() {
        let cli = Cli::try_parse_from(["alert-cli", "order-info", "5cb95c14-2d8e-41e5-bce4-ce366a6d5fcd"]).unwrap();
        assert!(matches!(cli.command, Commands::OrderInfo { ref exchange_order_id } if exchange_order_id.starts_with("5cb95c14")));

        let cli = Cli::try_parse_from(["alert-cli", "info"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { number: 3 }));
        let cli = Cli::try_parse_from(["alert-cli", "--dry-run", "info", "10"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { number: 10 }));
        assert!(cli.dry_run);
    }

    #[test]
    fn tables_pad_to_widest_cell() {
        let table = render_table(&["Product", "Side"], &[vec!["BTC-PERP-INTX".into(), "BUY".into()]]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "+---------------+------+");
        assert_eq!(lines[1], "| Product       | Side |");
        assert_eq!(lines[3], "| BTC-PERP-INTX | BUY  |");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn trade_sides_and_key_values() {
        assert_eq!(parse_position_side("long").unwrap(), Side::Buy);
        assert_eq!(parse_position_side("SHORT").unwrap(), Side::Sell);
        assert!(parse_position_side("flat").is_err());

        assert_eq!(
            parse_key_value("limit-price=1.52").unwrap(),
            ("limit-price".to_string(), "1.52".to_string())
        );
        assert!(parse_key_value("=1").is_err());
        assert!(parse_key_value("nope").is_err());
    }
}
