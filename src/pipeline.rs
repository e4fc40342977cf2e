use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::alert_parser::{AlertError, AlertParser};
use crate::config::{DEFAULT_RR_RATIO, ExecutionConfig, Settings};
use crate::context::ExecutionContext;
use crate::exchange::{CoinbaseAdapter, ExchangeAdapter, ExchangeError, PaperExchange};
use crate::metrics;
use crate::model::{ExecutionReport, OrderLogEntry, OrderOutcome, OrderStyle, Side, TradeIntent};
use crate::order_compiler::{
    BASE_SIZE, CompileError, LIMIT_PRICE, OrderCompiler, OrderCompilerConfig, QUOTE_SIZE,
    STOP_DIRECTION, STOP_PRICE, STOP_TRIGGER_PRICE, StyleParams, accepted_parameters,
};
use crate::persistence::{CsvOrderLog, OrderLog, OrderLogError};
use crate::symbol_map::{SymbolMap, SymbolMapError};
use crate::trade_plan::{ProtectivePlan, TradePlanError, plan_protective_legs};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Alert(#[from] AlertError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Order {client_order_id} failed: {reason}")]
    RemoteOrderFailure {
        client_order_id: u64,
        reason: String,
        report: Box<ExecutionReport>,
    },
    #[error(transparent)]
    Log(#[from] OrderLogError),
    #[error(transparent)]
    TradePlan(#[from] TradePlanError),
    /// The entry filled but its exit legs could not be worked out.
    #[error("Entry order {client_order_id} executed without protective legs: {source}")]
    UnprotectedEntry {
        client_order_id: u64,
        source: TradePlanError,
        report: Box<ExecutionReport>,
    },
}

impl WorkflowError {
    /// Input the caller can fix, as opposed to a venue or storage failure.
    pub fn is_rejection(&self) -> bool {
        match self {
            WorkflowError::Alert(_) => true,
            WorkflowError::Compile(e) => {
                !matches!(e, CompileError::Log(_) | CompileError::IdSpaceExhausted { .. })
            }
            WorkflowError::TradePlan(_) => true,
            WorkflowError::RemoteOrderFailure { .. }
            | WorkflowError::UnprotectedEntry { .. }
            | WorkflowError::Log(_) => false,
        }
    }

    /// Report of the order that reached the venue: the refused order, or the
    /// executed entry left without exit legs.
    pub fn failure_report(&self) -> Option<&ExecutionReport> {
        match self {
            WorkflowError::RemoteOrderFailure { report, .. }
            | WorkflowError::UnprotectedEntry { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error(transparent)]
    Symbols(#[from] SymbolMapError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("Invalid execution settings: {0}")]
    Settings(#[from] CompileError),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub compiler: OrderCompilerConfig,
    pub default_style: OrderStyle,
    /// Lowest-precedence parameters (configured sizes).
    pub default_params: StyleParams,
    /// Follow market entries that carry a stop loss with exit legs.
    pub protective_orders: bool,
    pub rr_ratio: Decimal,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            compiler: OrderCompilerConfig::default(),
            default_style: OrderStyle::MarketIoc,
            default_params: StyleParams::new(),
            protective_orders: false,
            rr_ratio: DEFAULT_RR_RATIO,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &ExecutionConfig) -> Result<Self, CompileError> {
        Ok(Self {
            compiler: cfg.compiler_config(),
            default_style: cfg.default_style()?,
            default_params: cfg.default_params(),
            protective_orders: cfg.protective_orders,
            rr_ratio: cfg.rr_ratio(),
        })
    }
}

/// Everything one alert produced.
#[derive(Debug, Clone, Serialize)]
pub struct AlertExecution {
    pub intent: TradeIntent,
    pub style: OrderStyle,
    pub orders: Vec<ExecutionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl AlertExecution {
    pub fn exit_code(&self) -> i32 {
        self.orders.iter().map(|r| r.exit_code).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct TradePlanExecution {
    pub plan: ProtectivePlan,
    pub entry: ExecutionReport,
    pub stop_loss: ExecutionReport,
    pub take_profit: ExecutionReport,
}

impl TradePlanExecution {
    pub fn reports(&self) -> Vec<ExecutionReport> {
        vec![self.entry.clone(), self.stop_loss.clone(), self.take_profit.clone()]
    }

    pub fn exit_code(&self) -> i32 {
        self.reports().iter().map(|r| r.exit_code).max().unwrap_or(0)
    }
}

/// Alert-to-order workflow shared by the webhook and the CLI.
///
/// Owns the single-writer lock over id allocation and the order log.
pub struct ExecutionPipeline {
    parser: AlertParser,
    compiler: OrderCompiler,
    exchange: Arc<dyn ExchangeAdapter>,
    log: Arc<dyn OrderLog>,
    ctx: Arc<ExecutionContext>,
    settings: PipelineSettings,
    // Held across id allocation, submission and the log append.
    order_lock: Mutex<()>,
}

impl ExecutionPipeline {
    pub fn new(
        symbols: Arc<SymbolMap>,
        log: Arc<dyn OrderLog>,
        exchange: Arc<dyn ExchangeAdapter>,
        ctx: Arc<ExecutionContext>,
        settings: PipelineSettings,
    ) -> Self {
        let compiler = OrderCompiler::new(Some(settings.compiler.clone()), log.clone(), ctx.clone());
        info!(
            exchange = exchange.name(),
            default_style = %settings.default_style,
            protective_orders = settings.protective_orders,
            "🚀 Execution pipeline ready"
        );
        Self {
            parser: AlertParser::new(symbols),
            compiler,
            exchange,
            log,
            ctx,
            settings,
            order_lock: Mutex::new(()),
        }
    }

    /// Production wiring: symbol table and CSV log from `settings`, Coinbase
    /// (or the paper venue when `dry_run` is set), system clock.
    pub fn from_settings(settings: &Settings) -> Result<Self, BootstrapError> {
        let exec = &settings.execution;
        let symbols = Arc::new(SymbolMap::from_config(&settings.symbols)?);
        let log = Arc::new(CsvOrderLog::new(exec.order_log_path()));
        info!(path = %log.path().display(), "📝 Order log");

        Ok(Self::new(
            symbols,
            log,
            exchange_from_settings(settings)?,
            Arc::new(ExecutionContext::new_system()),
            PipelineSettings::from_config(exec)?,
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn parse(&self, alert_text: &str) -> Result<TradeIntent, WorkflowError> {
        metrics::inc_alerts_received();
        self.parser.parse(alert_text).map_err(|e| {
            warn!(alert = alert_text.trim(), "Alert rejected: {}", e);
            metrics::inc_alerts_rejected();
            WorkflowError::from(e)
        })
    }

    /// Assemble style parameters for an alert: configured defaults, then
    /// values derived from the intent, then `named`. Later layers win.
    pub fn resolve_params(
        &self,
        intent: &TradeIntent,
        style: OrderStyle,
        named: &StyleParams,
    ) -> StyleParams {
        let accepted = accepted_parameters(style);

        let mut params = StyleParams::new();
        let named_has_size = named.contains(BASE_SIZE) || named.contains(QUOTE_SIZE);
        if !named_has_size {
            let defaults = &self.settings.default_params;
            if let Some(base) = defaults.get(BASE_SIZE) {
                params.insert(BASE_SIZE, base);
            } else if let Some(quote) = defaults.get(QUOTE_SIZE).filter(|_| accepted.contains(&QUOTE_SIZE)) {
                params.insert(QUOTE_SIZE, quote);
            }
        }

        let derived: StyleParams = derive_from_intent(intent, style)
            .into_iter()
            .filter(|(k, _)| accepted.contains(k))
            .collect();
        params.overlay(&derived);
        params.overlay(named);
        params
    }

    /// Parse an alert and execute it with `style` (or the configured default).
    pub async fn handle_alert(
        &self,
        alert_text: &str,
        style: Option<OrderStyle>,
        named: &StyleParams,
    ) -> Result<AlertExecution, WorkflowError> {
        let intent = self.parse(alert_text)?;
        let style = style.unwrap_or(self.settings.default_style);
        let params = self.resolve_params(&intent, style, named);

        info!(
            action = %intent.action,
            symbol = %intent.symbol,
            entry = %intent.entry_price,
            style = %style,
            "📨 Alert accepted"
        );

        if self.settings.protective_orders && style == OrderStyle::MarketIoc {
            if let Some(stop_loss) = intent.stop_loss_price {
                let base_size = base_size_of(&params)?;
                let run = self
                    .execute_trade_plan(
                        intent.action,
                        &intent.symbol,
                        base_size,
                        stop_loss,
                        intent.take_profit_price,
                        self.settings.rr_ratio,
                    )
                    .await?;
                return Ok(AlertExecution {
                    intent,
                    style,
                    orders: run.reports(),
                    summary: Some(run.plan.to_string()),
                });
            }
        }

        let report = self
            .execute(intent.action, &intent.symbol, style, &params)
            .await?;
        Ok(AlertExecution {
            intent,
            style,
            orders: vec![report],
            summary: None,
        })
    }

    /// Compile, submit and log one order.
    ///
    /// Compile errors leave no trace in the log. Every submitted order gets
    /// exactly one log row; a refused or failed submission is logged as
    /// `failed reason: ...` and returned as `RemoteOrderFailure`.
    pub async fn execute(
        &self,
        side: Side,
        product_id: &str,
        style: OrderStyle,
        params: &StyleParams,
    ) -> Result<ExecutionReport, WorkflowError> {
        let guard = self.order_lock.lock().await;

        let spec = self
            .compiler
            .compile_order(side, product_id, style, params)
            .inspect_err(|e| {
                warn!(product_id, style = %style, "Order rejected by compiler: {}", e);
                metrics::inc_compile_rejections();
            })?;
        let client_order_id = spec.client_order_id;

        let started = Instant::now();
        let submitted = self.exchange.place_order(&spec).await;
        metrics::observe_submit_latency(started.elapsed().as_secs_f64());

        let timestamp = self.ctx.time.now();
        let outcome = match &submitted {
            Ok(_) => OrderOutcome::Executed,
            Err(e) => OrderOutcome::Failed(e.failure_reason()),
        };
        self.log
            .append(&OrderLogEntry::for_order(&spec, timestamp, outcome.clone()))?;
        drop(guard);

        let ack = match submitted {
            Ok(ack) => ack,
            Err(e) => {
                let reason = e.failure_reason();
                error!(client_order_id, product_id, style = %style, "❌ Order failed: {}", reason);
                metrics::inc_orders_failed(style.as_str());
                let report = ExecutionReport {
                    local_order_id: client_order_id,
                    exchange_order_id: None,
                    average_filled_price: None,
                    status: outcome.to_string(),
                    timestamp,
                    exit_code: 1,
                };
                return Err(WorkflowError::RemoteOrderFailure {
                    client_order_id,
                    reason,
                    report: Box::new(report),
                });
            }
        };

        metrics::inc_orders_executed(style.as_str());

        let average_filled_price = match ack.average_filled_price {
            Some(price) => Some(price),
            None => match self.exchange.average_filled_price(&ack.exchange_order_id).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(client_order_id, exchange_order_id = %ack.exchange_order_id, "Could not fetch average fill price: {}", e);
                    None
                }
            },
        };

        info!(
            client_order_id,
            exchange_order_id = %ack.exchange_order_id,
            product_id,
            side = %side,
            style = %style,
            average_filled_price = ?average_filled_price,
            "✅ Order executed"
        );

        Ok(ExecutionReport {
            local_order_id: client_order_id,
            exchange_order_id: Some(ack.exchange_order_id),
            average_filled_price,
            status: outcome.to_string(),
            timestamp,
            exit_code: 0,
        })
    }

    /// Market entry followed by a stop-loss and a take-profit leg.
    ///
    /// Aborts before any exit leg when the entry fails. Once the entry has
    /// executed, a missing fill price or a fill beyond the stop surfaces as
    /// `UnprotectedEntry` carrying the entry report. Exit legs refused by the
    /// venue come back as failed reports.
    pub async fn execute_trade_plan(
        &self,
        side: Side,
        product_id: &str,
        base_size: Decimal,
        stop_loss: Decimal,
        take_profit: Option<Decimal>,
        rr_ratio: Decimal,
    ) -> Result<TradePlanExecution, WorkflowError> {
        if rr_ratio <= Decimal::ZERO {
            return Err(TradePlanError::InvalidRiskReward(rr_ratio).into());
        }

        let entry_params = StyleParams::new().with(BASE_SIZE, base_size.to_string());
        let entry = self
            .execute(side, product_id, OrderStyle::MarketIoc, &entry_params)
            .await?;

        let planned = entry
            .average_filled_price
            .ok_or(TradePlanError::NoFillPrice {
                client_order_id: entry.local_order_id,
            })
            .and_then(|fill| {
                plan_protective_legs(side, product_id, base_size, fill, stop_loss, take_profit, rr_ratio)
            });
        let plan = match planned {
            Ok(plan) => plan,
            Err(source) => {
                error!(
                    client_order_id = entry.local_order_id,
                    product_id,
                    "🚨 Entry executed without protective legs: {}",
                    source
                );
                return Err(WorkflowError::UnprotectedEntry {
                    client_order_id: entry.local_order_id,
                    source,
                    report: Box::new(entry),
                });
            }
        };
        info!(
            product_id,
            entry = %plan.entry_price,
            stop_trigger = %plan.stop_loss_trigger,
            stop_limit = %plan.stop_loss_limit,
            take_profit = %plan.take_profit_price,
            "🛡️ Placing protective legs"
        );

        let stop_loss = self
            .exit_leg(plan.exit_side(), product_id, OrderStyle::StopLimitGtc, &plan.stop_loss_params())
            .await?;
        let take_profit = self
            .exit_leg(plan.exit_side(), product_id, OrderStyle::LimitGtc, &plan.take_profit_params())
            .await?;

        Ok(TradePlanExecution {
            plan,
            entry,
            stop_loss,
            take_profit,
        })
    }

    async fn exit_leg(
        &self,
        side: Side,
        product_id: &str,
        style: OrderStyle,
        params: &StyleParams,
    ) -> Result<ExecutionReport, WorkflowError> {
        match self.execute(side, product_id, style, params).await {
            Ok(report) => Ok(report),
            Err(WorkflowError::RemoteOrderFailure { report, .. }) => Ok(*report),
            Err(e) => Err(e),
        }
    }
}

/// Coinbase, or the paper venue when `dry_run` is set.
pub fn exchange_from_settings(settings: &Settings) -> Result<Arc<dyn ExchangeAdapter>, BootstrapError> {
    if settings.execution.dry_run {
        warn!("DRY RUN: orders go to the paper exchange");
        return Ok(Arc::new(PaperExchange::new()));
    }
    Ok(Arc::new(CoinbaseAdapter::new(&settings.coinbase())?))
}

fn derive_from_intent(intent: &TradeIntent, style: OrderStyle) -> Vec<(&'static str, String)> {
    let entry = intent.entry_price.to_string();
    match style {
        OrderStyle::MarketIoc => Vec::new(),
        OrderStyle::LimitGtc | OrderStyle::LimitGtd | OrderStyle::LimitFok => {
            vec![(LIMIT_PRICE, entry)]
        }
        OrderStyle::StopLimitGtc | OrderStyle::StopLimitGtd => {
            let direction = match intent.action {
                Side::Buy => "STOP_UP",
                Side::Sell => "STOP_DOWN",
            };
            vec![
                (STOP_PRICE, entry.clone()),
                (LIMIT_PRICE, entry),
                (STOP_DIRECTION, direction.to_string()),
            ]
        }
        OrderStyle::BracketGtc | OrderStyle::BracketGtd => {
            let mut derived = Vec::new();
            if let Some(tp) = intent.take_profit_price {
                derived.push((LIMIT_PRICE, tp.to_string()));
            }
            if let Some(sl) = intent.stop_loss_price {
                derived.push((STOP_TRIGGER_PRICE, sl.to_string()));
            }
            derived
        }
    }
}

fn base_size_of(params: &StyleParams) -> Result<Decimal, CompileError> {
    let raw = params
        .get(BASE_SIZE)
        .ok_or_else(|| CompileError::MissingRequiredParameter {
            style: OrderStyle::MarketIoc,
            parameter: BASE_SIZE.to_string(),
        })?;
    Decimal::from_str(raw).map_err(|e| CompileError::InvalidParameter {
        parameter: BASE_SIZE.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
