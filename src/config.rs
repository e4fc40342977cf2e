use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::model::{MarginType, OrderStyle};
use crate::order_compiler::{
    BASE_SIZE, CompileError, DEFAULT_BASELINE_ORDER_ID, OrderCompilerConfig, QUOTE_SIZE,
    StyleParams,
};

pub const DEFAULT_PORT: u16 = 5002;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_ORDER_LOG_PATH: &str = "order_id.txt";
pub const DEFAULT_RR_RATIO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
pub const DEFAULT_COINBASE_URL: &str = "https://api.coinbase.com";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub coinbase: Option<CoinbaseConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub symbols: SymbolsConfig,
}

/// Advanced Trade credentials. Requests are signed with HMAC-SHA256
/// (`CB-ACCESS-*` headers), so this takes a legacy API key and its secret.
/// CDP keys (`organizations/.../apiKeys/...` with an EC private key) sign
/// JWTs instead and are refused at startup.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CoinbaseConfig {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: Option<String>,
    /// Portfolio whose perpetual positions `alert-cli info` lists.
    pub portfolio_uuid: Option<String>,
}

impl CoinbaseConfig {
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.is_empty())
    }

    pub fn get_secret_key(&self) -> Option<String> {
        self.secret_key.clone().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExecutionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub order_log_path: Option<String>,
    pub baseline_order_id: Option<u64>,
    /// Style used for webhook alerts that do not name one.
    pub default_style: Option<String>,
    pub default_base_size: Option<Decimal>,
    pub default_quote_size: Option<Decimal>,
    pub leverage: Option<String>,
    pub margin_type: Option<MarginType>,
    #[serde(default)]
    pub dry_run: bool,
    /// Place stop-loss and take-profit legs after a market entry.
    #[serde(default)]
    pub protective_orders: bool,
    pub rr_ratio: Option<Decimal>,
}

impl ExecutionConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn order_log_path(&self) -> &str {
        self.order_log_path.as_deref().unwrap_or(DEFAULT_ORDER_LOG_PATH)
    }

    pub fn rr_ratio(&self) -> Decimal {
        self.rr_ratio.unwrap_or(DEFAULT_RR_RATIO)
    }

    pub fn default_style(&self) -> Result<OrderStyle, CompileError> {
        match &self.default_style {
            Some(name) => name.parse(),
            None => Ok(OrderStyle::MarketIoc),
        }
    }

    /// Lowest-precedence parameter layer.
    pub fn default_params(&self) -> StyleParams {
        let mut params = StyleParams::new();
        if let Some(size) = self.default_base_size {
            params.insert(BASE_SIZE, size.to_string());
        }
        if let Some(size) = self.default_quote_size {
            params.insert(QUOTE_SIZE, size.to_string());
        }
        params
    }

    pub fn compiler_config(&self) -> OrderCompilerConfig {
        OrderCompilerConfig {
            baseline_order_id: self.baseline_order_id.unwrap_or(DEFAULT_BASELINE_ORDER_ID),
            leverage: self.leverage.clone(),
            margin_type: self.margin_type,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SymbolsConfig {
    /// Bases listed as `<BASE>-PERP-INTX` perpetuals.
    #[serde(default)]
    pub perpetual_bases: Vec<String>,
    #[serde(default)]
    pub table: HashMap<String, String>,
    pub perpetual_suffix: Option<String>,
    /// Extra TOML/JSON table file.
    pub table_path: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Layered load. `extra` is an explicit file (CLI `--config`) applied
    /// above the project files and below the environment.
    pub fn load(extra: Option<&str>) -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let mut builder = Config::builder()
            // 1. Global config from ~/.alert-execution/config.{toml,json}
            .add_source(File::with_name(&format!("{}/.alert-execution/config", home)).required(false))
            // 2. Project config
            .add_source(File::with_name("config/config").required(false))
            // 3. Local overrides (not checked in)
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = extra {
            builder = builder.add_source(File::with_name(path));
        }

        // 4. Environment, e.g. ALERT_EXEC_EXECUTION__PORT=5002
        let s = builder.add_source(environment()).build()?;

        s.try_deserialize()
    }

    /// Coinbase section with `COINBASE_*` environment fallbacks applied.
    pub fn coinbase(&self) -> CoinbaseConfig {
        let mut cfg = self.coinbase.clone().unwrap_or_default();
        if cfg.get_api_key().is_none() {
            cfg.api_key = env::var("COINBASE_API_KEY").ok();
        }
        if cfg.get_secret_key().is_none() {
            cfg.secret_key = env::var("COINBASE_SECRET_KEY").ok();
        }
        if cfg.base_url.is_none() {
            cfg.base_url = env::var("COINBASE_BASE_URL").ok();
        }
        if cfg.portfolio_uuid.is_none() {
            cfg.portfolio_uuid = env::var("COINBASE_PORTFOLIO_UUID").ok();
        }
        cfg
    }
}

/// `ALERT_EXEC_<SECTION>__<KEY>`: a single `_` after the prefix, `__`
/// between nesting levels.
fn environment() -> Environment {
    Environment::with_prefix("ALERT_EXEC")
        .prefix_separator("_")
        .separator("__")
}
