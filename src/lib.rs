pub mod alert_parser;
pub mod api;
pub mod config;
pub mod context;
pub mod exchange;
pub mod metrics;
pub mod model;
pub mod order_compiler;
pub mod persistence;
pub mod pipeline;
pub mod symbol_map;
pub mod telemetry;
pub mod trade_plan;
