use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info};

use crate::metrics;
use crate::model::OrderStyle;
use crate::order_compiler::{CompileError, StyleParams};
use crate::pipeline::{ExecutionPipeline, WorkflowError};

/// Query key naming the order style; every other key is a style parameter.
pub const STYLE_QUERY_KEY: &str = "style";

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Deserialize)]
struct JsonAlert {
    text: String,
}

pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn metrics_endpoint() -> impl Responder {
    match metrics::render() {
        Ok(text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(text),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Alert text from a `text/plain` body or a JSON body with a `text` field.
fn alert_text(req: &HttpRequest, body: &[u8]) -> Result<String, String> {
    let is_json = req
        .headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        let alert: JsonAlert =
            serde_json::from_slice(body).map_err(|e| format!("Invalid JSON payload: {}", e))?;
        return Ok(alert.text);
    }

    let text = std::str::from_utf8(body).map_err(|_| "Alert body is not valid UTF-8".to_string())?;
    if text.trim().is_empty() {
        return Err("Empty alert body".to_string());
    }
    Ok(text.to_string())
}

fn style_and_params(
    query: &HashMap<String, String>,
) -> Result<(Option<OrderStyle>, StyleParams), CompileError> {
    let style = match query.get(STYLE_QUERY_KEY) {
        Some(name) => Some(name.parse::<OrderStyle>()?),
        None => None,
    };
    let params = query
        .iter()
        .filter(|(k, _)| k.as_str() != STYLE_QUERY_KEY)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    Ok((style, params))
}

fn error_body(status: StatusCode, err: &WorkflowError) -> HttpResponse {
    let mut body = json!({ "status": "error", "message": err.to_string() });
    if let Some(report) = err.failure_report() {
        body["report"] = json!(report);
    }
    HttpResponse::build(status).json(body)
}

pub fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        e if e.is_rejection() => StatusCode::BAD_REQUEST,
        WorkflowError::RemoteOrderFailure { .. } | WorkflowError::UnprotectedEntry { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn tradingview_webhook(
    req: HttpRequest,
    pipeline: web::Data<ExecutionPipeline>,
    query: web::Query<HashMap<String, String>>,
    body: web::Bytes,
) -> impl Responder {
    let text = match alert_text(&req, &body) {
        Ok(text) => text,
        Err(message) => {
            return HttpResponse::BadRequest().json(json!({ "status": "error", "message": message }));
        }
    };
    info!(alert = text.trim(), "🔔 Webhook alert received");

    let (style, params) = match style_and_params(&query) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_body(StatusCode::BAD_REQUEST, &WorkflowError::from(e));
        }
    };

    match pipeline.handle_alert(&text, style, &params).await {
        Ok(run) => {
            // a refused protective leg still leaves the entry in place
            let (status, label) = if run.exit_code() == 0 {
                (StatusCode::OK, "ok")
            } else {
                (StatusCode::BAD_GATEWAY, "error")
            };
            HttpResponse::build(status).json(json!({ "status": label, "result": run }))
        }
        Err(e) => {
            let status = status_for(&e);
            error!(status = status.as_u16(), "Alert not executed: {}", e);
            error_body(status, &e)
        }
    }
}

// Define scope configuration
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/metrics").route(web::get().to(metrics_endpoint)))
        .service(web::resource("/tradingview").route(web::post().to(tradingview_webhook)));
}
