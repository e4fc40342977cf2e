use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec,
};

// --- Alert intake ---

pub static ALERTS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "alert_execution_alerts_received_total",
        "Total alerts received (webhook or CLI)"
    )
    .expect("alerts_received counter")
});

pub static ALERTS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "alert_execution_alerts_rejected_total",
        "Total alerts rejected by the parser"
    )
    .expect("alerts_rejected counter")
});

pub static COMPILE_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "alert_execution_compile_rejections_total",
        "Total orders rejected by the compiler"
    )
    .expect("compile_rejections counter")
});

// --- Orders ---

pub static ORDERS_EXECUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "alert_execution_orders_executed_total",
        "Total orders accepted by the exchange",
        &["style"]
    )
    .expect("orders_executed counter")
});

pub static ORDERS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "alert_execution_orders_failed_total",
        "Total orders refused by the exchange or failed in transit",
        &["style"]
    )
    .expect("orders_failed counter")
});

pub static ORDER_SUBMIT_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "alert_execution_order_submit_latency_seconds",
        "Exchange round-trip for order submission",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("order_submit_latency histogram")
});

pub fn inc_alerts_received() {
    ALERTS_RECEIVED.inc();
}

pub fn inc_alerts_rejected() {
    ALERTS_REJECTED.inc();
}

pub fn inc_compile_rejections() {
    COMPILE_REJECTIONS.inc();
}

pub fn inc_orders_executed(style: &str) {
    ORDERS_EXECUTED.with_label_values(&[style]).inc();
}

pub fn inc_orders_failed(style: &str) {
    ORDERS_FAILED.with_label_values(&[style]).inc();
}

pub fn observe_submit_latency(duration_sec: f64) {
    ORDER_SUBMIT_LATENCY.observe(duration_sec);
}

/// Default registry in Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        inc_alerts_received();
        inc_orders_failed("LIMIT_FOK");
        observe_submit_latency(0.2);

        let text = render().unwrap();
        assert!(text.contains("alert_execution_alerts_received_total"));
        assert!(text.contains("alert_execution_orders_failed_total{style=\"LIMIT_FOK\"}"));
        assert!(text.contains("alert_execution_order_submit_latency_seconds_bucket"));
    }
}
