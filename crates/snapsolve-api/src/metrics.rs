use axum::http::StatusCode;
use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, HistogramOpts, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref SOLVE_REQUESTS_TOTAL: Counter =
        Counter::with_opts(Opts::new("solve_requests_total", "Total number of solve requests"))
            .unwrap();

    pub static ref SOLVE_FAILURES_TOTAL: Counter =
        Counter::with_opts(Opts::new("solve_failures_total", "Solve requests that failed upstream"))
            .unwrap();

    pub static ref SOLVE_DURATION_SECONDS: Histogram =
        Histogram::with_opts(HistogramOpts::new("solve_duration_seconds", "Duration of solve requests in seconds"))
            .unwrap();

    pub static ref HISTORY_REQUESTS_TOTAL: Counter =
        Counter::with_opts(Opts::new("history_requests_total", "Total number of history reads"))
            .unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(SOLVE_REQUESTS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(SOLVE_FAILURES_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(SOLVE_DURATION_SECONDS.clone())).unwrap();
    REGISTRY.register(Box::new(HISTORY_REQUESTS_TOTAL.clone())).unwrap();
}

pub async fn metrics_handler() -> (StatusCode, String) {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("could not encode metrics: {}", e);
    };
    let body = String::from_utf8(buffer).unwrap_or_default();
    (StatusCode::OK, body)
}
