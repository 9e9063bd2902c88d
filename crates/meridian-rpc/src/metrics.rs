use once_cell::sync::OnceCell;
use prometheus::{HistogramVec, IntCounterVec, Registry, TextEncoder};

static REQUEST_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static REQUEST_LATENCY: OnceCell<HistogramVec> = OnceCell::new();
static RATE_LIMITED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static REGISTRY: OnceCell<Registry> = OnceCell::new();

/// Registers every gauge this surface exports. Called exactly once at
/// server startup, before the router is built — a handler firing before
/// this runs would otherwise panic on `get().unwrap()`.
pub fn install_rpc_metrics() {
    let registry = Registry::new();

    let request_total = IntCounterVec::new(
        prometheus::Opts::new("meridian_rpc_requests_total", "Requests received, by route and status class"),
        &["route", "status"],
    )
    .expect("metric names are valid");
    registry.register(Box::new(request_total.clone())).expect("single registration");

    let request_latency = HistogramVec::new(
        prometheus::HistogramOpts::new("meridian_rpc_request_duration_seconds", "Request handler latency"),
        &["route"],
    )
    .expect("metric names are valid");
    registry.register(Box::new(request_latency.clone())).expect("single registration");

    let rate_limited_total = IntCounterVec::new(
        prometheus::Opts::new("meridian_rpc_rate_limited_total", "Requests rejected by the token bucket"),
        &["route"],
    )
    .expect("metric names are valid");
    registry.register(Box::new(rate_limited_total.clone())).expect("single registration");

    REQUEST_TOTAL.set(request_total).ok();
    REQUEST_LATENCY.set(request_latency).ok();
    RATE_LIMITED_TOTAL.set(rate_limited_total).ok();
    REGISTRY.set(registry).ok();
}

/// Safe accessors — every call site goes through these instead of touching
/// the statics directly, so a metrics call in a request path that races
/// `install_rpc_metrics` degrades to a no-op rather than panicking.
pub fn record_request(route: &str, status: &str, elapsed_secs: f64) {
    if let Some(c) = REQUEST_TOTAL.get() {
        c.with_label_values(&[route, status]).inc();
    }
    if let Some(h) = REQUEST_LATENCY.get() {
        h.with_label_values(&[route]).observe(elapsed_secs);
    }
}

pub fn record_rate_limited(route: &str) {
    if let Some(c) = RATE_LIMITED_TOTAL.get() {
        c.with_label_values(&[route]).inc();
    }
}

pub fn render() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
