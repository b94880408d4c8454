//! Prometheus metrics for the proxy.
//!
//! Exposed in the text exposition format on a separate plain-HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use keyward::CacheRecorder;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

/// Path the metrics are served on.
pub const METRICS_PATH: &str = "/metrics";

/// Request, cache and authentication metrics.
pub struct ProxyMetrics {
    registry: Registry,
    requests: IntCounterVec,
    request_duration: Histogram,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    auth_outcomes: IntCounterVec,
}

impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

impl ProxyMetrics {
    /// Creates the metrics and registers them with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric is malformed or registered twice.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total proxied requests by response status"),
            &["status_code"],
        )?;

        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "Proxied request latency",
        ))?;

        let cache_hits = IntCounter::new(
            "proxy_token_cache_hits_total",
            "Credential lookups served from the cache",
        )?;

        let cache_misses = IntCounter::new(
            "proxy_token_cache_misses_total",
            "Credential lookups that required issuing a new token",
        )?;

        let auth_outcomes = IntCounterVec::new(
            Opts::new("proxy_auth_outcomes_total", "Credential injection outcomes"),
            &["outcome"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(auth_outcomes.clone()))?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            cache_hits,
            cache_misses,
            auth_outcomes,
        })
    }

    /// Records a finished request.
    pub fn observe_request(&self, status: StatusCode, elapsed: Duration) {
        self.requests
            .with_label_values(&[status.as_str()])
            .inc();
        self.request_duration.observe(elapsed.as_secs_f64());
    }

    /// Records the label of an [`AuthOutcome`](keyward::AuthOutcome).
    pub fn record_auth_outcome(&self, outcome: &str) {
        self.auth_outcomes.with_label_values(&[outcome]).inc();
    }

    /// Renders all metrics in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Router serving [`METRICS_PATH`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(METRICS_PATH, get(metrics_handler))
            .with_state(self)
    }
}

impl CacheRecorder for ProxyMetrics {
    fn record_hit(&self) {
        self.cache_hits.inc();
    }

    fn record_miss(&self) {
        self.cache_misses.inc();
    }
}

async fn metrics_handler(State(metrics): State<Arc<ProxyMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
