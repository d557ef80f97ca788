//! Prometheus metrics for the query-state service.
//!
//! Covers request duration and throughput per endpoint, forwarding outcomes,
//! and user-filter evaluations that hit their time budget.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Request duration histogram.
pub const API_REQUEST_DURATION: &str = "qstate_request_duration_seconds";

/// Request counter.
pub const API_REQUEST_TOTAL: &str = "qstate_request_total";

/// Forwarded request counter, labelled by outcome.
pub const QUERY_STATE_PROXY_TOTAL: &str = "qstate_proxy_requests_total";

/// User-filter evaluations that exceeded their budget.
pub const USER_FILTER_TIMEOUTS: &str = "qstate_user_filter_timeouts_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";
const SLOW_REQUEST_SECS: f64 = 1.0;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Outcome of an attempt to forward a request to a resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The peer answered; its response was relayed.
    Forwarded,
    /// No resource manager was known.
    Unavailable,
    /// The peer could not be reached or its response could not be read.
    UpstreamFailure,
}

impl ProxyOutcome {
    /// Metric label value.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::Unavailable => "unavailable",
            Self::UpstreamFailure => "upstream_failure",
        }
    }
}

/// Initializes the global Prometheus recorder.
///
/// Safe to call multiple times; subsequent calls return the same handle.
///
/// # Panics
///
/// Panics if the recorder cannot be installed. The server should not start
/// without metrics.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_histogram!(API_REQUEST_DURATION, "Duration of requests in seconds");
            describe_counter!(API_REQUEST_TOTAL, "Total number of requests");
            describe_counter!(
                QUERY_STATE_PROXY_TOTAL,
                "Query state requests forwarded to a resource manager, by outcome"
            );
            describe_counter!(
                USER_FILTER_TIMEOUTS,
                "User filter evaluations abandoned after exceeding the matching timeout"
            );

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub(crate) fn endpoint_label<B>(request: &Request<B>) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware that records request metrics.
///
/// Labels are `endpoint` (the matched route template, never the raw path),
/// `method` and `status_class`.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status_class = status_class(response.status());
    let labels = [
        ("endpoint", path.clone()),
        ("method", method.clone()),
        ("status_class", status_class.to_string()),
    ];

    histogram!(API_REQUEST_DURATION, &labels).record(duration);
    counter!(API_REQUEST_TOTAL, &labels).increment(1);

    if duration > SLOW_REQUEST_SECS {
        tracing::warn!(
            endpoint = %path,
            method = %method,
            status = %response.status(),
            duration_secs = %duration,
            "Slow request detected"
        );
    }

    response
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// Handler for `/metrics`.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

/// Records the outcome of a forwarding attempt.
pub fn record_proxy_outcome(outcome: ProxyOutcome) {
    counter!(QUERY_STATE_PROXY_TOTAL, "outcome" => outcome.as_label()).increment(1);
}

/// Records a user-filter evaluation that timed out.
pub fn record_user_filter_timeout() {
    counter!(USER_FILTER_TIMEOUTS).increment(1);
}
