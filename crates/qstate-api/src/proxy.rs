//! HTTP forwarder for requests answered by a resource manager.
//!
//! The inbound request is re-targeted at the peer's scheme, host and port,
//! keeping path and query string, and the peer's response is relayed as-is.
//! One peer, one attempt: failures surface to the caller.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::Response;

use qstate_core::PeerNode;

use crate::context::{FORWARDED_PROTO_HEADER, REQUEST_ID_HEADER};
use crate::error::ApiError;
use crate::metrics::{record_proxy_outcome, ProxyOutcome};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FORWARDED_PROTO: &str = "http";

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// An inbound request to be forwarded.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// HTTP method.
    pub method: Method,
    /// Original request URI (only path and query are used).
    pub uri: Uri,
    /// Inbound headers.
    pub headers: HeaderMap,
    /// `X-Forwarded-Proto` reported by the caller, if any.
    pub forwarded_proto: Option<String>,
    /// Correlation ID propagated to the peer.
    pub request_id: String,
}

/// Forwards requests to resource-manager peers.
#[derive(Debug, Clone)]
pub struct ResourceManagerProxy {
    client: reqwest::Client,
}

impl Default for ResourceManagerProxy {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl ResourceManagerProxy {
    /// Creates a forwarder with the given per-request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Forwards `request` to `peer` and relays the peer's response.
    ///
    /// # Errors
    ///
    /// Returns a `502` error if the request cannot be built, the peer cannot
    /// be reached, or its response body cannot be read.
    pub async fn forward(
        &self,
        peer: &PeerNode,
        request: ForwardRequest,
    ) -> Result<Response, ApiError> {
        let target = rewrite_uri(&request.uri, peer);
        let headers = outbound_headers(&request);

        tracing::info!(
            request_id = %request.request_id,
            peer = %peer.node_id,
            method = %request.method,
            target = %target,
            "Forwarding query state request to resource manager"
        );

        let upstream = self
            .client
            .request(request.method, &target)
            .headers(headers)
            .send()
            .await
            .map_err(|e| upstream_failure(&target, &request.request_id, &e))?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| upstream_failure(&target, &request.request_id, &e))?;

        record_proxy_outcome(ProxyOutcome::Forwarded);
        tracing::debug!(
            request_id = %request.request_id,
            status = %status,
            bytes = body.len(),
            "Relaying resource manager response"
        );

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        for (name, value) in &upstream_headers {
            if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
                continue;
            }
            response.headers_mut().append(name.clone(), value.clone());
        }
        Ok(response)
    }
}

/// Rewrites `uri` to target `peer`, preserving path and query string.
#[must_use]
pub fn rewrite_uri(uri: &Uri, peer: &PeerNode) -> String {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{}{}", peer.authority_uri(), path_and_query)
}

fn outbound_headers(request: &ForwardRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let proto = request
        .forwarded_proto
        .as_deref()
        .unwrap_or(DEFAULT_FORWARDED_PROTO);
    if let Ok(value) = HeaderValue::from_str(proto) {
        headers.insert(HeaderName::from_static(FORWARDED_PROTO_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&request.request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    headers
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

fn upstream_failure(target: &str, request_id: &str, err: &reqwest::Error) -> ApiError {
    record_proxy_outcome(ProxyOutcome::UpstreamFailure);
    tracing::error!(
        request_id = %request_id,
        target = %target,
        error = %err,
        "Forwarded query state request failed"
    );
    let reason = if err.is_timeout() {
        "timed out"
    } else {
        "failed"
    };
    ApiError::upstream_failure(format!("forwarding to resource manager {reason}: {err}"))
}
