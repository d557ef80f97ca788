//! Request context extraction, correlation and authorization middleware.
//!
//! Every request gets a request ID (taken from `X-Request-Id` when the caller
//! supplies one) that is echoed on the response and propagated to forwarded
//! requests.
//!
//! Query-state routes are restricted to callers holding the `admin` or `user`
//! role. In debug mode roles come from the `X-Roles` header; otherwise they
//! are read from a verified HS256 bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{self, HeaderName};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use ulid::Ulid;

use crate::config::{Config, JwtConfig};
use crate::error::ApiError;
use crate::server::AppState;

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the protocol the original client used.
pub const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Header carrying comma-separated caller roles (debug mode only).
pub const ROLES_HEADER: &str = "x-roles";

/// Roles allowed to read query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Cluster administrator.
    Admin,
    /// Regular user.
    User,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// The authenticated caller of a `/v1` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Roles as presented by the caller, unfiltered.
    pub roles: Vec<String>,
}

impl Caller {
    /// Returns the first presented role that grants access, if any.
    #[must_use]
    pub fn admitted_role(&self) -> Option<Role> {
        self.roles.iter().find_map(|r| Role::parse(r))
    }
}

/// Per-request context derived from headers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request ID for tracing/correlation.
    pub request_id: String,
    /// Protocol the original client used, if a front proxy reported it.
    pub forwarded_proto: Option<String>,
}

impl RequestContext {
    fn from_headers(headers: &HeaderMap) -> Self {
        let request_id =
            request_id_from_headers(headers).unwrap_or_else(|| Ulid::new().to_string());
        Self {
            request_id,
            forwarded_proto: header_string(headers, FORWARDED_PROTO_HEADER),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let ctx = Self::from_headers(&parts.headers);
        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    header_string(headers, REQUEST_ID_HEADER)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    value
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Context middleware.
///
/// Injects a [`RequestContext`] into request extensions and echoes the request
/// ID on the response.
pub async fn context_middleware(req: Request<Body>, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();
    let ctx = RequestContext::from_headers(&parts.headers);
    let request_id = ctx.request_id.clone();
    parts.extensions.insert(ctx);

    let mut response = next.run(Request::from_parts(parts, body)).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Authorization middleware for query-state routes.
///
/// Rejects unauthenticated callers with `401` and callers holding neither the
/// `admin` nor the `user` role with `403`. Admitted callers are stored in
/// request extensions as a [`Caller`].
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let ctx = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let caller = match authenticate(&parts.headers, &state.config) {
        Ok(caller) => caller,
        Err(err) => {
            tracing::warn!(request_id = %ctx.request_id, code = err.code(), "Rejected unauthenticated query state request");
            return err.with_request_id(ctx.request_id).into_response();
        }
    };

    let Some(role) = caller.admitted_role() else {
        tracing::warn!(
            request_id = %ctx.request_id,
            roles = ?caller.roles,
            "Caller lacks a role allowed to read query state"
        );
        return ApiError::forbidden("admin or user role required")
            .with_request_id(ctx.request_id)
            .into_response();
    };
    tracing::debug!(request_id = %ctx.request_id, role = ?role, "Caller authorized");

    parts.extensions.insert(caller);
    next.run(Request::from_parts(parts, body)).await
}

/// Resolves the caller's roles from request headers.
///
/// # Errors
///
/// Returns a `401` error when credentials are missing or invalid, and a `500`
/// error when no JWT secret is configured outside debug mode.
pub fn authenticate(headers: &HeaderMap, config: &Config) -> Result<Caller, ApiError> {
    if config.debug {
        let raw = header_string(headers, ROLES_HEADER)
            .ok_or_else(|| ApiError::unauthorized("missing X-Roles header (debug mode)"))?;
        return Ok(Caller {
            roles: split_roles(&raw),
        });
    }
    caller_from_jwt(headers, &config.jwt)
}

fn caller_from_jwt(headers: &HeaderMap, jwt: &JwtConfig) -> Result<Caller, ApiError> {
    let token = bearer_token(headers).ok_or_else(ApiError::missing_auth)?;
    let Some(secret) = jwt.hs256_secret.as_deref() else {
        return Err(ApiError::internal(
            "jwt.hs256_secret is required when debug=false",
        ));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_nbf = true;
    let data = jsonwebtoken::decode::<Value>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::invalid_token())?;

    let roles = match data.claims.get(jwt.roles_claim.as_str()) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(raw)) => split_roles(raw),
        _ => Vec::new(),
    };
    Ok(Caller { roles })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, header::AUTHORIZATION.as_str())?;
    raw.strip_prefix("Bearer ").map(str::to_string)
}

fn split_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
