//! Query state routes.
//!
//! ## Routes
//!
//! - `GET /queryState` - List query states
//! - `GET /queryState/:query_id` - Get one query's state
//!
//! Both routes either answer from this node's registry or forward the request
//! to a resource manager, as decided by [`RoutingDecision`].

use std::sync::Arc;

use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::Instrument;
use utoipa::IntoParams;

use qstate_core::observability::query_state_span;
use qstate_core::{QueryId, QueryRecord};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::matcher::BoundedMatcher;
use crate::proxy::ForwardRequest;
use crate::routing::{Route, RoutingDecision};
use crate::server::AppState;
use crate::snapshot::{QueryStateSnapshot, SnapshotBuilder, SnapshotOptions};

/// Query parameters for listing query states.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase", default)]
#[into_params(parameter_in = Query)]
pub struct QueryStateParams {
    /// Regular expression the owning user must match in full.
    pub user: Option<String>,
    /// Answer from this node only, even in resource-manager mode.
    pub include_local_query_only: bool,
    /// Include finished and failed queries.
    pub include_all_queries: bool,
    /// Include progress statistics.
    pub include_all_query_progress_stats: bool,
    /// Omit the resource-group path of queued queries.
    pub exclude_resource_group_path_info: bool,
    /// Maximum number of characters of query text to return.
    pub query_text_size_limit: Option<usize>,
}

impl QueryStateParams {
    /// Snapshot shaping requested by these parameters.
    #[must_use]
    pub fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            include_progress: self.include_all_query_progress_stats,
            exclude_resource_group_path: self.exclude_resource_group_path_info,
            query_text_size_limit: self.query_text_size_limit,
        }
    }
}

/// Creates query state routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queryState", get(list_query_states))
        .route("/queryState/:query_id", get(get_query_state))
}

/// List query states.
///
/// GET /v1/queryState
#[utoipa::path(
    get,
    path = "/v1/queryState",
    tag = "queryState",
    params(QueryStateParams),
    responses(
        (status = 200, description = "Query states in registry order", body = [QueryStateSnapshot]),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Caller lacks the admin or user role", body = ApiErrorBody),
        (status = 502, description = "Resource manager could not be reached", body = ApiErrorBody),
        (status = 503, description = "No resource manager available", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_query_states(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryStateParams>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let span = query_state_span("list", &ctx.request_id);
    let request_id = ctx.request_id.clone();
    let inbound = Inbound {
        method,
        uri,
        headers,
        ctx,
    };

    list(&state, params, inbound)
        .instrument(span)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

/// Get one query's state.
///
/// GET /v1/queryState/{query_id}
#[utoipa::path(
    get,
    path = "/v1/queryState/{query_id}",
    tag = "queryState",
    params(
        ("query_id" = String, Path, description = "Query ID")
    ),
    responses(
        (status = 200, description = "Query state", body = QueryStateSnapshot),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Caller lacks the admin or user role", body = ApiErrorBody),
        (status = 404, description = "Query not found", body = ApiErrorBody),
        (status = 502, description = "Resource manager could not be reached", body = ApiErrorBody),
        (status = 503, description = "No resource manager available", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn get_query_state(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(raw_query_id): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let span = query_state_span("get", &ctx.request_id);
    let request_id = ctx.request_id.clone();
    let inbound = Inbound {
        method,
        uri,
        headers,
        ctx,
    };

    get_one(&state, &raw_query_id, inbound)
        .instrument(span)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

/// The parts of an inbound request needed to forward it.
struct Inbound {
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    ctx: RequestContext,
}

impl Inbound {
    fn into_forward_request(self) -> ForwardRequest {
        ForwardRequest {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            forwarded_proto: self.ctx.forwarded_proto,
            request_id: self.ctx.request_id,
        }
    }
}

async fn list(
    state: &AppState,
    params: QueryStateParams,
    inbound: Inbound,
) -> Result<Response, ApiError> {
    let decision = RoutingDecision::for_list(
        state.config.resource_manager_enabled,
        params.include_local_query_only,
    );

    match Route::resolve(decision, state.discovery.as_ref())? {
        Route::Proxy(peer) => {
            state
                .proxy
                .forward(&peer, inbound.into_forward_request())
                .await
        }
        Route::Local => {
            let records = state.registry.list_queries()?;
            let total = records.len();

            let kept = {
                let matcher = BoundedMatcher::from_pattern(
                    params.user.as_deref(),
                    state.config.matching_timeout(),
                );
                filter_records(records, params.include_all_queries, &matcher).await
            };

            let builder = SnapshotBuilder::new(state.catalog.as_ref());
            let options = params.snapshot_options();
            let snapshots: Vec<QueryStateSnapshot> = kept
                .into_iter()
                .map(|record| builder.build(record, options))
                .collect();

            tracing::debug!(
                total,
                returned = snapshots.len(),
                "Listed query states locally"
            );
            Ok(Json(snapshots).into_response())
        }
    }
}

async fn get_one(
    state: &AppState,
    raw_query_id: &str,
    inbound: Inbound,
) -> Result<Response, ApiError> {
    let query_id: QueryId = raw_query_id
        .parse()
        .map_err(|_| ApiError::not_found(format!("query not found: {raw_query_id}")))?;

    let known_locally = state.registry.is_known(&query_id)?;
    let decision =
        RoutingDecision::for_single(state.config.resource_manager_enabled, known_locally);

    match Route::resolve(decision, state.discovery.as_ref())? {
        Route::Proxy(peer) => {
            state
                .proxy
                .forward(&peer, inbound.into_forward_request())
                .await
        }
        Route::Local => {
            let record = state.registry.get_query(&query_id)?;
            let snapshot = SnapshotBuilder::new(state.catalog.as_ref())
                .build(record, SnapshotOptions::single_lookup());
            Ok(Json(snapshot).into_response())
        }
    }
}

/// Keeps records that pass the done-state filter and the user match, in order.
///
/// Records excluded by state are never handed to the matcher. Timed-out
/// evaluations are reported once per call with their count.
pub async fn filter_records(
    records: Vec<QueryRecord>,
    include_all: bool,
    matcher: &BoundedMatcher,
) -> Vec<QueryRecord> {
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if !include_all && record.state.is_done() {
            continue;
        }
        if matcher.matches(&record.user).await {
            kept.push(record);
        }
    }

    let timed_out = matcher.timed_out();
    if timed_out > 0 {
        tracing::warn!(
            timed_out,
            "User filter timed out; those queries were treated as non-matching"
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use qstate_core::QueryState;

    fn record(id: &str, user: &str, state: QueryState) -> QueryRecord {
        QueryRecord::new(QueryId::new(id).unwrap(), user, state)
    }

    fn ids(records: &[QueryRecord]) -> Vec<&str> {
        records.iter().map(|r| r.query_id.as_str()).collect()
    }

    #[tokio::test]
    async fn excludes_done_queries_unless_requested() {
        let records = vec![
            record("q1", "alice", QueryState::Running),
            record("q2", "bob", QueryState::Finished),
            record("q3", "carol", QueryState::Failed),
            record("q4", "dave", QueryState::Queued),
        ];
        let matcher = BoundedMatcher::from_pattern(None, Duration::from_secs(1));

        let active = filter_records(records.clone(), false, &matcher).await;
        assert_eq!(ids(&active), ["q1", "q4"]);

        let all = filter_records(records, true, &matcher).await;
        assert_eq!(ids(&all), ["q1", "q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn user_filter_applies_to_owner() {
        let records = vec![
            record("q1", "alice", QueryState::Running),
            record("q2", "bob", QueryState::Running),
            record("q3", "alicia", QueryState::Running),
        ];
        let matcher = BoundedMatcher::from_pattern(Some("ali.*"), Duration::from_secs(1));

        let kept = filter_records(records, true, &matcher).await;
        assert_eq!(ids(&kept), ["q1", "q3"]);
    }

    #[tokio::test]
    async fn done_records_skip_the_matcher() {
        let calls = Arc::new(AtomicUsize::new(0));
        let matcher = {
            let calls = Arc::clone(&calls);
            BoundedMatcher::from_predicate(
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    true
                },
                Duration::from_secs(1),
            )
        };
        let records = vec![
            record("q1", "alice", QueryState::Running),
            record("q2", "bob", QueryState::Finished),
        ];

        let kept = filter_records(records, false, &matcher).await;
        assert_eq!(ids(&kept), ["q1"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_match_excludes_only_that_record() {
        let matcher = BoundedMatcher::from_predicate(
            |user| {
                if user == "slow" {
                    std::thread::sleep(Duration::from_millis(300));
                }
                true
            },
            Duration::from_millis(50),
        );
        let records = vec![
            record("q1", "slow", QueryState::Running),
            record("q2", "fast", QueryState::Running),
        ];

        let kept = filter_records(records, false, &matcher).await;
        assert_eq!(ids(&kept), ["q2"]);
        assert_eq!(matcher.timed_out(), 1);
    }

    #[tokio::test]
    async fn every_slow_record_is_counted_once() {
        let matcher = BoundedMatcher::from_predicate(
            |user| {
                if user.starts_with("slow") {
                    std::thread::sleep(Duration::from_millis(200));
                }
                true
            },
            Duration::from_millis(30),
        );
        let records = vec![
            record("q1", "slow_a", QueryState::Running),
            record("q2", "fast", QueryState::Running),
            record("q3", "slow_b", QueryState::Queued),
            record("q4", "done", QueryState::Finished),
        ];

        let kept = filter_records(records, false, &matcher).await;
        assert_eq!(ids(&kept), ["q2"]);
        assert_eq!(matcher.timed_out(), 2);
    }

    #[test]
    fn params_map_to_snapshot_options() {
        let params = QueryStateParams {
            include_all_query_progress_stats: true,
            exclude_resource_group_path_info: true,
            query_text_size_limit: Some(10),
            ..QueryStateParams::default()
        };
        let options = params.snapshot_options();
        assert!(options.include_progress);
        assert!(options.exclude_resource_group_path);
        assert_eq!(options.query_text_size_limit, Some(10));
    }

    #[test]
    fn params_deserialize_from_camel_case_query() {
        let params: QueryStateParams = serde_json::from_value(serde_json::json!({
            "user": "alice",
            "includeLocalQueryOnly": true,
            "includeAllQueries": true,
        }))
        .unwrap();
        assert_eq!(params.user.as_deref(), Some("alice"));
        assert!(params.include_local_query_only);
        assert!(params.include_all_queries);
        assert!(!params.include_all_query_progress_stats);
        assert!(params.query_text_size_limit.is_none());
    }
}
