//! Caller-visible query state snapshots.
//!
//! A snapshot is built fresh per request from a registry record, shaped by
//! [`SnapshotOptions`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use qstate_core::{
    QueryId, QueryProgressStats, QueryRecord, QueryState, ResourceGroupCatalog, ResourceGroupId,
};

/// Per-request snapshot shaping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Include progress statistics.
    pub include_progress: bool,
    /// Skip resource-group path resolution.
    pub exclude_resource_group_path: bool,
    /// Maximum number of characters of query text to return.
    pub query_text_size_limit: Option<usize>,
}

impl SnapshotOptions {
    /// Options used for single-query lookups: no progress, no group path,
    /// full query text.
    #[must_use]
    pub const fn single_lookup() -> Self {
        Self {
            include_progress: false,
            exclude_resource_group_path: true,
            query_text_size_limit: None,
        }
    }
}

/// Externally visible state of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryStateSnapshot {
    /// Query identifier.
    #[schema(value_type = String)]
    pub query_id: QueryId,
    /// Lifecycle state.
    pub query_state: QueryState,
    /// Submitting user.
    pub user: String,
    /// Resource group the query was admitted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<String>>)]
    pub resource_group_id: Option<ResourceGroupId>,
    /// Resource groups from the root down to the query's group. Only present
    /// for queued queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Vec<String>>>)]
    pub path_to_root: Option<Vec<ResourceGroupId>>,
    /// Query text, possibly truncated.
    pub query: String,
    /// Whether `query` was truncated.
    #[serde(default)]
    pub query_truncated: bool,
    /// Submission time.
    pub create_time: DateTime<Utc>,
    /// Client-supplied source tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Session catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// Session schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Progress statistics, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<QueryProgressStats>,
}

/// Builds snapshots against a resource-group catalog.
pub struct SnapshotBuilder<'a> {
    catalog: &'a dyn ResourceGroupCatalog,
}

impl<'a> SnapshotBuilder<'a> {
    /// Creates a builder resolving group paths through `catalog`.
    #[must_use]
    pub fn new(catalog: &'a dyn ResourceGroupCatalog) -> Self {
        Self { catalog }
    }

    /// Projects a registry record into a snapshot.
    #[must_use]
    pub fn build(&self, record: QueryRecord, options: SnapshotOptions) -> QueryStateSnapshot {
        let resolve_path =
            record.state == QueryState::Queued && !options.exclude_resource_group_path;
        let path_to_root = if resolve_path {
            record
                .resource_group_id
                .as_ref()
                .map(|group| self.catalog.path_to_root(group))
        } else {
            None
        };

        let (query, query_truncated) =
            truncate_chars(record.query, options.query_text_size_limit);

        QueryStateSnapshot {
            query_id: record.query_id,
            query_state: record.state,
            user: record.user,
            resource_group_id: record.resource_group_id,
            path_to_root,
            query,
            query_truncated,
            create_time: record.create_time,
            source: record.source,
            catalog: record.catalog,
            schema: record.schema,
            progress: options.include_progress.then_some(record.progress),
        }
    }
}

fn truncate_chars(text: String, limit: Option<usize>) -> (String, bool) {
    let Some(limit) = limit else {
        return (text, false);
    };
    match text.char_indices().nth(limit) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text, false),
    }
}
