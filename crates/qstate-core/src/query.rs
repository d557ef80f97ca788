//! Query lifecycle records as produced by the query registry.
//!
//! Records are read-only from the point of view of the query-state service;
//! the registry owns their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::id::{QueryId, ResourceGroupId};

/// Lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    /// Waiting for prerequisites before queueing.
    WaitingForPrerequisites,
    /// Admitted to a resource group queue.
    Queued,
    /// Waiting for cluster resources.
    WaitingForResources,
    /// Being dispatched to a coordinator.
    Dispatching,
    /// Being planned.
    Planning,
    /// Stages are starting.
    Starting,
    /// Executing.
    Running,
    /// Output is being drained.
    Finishing,
    /// Completed successfully.
    Finished,
    /// Failed or was cancelled.
    Failed,
}

impl QueryState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForPrerequisites => "WAITING_FOR_PREREQUISITES",
            Self::Queued => "QUEUED",
            Self::WaitingForResources => "WAITING_FOR_RESOURCES",
            Self::Dispatching => "DISPATCHING",
            Self::Planning => "PLANNING",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution progress counters for a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryProgressStats {
    /// Wall time since the query was created.
    pub elapsed_time_millis: u64,
    /// Time spent queued.
    pub queued_time_millis: u64,
    /// Time spent executing.
    pub execution_time_millis: u64,
    /// Total CPU time across all tasks.
    pub cpu_time_millis: u64,
    /// Peak user memory reservation.
    pub peak_memory_bytes: u64,
    /// Rows read from sources.
    pub input_rows: u64,
    /// Bytes read from sources.
    pub input_bytes: u64,
    /// Drivers queued for execution.
    pub queued_drivers: u32,
    /// Drivers currently running.
    pub running_drivers: u32,
    /// Drivers finished.
    pub completed_drivers: u32,
    /// Total drivers.
    pub total_drivers: u32,
    /// Whether the query is currently blocked.
    pub blocked: bool,
    /// Completion percentage, when it can be estimated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
}

/// A query as tracked by the query registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    /// Query identifier.
    pub query_id: QueryId,
    /// User that submitted the query.
    pub user: String,
    /// Current lifecycle state.
    pub state: QueryState,
    /// Resource group the query was admitted to.
    #[serde(default)]
    pub resource_group_id: Option<ResourceGroupId>,
    /// Query text.
    pub query: String,
    /// Submission time.
    pub create_time: DateTime<Utc>,
    /// Client-supplied source tag.
    #[serde(default)]
    pub source: Option<String>,
    /// Session catalog.
    #[serde(default)]
    pub catalog: Option<String>,
    /// Session schema.
    #[serde(default)]
    pub schema: Option<String>,
    /// Progress counters.
    #[serde(default)]
    pub progress: QueryProgressStats,
}

impl QueryRecord {
    /// Creates a record with empty text and default progress.
    #[must_use]
    pub fn new(query_id: QueryId, user: impl Into<String>, state: QueryState) -> Self {
        Self {
            query_id,
            user: user.into(),
            state,
            resource_group_id: None,
            query: String::new(),
            create_time: Utc::now(),
            source: None,
            catalog: None,
            schema: None,
            progress: QueryProgressStats::default(),
        }
    }

    /// Sets the resource group.
    #[must_use]
    pub fn with_resource_group(mut self, group: ResourceGroupId) -> Self {
        self.resource_group_id = Some(group);
        self
    }

    /// Sets the query text.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Sets the progress counters.
    #[must_use]
    pub fn with_progress(mut self, progress: QueryProgressStats) -> Self {
        self.progress = progress;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_finished_and_failed_are_done() {
        let done: Vec<_> = [
            QueryState::WaitingForPrerequisites,
            QueryState::Queued,
            QueryState::WaitingForResources,
            QueryState::Dispatching,
            QueryState::Planning,
            QueryState::Starting,
            QueryState::Running,
            QueryState::Finishing,
            QueryState::Finished,
            QueryState::Failed,
        ]
        .into_iter()
        .filter(|s| s.is_done())
        .collect();
        assert_eq!(done, vec![QueryState::Finished, QueryState::Failed]);
    }

    #[test]
    fn state_wire_name_matches_serde() {
        let json = serde_json::to_string(&QueryState::WaitingForResources).unwrap();
        assert_eq!(json, format!("\"{}\"", QueryState::WaitingForResources));
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: QueryRecord = serde_json::from_value(serde_json::json!({
            "queryId": "q1",
            "user": "alice",
            "state": "RUNNING",
            "query": "SELECT 1",
            "createTime": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(record.query_id.as_str(), "q1");
        assert_eq!(record.state, QueryState::Running);
        assert!(record.resource_group_id.is_none());
        assert_eq!(record.progress, QueryProgressStats::default());
    }
}
