//! The query registry contract and an in-memory implementation.

use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::id::QueryId;
use crate::query::QueryRecord;

/// Read access to the queries tracked on this node.
///
/// Implementations own the query lifecycle; callers only read.
pub trait QueryRegistry: Send + Sync {
    /// Returns all known queries in registry order.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn list_queries(&self) -> Result<Vec<QueryRecord>>;

    /// Returns true if the query is tracked on this node.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn is_known(&self, id: &QueryId) -> Result<bool>;

    /// Returns a query by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceNotFound`] when the query is absent.
    fn get_query(&self, id: &QueryId) -> Result<QueryRecord>;
}

/// In-memory registry preserving insertion order.
///
/// Thread-safe via `RwLock`. Intended for tests and debug deployments.
#[derive(Debug, Default)]
pub struct InMemoryQueryRegistry {
    queries: RwLock<Vec<QueryRecord>>,
}

impl InMemoryQueryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the given records.
    ///
    /// A later record with an already-seen ID replaces the earlier one in place.
    #[must_use]
    pub fn with_queries(queries: impl IntoIterator<Item = QueryRecord>) -> Self {
        let mut seeded = Vec::new();
        for query in queries {
            upsert_into(&mut seeded, query);
        }
        Self {
            queries: RwLock::new(seeded),
        }
    }

    /// Loads records from a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not an array of query records.
    pub fn from_json(json: &str) -> Result<Self> {
        let queries: Vec<QueryRecord> = serde_json::from_str(json)?;
        Ok(Self::with_queries(queries))
    }

    /// Inserts a record, replacing any record with the same ID in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn upsert(&self, record: QueryRecord) -> Result<()> {
        upsert_into(&mut *self.write()?, record);
        Ok(())
    }

    /// Removes a record. Returns true if it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn remove(&self, id: &QueryId) -> Result<bool> {
        let mut queries = self.write()?;
        let before = queries.len();
        queries.retain(|q| &q.query_id != id);
        Ok(queries.len() != before)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<QueryRecord>>> {
        self.queries
            .read()
            .map_err(|_| Error::internal("query registry lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<QueryRecord>>> {
        self.queries
            .write()
            .map_err(|_| Error::internal("query registry lock poisoned"))
    }
}

fn upsert_into(queries: &mut Vec<QueryRecord>, record: QueryRecord) {
    if let Some(existing) = queries
        .iter_mut()
        .find(|q| q.query_id == record.query_id)
    {
        *existing = record;
    } else {
        queries.push(record);
    }
}

impl QueryRegistry for InMemoryQueryRegistry {
    fn list_queries(&self) -> Result<Vec<QueryRecord>> {
        Ok(self.read()?.clone())
    }

    fn is_known(&self, id: &QueryId) -> Result<bool> {
        Ok(self.read()?.iter().any(|q| &q.query_id == id))
    }

    fn get_query(&self, id: &QueryId) -> Result<QueryRecord> {
        self.read()?
            .iter()
            .find(|q| &q.query_id == id)
            .cloned()
            .ok_or_else(|| Error::query_not_found(id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryState;

    fn record(id: &str, user: &str, state: QueryState) -> QueryRecord {
        QueryRecord::new(QueryId::new(id).unwrap(), user, state)
    }

    #[test]
    fn list_preserves_insertion_order() {
        let registry = InMemoryQueryRegistry::with_queries([
            record("q2", "bob", QueryState::Running),
            record("q1", "alice", QueryState::Queued),
            record("q3", "carol", QueryState::Finished),
        ]);
        let ids: Vec<_> = registry
            .list_queries()
            .unwrap()
            .into_iter()
            .map(|q| q.query_id.to_string())
            .collect();
        assert_eq!(ids, ["q2", "q1", "q3"]);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let registry = InMemoryQueryRegistry::with_queries([
            record("q1", "alice", QueryState::Queued),
            record("q2", "bob", QueryState::Running),
        ]);
        registry
            .upsert(record("q1", "alice", QueryState::Running))
            .unwrap();

        let queries = registry.list_queries().unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].state, QueryState::Running);
    }

    #[test]
    fn seeding_with_duplicate_ids_keeps_the_last_record_in_first_position() {
        let registry = InMemoryQueryRegistry::with_queries([
            record("q1", "alice", QueryState::Queued),
            record("q2", "bob", QueryState::Running),
            record("q1", "alice", QueryState::Finished),
        ]);

        let queries = registry.list_queries().unwrap();
        let ids: Vec<&str> = queries.iter().map(|q| q.query_id.as_str()).collect();
        assert_eq!(ids, ["q1", "q2"]);
        assert_eq!(queries[0].state, QueryState::Finished);
    }

    #[test]
    fn get_missing_query_is_not_found() {
        let registry = InMemoryQueryRegistry::new();
        let id = QueryId::new("missing").unwrap();

        assert!(!registry.is_known(&id).unwrap());
        assert!(registry.get_query(&id).unwrap_err().is_not_found());
    }

    #[test]
    fn remove_forgets_query() {
        let registry = InMemoryQueryRegistry::with_queries([record("q1", "a", QueryState::Failed)]);
        let id = QueryId::new("q1").unwrap();

        assert!(registry.remove(&id).unwrap());
        assert!(!registry.remove(&id).unwrap());
        assert!(!registry.is_known(&id).unwrap());
    }

    #[test]
    fn from_json_rejects_invalid_ids() {
        let json = r#"[{"queryId":"Q!","user":"a","state":"RUNNING","query":"","createTime":"2024-01-01T00:00:00Z"}]"#;
        assert!(InMemoryQueryRegistry::from_json(json).is_err());
    }
}
