//! Strongly-typed identifiers for queries and resource groups.
//!
//! # Example
//!
//! ```rust
//! use qstate_core::id::{QueryId, ResourceGroupId};
//!
//! let query: QueryId = "20240101_000000_00001_abcde".parse().unwrap();
//! let group: ResourceGroupId = "global.adhoc.alice".parse().unwrap();
//!
//! assert_eq!(query.as_str(), "20240101_000000_00001_abcde");
//! assert_eq!(group.parent().unwrap().to_string(), "global.adhoc");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Identifier of a query tracked by the cluster.
///
/// Query IDs are non-empty and consist of lowercase ASCII letters, digits,
/// and underscores only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub struct QueryId(String);

impl QueryId {
    /// Creates a query ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty or contains disallowed characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Returns the query ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "query ID cannot be empty".to_string(),
            });
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(Error::InvalidId {
                message: format!("invalid query ID '{id}': unexpected character '{c}'"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueryId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QueryId> for String {
    fn from(value: QueryId) -> Self {
        value.0
    }
}

/// Identifier of a resource group: the ordered segments from the root group
/// down to this group.
///
/// Rendered as `root.child.leaf`; serialized as a JSON array of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ResourceGroupId(Vec<String>);

impl ResourceGroupId {
    /// Creates a resource group ID from its segments.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no segments, or a segment is empty or
    /// contains a `.`.
    pub fn new(segments: Vec<String>) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::InvalidId {
                message: "resource group ID must have at least one segment".to_string(),
            });
        }
        for segment in &segments {
            if segment.is_empty() || segment.contains('.') {
                return Err(Error::InvalidId {
                    message: format!("invalid resource group segment '{segment}'"),
                });
            }
        }
        Ok(Self(segments))
    }

    /// Creates a root resource group ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid segment.
    pub fn root(name: impl Into<String>) -> Result<Self> {
        Self::new(vec![name.into()])
    }

    /// Returns a child of this group.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid segment.
    pub fn child(&self, name: impl Into<String>) -> Result<Self> {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self::new(segments)
    }

    /// Returns the parent group, or `None` for a root group.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Returns the segments from root to this group.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns the last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }
}

impl fmt::Display for ResourceGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for ResourceGroupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.split('.').map(str::to_string).collect())
    }
}

impl TryFrom<Vec<String>> for ResourceGroupId {
    type Error = Error;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceGroupId> for Vec<String> {
    fn from(value: ResourceGroupId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_id_accepts_lowercase_digits_underscore() {
        let id = QueryId::new("20240101_123456_00042_x9y8z").unwrap();
        assert_eq!(id.to_string(), "20240101_123456_00042_x9y8z");
    }

    #[test]
    fn query_id_rejects_bad_input() {
        assert!(QueryId::new("").is_err());
        assert!(QueryId::new("Q1").is_err());
        assert!(QueryId::new("q-1").is_err());
        assert!(QueryId::new("q1/../etc").is_err());
    }

    #[test]
    fn query_id_deserialize_validates() {
        let ok: QueryId = serde_json::from_str("\"q1\"").unwrap();
        assert_eq!(ok.as_str(), "q1");
        assert!(serde_json::from_str::<QueryId>("\"BAD\"").is_err());
    }

    #[test]
    fn resource_group_parse_and_display() {
        let id: ResourceGroupId = "global.adhoc.alice".parse().unwrap();
        assert_eq!(id.segments(), ["global", "adhoc", "alice"]);
        assert_eq!(id.name(), "alice");
        assert_eq!(id.to_string(), "global.adhoc.alice");
    }

    #[test]
    fn resource_group_parent_chain() {
        let id: ResourceGroupId = "global.adhoc".parse().unwrap();
        let parent = id.parent().unwrap();
        assert_eq!(parent.to_string(), "global");
        assert!(parent.parent().is_none());
    }

    #[test]
    fn resource_group_rejects_empty_segments() {
        assert!("global..alice".parse::<ResourceGroupId>().is_err());
        assert!(ResourceGroupId::new(Vec::new()).is_err());
        assert!(ResourceGroupId::root("a.b").is_err());
    }

    #[test]
    fn resource_group_serializes_as_segments() {
        let id = ResourceGroupId::root("global")
            .and_then(|g| g.child("etl"))
            .unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#"["global","etl"]"#);
    }
}
