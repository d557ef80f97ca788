//! # qstate-core
//!
//! Core types for the qstate query-state service.
//!
//! - **Identifiers**: validated [`QueryId`] and [`ResourceGroupId`]
//! - **Query records**: lifecycle state and progress as produced by the registry
//! - **Collaborator contracts**: [`QueryRegistry`], [`ResourceGroupCatalog`],
//!   [`NodeDiscovery`], with in-memory implementations for tests and debug runs
//! - **Error types**: shared [`Error`] and [`Result`]
//!
//! ## Example
//!
//! ```rust
//! use qstate_core::prelude::*;
//!
//! let registry = InMemoryQueryRegistry::with_queries([QueryRecord::new(
//!     QueryId::new("q1").unwrap(),
//!     "alice",
//!     QueryState::Running,
//! )]);
//!
//! assert_eq!(registry.list_queries().unwrap().len(), 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod node;
pub mod observability;
pub mod query;
pub mod registry;
pub mod resource_group;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{QueryId, ResourceGroupId};
    pub use crate::node::{NodeDiscovery, NodeRole, PeerNode, StaticNodeDiscovery};
    pub use crate::query::{QueryProgressStats, QueryRecord, QueryState};
    pub use crate::registry::{InMemoryQueryRegistry, QueryRegistry};
    pub use crate::resource_group::{HierarchicalResourceGroupCatalog, ResourceGroupCatalog};
}

pub use error::{Error, Result};
pub use id::{QueryId, ResourceGroupId};
pub use node::{NodeDiscovery, NodeRole, PeerNode, StaticNodeDiscovery};
pub use observability::{init_logging, LogFormat};
pub use query::{QueryProgressStats, QueryRecord, QueryState};
pub use registry::{InMemoryQueryRegistry, QueryRegistry};
pub use resource_group::{HierarchicalResourceGroupCatalog, ResourceGroupCatalog};
