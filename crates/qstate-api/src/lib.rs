//! # qstate-api
//!
//! HTTP read endpoint for the live state of in-flight queries.
//!
//! A node answers from its own query registry, or, when the cluster runs with
//! a resource manager, forwards the request to it and relays the answer.
//!
//! ## Endpoints
//!
//! ```text
//!   GET  /health                    - Health check
//!   GET  /ready                     - Readiness check
//!   GET  /metrics                   - Prometheus metrics
//!   GET  /v1/queryState             - List query states
//!   GET  /v1/queryState/:query_id   - Get one query's state
//! ```
//!
//! The `/v1` routes require the `admin` or `user` role.
//!
//! ## Example
//!
//! ```rust,ignore
//! use qstate_api::server::Server;
//!
//! let server = Server::builder()
//!     .http_port(8080)
//!     .resource_manager_enabled(true)
//!     .jwt_hs256_secret(std::env::var("QSTATE_JWT_SECRET")?)
//!     .build();
//!
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod openapi;
pub mod proxy;
pub mod routes;
pub mod routing;
pub mod server;
pub mod snapshot;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::Server;
    pub use crate::snapshot::{QueryStateSnapshot, SnapshotOptions};
}
