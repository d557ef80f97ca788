//! HTTP route handlers.

pub mod query_state;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/v1` routes.
pub fn v1_routes() -> Router<Arc<AppState>> {
    Router::new().merge(query_state::routes())
}
