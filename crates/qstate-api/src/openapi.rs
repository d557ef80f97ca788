//! `OpenAPI` specification generation for `qstate-api`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// `OpenAPI` documentation for the query-state API (`/v1/*`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "qstate API",
        description = "Live query state, answered locally or by the resource manager"
    ),
    paths(
        crate::routes::query_state::list_query_states,
        crate::routes::query_state::get_query_state,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::snapshot::QueryStateSnapshot,
            qstate_core::QueryState,
            qstate_core::QueryProgressStats,
        )
    ),
    tags(
        (name = "queryState", description = "Query state operations"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Returns the generated `OpenAPI` spec serialized as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn openapi_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_both_query_state_paths() {
        let doc = openapi();
        assert!(doc.paths.paths.contains_key("/v1/queryState"));
        assert!(doc.paths.paths.contains_key("/v1/queryState/{query_id}"));
    }

    #[test]
    fn documents_bearer_auth() {
        let doc = openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearerAuth"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn list_parameters_use_wire_names() {
        let json = openapi_json().unwrap();
        for name in [
            "includeLocalQueryOnly",
            "includeAllQueries",
            "includeAllQueryProgressStats",
            "excludeResourceGroupPathInfo",
            "queryTextSizeLimit",
        ] {
            assert!(json.contains(name), "missing parameter {name}");
        }
    }
}
