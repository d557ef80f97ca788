//! Local-vs-forward routing for query-state requests.
//!
//! A coordinator only holds the queries it dispatched; when the cluster runs
//! with a resource manager, that node is the cluster-wide source of truth.
//! Each request computes one [`Route`] and hands it to a single dispatcher.

use qstate_core::{NodeDiscovery, NodeRole, PeerNode};

use crate::error::ApiError;
use crate::metrics::{record_proxy_outcome, ProxyOutcome};

/// Where a request should be answered, before peer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Answer from this node's registry.
    Local,
    /// Forward to a resource manager.
    Proxy,
}

impl RoutingDecision {
    /// Decision for the list operation.
    #[must_use]
    pub const fn for_list(resource_manager_enabled: bool, local_only: bool) -> Self {
        if resource_manager_enabled && !local_only {
            Self::Proxy
        } else {
            Self::Local
        }
    }

    /// Decision for a single-query lookup.
    #[must_use]
    pub const fn for_single(resource_manager_enabled: bool, known_locally: bool) -> Self {
        if resource_manager_enabled && !known_locally {
            Self::Proxy
        } else {
            Self::Local
        }
    }
}

/// Resolved route for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Answer from this node's registry.
    Local,
    /// Forward to the given resource manager.
    Proxy(PeerNode),
}

impl Route {
    /// Resolves a decision into a route, selecting the first discovered
    /// resource manager for [`RoutingDecision::Proxy`].
    ///
    /// # Errors
    ///
    /// Returns a `503` error when forwarding is required but no resource
    /// manager is known.
    pub fn resolve(
        decision: RoutingDecision,
        discovery: &dyn NodeDiscovery,
    ) -> Result<Self, ApiError> {
        match decision {
            RoutingDecision::Local => Ok(Self::Local),
            RoutingDecision::Proxy => discovery
                .peers_with_role(NodeRole::ResourceManager)
                .into_iter()
                .next()
                .map(Self::Proxy)
                .ok_or_else(|| {
                    record_proxy_outcome(ProxyOutcome::Unavailable);
                    tracing::warn!("No resource manager available to forward query state request");
                    ApiError::unavailable("no resource manager available")
                }),
        }
    }
}
