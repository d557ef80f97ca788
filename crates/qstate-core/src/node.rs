//! Cluster membership: peer nodes and their discovery.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role a cluster node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Accepts and tracks query submissions.
    Coordinator,
    /// Holds cluster-wide query state.
    ResourceManager,
}

/// Address of a peer node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerNode {
    /// Cluster-unique node identifier.
    pub node_id: String,
    /// Role of the node.
    pub role: NodeRole,
    /// URI scheme (`http` or `https`).
    pub scheme: String,
    /// Host name or IP literal (IPv6 without brackets).
    pub host: String,
    /// Port.
    pub port: u16,
}

impl PeerNode {
    /// Parses a peer from an internal URI such as `http://rm-1:8080`.
    ///
    /// Any path on the URI is ignored. The port defaults to 80/443 by scheme.
    /// The node ID defaults to `host:port`; see [`PeerNode::with_node_id`].
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is not `http`/`https`, the host is
    /// empty, or the port is not a valid `u16`.
    pub fn from_uri(role: NodeRole, uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("peer URI '{uri}' has no scheme")))?;
        let scheme = scheme.to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "peer URI '{uri}' must use http or https"
                )));
            }
        };

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let (host, port) = split_host_port(authority)
            .map_err(|message| Error::InvalidInput(format!("peer URI '{uri}': {message}")))?;
        if host.is_empty() {
            return Err(Error::InvalidInput(format!("peer URI '{uri}' has no host")));
        }

        let port = port.unwrap_or(default_port);
        Ok(Self {
            node_id: format!("{host}:{port}"),
            role,
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Replaces the node ID.
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Returns `scheme://host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn authority_uri(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl fmt::Display for PeerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority_uri())
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coordinator" => Ok(Self::Coordinator),
            "resource_manager" => Ok(Self::ResourceManager),
            other => Err(Error::InvalidInput(format!("unknown node role '{other}'"))),
        }
    }
}

fn split_host_port(authority: &str) -> std::result::Result<(&str, Option<u16>), String> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        (host, after.strip_prefix(':'))
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    let port = port
        .map(|p| p.parse::<u16>().map_err(|e| format!("invalid port '{p}': {e}")))
        .transpose()?;
    Ok((host, port))
}

/// Source of cluster membership.
pub trait NodeDiscovery: Send + Sync {
    /// Returns the currently known peers with the given role, possibly none.
    fn peers_with_role(&self, role: NodeRole) -> Vec<PeerNode>;
}

/// Discovery backed by a fixed peer list.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeDiscovery {
    peers: Vec<PeerNode>,
}

impl StaticNodeDiscovery {
    /// Creates discovery over the given peers.
    #[must_use]
    pub fn new(peers: Vec<PeerNode>) -> Self {
        Self { peers }
    }

    /// Creates discovery for resource managers from their internal URIs.
    ///
    /// # Errors
    ///
    /// Returns an error if any URI cannot be parsed.
    pub fn resource_managers<S: AsRef<str>>(uris: &[S]) -> Result<Self> {
        let peers = uris
            .iter()
            .map(|uri| PeerNode::from_uri(NodeRole::ResourceManager, uri.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(peers))
    }
}

impl NodeDiscovery for StaticNodeDiscovery {
    fn peers_with_role(&self, role: NodeRole) -> Vec<PeerNode> {
        self.peers
            .iter()
            .filter(|peer| peer.role == role)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let peer = PeerNode::from_uri(NodeRole::ResourceManager, "http://rm-1:8081/v1").unwrap();
        assert_eq!(peer.scheme, "http");
        assert_eq!(peer.host, "rm-1");
        assert_eq!(peer.port, 8081);
        assert_eq!(peer.authority_uri(), "http://rm-1:8081");
        assert_eq!(peer.node_id, "rm-1:8081");
    }

    #[test]
    fn node_id_can_be_overridden() {
        let peer = PeerNode::from_uri(NodeRole::ResourceManager, "http://10.0.0.7:8081")
            .unwrap()
            .with_node_id("rm-a");
        assert_eq!(peer.node_id, "rm-a");
        assert_eq!(peer.authority_uri(), "http://10.0.0.7:8081");
    }

    #[test]
    fn defaults_port_by_scheme() {
        let peer = PeerNode::from_uri(NodeRole::ResourceManager, "HTTPS://rm.internal").unwrap();
        assert_eq!(peer.scheme, "https");
        assert_eq!(peer.port, 443);
    }

    #[test]
    fn parses_ipv6_literal() {
        let peer = PeerNode::from_uri(NodeRole::ResourceManager, "http://[::1]:9000").unwrap();
        assert_eq!(peer.host, "::1");
        assert_eq!(peer.port, 9000);
        assert_eq!(peer.to_string(), "http://[::1]:9000");
    }

    #[test]
    fn rejects_bad_uris() {
        for uri in ["rm-1:8080", "ftp://rm-1", "http://:8080", "http://rm-1:99999"] {
            assert!(
                PeerNode::from_uri(NodeRole::ResourceManager, uri).is_err(),
                "{uri} should be rejected"
            );
        }
    }

    #[test]
    fn static_discovery_filters_by_role() {
        let coordinator = PeerNode::from_uri(NodeRole::Coordinator, "http://c1:8080").unwrap();
        let rm = PeerNode::from_uri(NodeRole::ResourceManager, "http://rm1:8080").unwrap();
        let discovery = StaticNodeDiscovery::new(vec![coordinator, rm.clone()]);

        assert_eq!(discovery.peers_with_role(NodeRole::ResourceManager), vec![rm]);
        assert_eq!(discovery.peers_with_role(NodeRole::Coordinator).len(), 1);
    }

    #[test]
    fn empty_discovery_has_no_peers() {
        let discovery = StaticNodeDiscovery::resource_managers::<&str>(&[]).unwrap();
        assert!(discovery.peers_with_role(NodeRole::ResourceManager).is_empty());
    }
}
