//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use qstate_core::{Error, Result};

const DEFAULT_MATCHING_TIMEOUT_MILLIS: u64 = 1000;
const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 30;
const MAX_MATCHING_TIMEOUT_MILLIS: u64 = 60_000;
const DEFAULT_ROLES_CLAIM: &str = "roles";

/// Configuration for the qstate API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - logs are pretty-printed instead of JSON
    /// - the in-memory registry may be seeded from `registry_seed_path`
    /// - caller roles are read from the `X-Roles` header instead of a JWT
    pub debug: bool,

    /// JWT verification for `/v1` callers (used when `debug` is false).
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Whether the cluster runs with a dedicated resource manager.
    ///
    /// When enabled, list requests (unless restricted to local queries) and
    /// lookups of queries unknown to this node are forwarded to a resource
    /// manager.
    #[serde(default)]
    pub resource_manager_enabled: bool,

    /// Budget for evaluating the user filter against one query, in milliseconds.
    #[serde(default = "default_matching_timeout_millis")]
    pub matching_timeout_millis: u64,

    /// Internal URIs of resource-manager nodes (static discovery).
    #[serde(default)]
    pub resource_manager_uris: Vec<String>,

    /// Timeout for a forwarded request, in seconds.
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,

    /// JSON file of query records loaded into the in-memory registry (debug only).
    #[serde(default)]
    pub registry_seed_path: Option<String>,
}

fn default_matching_timeout_millis() -> u64 {
    DEFAULT_MATCHING_TIMEOUT_MILLIS
}

fn default_proxy_timeout_secs() -> u64 {
    DEFAULT_PROXY_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            debug: false,
            jwt: JwtConfig::default(),
            resource_manager_enabled: false,
            matching_timeout_millis: default_matching_timeout_millis(),
            resource_manager_uris: Vec::new(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
            registry_seed_path: None,
        }
    }
}

impl Config {
    /// Loads configuration from `QSTATE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };
        let mut config = Self::default();

        if let Some(port) = vars.u16("QSTATE_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = vars.bool("QSTATE_DEBUG")? {
            config.debug = debug;
        }
        if let Some(enabled) = vars.bool("QSTATE_RESOURCE_MANAGER_ENABLED")? {
            config.resource_manager_enabled = enabled;
        }
        if let Some(millis) = vars.u64("QSTATE_MATCHING_TIMEOUT_MS")? {
            if millis == 0 {
                return Err(Error::InvalidInput(
                    "QSTATE_MATCHING_TIMEOUT_MS must be greater than 0".to_string(),
                ));
            }
            if millis > MAX_MATCHING_TIMEOUT_MILLIS {
                return Err(Error::InvalidInput(format!(
                    "QSTATE_MATCHING_TIMEOUT_MS must be at most {MAX_MATCHING_TIMEOUT_MILLIS}"
                )));
            }
            config.matching_timeout_millis = millis;
        }
        if let Some(uris) = vars.string("QSTATE_RESOURCE_MANAGER_URIS") {
            config.resource_manager_uris = parse_list(&uris);
        }
        if let Some(secs) = vars.u64("QSTATE_PROXY_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "QSTATE_PROXY_TIMEOUT_SECS must be greater than 0".to_string(),
                ));
            }
            config.proxy_timeout_secs = secs;
        }
        if let Some(path) = vars.string("QSTATE_REGISTRY_SEED_PATH") {
            config.registry_seed_path = Some(path);
        }
        if let Some(secret) = vars.string("QSTATE_JWT_SECRET") {
            config.jwt.hs256_secret = Some(secret);
        }
        if let Some(claim) = vars.string("QSTATE_JWT_ROLES_CLAIM") {
            config.jwt.roles_claim = claim;
        }

        Ok(config)
    }

    /// Returns the per-query user-filter budget.
    #[must_use]
    pub fn matching_timeout(&self) -> Duration {
        Duration::from_millis(self.matching_timeout_millis)
    }

    /// Returns the forwarded-request timeout.
    #[must_use]
    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }
}

/// JWT configuration for production authentication.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret used to verify bearer tokens.
    #[serde(default, skip_serializing)]
    pub hs256_secret: Option<String>,

    /// Claim holding the caller's roles, as an array or a comma-separated string.
    #[serde(default = "default_roles_claim")]
    pub roles_claim: String,
}

fn default_roles_claim() -> String {
    DEFAULT_ROLES_CLAIM.to_string()
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            hs256_secret: None,
            roles_claim: default_roles_claim(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field(
                "hs256_secret",
                &self.hs256_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("roles_claim", &self.roles_claim)
            .finish()
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u16(&self, name: &str) -> Result<Option<u16>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u16>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
