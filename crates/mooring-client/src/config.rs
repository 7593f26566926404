//! Server descriptors: the validated configuration shape the manager
//! consumes.
//!
//! Descriptors arrive pre-validated from the host application and are
//! never mutated after a connection is established. Loading and merging
//! configuration files is the host's concern; this module only defines
//! the shape and the per-kind validity rules.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mooring_transport::TransportKind;

use crate::error::{ClientError, ClientResult};

fn default_enabled() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_auto_reconnect() -> bool {
    true
}

/// Everything needed to reach one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Unique server name, the key for every manager operation
    pub name: String,
    /// Which transport to build
    pub kind: TransportKind,
    /// Executable for subprocess servers
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for subprocess servers
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for subprocess servers
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL for http, sse, and websocket servers
    #[serde(default)]
    pub url: Option<String>,
    /// Extra request headers for http and sse servers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Bearer token for http and sse servers
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Disabled servers are configured but never connected
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connection retry attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether a lost connection is re-established automatically
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

impl ServerDescriptor {
    /// A descriptor with defaults for everything but name and kind.
    pub fn new(name: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            name: name.into(),
            kind,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            auth_token: None,
            enabled: default_enabled(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            auto_reconnect: default_auto_reconnect(),
        }
    }

    /// The per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check the per-kind requirements: subprocess servers need a
    /// command, network servers need a URL.
    pub fn validate(&self) -> ClientResult<()> {
        let fail = |reason: &str| {
            Err(ClientError::InvalidDescriptor {
                server: self.name.clone(),
                reason: reason.to_string(),
            })
        };
        if self.name.is_empty() {
            return fail("name cannot be empty");
        }
        match self.kind {
            TransportKind::Subprocess => {
                if self.command.as_deref().map_or(true, str::is_empty) {
                    return fail("subprocess servers require a command");
                }
            }
            TransportKind::Http | TransportKind::Sse | TransportKind::WebSocket => {
                if self.url.as_deref().map_or(true, str::is_empty) {
                    return fail("network servers require a url");
                }
            }
        }
        Ok(())
    }
}

/// The full set of configured servers, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// name → descriptor
    #[serde(default)]
    pub servers: HashMap<String, ServerDescriptor>,
}

impl McpConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor under its own name.
    pub fn with_server(mut self, descriptor: ServerDescriptor) -> Self {
        self.servers.insert(descriptor.name.clone(), descriptor);
        self
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.get(name)
    }

    /// Validate every descriptor, failing on the first invalid one.
    pub fn validate(&self) -> ClientResult<()> {
        for descriptor in self.servers.values() {
            descriptor.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn camel_case_config_deserializes() {
        let json = r#"{
            "name": "github",
            "kind": "subprocess",
            "command": "mcp-github",
            "args": ["--stdio"],
            "env": {"TOKEN": "t"},
            "requestTimeoutMs": 5000,
            "maxRetries": 2,
            "autoReconnect": false
        }"#;
        let descriptor: ServerDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.kind, TransportKind::Subprocess);
        assert_eq!(descriptor.request_timeout(), Duration::from_millis(5000));
        assert_eq!(descriptor.max_retries, 2);
        assert!(!descriptor.auto_reconnect);
        assert!(descriptor.enabled);
        descriptor.validate().unwrap();
    }

    #[test]
    fn subprocess_without_command_is_invalid() {
        let descriptor = ServerDescriptor::new("broken", TransportKind::Subprocess);
        assert!(matches!(
            descriptor.validate(),
            Err(ClientError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn network_kinds_require_url() {
        for kind in [
            TransportKind::Http,
            TransportKind::Sse,
            TransportKind::WebSocket,
        ] {
            let descriptor = ServerDescriptor::new("web", kind);
            assert!(descriptor.validate().is_err());

            let mut descriptor = descriptor;
            descriptor.url = Some("http://localhost:3000".to_string());
            descriptor.validate().unwrap();
        }
    }

    #[test]
    fn config_lookup_by_name() {
        let mut descriptor = ServerDescriptor::new("fs", TransportKind::Subprocess);
        descriptor.command = Some("mcp-fs".to_string());
        let config = McpConfig::new().with_server(descriptor);
        assert!(config.get("fs").is_some());
        assert!(config.get("missing").is_none());
        config.validate().unwrap();
    }
}
