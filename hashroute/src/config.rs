//! Router configuration
//!
//! [`RouterConfig`] is the serializable form loaded from TOML. It is turned
//! into [`RouterOptions`], the explicit set of collaborators (registry,
//! picker, network) threaded through [`Router::new`](crate::Router::new).

use crate::error::{Result, RouterError};
use crate::picker::{Picker, PickerConfig};
use crate::registry::{EndpointRegistry, RegistryConfig};
use crate::transport::{Network, TcpNetwork, TransportConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main router configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Address this node serves and registers (host:port)
    #[serde(default = "default_node_addr")]
    pub node_addr: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Owner selection algorithm
    #[serde(default)]
    pub picker: PickerConfig,

    /// Inter-node transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Membership source. There is no default.
    pub registry: RegistryConfig,
}

fn default_node_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    30000
}

impl RouterConfig {
    /// Create a config with defaults for everything except the registry
    pub fn new(registry: RegistryConfig) -> Self {
        Self {
            node_addr: default_node_addr(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            picker: PickerConfig::default(),
            transport: TransportConfig::default(),
            registry,
        }
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RouterError::Config(format!("Invalid config: {}", e)))?;
        config.picker.validate()?;
        Ok(config)
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// TLS configuration for the QUIC transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the certificate file (PEM format)
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,

    /// Path to the private key file (PEM format)
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    /// Path to CA certificate for verifying peer certificates
    pub ca_cert_path: Option<PathBuf>,

    /// Server name expected in peer certificates
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Skip peer certificate verification (INSECURE - for development only)
    #[serde(default)]
    pub skip_verify: bool,
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("./conf/tls/node-cert.pem")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("./conf/tls/node-key.pem")
}

fn default_server_name() -> String {
    "hashroute".to_string()
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: default_cert_path(),
            key_path: default_key_path(),
            ca_cert_path: None,
            server_name: default_server_name(),
            skip_verify: false,
        }
    }
}

/// Collaborators and limits of one router instance
#[derive(Clone)]
pub struct RouterOptions {
    pub registry: Arc<dyn EndpointRegistry>,
    pub picker: Arc<dyn Picker>,
    pub network: Arc<dyn Network>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl RouterOptions {
    /// Options with the given registry, the rendezvous picker and the TCP network
    pub fn new(registry: Arc<dyn EndpointRegistry>) -> Self {
        let connect_timeout = Duration::from_millis(default_connect_timeout());
        let request_timeout = Duration::from_millis(default_request_timeout());
        Self {
            registry,
            picker: PickerConfig::default().create_picker(),
            network: Arc::new(TcpNetwork::new(connect_timeout, request_timeout)),
            connect_timeout,
            request_timeout,
        }
    }

    /// Build options from a config
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        Ok(Self {
            registry: config.registry.create_registry()?,
            picker: config.picker.create_picker(),
            network: config
                .transport
                .create_network(config.connect_timeout(), config.request_timeout())?,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn with_picker(mut self, picker: Arc<dyn Picker>) -> Self {
        self.picker = picker;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = network;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
