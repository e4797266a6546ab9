//! # Cluster Settings
//!
//! Connection settings consumed by the connection manager. Every field is
//! optional for callers: unset fields fall back to the cluster defaults below.
//! Settings are read once, when the first connection is established.

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_ADMIN_PORT: u16 = 8091;
pub const DEFAULT_API_PORT: u16 = 8092;
pub const DEFAULT_SSL_ADMIN_PORT: u16 = 18091;
pub const DEFAULT_SSL_API_PORT: u16 = 18092;
pub const DEFAULT_QUERY_PORT: u16 = 8093;

/// Settings used to reach the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterSettings {
    /// Cluster host name, e.g. "localhost".
    pub host: String,
    /// Default bucket password, used when a bucket is opened without one.
    pub password: Option<String>,
    /// Administration port.
    pub admin_port: u16,
    /// API (views) port.
    pub api_port: u16,
    /// Administration port for SSL connections.
    pub ssl_admin_port: u16,
    /// API port for SSL connections.
    pub ssl_api_port: u16,
    /// Query service port; `None` disables the query endpoint.
    pub query_port: Option<u16>,
    /// Certificate used for SSL connections.
    pub cert_path: Option<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            host: DEFAULT_HOST.to_string(),
            password: None,
            admin_port: DEFAULT_ADMIN_PORT,
            api_port: DEFAULT_API_PORT,
            ssl_admin_port: DEFAULT_SSL_ADMIN_PORT,
            ssl_api_port: DEFAULT_SSL_API_PORT,
            query_port: Some(DEFAULT_QUERY_PORT),
            cert_path: None,
        }
    }
}

impl ClusterSettings {
    /// Settings for `host` with every other field defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        ClusterSettings {
            host: host.into().trim().to_string(),
            ..ClusterSettings::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_admin_port(mut self, port: u16) -> Self {
        self.admin_port = port;
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn with_ssl_ports(mut self, admin_port: u16, api_port: u16) -> Self {
        self.ssl_admin_port = admin_port;
        self.ssl_api_port = api_port;
        self
    }

    pub fn with_query_port(mut self, port: Option<u16>) -> Self {
        self.query_port = port;
        self
    }

    pub fn with_cert_path(mut self, path: impl Into<String>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    /// Address dialed to reach the cluster, `<host>:<admin_port>`.
    pub fn connection_string(&self) -> String {
        format!("{}:{}", self.host, self.admin_port)
    }

    /// Query service endpoint registered on opened buckets, if enabled.
    pub fn query_endpoint(&self) -> Option<String> {
        self.query_port
            .map(|port| format!("http://{}:{}", self.host, port))
    }
}
