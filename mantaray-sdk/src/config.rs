//! Connection settings.
//!
//! A [`ServerConfig`] describes one server; [`ClientConfig`] is the on-disk
//! form holding several of them:
//!
//! ```toml
//! [[server]]
//! name = "libera"
//! host = "irc.libera.chat"
//! port = 6697
//! tls = true
//! nick = "Alice"
//! autojoin = ["#rust"]
//!
//! [server.reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 60000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Settings for one server connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identifies the connection in multi-server setups. Defaults to the host.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
    pub nick: String,
    /// Username (ident).
    pub user: String,
    pub realname: String,
    /// Sent as PASS before registration.
    pub password: Option<String>,
    /// Channels joined after every successful registration.
    pub autojoin: Vec<String>,
    pub reconnect: ReconnectPolicy,
    /// Send our own PING after this long without traffic.
    pub ping_interval_secs: u64,
    /// Declare the link dead when nothing arrives this long after our PING.
    pub ping_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Messages kept per channel or private thread.
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "127.0.0.1".to_string(),
            port: 6667,
            tls: false,
            tls_insecure: false,
            nick: "mantaray".to_string(),
            user: "mantaray".to_string(),
            realname: "mantaray IRC client".to_string(),
            password: None,
            autojoin: vec![],
            reconnect: ReconnectPolicy::default(),
            ping_interval_secs: 60,
            ping_timeout_secs: 120,
            connect_timeout_secs: 15,
            history_limit: crate::session::DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection name, falling back to the host.
    pub fn server_name(&self) -> &str {
        if self.name.is_empty() {
            &self.host
        } else {
            &self.name
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// When and how often to retry a lost connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    /// Ceiling for the exponential backoff.
    pub max_delay_ms: u64,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): `initial * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms.max(self.initial_delay_ms));
        Duration::from_millis(delay)
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("server {0:?} is listed more than once")]
    DuplicateServer(String),
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        content.parse()
    }
}

impl std::str::FromStr for ClientConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ClientConfig = toml::from_str(s)?;
        let mut seen = std::collections::HashSet::new();
        for server in &config.servers {
            let name = crate::casemap::irc_lowercase(server.server_name());
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateServer(server.server_name().to_string()));
            }
        }
        Ok(config)
    }
}
