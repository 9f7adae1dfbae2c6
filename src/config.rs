//! Node Configuration
//!
//! Values come from `ST_`-prefixed environment variables first; command line flags
//! override them. The result is a plain `NodeConfig` handed to `NodeContext`.

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::membership::types::is_valid_node_name;

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";
pub const DEFAULT_FANOUT_WIDTH: usize = 5;
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Memory,
    Sqlite { path: PathBuf },
}

/// Retry and timeout policy for outbound peer calls.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for a single attempt, connection setup included.
    pub timeout: Duration,
    pub attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            attempts: 3,
            initial_backoff: Duration::from_millis(150),
            max_backoff: Duration::from_millis(1200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub own_name: String,
    pub own_address: String,
    pub bind_addr: SocketAddr,
    /// Peer to join at startup, if any.
    pub bootstrap: Option<String>,
    pub storage: StorageBackend,
    pub api_token: Option<String>,
    pub fanout_width: usize,
    pub max_reference_depth: usize,
    pub client: ClientConfig,
}

impl NodeConfig {
    /// Minimal configuration for a node; everything else takes its default.
    pub fn new(own_name: impl Into<String>, bind_addr: SocketAddr) -> Self {
        Self {
            own_name: own_name.into(),
            own_address: bind_addr.to_string(),
            bind_addr,
            bootstrap: None,
            storage: StorageBackend::Memory,
            api_token: None,
            fanout_width: DEFAULT_FANOUT_WIDTH,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            client: ClientConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr: SocketAddr = lookup("ST_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("ST_BIND is not a socket address")?;

        let mut config = Self::new(lookup("ST_OWN_NAME").unwrap_or_default(), bind_addr);

        if let Some(address) = lookup("ST_OWN_ADDRESS") {
            config.own_address = address;
        }
        config.bootstrap = lookup("ST_BOOTSTRAP").filter(|v| !v.is_empty());
        config.api_token = lookup("ST_API_TOKEN").filter(|v| !v.is_empty());

        let db_path = lookup("ST_DB_PATH").unwrap_or_else(|| "tweets.db".to_string());
        config.storage = parse_backend(lookup("ST_STORAGE").as_deref(), db_path)?;

        if let Some(width) = lookup("ST_FANOUT_WIDTH") {
            config.fanout_width = width.parse().context("ST_FANOUT_WIDTH")?;
        }
        if let Some(depth) = lookup("ST_MAX_REFERENCE_DEPTH") {
            config.max_reference_depth = depth.parse().context("ST_MAX_REFERENCE_DEPTH")?;
        }
        if let Some(ms) = lookup("ST_PEER_TIMEOUT_MS") {
            config.client.timeout = Duration::from_millis(ms.parse().context("ST_PEER_TIMEOUT_MS")?);
        }
        if let Some(attempts) = lookup("ST_PEER_ATTEMPTS") {
            config.client.attempts = attempts.parse().context("ST_PEER_ATTEMPTS")?;
        }

        Ok(config)
    }

    /// Applies `--name`, `--bind`, `--address`, `--join`, `--storage`, `--db` and
    /// `--token` flags on top of the current values.
    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        let mut address_given = false;
        let mut storage_kind: Option<String> = None;
        let mut db_path: Option<String> = None;

        let mut i = 0;
        while i < args.len() {
            let value = || {
                args.get(i + 1)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("{} expects a value", args[i]))
            };
            match args[i].as_str() {
                "--name" => self.own_name = value()?,
                "--bind" => {
                    self.bind_addr = value()?.parse().context("--bind is not a socket address")?;
                }
                "--address" => {
                    self.own_address = value()?;
                    address_given = true;
                }
                "--join" => self.bootstrap = Some(value()?),
                "--storage" => storage_kind = Some(value()?),
                "--db" => db_path = Some(value()?),
                "--token" => self.api_token = Some(value()?),
                other => {
                    tracing::warn!("Ignoring unknown argument {}", other);
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }

        if !address_given && args.iter().any(|a| a == "--bind") {
            self.own_address = self.bind_addr.to_string();
        }

        if storage_kind.is_some() || db_path.is_some() {
            let current_path = match &self.storage {
                StorageBackend::Sqlite { path } => path.to_string_lossy().into_owned(),
                StorageBackend::Memory => "tweets.db".to_string(),
            };
            let kind = storage_kind.or_else(|| match self.storage {
                StorageBackend::Memory => Some("memory".to_string()),
                StorageBackend::Sqlite { .. } => Some("sqlite".to_string()),
            });
            self.storage = parse_backend(kind.as_deref(), db_path.unwrap_or(current_path))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_node_name(&self.own_name) {
            return Err(anyhow::anyhow!(
                "Node name {:?} is missing or invalid (set ST_OWN_NAME or --name)",
                self.own_name
            ));
        }
        if self.own_address.is_empty() {
            return Err(anyhow::anyhow!("Own address must not be empty"));
        }
        if self.fanout_width == 0 {
            return Err(anyhow::anyhow!("Fan-out width must be at least 1"));
        }
        if self.max_reference_depth == 0 {
            return Err(anyhow::anyhow!("Reference depth cap must be at least 1"));
        }
        if self.client.attempts == 0 {
            return Err(anyhow::anyhow!("Peer attempts must be at least 1"));
        }
        Ok(())
    }
}

fn parse_backend(kind: Option<&str>, db_path: String) -> Result<StorageBackend> {
    match kind.unwrap_or("memory") {
        "memory" => Ok(StorageBackend::Memory),
        "sqlite" => Ok(StorageBackend::Sqlite {
            path: PathBuf::from(db_path),
        }),
        other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_lookup(lookup_from(&[("ST_OWN_NAME", "alpha")])).unwrap();

        assert_eq!(config.own_name, "alpha");
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND);
        assert_eq!(config.own_address, DEFAULT_BIND);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.fanout_width, 5);
        assert_eq!(config.client.attempts, 3);
        assert!(config.bootstrap.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_values() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            ("ST_OWN_NAME", "beta"),
            ("ST_BIND", "0.0.0.0:6000"),
            ("ST_OWN_ADDRESS", "beta.local:6000"),
            ("ST_BOOTSTRAP", "alpha.local:5000"),
            ("ST_STORAGE", "sqlite"),
            ("ST_DB_PATH", "/tmp/beta.db"),
            ("ST_FANOUT_WIDTH", "2"),
            ("ST_PEER_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.own_address, "beta.local:6000");
        assert_eq!(config.bootstrap.as_deref(), Some("alpha.local:5000"));
        assert_eq!(
            config.storage,
            StorageBackend::Sqlite {
                path: PathBuf::from("/tmp/beta.db")
            }
        );
        assert_eq!(config.fanout_width, 2);
        assert_eq!(config.client.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_args_override_env() {
        let mut config =
            NodeConfig::from_lookup(lookup_from(&[("ST_OWN_NAME", "alpha")])).unwrap();
        let args: Vec<String> = [
            "--name", "gamma", "--bind", "127.0.0.1:7000", "--join", "127.0.0.1:5000",
            "--storage", "sqlite", "--db", "gamma.db",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        config.apply_args(&args).unwrap();

        assert_eq!(config.own_name, "gamma");
        assert_eq!(config.own_address, "127.0.0.1:7000");
        assert_eq!(config.bootstrap.as_deref(), Some("127.0.0.1:5000"));
        assert_eq!(
            config.storage,
            StorageBackend::Sqlite {
                path: PathBuf::from("gamma.db")
            }
        );
    }

    #[test]
    fn test_missing_flag_value_is_error() {
        let mut config = NodeConfig::new("alpha", DEFAULT_BIND.parse().unwrap());
        assert!(config.apply_args(&["--join".to_string()]).is_err());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let config = NodeConfig::new("bad#name", DEFAULT_BIND.parse().unwrap());
        assert!(config.validate().is_err());

        let config = NodeConfig::new("", DEFAULT_BIND.parse().unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = NodeConfig::new("alpha", DEFAULT_BIND.parse().unwrap());
        config.max_reference_depth = 0;
        assert!(config.validate().is_err());

        let config = NodeConfig::from_lookup(lookup_from(&[
            ("ST_OWN_NAME", "alpha"),
            ("ST_MAX_REFERENCE_DEPTH", "0"),
        ]))
        .unwrap();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::new("alpha", DEFAULT_BIND.parse().unwrap());
        config.fanout_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = NodeConfig::from_lookup(lookup_from(&[
            ("ST_OWN_NAME", "alpha"),
            ("ST_STORAGE", "postgres"),
        ]));
        assert!(result.is_err());
    }
}
