//! TOML configuration for the brook daemon.
//!
//! Every section has serde defaults, so a missing or partial config file
//! yields a working node. CLI flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use brook_types::{ExchangeConfig, HashAlgorithm};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and paths.
    pub node: NodeSection,
    /// Local store backend.
    pub storage: StorageSection,
    /// Exchange engine tuning.
    pub exchange: ExchangeSection,
    /// Mesh membership.
    pub mesh: MeshSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (node key, store files).
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".brook"))
            .unwrap_or_else(|| PathBuf::from(".brook"));
        Self { data_dir }
    }
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Chunk size in bytes used when publishing.
    pub chunk_size: Option<u32>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            chunk_size: None,
        }
    }
}

/// `[exchange]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExchangeSection {
    /// Hash algorithm for published content: `"blake3"` (default) or `"sha256"`.
    pub hash_algorithm: Option<String>,
    /// Maximum chunk fetches in flight at once.
    pub parallel_providers_max: Option<usize>,
    /// Bounded wait for one outstanding want, in milliseconds.
    pub want_timeout_ms: Option<u64>,
    /// Retry rounds per chunk before a fetch gives up on it.
    pub max_retries_per_chunk: Option<u32>,
}

/// `[mesh]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MeshSection {
    /// Shared secret for mesh authentication.
    ///
    /// If not set (empty), a random secret is generated at startup and
    /// displayed so the user can pass it to other nodes.
    pub secret: String,
    /// Peer nodes to serve from (`"endpoint-id"` or `"endpoint-id@host:port"`).
    pub peers: Vec<String>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective chunk size (config value or 256 KB default).
    pub fn chunk_size(&self) -> u32 {
        self.storage.chunk_size.unwrap_or(262_144)
    }

    /// Effective hash algorithm.
    pub fn hash_algorithm(&self) -> anyhow::Result<HashAlgorithm> {
        match self.exchange.hash_algorithm.as_deref() {
            None | Some("blake3") => Ok(HashAlgorithm::Blake3),
            Some("sha256") => Ok(HashAlgorithm::Sha256),
            Some(other) => anyhow::bail!("unknown hash algorithm {other:?}"),
        }
    }

    /// The exchange engine configuration, with defaults where unset.
    pub fn exchange_config(&self) -> anyhow::Result<ExchangeConfig> {
        let defaults = ExchangeConfig::default();
        Ok(ExchangeConfig {
            chunk_size: self.chunk_size(),
            hash_algorithm: self.hash_algorithm()?,
            parallel_providers_max: self
                .exchange
                .parallel_providers_max
                .unwrap_or(defaults.parallel_providers_max),
            want_timeout: self
                .exchange
                .want_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.want_timeout),
            max_retries_per_chunk: self
                .exchange
                .max_retries_per_chunk
                .unwrap_or(defaults.max_retries_per_chunk),
        })
    }
}
