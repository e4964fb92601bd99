//! Farmer configuration management.
//!
//! Configuration is stored as TOML, by default at
//! `~/.config/shardkeep/farmer.toml`. A missing file is created with
//! defaults on first start.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardkeep_data_channel::ChannelSettings;
use shardkeep_protocol::constants::{
    AUTH_TIMEOUT, TRANSFER_IDLE_TIMEOUT, WS_CHUNK_SIZE, WS_MAX_MESSAGE_SIZE,
};

/// Farmer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data channel listen address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Root of the shard store.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Largest WebSocket message accepted from a peer, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frame size for retrieves, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds a peer has to authorize after connecting.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Seconds a running transfer may go without progress.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Interval for pruning expired tokens, in seconds (0 = never).
    #[serde(default)]
    pub token_sweep_secs: u64,

    /// Tokens authorized at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
}

/// A token authorized from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub token: String,
    pub hash: String,
    #[serde(default = "default_grant_ttl")]
    pub ttl_secs: u64,
}

impl Grant {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 4001).into()
}

fn default_storage_path() -> PathBuf {
    home_dir().join(".local").join("share").join("shardkeep")
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

fn default_chunk_size() -> usize {
    WS_CHUNK_SIZE
}

fn default_auth_timeout() -> u64 {
    AUTH_TIMEOUT.as_secs()
}

fn default_idle_timeout() -> u64 {
    TRANSFER_IDLE_TIMEOUT.as_secs()
}

fn default_grant_ttl() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            storage_path: default_storage_path(),
            max_message_size: default_max_message_size(),
            chunk_size: default_chunk_size(),
            auth_timeout_secs: default_auth_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            token_sweep_secs: 0,
            grants: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default file there if
    /// none exists.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Grants hold live tokens.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Data channel settings derived from this configuration.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            bind_addr: self.listen,
            max_message_size: self.max_message_size,
            chunk_size: self.chunk_size.max(1),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs.max(1)),
            token_sweep_interval: (self.token_sweep_secs > 0)
                .then(|| Duration::from_secs(self.token_sweep_secs)),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    home_dir()
        .join(".config")
        .join("shardkeep")
        .join("farmer.toml")
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        PathBuf::from(std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default".into()))
    }

    #[cfg(not(target_os = "windows"))]
    {
        PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
    }
}
