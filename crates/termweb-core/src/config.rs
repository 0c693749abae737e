use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection scheduling limits (`[connection]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum number of concurrently running connections.
    pub max_connections: usize,
    /// Maximum number of concurrently running connections to one host.
    pub max_connections_to_host: usize,
    /// Number of tries before a connection is given up (0 = unlimited).
    pub retries: u32,
    /// Seconds without received data before a connection is timed out.
    pub receive_timeout_secs: u64,
    /// Receive timeout for connections that cannot be restarted (e.g. POST).
    pub unrestartable_receive_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_connections_to_host: 2,
            retries: 3,
            receive_timeout_secs: 120,
            unrestartable_receive_timeout_secs: 600,
        }
    }
}

impl ConnectionConfig {
    pub fn receive_timeout(&self, unrestartable: bool) -> Duration {
        let secs = if unrestartable {
            self.unrestartable_receive_timeout_secs
        } else {
            self.receive_timeout_secs
        };
        Duration::from_secs(secs.max(1))
    }
}

/// Memory cache budget and validation policy (`[cache]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory ceiling in bytes for unused cache entries.
    pub memory_size: u64,
    /// Low-water mark as a percentage of `memory_size` reached by a bounded collection.
    pub gc_percent: u64,
    /// Objects larger than this percentage of `memory_size` may be detached and streamed.
    pub max_cached_object_percent: u64,
    /// Whether redirect entries may be served from the cache.
    pub cache_redirects: bool,
    /// Seconds after which entries with validators must be revalidated (None = never).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revalidation_interval_secs: Option<u64>,
    /// Maximum number of cached redirects followed in one chain.
    pub max_redirects: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_size: 1024 * 1024,
            gc_percent: 90,
            max_cached_object_percent: 25,
            cache_redirects: false,
            revalidation_interval_secs: None,
            max_redirects: 10,
        }
    }
}

impl CacheConfig {
    /// Target size reached by a bounded garbage collection.
    pub fn gc_target(&self) -> u64 {
        self.memory_size.saturating_mul(self.gc_percent.min(100)) / 100
    }

    /// Size above which a connection may be detached from the cache.
    pub fn detach_threshold(&self) -> u64 {
        self.memory_size
            .saturating_mul(self.max_cached_object_percent.min(100))
            / 100
    }
}

/// Idle socket pool limits (`[keepalive]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Maximum number of pooled idle sockets.
    pub max_connections: usize,
    /// Interval between liveness/timeout sweeps of the pool, in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            max_connections: 30,
            check_interval_ms: 20_000,
        }
    }
}

/// Global configuration loaded from `~/.config/termweb/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("termweb")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    load_or_init_at(&path)
}

/// Like [`load_or_init`] with an explicit path (used by `--config` and tests).
pub fn load_or_init_at(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write config: {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data =
        fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
