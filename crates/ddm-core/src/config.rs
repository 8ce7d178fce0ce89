use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Priority;
use crate::retry::RetryPolicy;

/// IPC transport: a Unix socket on POSIX, a localhost TCP port on Windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpcTransport {
    UnixSocket { path: PathBuf },
    Tcp { port: u16 },
}

impl Default for IpcTransport {
    fn default() -> Self {
        #[cfg(unix)]
        {
            let path = default_control_socket_path_fallback();
            IpcTransport::UnixSocket { path }
        }
        #[cfg(not(unix))]
        {
            IpcTransport::Tcp { port: 7878 }
        }
    }
}

fn default_control_socket_path_fallback() -> PathBuf {
    crate::control::default_control_socket_path().unwrap_or_else(|_| PathBuf::from("ddmd.sock"))
}

/// Retry tuning as stored in config (plain fields; converted to/from
/// `RetryPolicy`'s `Duration` fields at load time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Global configuration loaded from `~/.config/ddm/config.toml`, overridable
/// field-by-field by the `WARPDL_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdmConfig {
    /// Maximum total concurrent HTTP connections across all downloads.
    pub max_total_connections: usize,
    /// Maximum concurrent HTTP connections per host.
    pub max_connections_per_host: usize,
    /// Minimum number of parts per download.
    pub min_segments: usize,
    /// Maximum number of parts per download.
    pub max_segments: usize,
    /// Default speed limit in bytes/sec; 0 means unlimited.
    pub default_speed_limit: u64,
    /// Default per-request timeout, in seconds.
    pub default_timeout_secs: u64,
    pub retry: RetryConfig,
    pub default_priority: Priority,
    pub ipc_transport: IpcTransport,
    /// Default directory new downloads save into, absent an explicit flag.
    pub default_download_dir: Option<PathBuf>,
}

impl Default for DdmConfig {
    fn default() -> Self {
        Self {
            max_total_connections: 64,
            max_connections_per_host: 16,
            min_segments: 4,
            max_segments: 16,
            default_speed_limit: 0,
            default_timeout_secs: 3600,
            retry: RetryConfig::default(),
            default_priority: Priority::Normal,
            ipc_transport: IpcTransport::default(),
            default_download_dir: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists,
/// then apply `WARPDL_*` environment variable overrides.
pub fn load_or_init() -> Result<DdmConfig> {
    let path = config_path()?;
    let mut cfg = if !path.exists() {
        let default_cfg = DdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        default_cfg
    } else {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data)?
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `WARPDL_*` environment variable overrides on top of a loaded config.
/// Malformed values are logged and ignored rather than failing startup.
fn apply_env_overrides(cfg: &mut DdmConfig) {
    if let Ok(v) = std::env::var("WARPDL_SOCKET_PATH") {
        cfg.ipc_transport = IpcTransport::UnixSocket { path: PathBuf::from(v) };
    }
    if std::env::var("WARPDL_FORCE_TCP").is_ok() {
        let port = std::env::var("WARPDL_TCP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7878);
        cfg.ipc_transport = IpcTransport::Tcp { port };
    }
    if let Ok(v) = std::env::var("WARPDL_DEFAULT_DL_DIR") {
        cfg.default_download_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = parse_env("WARPDL_TIMEOUT") {
        cfg.default_timeout_secs = v;
    }
    if let Some(v) = parse_env("WARPDL_MAX_RETRIES") {
        cfg.retry.max_attempts = v;
    }
    if let Some(v) = parse_env("WARPDL_RETRY_DELAY") {
        cfg.retry.base_delay_ms = v;
    }
    if let Some(v) = parse_env("WARPDL_MAX_CONCURRENT") {
        cfg.max_total_connections = v;
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(v) => match v.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(var = name, value = %v, "ignoring malformed env override");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DdmConfig::default();
        assert_eq!(cfg.max_total_connections, 64);
        assert_eq!(cfg.max_connections_per_host, 16);
        assert_eq!(cfg.min_segments, 4);
        assert_eq!(cfg.max_segments, 16);
        assert_eq!(cfg.default_speed_limit, 0);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = DdmConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_total_connections, cfg.max_total_connections);
        assert_eq!(parsed.retry.max_attempts, cfg.retry.max_attempts);
    }

    #[test]
    fn retry_config_converts_to_policy() {
        let rc = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        };
        let policy = rc.to_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_millis(5000));
    }
}
