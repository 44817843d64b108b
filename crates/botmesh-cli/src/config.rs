//! Configuration – reads/writes `~/.botmesh/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use botmesh_registry::LivenessConfig;

/// Persisted deployment configuration stored in `~/.botmesh/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host the registry daemon binds (and components connect to).
    #[serde(default = "default_registry_host")]
    pub registry_host: String,

    /// TCP port of the registry daemon.
    #[serde(default = "default_registry_port")]
    pub registry_port: u16,

    /// Interval between liveness probes, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Consecutive missed probes before a component is declared down.
    #[serde(default = "default_missed_probe_limit")]
    pub missed_probe_limit: u32,

    /// How long a down record is kept before its key is freed, in
    /// milliseconds.
    #[serde(default = "default_down_grace_ms")]
    pub down_grace_ms: u64,

    /// Poll interval for blocking reference acquisition, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry interval for re-registration after connection loss, in
    /// milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Secret authorizing remote shutdown of components started with this
    /// config (stored as plain text – users should restrict file
    /// permissions on `~/.botmesh/config.toml`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shutdown_secret: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("registry_host", &self.registry_host)
            .field("registry_port", &self.registry_port)
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("missed_probe_limit", &self.missed_probe_limit)
            .field("down_grace_ms", &self.down_grace_ms)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("reconnect_interval_ms", &self.reconnect_interval_ms)
            .field(
                "shutdown_secret",
                if self.shutdown_secret.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

fn default_registry_host() -> String {
    "127.0.0.1".to_string()
}
fn default_registry_port() -> u16 {
    9400
}
fn default_heartbeat_interval_ms() -> u64 {
    100
}
fn default_missed_probe_limit() -> u32 {
    3
}
fn default_down_grace_ms() -> u64 {
    30_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_reconnect_interval_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_host: default_registry_host(),
            registry_port: default_registry_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            missed_probe_limit: default_missed_probe_limit(),
            down_grace_ms: default_down_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            shutdown_secret: String::new(),
        }
    }
}

impl Config {
    /// The liveness knobs this config describes.
    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            missed_probe_limit: self.missed_probe_limit,
            down_grace_ms: self.down_grace_ms,
            poll_interval_ms: self.poll_interval_ms,
        }
    }

    /// Registry endpoint in `ws://host:port` form.
    pub fn registry_url(&self) -> String {
        format!("ws://{}:{}", self.registry_host, self.registry_port)
    }
}

/// Return the path to `~/.botmesh/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".botmesh").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `BOTMESH_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `BOTMESH_REGISTRY_HOST` | `registry_host` |
/// | `BOTMESH_REGISTRY_PORT` | `registry_port` |
/// | `BOTMESH_HEARTBEAT_INTERVAL_MS` | `heartbeat_interval_ms` |
/// | `BOTMESH_MISSED_PROBE_LIMIT` | `missed_probe_limit` |
/// | `BOTMESH_SHUTDOWN_SECRET` | `shutdown_secret` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("BOTMESH_REGISTRY_HOST") {
        cfg.registry_host = v;
    }
    if let Ok(v) = std::env::var("BOTMESH_REGISTRY_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.registry_port = port;
        }
    if let Ok(v) = std::env::var("BOTMESH_HEARTBEAT_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>() {
            cfg.heartbeat_interval_ms = ms;
        }
    if let Ok(v) = std::env::var("BOTMESH_MISSED_PROBE_LIMIT")
        && let Ok(limit) = v.parse::<u32>() {
            cfg.missed_probe_limit = limit;
        }
    if let Ok(v) = std::env::var("BOTMESH_SHUTDOWN_SECRET") {
        cfg.shutdown_secret = v;
    }
}

/// Save the config to disk, creating `~/.botmesh/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_the_shutdown_secret() {
        let mut cfg = Config::default();
        cfg.shutdown_secret = "super-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("super-secret"), "secret must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_secret() {
        let cfg = Config::default();
        assert!(format!("{:?}", cfg).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let file_meta = std::fs::metadata(&path).expect("file metadata");
        assert_eq!(file_meta.permissions().mode() & 0o777, 0o600);

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.registry_port, 9400);
        assert_eq!(loaded.heartbeat_interval_ms, 100);
        assert_eq!(loaded.missed_probe_limit, 3);
        assert_eq!(loaded.registry_url(), "ws://127.0.0.1:9400");
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn liveness_view_carries_the_timing_fields() {
        let mut cfg = Config::default();
        cfg.heartbeat_interval_ms = 50;
        cfg.missed_probe_limit = 5;
        let liveness = cfg.liveness();
        assert_eq!(liveness.heartbeat_interval_ms, 50);
        assert_eq!(liveness.missed_probe_limit, 5);
        assert_eq!(
            liveness.probe_deadline(),
            std::time::Duration::from_millis(250)
        );
    }

    #[test]
    fn apply_env_overrides_changes_registry_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BOTMESH_REGISTRY_PORT", "9999") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.registry_port, 9999);
        unsafe { std::env::remove_var("BOTMESH_REGISTRY_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BOTMESH_REGISTRY_PORT", "not-a-port") };
        let mut cfg = Config::default();
        let original = cfg.registry_port;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.registry_port, original);
        unsafe { std::env::remove_var("BOTMESH_REGISTRY_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_shutdown_secret() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BOTMESH_SHUTDOWN_SECRET", "ops-only") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.shutdown_secret, "ops-only");
        unsafe { std::env::remove_var("BOTMESH_SHUTDOWN_SECRET") };
    }
}
