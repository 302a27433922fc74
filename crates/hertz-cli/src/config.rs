//! Configuration Vault – reads/writes `~/.hertz/config.toml`.

use hertz_runtime::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which built-in declaration the CLI mounts against the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemoKind {
    /// Toggle a digital output.
    #[default]
    Blink,
    /// Mirror a digital input onto a digital output.
    Follow,
    /// Alternate a motor between cruising and halting.
    MotorVelocity,
}

impl DemoKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blink" => Some(DemoKind::Blink),
            "follow" => Some(DemoKind::Follow),
            "motor-velocity" | "motor" => Some(DemoKind::MotorVelocity),
            _ => None,
        }
    }
}

impl std::fmt::Display for DemoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemoKind::Blink => write!(f, "blink"),
            DemoKind::Follow => write!(f, "follow"),
            DemoKind::MotorVelocity => write!(f, "motor-velocity"),
        }
    }
}

/// Persisted user configuration stored in `~/.hertz/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Delay between two change-detection ticks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lifecycle events buffered per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub demo: DemoKind,

    /// Simulated round-trip time of every driver call, in milliseconds.
    #[serde(default)]
    pub sim_latency_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1
}
fn default_event_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            event_capacity: default_event_capacity(),
            demo: DemoKind::default(),
            sim_latency_ms: 0,
        }
    }
}

impl Config {
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            event_capacity: self.event_capacity.max(1),
        }
    }

    pub fn sim_latency(&self) -> Duration {
        Duration::from_millis(self.sim_latency_ms)
    }
}

/// Return the path to `~/.hertz/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hertz").join("config.toml")
}

/// Load the effective config: the file if present, defaults otherwise, then
/// environment overrides.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `HERTZ_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HERTZ_POLL_INTERVAL_MS` | `poll_interval_ms` |
/// | `HERTZ_DEMO` | `demo` |
/// | `HERTZ_SIM_LATENCY_MS` | `sim_latency_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HERTZ_POLL_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.poll_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("HERTZ_DEMO")
        && let Some(demo) = DemoKind::parse(&v)
    {
        cfg.demo = demo;
    }
    if let Ok(v) = std::env::var("HERTZ_SIM_LATENCY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.sim_latency_ms = ms;
    }
}

/// Save the config to disk, creating `~/.hertz/` if necessary.
pub fn save(cfg: &Config) -> Result<PathBuf, String> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            poll_interval_ms: 5,
            demo: DemoKind::MotorVelocity,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "demo = \"follow\"\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.demo, DemoKind::Follow);
        assert_eq!(loaded.poll_interval_ms, 1);
        assert_eq!(loaded.event_capacity, 256);
        assert_eq!(loaded.sim_latency_ms, 0);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_ms = \"fast\"\n").expect("write");

        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn config_path_points_to_hertz_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".hertz"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn reconciler_config_never_uses_zero() {
        let cfg = Config {
            poll_interval_ms: 0,
            event_capacity: 0,
            ..Config::default()
        };
        let rc = cfg.reconciler();
        assert_eq!(rc.poll_interval, Duration::from_millis(1));
        assert_eq!(rc.event_capacity, 1);
    }

    #[test]
    fn demo_kind_parses_aliases() {
        assert_eq!(DemoKind::parse("Blink"), Some(DemoKind::Blink));
        assert_eq!(DemoKind::parse("motor"), Some(DemoKind::MotorVelocity));
        assert_eq!(DemoKind::parse("warp"), None);
        assert_eq!(DemoKind::MotorVelocity.to_string(), "motor-velocity");
    }

    #[test]
    fn apply_env_overrides_changes_fields() {
        // SAFETY: the only test touching these variables.
        unsafe {
            std::env::set_var("HERTZ_POLL_INTERVAL_MS", "20");
            std::env::set_var("HERTZ_DEMO", "follow");
            std::env::set_var("HERTZ_SIM_LATENCY_MS", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.poll_interval_ms, 20);
        assert_eq!(cfg.demo, DemoKind::Follow);
        assert_eq!(cfg.sim_latency_ms, 0);
        unsafe {
            std::env::remove_var("HERTZ_POLL_INTERVAL_MS");
            std::env::remove_var("HERTZ_DEMO");
            std::env::remove_var("HERTZ_SIM_LATENCY_MS");
        }
    }
}
