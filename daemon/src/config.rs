use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::validate_enum;

/// Service settings, read from `config.toml`.
///
/// These tune the service itself. Per-monitor wallpaper assignments live in
/// the JSON store (see [`crate::store`]).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub topology: TopologySettings,

    #[serde(default)]
    pub player: PlayerSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub mirror: MirrorSettings,
}

/// General service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Diagnostics file, defaults to `$XDG_RUNTIME_DIR/loopwall.log`
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Monitor topology polling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopologySettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_inventory_ttl")]
    pub inventory_ttl_ms: u64,

    #[serde(default = "default_autoload_delay")]
    pub autoload_delay_ms: u64,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            inventory_ttl_ms: default_inventory_ttl(),
            autoload_delay_ms: default_autoload_delay(),
        }
    }
}

fn default_poll_interval() -> u64 {
    3000
}
fn default_inventory_ttl() -> u64 {
    5000
}
fn default_autoload_delay() -> u64 {
    1500
}

/// Per-player timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerSettings {
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,

    #[serde(default = "default_restart_debounce")]
    pub restart_debounce_ms: u64,

    #[serde(default = "default_max_restart_backoff")]
    pub max_restart_backoff_ms: u64,

    #[serde(default = "default_stable_after")]
    pub stable_after_ms: u64,

    #[serde(default = "default_restart_grace")]
    pub restart_grace_ms: u64,

    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_ms: u64,

    #[serde(default = "default_active_check")]
    pub active_check_ms: u64,

    #[serde(default = "default_idle_check")]
    pub idle_check_ms: u64,

    #[serde(default = "default_maximized_poll")]
    pub maximized_poll_ms: u64,

    #[serde(default = "default_fade_out")]
    pub fade_out_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: default_watchdog_interval(),
            restart_debounce_ms: default_restart_debounce(),
            max_restart_backoff_ms: default_max_restart_backoff(),
            stable_after_ms: default_stable_after(),
            restart_grace_ms: default_restart_grace(),
            idle_threshold_ms: default_idle_threshold(),
            active_check_ms: default_active_check(),
            idle_check_ms: default_idle_check(),
            maximized_poll_ms: default_maximized_poll(),
            fade_out_ms: default_fade_out(),
        }
    }
}

fn default_watchdog_interval() -> u64 {
    1000
}
fn default_restart_debounce() -> u64 {
    300
}
fn default_max_restart_backoff() -> u64 {
    10000
}
fn default_stable_after() -> u64 {
    3000
}
fn default_restart_grace() -> u64 {
    2000
}
fn default_idle_threshold() -> u64 {
    60000
}
fn default_active_check() -> u64 {
    10000
}
fn default_idle_check() -> u64 {
    30000
}
fn default_maximized_poll() -> u64 {
    2000
}
fn default_fade_out() -> u64 {
    250
}

/// Playback engine selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Video sink tried before the built-in candidates
    #[serde(default)]
    pub video_sink: Option<String>,

    /// Extra plugin directory exported as `GST_PLUGIN_PATH`
    #[serde(default)]
    pub plugin_path: Option<String>,

    /// Drive XWayland when the session is Wayland
    #[serde(default = "default_true")]
    pub force_x11: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            video_sink: None,
            plugin_path: None,
            force_x11: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Desktop background mirror
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorSettings {
    /// `None` enables the mirror on GNOME sessions only
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default = "default_mirror_mode")]
    pub mode: String,

    #[serde(default = "default_mirror_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_startup_delay")]
    pub startup_delay_ms: u64,

    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_snapshot_age")]
    pub max_snapshot_age_secs: u64,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            mode: default_mirror_mode(),
            interval_ms: default_mirror_interval(),
            max_dimension: default_max_dimension(),
            startup_delay_ms: default_startup_delay(),
            retry_limit: default_retry_limit(),
            retry_delay_ms: default_retry_delay(),
            max_snapshot_age_secs: default_max_snapshot_age(),
        }
    }
}

fn default_mirror_mode() -> String {
    "static".to_string()
}
fn default_mirror_interval() -> u64 {
    30000
}
fn default_max_dimension() -> u32 {
    480
}
fn default_startup_delay() -> u64 {
    1200
}
fn default_retry_limit() -> u32 {
    12
}
fn default_retry_delay() -> u64 {
    350
}
fn default_max_snapshot_age() -> u64 {
    300
}

impl MirrorSettings {
    pub fn is_live(&self) -> bool {
        self.mode == "live"
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("loopwall");

        Ok(config_dir.join("config.toml"))
    }

    /// Apply `LOOPWALL_*` environment overrides on top of the file.
    ///
    /// Runs before logging is up, so rejected values are returned for the
    /// caller to report.
    pub fn apply_env(&mut self) -> Vec<String> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut ignored = Vec::new();

        if let Some(path) = get("LOOPWALL_GST_PLUGIN_PATH").filter(|p| !p.is_empty()) {
            self.engine.plugin_path = Some(path);
        }
        if let Some(sink) = get("LOOPWALL_VIDEO_SINK").filter(|s| !s.is_empty()) {
            self.engine.video_sink = Some(sink);
        }
        if let Some(value) = get("LOOPWALL_FORCE_X11") {
            match parse_flag(&value) {
                Some(flag) => self.engine.force_x11 = flag,
                None => {
                    ignored.push(format!("Ignoring LOOPWALL_FORCE_X11={} (expected a boolean)", value))
                }
            }
        }
        if let Some(value) = get("LOOPWALL_MIRROR") {
            match parse_flag(&value) {
                Some(flag) => self.mirror.enabled = Some(flag),
                None => {
                    ignored.push(format!("Ignoring LOOPWALL_MIRROR={} (expected a boolean)", value))
                }
            }
        }
        if let Some(mode) = get("LOOPWALL_MIRROR_MODE") {
            let mode = mode.trim().to_lowercase();
            if mode == "static" || mode == "live" {
                self.mirror.mode = mode;
            } else {
                ignored.push(format!(
                    "Ignoring LOOPWALL_MIRROR_MODE={} (expected static or live)",
                    mode
                ));
            }
        }

        ignored
    }

    /// Resolved diagnostics file path
    pub fn log_file(&self) -> PathBuf {
        match self.general.log_file {
            Some(ref path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
            None => common::runtime_dir().join("loopwall.log"),
        }
    }

    /// Resolved engine plugin directory, if any
    pub fn plugin_path(&self) -> Option<PathBuf> {
        self.engine
            .plugin_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        match self.general.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.general.log_level),
        }

        self.validate_mirror_mode(&self.mirror.mode)?;

        if self.mirror.max_dimension == 0 {
            anyhow::bail!("mirror.max_dimension must be greater than zero");
        }
        if self.player.watchdog_interval_ms == 0 || self.topology.poll_interval_ms == 0 {
            anyhow::bail!("Polling intervals must be greater than zero");
        }

        Ok(())
    }

    fn validate_mirror_mode(&self, mode: &str) -> Result<()> {
        validate_enum!(mode, "static", "live")
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
