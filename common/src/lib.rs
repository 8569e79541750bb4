//! Common types and utilities for loopwall.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the background service (`loopwall`) and the
//! control client (`loopwallctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using newline-delimited
//! JSON. The client writes one [`Command`] object per line and the service
//! answers every line with exactly one [`Response`] line, in order. Clients
//! that disconnect right after writing are tolerated.
//!
//! # Examples
//!
//! ```no_run
//! use common::Command;
//!
//! let cmd = Command::Play {
//!     video_path: "/home/me/Videos/rain.mp4".to_string(),
//!     screen: 0,
//!     pause_on_max: true,
//!     volume: 0,
//!     paused: false,
//! };
//!
//! // {"action":"play","video_path":"/home/me/Videos/rain.mp4",...}
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Slowest playback rate a player accepts.
pub const MIN_RATE: f64 = 0.25;
/// Rate used as the conservative fallback when the engine rejects a faster one.
pub const SAFE_MAX_RATE: f64 = 2.0;
/// Fastest playback rate a player accepts.
pub const HARD_MAX_RATE: f64 = 2.5;
/// Upper bound of the volume scale.
pub const MAX_VOLUME: u32 = 100;

/// Errors that can cross the IPC boundary.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Commands sent from a client to the service.
///
/// The wire form is a flat JSON object tagged by `action`, e.g.
/// `{"action":"stop","screen":1}`. Omitted fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Start (or replace) the video on one monitor.
    Play {
        /// Path of the video file to loop
        video_path: String,
        /// Monitor index
        #[serde(default)]
        screen: usize,
        /// Suspend while a maximized window covers the monitor
        #[serde(default)]
        pause_on_max: bool,
        /// Volume, 0-100
        #[serde(default)]
        volume: u32,
        /// Start paused
        #[serde(default)]
        paused: bool,
    },
    /// Tear down the player on a monitor and disable its stored entry.
    Stop {
        #[serde(default)]
        screen: usize,
    },
    /// Change settings of running players without restarting playback.
    ///
    /// `screen: -1` targets every running player. When `per_screen` is
    /// present it wins over `screen`, and a top-level `pause_on_max`
    /// overrides the per-screen value.
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screen: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        per_screen: Option<BTreeMap<String, ScreenSettings>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        paused: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pause_on_max: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
    },
    /// Snapshot of service liveness and every player.
    Status,
    /// Liveness probe.
    Ping,
    /// Stop the mirror, every player, and the service itself.
    Quit,
}

/// Partial player settings carried by `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_on_max: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl ScreenSettings {
    pub fn is_empty(&self) -> bool {
        self.volume.is_none()
            && self.paused.is_none()
            && self.pause_on_max.is_none()
            && self.speed.is_none()
    }
}

/// Responses sent from the service back to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Command accepted
    Ok,
    /// Command received but deliberately skipped (missing file, no player)
    Dropped(String),
    /// Pong response to Ping
    Pong,
    /// Service status
    Status(ServiceStatus),
    /// The command could not be read
    Error(ServiceError),
}

/// Service status information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Always `"alive"` when answered
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub players_count: usize,
    pub players: Vec<PlayerStatus>,
}

/// Per-monitor player status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub screen_index: usize,
    pub screen_name: Option<String>,
    /// Suspended for any reason, including an explicit user pause
    pub paused: bool,
    pub volume: u32,
    pub video_path: String,
    /// Effective playback rate
    pub rate: f64,
    /// Lifecycle phase, e.g. `"playing"` or `"suspended"`
    pub phase: String,
}

/// Clamp a requested playback rate into `[MIN_RATE, HARD_MAX_RATE]`.
///
/// Non-finite requests fall back to normal speed.
pub fn clamp_rate(rate: f64) -> f64 {
    if !rate.is_finite() {
        return 1.0;
    }
    rate.clamp(MIN_RATE, HARD_MAX_RATE)
}

/// Clamp a volume into `[0, MAX_VOLUME]`.
pub fn clamp_volume(volume: u32) -> u32 {
    volume.min(MAX_VOLUME)
}

/// Per-user runtime directory (`$XDG_RUNTIME_DIR` or `/run/user/<uid>`).
pub fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/run/user/{}", uid))
        })
}

/// Get the IPC socket path.
///
/// Returns `$XDG_RUNTIME_DIR/loopwall.sock` or `/run/user/<uid>/loopwall.sock`.
pub fn get_socket_path() -> PathBuf {
    runtime_dir().join("loopwall.sock")
}

/// Get the startup lock path guarding the single listen attempt.
pub fn get_lock_path() -> PathBuf {
    runtime_dir().join("loopwall.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_wire_format() {
        let cmd = Command::Play {
            video_path: "/x.mp4".to_string(),
            screen: 1,
            pause_on_max: false,
            volume: 40,
            paused: false,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["action"], "play");
        assert_eq!(value["video_path"], "/x.mp4");
        assert_eq!(value["screen"], 1);
        assert_eq!(value["volume"], 40);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let cmd: Command = serde_json::from_str(r#"{"action":"play","video_path":"/x.mp4"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Play {
                video_path: "/x.mp4".to_string(),
                screen: 0,
                pause_on_max: false,
                volume: 0,
                paused: false,
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"action":"stop"}"#).unwrap();
        assert_eq!(cmd, Command::Stop { screen: 0 });
    }

    #[test]
    fn test_unit_actions() {
        for (json, expected) in [
            (r#"{"action":"status"}"#, Command::Status),
            (r#"{"action":"ping"}"#, Command::Ping),
            (r#"{"action":"quit"}"#, Command::Quit),
        ] {
            let cmd: Command = serde_json::from_str(json).unwrap();
            assert_eq!(cmd, expected);
        }
    }

    #[test]
    fn test_update_per_screen() {
        let json = r#"{"action":"update","per_screen":{"0":{"volume":10},"2":{"speed":1.5}},"pause_on_max":true}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        match cmd {
            Command::Update {
                screen,
                per_screen: Some(per_screen),
                pause_on_max,
                ..
            } => {
                assert_eq!(screen, None);
                assert_eq!(pause_on_max, Some(true));
                assert_eq!(per_screen["0"].volume, Some(10));
                assert_eq!(per_screen["2"].speed, Some(1.5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = serde_json::from_str::<Command>(r#"{"action":"dance"}"#);
        assert!(result.is_err());
        let err: ServiceError = result.unwrap_err().into();
        assert!(matches!(err, ServiceError::Ipc(_)));
    }

    #[test]
    fn test_clamp_rate() {
        assert_eq!(clamp_rate(3.0), HARD_MAX_RATE);
        assert_eq!(clamp_rate(0.1), MIN_RATE);
        assert_eq!(clamp_rate(1.25), 1.25);
        assert_eq!(clamp_rate(f64::NAN), 1.0);
        assert_eq!(clamp_rate(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(150), 100);
        assert_eq!(clamp_volume(40), 40);
    }

    #[test]
    fn test_screen_settings_empty() {
        assert!(ScreenSettings::default().is_empty());
        let s = ScreenSettings {
            paused: Some(true),
            ..Default::default()
        };
        assert!(!s.is_empty());
    }

    #[test]
    fn test_socket_and_lock_paths() {
        assert!(get_socket_path().to_str().unwrap().ends_with("loopwall.sock"));
        assert!(get_lock_path().to_str().unwrap().ends_with("loopwall.lock"));
    }
}
