//! Desktop background mirror.
//!
//! Some shells paint their own background layer above our surfaces. For
//! those, the current frame of one source player is snapshotted, shrunk, and
//! published as the desktop's own background image. The original setting is
//! restored on stop.

mod gsettings;
mod snapshot;

pub use gsettings::GsettingsBackground;
pub use snapshot::FfmpegSnapshotter;

use crate::config::MirrorSettings;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

const SNAPSHOT_PREFIX: &str = "loopwall-snapshot-";
/// Successful publishes between stale-file sweeps
const CLEANUP_EVERY: u64 = 10;

/// Extracts one frame of a video into an image file under `dir`.
pub trait FrameSnapshotter {
    fn snapshot(&self, video: &Path, time_ms: u64, dir: &Path) -> Result<PathBuf>;
}

/// The desktop's own background setting.
pub trait BackgroundSetter {
    /// Remember the current setting so it can be restored.
    fn save_original(&mut self) -> Result<()>;
    fn publish(&mut self, image: &Path) -> Result<()>;
    fn restore(&mut self) -> Result<()>;
}

/// What the source player currently shows.
#[derive(Debug, Clone, Copy)]
pub struct FrameSource<'a> {
    pub video_path: &'a Path,
    pub time_ms: Option<u64>,
    pub suspended: bool,
}

/// Scratch directory for snapshots
pub fn default_dir() -> PathBuf {
    common::runtime_dir().join("loopwall-mirror")
}

pub struct Mirror {
    settings: MirrorSettings,
    snapshotter: Box<dyn FrameSnapshotter>,
    background: Box<dyn BackgroundSetter>,
    dir: PathBuf,
    source: Option<usize>,
    current: Option<PathBuf>,
    next_at: Option<Instant>,
    retries: u32,
    published: u64,
    active: bool,
}

impl Mirror {
    pub fn new(
        settings: MirrorSettings,
        snapshotter: Box<dyn FrameSnapshotter>,
        background: Box<dyn BackgroundSetter>,
        dir: PathBuf,
    ) -> Self {
        log::info!(
            "Background mirror enabled ({} mode, snapshots in {})",
            settings.mode,
            dir.display()
        );
        Self {
            settings,
            snapshotter,
            background,
            dir,
            source: None,
            current: None,
            next_at: None,
            retries: 0,
            published: 0,
            active: false,
        }
    }

    pub fn source(&self) -> Option<usize> {
        self.source
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_at
    }

    /// Mirror the player on `index`, capturing after the startup delay.
    pub fn set_source(&mut self, index: usize, now: Instant) {
        if !self.active {
            match self.background.save_original() {
                Ok(()) => self.active = true,
                Err(e) => {
                    log::warn!("Background mirror unavailable: {:#}", e);
                    return;
                }
            }
        }
        if self.source != Some(index) {
            log::info!("Background mirror follows screen {}", index);
        }
        self.source = Some(index);
        self.retries = 0;
        self.next_at = Some(now + self.settings.startup_delay());
    }

    pub fn tick(&mut self, frame: Option<FrameSource<'_>>, now: Instant) {
        match self.next_at {
            Some(at) if at <= now => {}
            _ => return,
        }

        if let Some(ref frame) = frame
            && frame.suspended
        {
            self.next_at = Some(now + self.idle_delay());
            return;
        }

        let result = match frame {
            Some(frame) => self.capture(frame),
            None => Err(anyhow::anyhow!("source player is gone")),
        };

        match result {
            Ok(()) => {
                self.retries = 0;
                self.published += 1;
                if self.published % CLEANUP_EVERY == 0 {
                    let removed = cleanup(
                        &self.dir,
                        Duration::from_secs(self.settings.max_snapshot_age_secs),
                        SystemTime::now(),
                        self.current.as_deref(),
                    );
                    if removed > 0 {
                        log::debug!("Removed {} stale snapshot(s)", removed);
                    }
                }
                self.next_at = self
                    .settings
                    .is_live()
                    .then(|| now + self.settings.interval());
            }
            Err(e) => {
                self.retries += 1;
                if self.retries >= self.settings.retry_limit {
                    log::debug!("Snapshot failed {} times, giving up: {:#}", self.retries, e);
                    self.retries = 0;
                    self.next_at = self
                        .settings
                        .is_live()
                        .then(|| now + self.settings.interval());
                } else {
                    log::debug!("Snapshot failed (attempt {}): {:#}", self.retries, e);
                    self.next_at = Some(now + self.settings.retry_delay());
                }
            }
        }
    }

    fn idle_delay(&self) -> Duration {
        if self.settings.is_live() {
            self.settings.interval()
        } else {
            self.settings.startup_delay()
        }
    }

    fn capture(&mut self, frame: FrameSource<'_>) -> Result<()> {
        let image = self.snapshotter.snapshot(
            frame.video_path,
            frame.time_ms.unwrap_or(0),
            &self.dir,
        )?;
        if let Err(e) = self.background.publish(&image) {
            let _ = std::fs::remove_file(&image);
            return Err(e);
        }
        log::debug!("Published background snapshot {}", image.display());

        if let Some(previous) = self.current.replace(image)
            && let Err(e) = std::fs::remove_file(&previous)
        {
            log::debug!("Failed to remove {}: {}", previous.display(), e);
        }
        Ok(())
    }

    /// Restore the original background and forget the source.
    pub fn stop(&mut self) {
        self.source = None;
        self.next_at = None;
        self.retries = 0;
        if !self.active {
            return;
        }
        self.active = false;
        match self.background.restore() {
            Ok(()) => log::info!("Restored original desktop background"),
            Err(e) => log::warn!("Failed to restore desktop background: {:#}", e),
        }
        if let Some(current) = self.current.take() {
            let _ = std::fs::remove_file(current);
        }
    }
}

/// Delete snapshot files in `dir` older than `max_age`, except `keep`.
pub fn cleanup(dir: &Path, max_age: Duration, now: SystemTime, keep: Option<&Path>) -> usize {
    let pattern = dir.join(format!("{}*", SNAPSHOT_PREFIX));
    let Some(pattern) = pattern.to_str() else {
        return 0;
    };
    let Ok(paths) = glob::glob(pattern) else {
        return 0;
    };

    let mut removed = 0;
    for path in paths.flatten() {
        if keep == Some(path.as_path()) {
            continue;
        }
        let age = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}
