//! Playback engine abstraction.
//!
//! A player drives exactly one [`Engine`] session: it binds the engine's
//! video output to a native window, loads a file and then polls state, clock
//! and lifecycle events from the service loop.

#[cfg(feature = "video")]
mod gst;

#[cfg(feature = "video")]
pub use gst::GstEngineFactory;

use anyhow::Result;
use std::path::Path;

/// Coarse engine state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Opening,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

/// Lifecycle notifications drained by [`Engine::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Playback (re)started producing frames
    Playing,
    /// The media ran out and could not loop in place
    EndReached,
    Error(String),
}

/// Where the video is drawn inside the surface, in surface coordinates.
///
/// May extend past the surface edges; the overflow is clipped, which crops
/// the video to the monitor's aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Scale `video` to cover `target` completely, centered, preserving aspect.
pub fn cover_rect(video: (u32, u32), target: (u32, u32)) -> FitRect {
    let (vw, vh) = video;
    let (tw, th) = target;
    if vw == 0 || vh == 0 || tw == 0 || th == 0 {
        return FitRect {
            x: 0,
            y: 0,
            width: tw,
            height: th,
        };
    }

    let scale = (tw as f64 / vw as f64).max(th as f64 / vh as f64);
    let width = ((vw as f64 * scale).round() as u32).max(tw);
    let height = ((vh as f64 * scale).round() as u32).max(th);

    FitRect {
        x: -(((width - tw) / 2) as i32),
        y: -(((height - th) / 2) as i32),
        width,
        height,
    }
}

/// One playback session.
pub trait Engine {
    /// Direct video output into the native window `handle`.
    fn bind_window(&mut self, handle: u32) -> Result<()>;
    fn load(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn set_paused(&mut self, paused: bool) -> Result<()>;
    fn stop(&mut self);

    fn state(&self) -> EngineState;
    /// Playback clock in milliseconds, `None` when unknown.
    fn time_ms(&self) -> Option<u64>;
    /// Media length in milliseconds, `None` when unknown.
    fn length_ms(&self) -> Option<u64>;
    /// Playback position as a fraction of the media length.
    fn position(&self) -> Option<f64> {
        match (self.time_ms(), self.length_ms()) {
            (Some(t), Some(len)) if len > 0 => Some((t as f64 / len as f64).clamp(0.0, 1.0)),
            _ => None,
        }
    }
    fn seek_fraction(&mut self, fraction: f64) -> Result<()>;

    /// Volume on the 0-100 scale.
    fn set_volume(&mut self, volume: u32) -> Result<()>;
    fn set_rate(&mut self, rate: f64) -> Result<()>;
    /// Rate the engine actually plays at.
    fn rate(&self) -> f64;

    /// Decoded frame size, known once the first frame arrived.
    fn video_size(&self) -> Option<(u32, u32)>;
    fn apply_fit(&mut self, rect: FitRect) -> Result<()>;

    fn poll_events(&mut self) -> Vec<EngineEvent>;
}

/// Creates engine sessions from an initialized backend.
pub trait EngineFactory {
    fn backend(&self) -> &str;
    fn create(&self) -> Result<Box<dyn Engine>>;
}

/// Initialize the engine backend, trying every candidate in turn.
///
/// Fails only when no candidate works.
#[cfg(feature = "video")]
pub fn init(config: &crate::config::Config) -> Result<Box<dyn EngineFactory>> {
    Ok(Box::new(GstEngineFactory::init(config)?))
}

#[cfg(not(feature = "video"))]
pub fn init(_config: &crate::config::Config) -> Result<Box<dyn EngineFactory>> {
    anyhow::bail!("Video playback not compiled (build with --features video to enable)")
}
