//! GStreamer playback engine.
//!
//! Each session is a `playbin` whose video sink renders into the player's
//! desktop-layer window through the `VideoOverlay` interface.

use super::{Engine, EngineEvent, EngineFactory, EngineState, FitRect};
use crate::config::Config;
use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// Sinks able to embed into a foreign X11 window, best first.
const SINK_CANDIDATES: &[&str] = &["xvimagesink", "ximagesink", "glimagesink", "autovideosink"];

/// Initialize GStreamer (idempotent, safe to call multiple times)
fn initialize_gstreamer() -> Result<()> {
    static GSTREAMER_INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized ({})", gst::version_string());
            Ok(())
        })
        .clone()
        .map_err(|e| anyhow::anyhow!("Failed to initialize GStreamer: {}", e))
}

/// Sinks to try in order: the forced one, then the built-in list without it.
fn sink_candidates(forced: Option<&str>) -> Vec<&str> {
    let forced = forced.map(str::trim).filter(|name| !name.is_empty());
    forced
        .into_iter()
        .chain(
            SINK_CANDIDATES
                .iter()
                .copied()
                .filter(|name| Some(*name) != forced),
        )
        .collect()
}

/// Backend chosen at startup.
pub struct GstEngineFactory {
    sink: String,
}

impl GstEngineFactory {
    /// Try the configured sink first, then the built-in candidates.
    pub fn init(config: &Config) -> Result<Self> {
        initialize_gstreamer()?;

        if gst::ElementFactory::find("playbin").is_none() {
            anyhow::bail!("GStreamer playbin element not available (install gst-plugins-base)");
        }

        let mut tried = Vec::new();
        for name in sink_candidates(config.engine.video_sink.as_deref()) {
            match gst::ElementFactory::make(name).build() {
                Ok(_) => {
                    log::info!("Using video sink: {}", name);
                    return Ok(Self {
                        sink: name.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("Video sink {} unavailable: {}", name, e);
                    tried.push(name);
                }
            }
        }

        anyhow::bail!("No usable video sink (tried: {})", tried.join(", "))
    }
}

impl EngineFactory for GstEngineFactory {
    fn backend(&self) -> &str {
        &self.sink
    }

    fn create(&self) -> Result<Box<dyn Engine>> {
        Ok(Box::new(GstEngine::new(&self.sink)?))
    }
}

/// One `playbin` session.
pub struct GstEngine {
    playbin: gst::Element,
    sink: gst::Element,
    /// Read by the bus sync handler when a sink asks for a window
    window: Arc<AtomicU32>,
    rate: f64,
    ended: bool,
    errored: bool,
}

impl GstEngine {
    fn new(sink_name: &str) -> Result<Self> {
        let playbin = gst::ElementFactory::make("playbin")
            .build()
            .context("Failed to create playbin")?;
        let sink = gst::ElementFactory::make(sink_name)
            .build()
            .with_context(|| format!("Failed to create video sink {}", sink_name))?;

        // Cropping is done with the render rectangle
        if sink.find_property("force-aspect-ratio").is_some() {
            sink.set_property("force-aspect-ratio", false);
        }
        playbin.set_property("video-sink", &sink);

        let window = Arc::new(AtomicU32::new(0));
        if let Some(bus) = playbin.bus() {
            let window = window.clone();
            bus.set_sync_handler(move |_, msg| {
                if !gst_video::is_video_overlay_prepare_window_handle_message(msg) {
                    return gst::BusSyncReply::Pass;
                }
                let handle = window.load(Ordering::Acquire);
                if handle != 0
                    && let Some(overlay) = msg
                        .src()
                        .and_then(|src| src.clone().dynamic_cast::<gst_video::VideoOverlay>().ok())
                {
                    unsafe { overlay.set_window_handle(handle as usize) };
                }
                gst::BusSyncReply::Drop
            });
        }

        Ok(Self {
            playbin,
            sink,
            window,
            rate: 1.0,
            ended: false,
            errored: false,
        })
    }

    /// The element implementing `VideoOverlay`, which may sit inside a bin.
    fn overlay(&self) -> Option<gst_video::VideoOverlay> {
        if let Ok(overlay) = self.sink.clone().dynamic_cast::<gst_video::VideoOverlay>() {
            return Some(overlay);
        }
        self.sink
            .downcast_ref::<gst::Bin>()?
            .by_interface(gst_video::VideoOverlay::static_type())?
            .dynamic_cast::<gst_video::VideoOverlay>()
            .ok()
    }

    fn seek_to(&self, rate: f64, position: gst::ClockTime, flags: gst::SeekFlags) -> Result<()> {
        self.playbin
            .seek(
                rate,
                flags,
                gst::SeekType::Set,
                position,
                gst::SeekType::None,
                gst::ClockTime::NONE,
            )
            .context("Seek rejected")
    }
}

impl Engine for GstEngine {
    fn bind_window(&mut self, handle: u32) -> Result<()> {
        self.window.store(handle, Ordering::Release);
        if let Some(overlay) = self.overlay() {
            unsafe { overlay.set_window_handle(handle as usize) };
        }
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.playbin
            .set_state(gst::State::Null)
            .context("Failed to reset pipeline")?;
        let uri = gst::glib::filename_to_uri(path, None)
            .with_context(|| format!("Invalid video path: {}", path.display()))?;
        self.playbin.set_property("uri", uri.as_str());
        self.rate = 1.0;
        self.ended = false;
        self.errored = false;
        log::debug!("Loaded {}", uri);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.playbin
            .set_state(gst::State::Playing)
            .context("Failed to set pipeline to Playing state")?;
        self.ended = false;
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        let state = if paused {
            gst::State::Paused
        } else {
            gst::State::Playing
        };
        self.playbin
            .set_state(state)
            .with_context(|| format!("Failed to set pipeline to {:?}", state))?;
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
        self.rate = 1.0;
    }

    fn state(&self) -> EngineState {
        if self.errored {
            return EngineState::Error;
        }
        if self.ended {
            return EngineState::Ended;
        }
        match self.playbin.current_state() {
            gst::State::Playing => EngineState::Playing,
            gst::State::Paused => EngineState::Paused,
            gst::State::Ready => EngineState::Opening,
            gst::State::Null => EngineState::Stopped,
            _ => EngineState::Idle,
        }
    }

    fn time_ms(&self) -> Option<u64> {
        self.playbin
            .query_position::<gst::ClockTime>()
            .map(|t| t.mseconds())
    }

    fn length_ms(&self) -> Option<u64> {
        self.playbin
            .query_duration::<gst::ClockTime>()
            .map(|t| t.mseconds())
    }

    fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        let length = self.length_ms().context("Media length unknown")?;
        let target = (length as f64 * fraction.clamp(0.0, 1.0)) as u64;
        self.seek_to(
            self.rate,
            gst::ClockTime::from_mseconds(target),
            gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
        )
    }

    fn set_volume(&mut self, volume: u32) -> Result<()> {
        let volume = common::clamp_volume(volume);
        self.playbin
            .set_property("volume", volume as f64 / common::MAX_VOLUME as f64);
        self.playbin.set_property("mute", volume == 0);
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        let position = self
            .playbin
            .query_position::<gst::ClockTime>()
            .unwrap_or(gst::ClockTime::ZERO);
        self.seek_to(
            rate,
            position,
            gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
        )?;
        self.rate = rate;
        Ok(())
    }

    /// Rate of the running segment, or the last accepted request when the
    /// pipeline cannot answer yet.
    fn rate(&self) -> f64 {
        let mut query = gst::query::Segment::new(gst::Format::Time);
        if self.playbin.query(&mut query) {
            let (rate, _, _) = query.result();
            if rate.is_finite() && rate > 0.0 {
                return rate;
            }
        }
        self.rate
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        let caps = self.sink.static_pad("sink")?.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        Some((info.width(), info.height()))
    }

    fn apply_fit(&mut self, rect: FitRect) -> Result<()> {
        let overlay = self
            .overlay()
            .context("Video sink does not support window embedding")?;
        overlay
            .set_render_rectangle(rect.x, rect.y, rect.width as i32, rect.height as i32)
            .context("Failed to set render rectangle")?;
        overlay.expose();
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let Some(bus) = self.playbin.bus() else {
            return events;
        };

        // Drain everything so the bus never grows
        while let Some(msg) = bus.pop() {
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    let looped = self.seek_to(
                        self.rate,
                        gst::ClockTime::ZERO,
                        gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                    );
                    if let Err(e) = looped {
                        log::warn!("Failed to loop video in place: {}", e);
                        self.ended = true;
                        events.push(EngineEvent::EndReached);
                    }
                }
                gst::MessageView::Error(err) => {
                    self.errored = true;
                    events.push(EngineEvent::Error(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                gst::MessageView::StateChanged(change) => {
                    let from_pipeline = msg.src() == Some(self.playbin.upcast_ref::<gst::Object>());
                    if from_pipeline && change.current() == gst::State::Playing {
                        events.push(EngineEvent::Playing);
                    }
                }
                _ => {}
            }
        }

        events
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
    }
}
