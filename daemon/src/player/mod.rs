//! One looping video on one monitor.
//!
//! A [`Player`] owns a desktop-layer surface, an engine session and a table of
//! named timers. The service loop calls [`Player::tick`] with the current time;
//! every deferred action (positioning retries, crop passes, the watchdog,
//! screen checks, restarts) is a timer that fires from there. Dropping or
//! destroying the player drops every pending action with it.
//!
//! Lifecycle: positioning, then starting (waits for the surface to become
//! viewable before embedding), then running. A running player may be
//! suspended for any [`SuspendReason`] and may restart its engine session
//! when the watchdog or the engine reports a stall.

pub mod fade;
pub mod maximized;
pub mod speed;
pub mod suspend;
pub mod watchdog;

use crate::config::PlayerSettings;
use crate::engine::{Engine, EngineEvent, EngineFactory, EngineState, FitRect, cover_rect};
use crate::log_and_continue;
use crate::monitors::{MonitorDescriptor, MonitorInventory};
use crate::surface::{Surface, SurfaceFactory, Visibility};
use crate::timers::Timers;
use anyhow::{Context, Result};
use common::{PlayerStatus, ScreenSettings, clamp_rate, clamp_volume};
use fade::FadeOut;
use maximized::{MaximizedProbe, ProbeFactory};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use suspend::{SuspendReason, SuspendReasons, Transition};
use watchdog::{Sample, Verdict};

const POSITION_RETRIES: u32 = 10;
const POSITION_RETRY_DELAY: Duration = Duration::from_secs(1);
const START_ATTEMPTS: u32 = 20;
const STARTUP_PAUSE_POLLS: u32 = 20;
const STARTUP_PAUSE_POLL: Duration = Duration::from_millis(150);
const SPEED_AFTER_LOAD: Duration = Duration::from_millis(50);
const SPEED_AFTER_PLAY: Duration = Duration::from_millis(100);
const SPEED_AFTER_RESUME: Duration = Duration::from_millis(75);
const FIRST_FIT_DELAY: Duration = Duration::from_millis(100);
/// Crop passes after the first one, relative to it. The engine resets its
/// scaling when the first frames arrive.
const FIT_PASSES: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_millis(750),
    Duration::from_millis(1500),
];
const REFIT_DEBOUNCE: Duration = Duration::from_millis(150);
const END_CONFIRM_DELAY: Duration = Duration::from_millis(200);
const REPAUSE_DELAY: Duration = Duration::from_millis(100);
const MISSING_CHECK_LIMIT: u32 = 2;
const RESIZE_THRESHOLD: u32 = 50;

/// 50, 100, 150 ms, repeating.
fn start_retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(50 * (1 + (attempt % 3) as u64))
}

/// Everything needed to build players.
pub struct Backends {
    pub engines: Box<dyn EngineFactory>,
    pub surfaces: Box<dyn SurfaceFactory>,
    pub probes: Box<dyn ProbeFactory>,
}

/// What a new player should play, and where.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSpec {
    pub index: usize,
    pub name: Option<String>,
    pub video_path: PathBuf,
    pub volume: u32,
    pub pause_on_max: bool,
    pub paused: bool,
    pub speed: f64,
    /// Playback fraction to seek to once playback starts
    pub resume_hint: Option<f64>,
}

impl PlayerSpec {
    pub fn new(index: usize, video_path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            name: None,
            video_path: video_path.into(),
            volume: 0,
            pause_on_max: false,
            paused: false,
            speed: 1.0,
            resume_hint: None,
        }
    }
}

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Positioning,
    Starting,
    Playing,
    Suspended,
    Restarting,
    /// Gave up embedding; shows nothing until replaced
    Inert,
    Destroyed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Positioning => "positioning",
            Phase::Starting => "starting",
            Phase::Playing => "playing",
            Phase::Suspended => "suspended",
            Phase::Restarting => "restarting",
            Phase::Inert => "inert",
            Phase::Destroyed => "destroyed",
        }
    }
}

/// Something the owner of the player has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSignal {
    Destroyed,
    /// The player's monitor was renumbered
    Rebound { from: usize, to: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Positioning,
    Starting,
    Running,
    Restarting,
    Inert,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PlayerTimer {
    Position,
    StartAttempt,
    StartupPause,
    SpeedAfterLoad,
    SpeedAfterPlay,
    SpeedAfterResume,
    Fit,
    Refit,
    EndConfirm,
    Restart,
    RepauseAfterRestart,
    Stable,
    Watchdog,
    ScreenCheck,
    MaximizedPoll,
}

#[derive(Debug)]
struct RestartState {
    count: u32,
    backoff: Duration,
    grace_until: Option<Instant>,
}

pub struct Player {
    index: usize,
    name: Option<String>,
    video_path: PathBuf,
    volume: u32,
    pause_on_max: bool,
    speed: f64,
    effective_rate: f64,

    stage: Stage,
    engine: Box<dyn Engine>,
    surface: Box<dyn Surface>,
    probe: Box<dyn MaximizedProbe>,
    timers: Timers<PlayerTimer>,
    reasons: SuspendReasons,
    tuning: PlayerSettings,

    geometry: Option<MonitorDescriptor>,
    playback_ready: bool,
    restart: RestartState,
    stuck_streak: u32,
    last_fit: Option<FitRect>,
    fit_origin: Option<Instant>,
    fit_pass: usize,
    position_attempts: u32,
    start_attempts: u32,
    startup_polls: u32,
    missing_checks: u32,
    invisible_since: Option<Instant>,
    resume_hint: Option<f64>,
    fade: Option<FadeOut>,
}

impl Player {
    /// Create the surface and engine session and schedule positioning.
    pub fn new(
        spec: PlayerSpec,
        backends: &Backends,
        tuning: PlayerSettings,
        now: Instant,
    ) -> Result<Self> {
        let surface = backends
            .surfaces
            .create()
            .context("Failed to create playback surface")?;
        let engine = backends
            .engines
            .create()
            .context("Failed to create engine session")?;

        let mut reasons = SuspendReasons::default();
        if spec.paused {
            reasons.insert(SuspendReason::User);
        }

        let speed = clamp_rate(spec.speed);
        let debounce = Duration::from_millis(tuning.restart_debounce_ms);
        let mut player = Self {
            index: spec.index,
            name: spec.name,
            video_path: spec.video_path,
            volume: clamp_volume(spec.volume),
            pause_on_max: spec.pause_on_max,
            speed,
            effective_rate: speed,
            stage: Stage::Positioning,
            engine,
            surface,
            probe: backends.probes.create(),
            timers: Timers::new(),
            reasons,
            tuning,
            geometry: None,
            playback_ready: false,
            restart: RestartState {
                count: 0,
                backoff: debounce,
                grace_until: None,
            },
            stuck_streak: 0,
            last_fit: None,
            fit_origin: None,
            fit_pass: 0,
            position_attempts: 0,
            start_attempts: 0,
            startup_polls: 0,
            missing_checks: 0,
            invisible_since: None,
            resume_hint: spec.resume_hint.filter(|f| f.is_finite() && *f > 0.0 && *f < 1.0),
            fade: None,
        };
        player.timers.schedule(PlayerTimer::Position, now);

        log::info!(
            "Screen {}: player created for {}",
            player.index,
            player.video_path.display()
        );
        Ok(player)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn pause_on_max(&self) -> bool {
        self.pause_on_max
    }

    pub fn user_paused(&self) -> bool {
        self.reasons.contains(SuspendReason::User)
    }

    pub fn is_suspended(&self) -> bool {
        self.reasons.is_suspended()
    }

    /// Rate the player actually plays at.
    pub fn rate(&self) -> f64 {
        self.effective_rate
    }

    pub fn phase(&self) -> Phase {
        match self.stage {
            Stage::Positioning => Phase::Positioning,
            Stage::Starting => Phase::Starting,
            Stage::Running if self.reasons.is_suspended() => Phase::Suspended,
            Stage::Running => Phase::Playing,
            Stage::Restarting => Phase::Restarting,
            Stage::Inert => Phase::Inert,
            Stage::Destroyed => Phase::Destroyed,
        }
    }

    /// Playback clock, for frame snapshots.
    pub fn time_ms(&self) -> Option<u64> {
        if self.engine_live() {
            self.engine.time_ms()
        } else {
            None
        }
    }

    /// Playback fraction, carried to a replacement player.
    pub fn position(&self) -> Option<f64> {
        if self.engine_live() {
            self.engine.position()
        } else {
            None
        }
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            screen_index: self.index,
            screen_name: self.name.clone(),
            paused: self.reasons.is_suspended(),
            volume: self.volume,
            video_path: self.video_path.display().to_string(),
            rate: self.effective_rate,
            phase: self.phase().as_str().to_string(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn engine_live(&self) -> bool {
        matches!(self.stage, Stage::Running | Stage::Restarting)
    }

    /// Advance the player to `now`.
    pub fn tick(&mut self, inventory: &mut MonitorInventory, now: Instant) -> Option<PlayerSignal> {
        if self.stage == Stage::Destroyed {
            return Some(PlayerSignal::Destroyed);
        }
        if self.fade.is_some() {
            return None;
        }

        if self.engine_live() {
            for event in self.engine.poll_events() {
                self.on_engine_event(event, now);
            }
        }

        let mut signal = None;
        for timer in self.timers.take_due(now) {
            if self.stage == Stage::Destroyed {
                break;
            }
            match timer {
                PlayerTimer::Position => self.position_surface(inventory, now),
                PlayerTimer::StartAttempt => self.start_attempt(now),
                PlayerTimer::StartupPause => self.startup_pause(now),
                PlayerTimer::SpeedAfterLoad
                | PlayerTimer::SpeedAfterPlay
                | PlayerTimer::SpeedAfterResume => self.apply_speed(),
                PlayerTimer::Fit => self.fit_pass(now),
                PlayerTimer::Refit => self.refit(),
                PlayerTimer::EndConfirm => self.confirm_end(now),
                PlayerTimer::Restart => self.execute_restart(now),
                PlayerTimer::RepauseAfterRestart => self.repause(),
                PlayerTimer::Stable => self.mark_stable(),
                PlayerTimer::Watchdog => self.watchdog(now),
                PlayerTimer::ScreenCheck => {
                    if let Some(s) = self.screen_check(inventory, now) {
                        signal = Some(s);
                    }
                }
                PlayerTimer::MaximizedPoll => self.poll_maximized(now),
            }
        }

        if self.stage == Stage::Destroyed {
            return Some(PlayerSignal::Destroyed);
        }
        signal
    }

    // Positioning and start

    fn position_surface(&mut self, inventory: &mut MonitorInventory, now: Instant) {
        let layout = inventory.placement_layout(now);
        let target = self
            .name
            .as_deref()
            .and_then(|name| layout.iter().find(|m| m.name == name))
            .or_else(|| layout.iter().find(|m| m.index == self.index))
            .cloned();

        let Some(monitor) = target else {
            self.position_attempts += 1;
            if self.position_attempts >= POSITION_RETRIES {
                log::warn!(
                    "Screen {}: monitor not found after {} attempts, giving up",
                    self.index,
                    self.position_attempts
                );
                self.destroy();
            } else {
                log::debug!(
                    "Screen {}: monitor not present yet (attempt {}/{})",
                    self.index,
                    self.position_attempts,
                    POSITION_RETRIES
                );
                self.timers
                    .schedule(PlayerTimer::Position, now + POSITION_RETRY_DELAY);
            }
            return;
        };

        log_and_continue!(self.place_surface(&monitor), "place surface");
        log::debug!(
            "Screen {}: placed on {} at {}x{}+{}+{}",
            self.index,
            monitor.name,
            monitor.width,
            monitor.height,
            monitor.x,
            monitor.y
        );
        if self.name.is_none() {
            self.name = Some(monitor.name.clone());
        }
        self.geometry = Some(monitor);
        self.stage = Stage::Starting;
        self.start_attempts = 0;
        self.timers.schedule(PlayerTimer::StartAttempt, now);
    }

    fn place_surface(&mut self, monitor: &MonitorDescriptor) -> Result<()> {
        self.surface.place(monitor)?;
        self.surface.show()?;
        self.surface.lower()?;
        Ok(())
    }

    fn start_attempt(&mut self, now: Instant) {
        if !self.surface.is_exposed() {
            self.start_attempts += 1;
            if self.start_attempts >= START_ATTEMPTS {
                log::warn!(
                    "Screen {}: surface never became viewable after {} tries, staying inert",
                    self.index,
                    self.start_attempts
                );
                self.stage = Stage::Inert;
                self.timers.clear();
            } else {
                self.timers.schedule(
                    PlayerTimer::StartAttempt,
                    now + start_retry_delay(self.start_attempts),
                );
            }
            return;
        }

        self.stage = Stage::Running;
        match self.start_playback() {
            Ok(()) => log::info!(
                "Screen {}: playing {}",
                self.index,
                self.video_path.display()
            ),
            Err(e) => {
                log::warn!("Screen {}: failed to start playback: {:#}", self.index, e);
                self.request_restart("start failed", now);
            }
        }

        self.timers
            .schedule(PlayerTimer::SpeedAfterLoad, now + SPEED_AFTER_LOAD);
        self.timers
            .schedule(PlayerTimer::SpeedAfterPlay, now + SPEED_AFTER_PLAY);
        if self.reasons.is_suspended() {
            self.startup_polls = 0;
            self.timers
                .schedule(PlayerTimer::StartupPause, now + STARTUP_PAUSE_POLL);
        }
        self.timers.schedule(
            PlayerTimer::Watchdog,
            now + Duration::from_millis(self.tuning.watchdog_interval_ms),
        );
        self.timers.schedule(
            PlayerTimer::ScreenCheck,
            now + Duration::from_millis(self.tuning.active_check_ms),
        );
    }

    fn start_playback(&mut self) -> Result<()> {
        self.engine
            .bind_window(self.surface.native_handle())
            .context("Failed to bind video output")?;
        self.load_and_play()
    }

    fn load_and_play(&mut self) -> Result<()> {
        self.engine
            .load(&self.video_path)
            .with_context(|| format!("Failed to load {}", self.video_path.display()))?;
        self.engine.set_volume(self.volume)?;
        self.engine.play()?;
        Ok(())
    }

    /// Pause once the first frame is up when the player was asked to start paused.
    fn startup_pause(&mut self, now: Instant) {
        if !self.reasons.is_suspended() {
            return;
        }
        let state = self.engine.state();
        if matches!(state, EngineState::Ended | EngineState::Stopped) {
            self.request_restart("ended before first frame", now);
            return;
        }

        let first_frame = state == EngineState::Playing
            || (self.engine.time_ms().unwrap_or(0) > 0 && self.engine.video_size().is_some());
        self.startup_polls += 1;
        if first_frame || self.startup_polls >= STARTUP_PAUSE_POLLS {
            log_and_continue!(self.engine.set_paused(true), "pause engine");
            log::info!("Screen {}: started paused", self.index);
        } else {
            self.timers
                .schedule(PlayerTimer::StartupPause, now + STARTUP_PAUSE_POLL);
        }
    }

    // Engine events

    fn on_engine_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Playing => self.on_playing(now),
            EngineEvent::EndReached => {
                self.timers
                    .schedule(PlayerTimer::EndConfirm, now + END_CONFIRM_DELAY);
            }
            EngineEvent::Error(message) => {
                log::warn!("Screen {}: engine error: {}", self.index, message);
                match self.restart.grace_until {
                    Some(until) if now < until => self.defer_restart(until, now),
                    _ => self.request_restart("engine error", now),
                }
            }
        }
    }

    fn on_playing(&mut self, now: Instant) {
        if self.stage == Stage::Restarting {
            self.stage = Stage::Running;
            log::info!("Screen {}: playback restarted", self.index);
        }
        if !self.playback_ready {
            self.playback_ready = true;
            if self.pause_on_max {
                self.timers.schedule(
                    PlayerTimer::MaximizedPoll,
                    now + Duration::from_millis(self.tuning.maximized_poll_ms),
                );
            }
        }
        self.timers.schedule(
            PlayerTimer::Stable,
            now + Duration::from_millis(self.tuning.stable_after_ms),
        );

        if let Some(fraction) = self.resume_hint.take() {
            log::debug!("Screen {}: resuming at {:.3}", self.index, fraction);
            log_and_continue!(self.engine.seek_fraction(fraction), "seek to resume position");
        }

        self.fit_origin = None;
        self.fit_pass = 0;
        self.timers.schedule(PlayerTimer::Fit, now + FIRST_FIT_DELAY);
    }

    fn confirm_end(&mut self, now: Instant) {
        if matches!(self.engine.state(), EngineState::Ended | EngineState::Stopped)
            && !self.reasons.is_suspended()
        {
            self.request_restart("end reached", now);
        }
    }

    // Geometry

    fn fit_pass(&mut self, now: Instant) {
        let origin = *self.fit_origin.get_or_insert(now);
        if let Some(rect) = self.target_fit() {
            match self.engine.apply_fit(rect) {
                Ok(()) => self.last_fit = Some(rect),
                Err(e) => log::debug!("Screen {}: crop not applied: {}", self.index, e),
            }
        }
        if let Some(delay) = FIT_PASSES.get(self.fit_pass) {
            self.fit_pass += 1;
            self.timers.schedule(PlayerTimer::Fit, origin + *delay);
        }
    }

    fn refit(&mut self) {
        let Some(rect) = self.target_fit() else {
            return;
        };
        if self.last_fit == Some(rect) {
            return;
        }
        match self.engine.apply_fit(rect) {
            Ok(()) => self.last_fit = Some(rect),
            Err(e) => log::debug!("Screen {}: crop not applied: {}", self.index, e),
        }
    }

    fn target_fit(&self) -> Option<FitRect> {
        if !self.engine_live() {
            return None;
        }
        let video = self.engine.video_size()?;
        let monitor = self.geometry.as_ref()?;
        Some(cover_rect(video, (monitor.width, monitor.height)))
    }

    // Speed

    fn apply_speed(&mut self) {
        if self.engine_live() {
            self.effective_rate = speed::apply(self.engine.as_mut(), self.speed);
        }
    }

    // Restarts

    fn request_restart(&mut self, reason: &str, now: Instant) {
        if !self.engine_live() {
            return;
        }
        if self.stage == Stage::Restarting || self.timers.is_scheduled(PlayerTimer::Restart) {
            log::debug!("Screen {}: restart already in progress ({})", self.index, reason);
            return;
        }
        if let Some(until) = self.restart.grace_until
            && now < until
        {
            log::debug!("Screen {}: restart within grace window ignored ({})", self.index, reason);
            return;
        }

        log::info!(
            "Screen {}: restarting in {:?} ({})",
            self.index,
            self.restart.backoff,
            reason
        );
        self.timers.cancel(PlayerTimer::Stable);
        self.timers
            .schedule(PlayerTimer::Restart, now + self.restart.backoff);
    }

    /// An error from the freshly restarted engine still needs a restart once
    /// the grace window closes.
    fn defer_restart(&mut self, until: Instant, now: Instant) {
        if !self.engine_live() || self.timers.is_scheduled(PlayerTimer::Restart) {
            return;
        }
        let at = until.max(now + self.restart.backoff);
        log::info!(
            "Screen {}: engine error within grace window, restarting in {:?}",
            self.index,
            at - now
        );
        self.timers.cancel(PlayerTimer::Stable);
        self.timers.schedule(PlayerTimer::Restart, at);
    }

    fn execute_restart(&mut self, now: Instant) {
        if !self.engine_live() {
            return;
        }
        self.stage = Stage::Restarting;
        self.restart.count += 1;
        log::info!("Screen {}: restart #{}", self.index, self.restart.count);

        self.timers.cancel(PlayerTimer::Stable);
        self.timers.cancel(PlayerTimer::EndConfirm);
        self.timers.cancel(PlayerTimer::StartupPause);

        self.engine.stop();
        self.last_fit = None;
        if let Err(e) = self.load_and_play() {
            log::warn!("Screen {}: restart failed: {:#}", self.index, e);
        }

        self.timers
            .schedule(PlayerTimer::SpeedAfterLoad, now + SPEED_AFTER_LOAD);
        self.timers
            .schedule(PlayerTimer::SpeedAfterPlay, now + SPEED_AFTER_PLAY);
        if self.reasons.is_suspended() {
            self.timers
                .schedule(PlayerTimer::RepauseAfterRestart, now + REPAUSE_DELAY);
        }

        let max_backoff = Duration::from_millis(self.tuning.max_restart_backoff_ms);
        self.restart.backoff = (self.restart.backoff * 2).min(max_backoff);
        self.restart.grace_until = Some(now + Duration::from_millis(self.tuning.restart_grace_ms));
        self.stuck_streak = 0;
    }

    fn repause(&mut self) {
        if self.reasons.is_suspended() && self.engine_live() {
            log_and_continue!(self.engine.set_paused(true), "re-pause after restart");
        }
    }

    fn mark_stable(&mut self) {
        if self.restart.count > 0 {
            log::debug!(
                "Screen {}: stable after {} restart(s)",
                self.index,
                self.restart.count
            );
        }
        self.restart.count = 0;
        self.restart.backoff = Duration::from_millis(self.tuning.restart_debounce_ms);
    }

    fn watchdog(&mut self, now: Instant) {
        if self.stage == Stage::Restarting
            && self.restart.grace_until.is_none_or(|until| now >= until)
        {
            // No Playing event arrived; let the watchdog judge it again
            self.stage = Stage::Running;
        }

        if self.engine_live() && !self.timers.is_scheduled(PlayerTimer::Restart) {
            let sample = Sample {
                state: self.engine.state(),
                time_ms: self.engine.time_ms(),
                length_ms: self.engine.length_ms(),
                suspended: self.reasons.is_suspended(),
            };
            if let Verdict::Restart(reason) = watchdog::evaluate(sample, &mut self.stuck_streak) {
                self.request_restart(&reason.to_string(), now);
            }
        }

        self.timers.schedule(
            PlayerTimer::Watchdog,
            now + Duration::from_millis(self.tuning.watchdog_interval_ms),
        );
    }

    // Suspension

    fn suspend(&mut self, reason: SuspendReason) {
        if self.reasons.insert(reason) == Transition::Suspend {
            log::info!("Screen {}: suspended ({:?})", self.index, reason);
            if self.engine_live() {
                log_and_continue!(self.engine.set_paused(true), "pause engine");
            }
        }
    }

    fn resume(&mut self, reason: SuspendReason, now: Instant) {
        if self.reasons.remove(reason) == Transition::Resume {
            log::info!("Screen {}: resumed ({:?} cleared)", self.index, reason);
            self.timers.cancel(PlayerTimer::StartupPause);
            if self.engine_live() {
                log_and_continue!(self.engine.set_paused(false), "resume engine");
                self.stuck_streak = 0;
                self.timers
                    .schedule(PlayerTimer::SpeedAfterResume, now + SPEED_AFTER_RESUME);
            }
        }
    }

    fn poll_maximized(&mut self, now: Instant) {
        if !self.pause_on_max {
            return;
        }
        if let Some(monitor) = self.geometry.clone() {
            match self.probe.is_maximized(&monitor, now) {
                Some(true) => self.suspend(SuspendReason::Maximized),
                Some(false) => self.resume(SuspendReason::Maximized, now),
                None => {}
            }
        }
        self.timers.schedule(
            PlayerTimer::MaximizedPoll,
            now + Duration::from_millis(self.tuning.maximized_poll_ms),
        );
    }

    fn screen_check(
        &mut self,
        inventory: &mut MonitorInventory,
        now: Instant,
    ) -> Option<PlayerSignal> {
        let monitors = inventory.monitors(now);
        // A named monitor is only ever matched by name
        let found = match self.name {
            Some(ref name) => monitors.iter().find(|m| &m.name == name),
            None => monitors.iter().find(|m| m.index == self.index),
        }
        .cloned();

        let mut signal = None;
        match found {
            None => {
                self.missing_checks += 1;
                if self.missing_checks >= MISSING_CHECK_LIMIT {
                    log::info!("Screen {}: monitor gone, destroying player", self.index);
                    self.destroy();
                    return Some(PlayerSignal::Destroyed);
                }
                log::info!("Screen {}: monitor missing", self.index);
                self.suspend(SuspendReason::Disappeared);
            }
            Some(monitor) => signal = self.rebind(monitor, now),
        }

        self.check_visibility(now);

        let interval = if self.reasons.contains(SuspendReason::Idle) {
            self.tuning.idle_check_ms
        } else {
            self.tuning.active_check_ms
        };
        self.timers
            .schedule(PlayerTimer::ScreenCheck, now + Duration::from_millis(interval));
        signal
    }

    /// Follow `monitor`, which was matched to this player by name or index.
    ///
    /// Re-places the surface when the geometry moved and reports a renumbering.
    pub fn rebind(&mut self, monitor: MonitorDescriptor, now: Instant) -> Option<PlayerSignal> {
        self.missing_checks = 0;
        if self.name.is_none() {
            self.name = Some(monitor.name.clone());
        }

        let mut signal = None;
        if monitor.index != self.index {
            log::info!(
                "Screen {}: {} is now screen {}",
                self.index,
                monitor.name,
                monitor.index
            );
            signal = Some(PlayerSignal::Rebound {
                from: self.index,
                to: monitor.index,
            });
            self.index = monitor.index;
        }

        if self.geometry.is_some() && self.geometry.as_ref() != Some(&monitor) {
            let resized = self
                .geometry
                .as_ref()
                .is_some_and(|old| old.size_differs(&monitor, RESIZE_THRESHOLD));
            log_and_continue!(self.place_surface(&monitor), "place surface");
            if resized {
                self.timers.schedule(PlayerTimer::Refit, now + REFIT_DEBOUNCE);
            }
            self.geometry = Some(monitor);
        }

        self.resume(SuspendReason::Disappeared, now);
        signal
    }

    fn check_visibility(&mut self, now: Instant) {
        match self.surface.visibility() {
            Visibility::Visible => {
                self.invisible_since = None;
                self.resume(SuspendReason::Idle, now);
            }
            Visibility::Hidden => {
                log::debug!("Screen {}: surface unmapped, showing it again", self.index);
                log_and_continue!(self.surface.show(), "show surface");
                log_and_continue!(self.surface.lower(), "lower surface");
            }
            Visibility::Minimized => {
                let since = *self.invisible_since.get_or_insert(now);
                let threshold = Duration::from_millis(self.tuning.idle_threshold_ms);
                if now.saturating_duration_since(since) >= threshold {
                    self.suspend(SuspendReason::Idle);
                }
            }
        }
    }

    // Control

    /// Apply the settings that differ from the current ones, live.
    pub fn update(&mut self, settings: &ScreenSettings, now: Instant) {
        if let Some(volume) = settings.volume.map(clamp_volume)
            && volume != self.volume
        {
            self.volume = volume;
            if self.engine_live() {
                log_and_continue!(self.engine.set_volume(volume), "set volume");
            }
        }

        if let Some(paused) = settings.paused
            && paused != self.user_paused()
        {
            if paused {
                self.suspend(SuspendReason::User);
            } else {
                self.resume(SuspendReason::User, now);
            }
        }

        if let Some(pause_on_max) = settings.pause_on_max
            && pause_on_max != self.pause_on_max
        {
            self.pause_on_max = pause_on_max;
            if pause_on_max {
                if self.playback_ready {
                    self.timers.schedule(PlayerTimer::MaximizedPoll, now);
                }
            } else {
                self.timers.cancel(PlayerTimer::MaximizedPoll);
                self.resume(SuspendReason::Maximized, now);
            }
        }

        if let Some(requested) = settings.speed {
            let requested = clamp_rate(requested);
            if (requested - self.speed).abs() > f64::EPSILON {
                self.speed = requested;
                self.effective_rate = requested;
                self.apply_speed();
                log::info!(
                    "Screen {}: speed {:.2} (effective {:.2})",
                    self.index,
                    requested,
                    self.effective_rate
                );
            }
        }
    }

    /// Hold positioning until `at`, e.g. while a predecessor fades out.
    pub fn defer_start(&mut self, at: Instant) {
        if self.stage == Stage::Positioning {
            self.timers.schedule(PlayerTimer::Position, at);
        }
    }

    /// Pause and start fading the surface out. The player is destroyed when
    /// [`Player::fade_step`] reports completion.
    pub fn begin_fade(&mut self, duration: Duration, now: Instant) {
        self.timers.clear();
        if self.engine_live() {
            log_and_continue!(self.engine.set_paused(true), "pause before fade");
        }
        self.fade = Some(FadeOut::new(duration, now));
    }

    pub fn fade_step(&mut self, now: Instant) -> bool {
        let Some(fade) = self.fade else {
            return true;
        };
        if fade.is_complete(now) {
            self.destroy();
            return true;
        }
        log_and_continue!(self.surface.set_opacity(fade.opacity(now)), "set surface opacity");
        false
    }

    /// Stop the engine and close the surface.
    pub fn destroy(&mut self) {
        if self.stage == Stage::Destroyed {
            return;
        }
        self.timers.clear();
        self.engine.stop();
        self.surface.close();
        self.stage = Stage::Destroyed;
        log::info!("Screen {}: player destroyed", self.index);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, monitor};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Tick every 10ms up to `until`.
    fn run(h: &mut Harness, player: &mut Player, from: Instant, until: Instant) -> Vec<PlayerSignal> {
        let mut signals = Vec::new();
        let mut now = from;
        while now <= until {
            if let Some(s) = player.tick(&mut h.inventory, now) {
                signals.push(s);
                if s == PlayerSignal::Destroyed {
                    break;
                }
            }
            now += ms(10);
        }
        signals
    }

    fn started(h: &mut Harness, spec: PlayerSpec, t0: Instant) -> Player {
        let mut player = Player::new(spec, &h.backends, PlayerSettings::default(), t0).unwrap();
        run(h, &mut player, t0, t0 + ms(500));
        player
    }

    #[test]
    fn test_starts_on_resolved_monitor() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);

        assert_eq!(player.phase(), Phase::Playing);
        assert_eq!(player.name(), Some("DP-1"));
        let engine = h.engine(0);
        assert_eq!(engine.inner().loads, 1);
        assert_eq!(engine.inner().bound, Some(h.surface(0).handle()));
        assert!(!engine.inner().fits.is_empty());
        assert_eq!(h.surface(0).inner().placed[0].name, "DP-1");
    }

    #[test]
    fn test_missing_monitor_gives_up_after_retries() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player =
            Player::new(PlayerSpec::new(3, "/v/a.mp4"), &h.backends, PlayerSettings::default(), t0)
                .unwrap();

        let signals = run(&mut h, &mut player, t0, t0 + Duration::from_secs(12));
        assert_eq!(signals, vec![PlayerSignal::Destroyed]);
        assert_eq!(player.phase(), Phase::Destroyed);
        assert_eq!(h.engine(0).inner().loads, 0);
    }

    #[test]
    fn test_unexposed_surface_stays_inert() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        h.surfaces.exposed_by_default(false);
        let t0 = Instant::now();
        let mut player =
            Player::new(PlayerSpec::new(0, "/v/a.mp4"), &h.backends, PlayerSettings::default(), t0)
                .unwrap();
        run(&mut h, &mut player, t0, t0 + Duration::from_secs(5));

        assert_eq!(player.phase(), Phase::Inert);
        assert_eq!(h.engine(0).inner().bound, None);
        assert_eq!(h.engine(0).inner().loads, 0);
    }

    #[test]
    fn test_start_paused_pauses_after_first_frame() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut spec = PlayerSpec::new(0, "/v/a.mp4");
        spec.paused = true;
        let player = started(&mut h, spec, t0);

        assert_eq!(player.phase(), Phase::Suspended);
        assert!(player.status().paused);
        assert!(h.engine(0).inner().paused);
    }

    #[test]
    fn test_stuck_clock_restarts_once_within_grace() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);
        let engine = h.engine(0);
        engine.inner_mut().time_ms = Some(0);

        // Checks at 1s, 2s, 3s; restart fires 300ms after the third
        run(&mut h, &mut player, t0 + ms(510), t0 + ms(3400));
        assert_eq!(engine.inner().loads, 2);
        assert_eq!(engine.inner().stops, 1);

        // Still stuck, but the grace window is open until 5.3s
        run(&mut h, &mut player, t0 + ms(3410), t0 + ms(5290));
        assert_eq!(engine.inner().loads, 2);
        assert_eq!(player.phase(), Phase::Playing);
    }

    #[test]
    fn test_loop_boundary_restart_uses_backoff() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);
        let engine = h.engine(0);
        engine.inner_mut().length_ms = Some(10_000);
        engine.inner_mut().time_ms = Some(9_900);

        run(&mut h, &mut player, t0 + ms(510), t0 + ms(1290));
        assert_eq!(engine.inner().loads, 1);
        run(&mut h, &mut player, t0 + ms(1300), t0 + ms(1310));
        assert_eq!(engine.inner().loads, 2);

        // Next restart after grace waits for a doubled backoff
        run(&mut h, &mut player, t0 + ms(1320), t0 + ms(4000));
        assert_eq!(engine.inner().loads, 2);
        run(&mut h, &mut player, t0 + ms(4010), t0 + ms(4700));
        assert_eq!(engine.inner().loads, 3);
    }

    #[test]
    fn test_suspended_restart_repauses() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut spec = PlayerSpec::new(0, "/v/a.mp4");
        spec.paused = true;
        let mut player = started(&mut h, spec, t0);
        let engine = h.engine(0);

        engine.push_event(EngineEvent::Error("decoder".to_string()));
        run(&mut h, &mut player, t0 + ms(510), t0 + ms(1000));
        assert_eq!(engine.inner().loads, 2);
        assert!(engine.inner().paused);
        assert_eq!(player.phase(), Phase::Suspended);
    }

    #[test]
    fn test_error_within_grace_restarts_when_grace_ends() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);
        let engine = h.engine(0);

        engine.push_event(EngineEvent::Error("decoder".to_string()));
        engine.inner_mut().state = EngineState::Error;
        run(&mut h, &mut player, t0 + ms(510), t0 + ms(990));
        assert_eq!(engine.inner().loads, 2);

        // Restart #1 ran at 810ms, grace lasts until 2810ms
        engine.push_event(EngineEvent::Error("decoder".to_string()));
        engine.inner_mut().state = EngineState::Error;
        run(&mut h, &mut player, t0 + ms(1000), t0 + ms(2800));
        assert_eq!(engine.inner().loads, 2);
        run(&mut h, &mut player, t0 + ms(2810), t0 + ms(3000));
        assert_eq!(engine.inner().loads, 3);
        assert_eq!(engine.inner().state, EngineState::Playing);
    }

    #[test]
    fn test_end_reached_confirmed_before_restart() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);
        let engine = h.engine(0);

        // Looped on its own: no restart
        engine.push_event(EngineEvent::EndReached);
        run(&mut h, &mut player, t0 + ms(510), t0 + ms(900));
        assert_eq!(engine.inner().loads, 1);

        engine.push_event(EngineEvent::EndReached);
        engine.inner_mut().state = EngineState::Ended;
        run(&mut h, &mut player, t0 + ms(910), t0 + ms(1500));
        assert_eq!(engine.inner().loads, 2);
    }

    #[test]
    fn test_user_pause_survives_maximized_resume() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut spec = PlayerSpec::new(0, "/v/a.mp4");
        spec.pause_on_max = true;
        let mut player = started(&mut h, spec, t0);
        let engine = h.engine(0);

        h.probe.set(Some(true));
        run(&mut h, &mut player, t0 + ms(510), t0 + ms(2600));
        assert_eq!(player.phase(), Phase::Suspended);
        assert!(engine.inner().paused);

        player.update(
            &ScreenSettings {
                paused: Some(true),
                ..Default::default()
            },
            t0 + ms(2610),
        );
        h.probe.set(Some(false));
        run(&mut h, &mut player, t0 + ms(2620), t0 + ms(4700));
        assert_eq!(player.phase(), Phase::Suspended);
        assert!(engine.inner().paused);

        player.update(
            &ScreenSettings {
                paused: Some(false),
                ..Default::default()
            },
            t0 + ms(4710),
        );
        assert_eq!(player.phase(), Phase::Playing);
        assert!(!engine.inner().paused);

        // A failed probe keeps the last answer
        h.probe.set(None);
        run(&mut h, &mut player, t0 + ms(4720), t0 + ms(6100));
        assert_eq!(player.phase(), Phase::Playing);
    }

    #[test]
    fn test_update_applies_only_changes() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut spec = PlayerSpec::new(0, "/v/a.mp4");
        spec.volume = 40;
        let mut player = started(&mut h, spec, t0);
        let engine = h.engine(0);
        let pause_calls = engine.inner().set_paused_calls;

        player.update(
            &ScreenSettings {
                volume: Some(40),
                paused: Some(false),
                speed: Some(1.0),
                pause_on_max: Some(false),
            },
            t0 + ms(600),
        );
        assert_eq!(engine.inner().set_paused_calls, pause_calls);
        assert_eq!(engine.inner().loads, 1);

        player.update(
            &ScreenSettings {
                volume: Some(250),
                speed: Some(3.0),
                ..Default::default()
            },
            t0 + ms(700),
        );
        assert_eq!(player.volume(), 100);
        assert_eq!(engine.inner().volume, 100);
        assert_eq!(player.rate(), common::HARD_MAX_RATE);
        assert_eq!(player.phase(), Phase::Playing);
        assert_eq!(engine.inner().loads, 1);
    }

    #[test]
    fn test_screen_check_rebinds_renumbered_monitor() {
        let mut h = Harness::new(vec![
            monitor(0, "DP-1", 0, 1920, 1080),
            monitor(1, "HDMI-1", 1920, 1920, 1080),
        ]);
        let t0 = Instant::now();
        let mut spec = PlayerSpec::new(1, "/v/a.mp4");
        spec.name = Some("HDMI-1".to_string());
        let mut player = started(&mut h, spec, t0);

        h.topology.set(vec![monitor(0, "HDMI-1", 0, 1920, 1080)]);
        let signals = run(&mut h, &mut player, t0 + ms(510), t0 + ms(10_600));
        assert_eq!(signals, vec![PlayerSignal::Rebound { from: 1, to: 0 }]);
        assert_eq!(player.index(), 0);
        assert_eq!(player.phase(), Phase::Playing);
        assert_eq!(h.surface(0).inner().placed.last().map(|m| m.x), Some(0));
    }

    #[test]
    fn test_monitor_missing_twice_destroys() {
        let mut h = Harness::new(vec![
            monitor(0, "DP-1", 0, 1920, 1080),
            monitor(1, "HDMI-1", 1920, 1920, 1080),
        ]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(1, "/v/a.mp4"), t0);
        assert_eq!(player.name(), Some("HDMI-1"));

        h.topology.set(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        h.native.set(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let signals = run(&mut h, &mut player, t0 + ms(510), t0 + ms(10_600));
        assert!(signals.is_empty());
        assert_eq!(player.phase(), Phase::Suspended);
        assert!(h.engine(0).inner().paused);

        let signals = run(&mut h, &mut player, t0 + ms(10_610), t0 + ms(20_600));
        assert_eq!(signals, vec![PlayerSignal::Destroyed]);
        assert!(h.surface(0).inner().closed);
    }

    #[test]
    fn test_minimized_surface_goes_idle() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);
        h.surface(0).inner_mut().visibility = Visibility::Minimized;

        run(&mut h, &mut player, t0 + ms(510), t0 + Duration::from_secs(75));
        assert_eq!(player.phase(), Phase::Suspended);

        h.surface(0).inner_mut().visibility = Visibility::Visible;
        run(&mut h, &mut player, t0 + Duration::from_secs(75), t0 + Duration::from_secs(106));
        assert_eq!(player.phase(), Phase::Playing);
    }

    #[test]
    fn test_hidden_surface_is_reshown() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);
        let shown = h.surface(0).inner().shown;
        h.surface(0).inner_mut().visibility = Visibility::Hidden;

        run(&mut h, &mut player, t0 + ms(510), t0 + ms(10_600));
        assert!(h.surface(0).inner().shown > shown);
        assert_eq!(player.phase(), Phase::Playing);
    }

    #[test]
    fn test_resume_hint_and_fade() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        let t0 = Instant::now();
        let mut spec = PlayerSpec::new(0, "/v/a.mp4");
        spec.resume_hint = Some(0.4);
        let mut player = started(&mut h, spec, t0);
        assert_eq!(h.engine(0).inner().seeks, vec![0.4]);

        let t1 = t0 + Duration::from_secs(1);
        player.begin_fade(ms(250), t1);
        assert!(h.engine(0).inner().paused);
        assert!(!player.fade_step(t1 + ms(100)));
        let opacity = h.surface(0).inner().opacity;
        assert!(opacity > 0.0 && opacity < 1.0);
        assert!(player.fade_step(t1 + ms(250)));
        assert_eq!(player.phase(), Phase::Destroyed);
        assert!(h.surface(0).inner().closed);
    }

    #[test]
    fn test_rejected_speed_falls_back_without_stopping() {
        let mut h = Harness::new(vec![monitor(0, "DP-1", 0, 1920, 1080)]);
        h.engines.max_rate(1.2);
        let t0 = Instant::now();
        let mut player = started(&mut h, PlayerSpec::new(0, "/v/a.mp4"), t0);

        player.update(
            &ScreenSettings {
                speed: Some(2.5),
                ..Default::default()
            },
            t0 + ms(600),
        );
        assert!(player.rate() <= common::SAFE_MAX_RATE);
        assert_eq!(player.rate(), h.engine(0).inner().rate);
        assert_eq!(player.status().rate, 1.2);
        assert_eq!(player.phase(), Phase::Playing);
        assert_eq!(h.engine(0).inner().stops, 0);
    }
}
