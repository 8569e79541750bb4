//! The background service.
//!
//! One [`Service`] owns every player, the monitor inventory, the config store
//! and the optional background mirror. It runs on a single blocking thread:
//! IPC tasks hand it `(Command, reply)` pairs over a channel and the loop
//! interleaves those with player and topology timers.
//!
//! - commands: IPC command handlers (play, stop, update, status)
//! - topology: topology polling, orphan cleanup and autoload

mod commands;
mod topology;

use crate::config::Config;
use crate::mirror::{FrameSource, Mirror};
use crate::monitors::MonitorInventory;
use crate::player::{Backends, Player, PlayerSignal};
use crate::store::ConfigStore;
use crate::timers::Timers;
use anyhow::Result;
use common::{Command, Response};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Loop period while a surface is fading out
const FADE_FRAME: Duration = Duration::from_millis(16);
const MIN_SLEEP: Duration = Duration::from_millis(5);
const MAX_SLEEP: Duration = Duration::from_millis(250);

/// A command from an IPC connection, with the channel its reply goes to.
#[derive(Debug)]
pub struct ServiceRequest {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Response>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ServiceTimer {
    TopologyPoll,
    Autoload,
}

pub struct Service {
    config: Config,
    backends: Backends,
    inventory: MonitorInventory,
    store: ConfigStore,
    /// At most one player per monitor index
    players: BTreeMap<usize, Player>,
    /// Replaced players fading out
    fades: Vec<Player>,
    mirror: Option<Mirror>,
    timers: Timers<ServiceTimer>,
    layout_hash: Option<u64>,
    autoload_cycles: u64,
    started: Instant,
    should_exit: bool,
}

impl Service {
    pub fn new(
        config: Config,
        backends: Backends,
        inventory: MonitorInventory,
        store: ConfigStore,
        mirror: Option<Mirror>,
        now: Instant,
    ) -> Self {
        let mut timers = Timers::new();
        timers.schedule(ServiceTimer::Autoload, now);
        timers.schedule(
            ServiceTimer::TopologyPoll,
            now + Duration::from_millis(config.topology.poll_interval_ms),
        );

        log::info!(
            "Service ready (engine: {}, store: {})",
            backends.engines.backend(),
            store.path().display()
        );

        Self {
            config,
            backends,
            inventory,
            store,
            players: BTreeMap::new(),
            fades: Vec::new(),
            mirror,
            timers,
            layout_hash: None,
            autoload_cycles: 0,
            started: now,
            should_exit: false,
        }
    }

    /// Run until a quit command or `shutdown` is raised.
    pub fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ServiceRequest>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        log::info!("Service loop started");

        loop {
            while let Ok(request) = rx.try_recv() {
                let response = self.dispatch(request.command, Instant::now());
                if let Some(reply) = request.reply {
                    // The client may already be gone
                    let _ = reply.send(response);
                }
            }

            if shutdown.load(Ordering::SeqCst) {
                self.shutdown();
            }

            self.tick(Instant::now());

            if self.should_exit() {
                log::info!("Exiting service loop");
                break;
            }

            std::thread::sleep(self.next_wakeup(Instant::now()));
        }

        Ok(())
    }

    pub fn dispatch(&mut self, command: Command, now: Instant) -> Response {
        commands::handle_command(self, command, now)
    }

    /// Advance every timer, player, fade and the mirror to `now`.
    pub fn tick(&mut self, now: Instant) {
        if self.should_exit {
            return;
        }
        self.backends.surfaces.maintain();

        for timer in self.timers.take_due(now) {
            match timer {
                ServiceTimer::TopologyPoll => {
                    topology::poll(self, now);
                    self.timers.schedule(
                        ServiceTimer::TopologyPoll,
                        now + Duration::from_millis(self.config.topology.poll_interval_ms),
                    );
                }
                ServiceTimer::Autoload => topology::autoload(self, now),
            }
        }

        let mut destroyed = Vec::new();
        let mut moves = Vec::new();
        for (&index, player) in self.players.iter_mut() {
            match player.tick(&mut self.inventory, now) {
                Some(PlayerSignal::Destroyed) => destroyed.push(index),
                Some(PlayerSignal::Rebound { to, .. }) => moves.push((index, to)),
                None => {}
            }
        }
        for index in destroyed {
            self.players.remove(&index);
            self.release_mirror(index);
        }
        self.rekey(moves, now);

        self.fades.retain_mut(|player| !player.fade_step(now));

        if let Some(mirror) = self.mirror.as_mut() {
            let frame = mirror
                .source()
                .and_then(|index| self.players.get(&index))
                .map(|player| FrameSource {
                    video_path: player.video_path(),
                    time_ms: player.time_ms(),
                    suspended: player.is_suspended(),
                });
            mirror.tick(frame, now);
        }
    }

    /// How long the loop may sleep before something is due.
    pub fn next_wakeup(&self, now: Instant) -> Duration {
        if !self.fades.is_empty() {
            return FADE_FRAME;
        }

        let next = self
            .players
            .values()
            .map(Player::next_deadline)
            .chain([
                self.timers.next_deadline(),
                self.mirror.as_ref().and_then(Mirror::next_deadline),
            ])
            .flatten()
            .min();

        next.map_or(MAX_SLEEP, |at| at.saturating_duration_since(now))
            .clamp(MIN_SLEEP, MAX_SLEEP)
    }

    /// Stop the mirror and every player; the loop exits afterwards.
    pub fn shutdown(&mut self) {
        if self.should_exit {
            return;
        }
        log::info!("Shutting down ({} player(s))", self.players.len());

        if let Some(mirror) = self.mirror.as_mut() {
            mirror.stop();
        }
        for (_, mut player) in std::mem::take(&mut self.players) {
            player.destroy();
        }
        for mut player in self.fades.drain(..) {
            player.destroy();
        }
        self.timers.clear();
        self.should_exit = true;
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Move players to the indices their monitors were renumbered to.
    ///
    /// All movers are taken out first so chains like 1→0, 0→1 resolve; a
    /// player left on a target index is displaced and destroyed.
    fn rekey(&mut self, moves: Vec<(usize, usize)>, now: Instant) {
        if moves.is_empty() {
            return;
        }

        let moved: Vec<(usize, usize, Player)> = moves
            .into_iter()
            .filter_map(|(from, to)| self.players.remove(&from).map(|p| (from, to, p)))
            .collect();

        for (from, to, player) in moved {
            if let Some(mut displaced) = self.players.insert(to, player) {
                log::warn!("Screen {}: player displaced by a renumbered monitor", to);
                displaced.destroy();
            }
            if let Some(mirror) = self.mirror.as_mut()
                && mirror.source() == Some(from)
            {
                mirror.set_source(to, now);
            }
        }
    }

    /// Stop mirroring if `index` was the source.
    fn release_mirror(&mut self, index: usize) {
        if let Some(mirror) = self.mirror.as_mut()
            && mirror.source() == Some(index)
        {
            mirror.stop();
        }
    }

    fn select_mirror_source(&mut self, index: usize, now: Instant) {
        let source = if self.players.contains_key(&0) {
            0
        } else {
            index
        };
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.set_source(source, now);
        }
    }
}
