use super::Service;
use crate::log_and_continue;
use crate::player::{Player, PlayerSpec};
use crate::store::MonitorConfigEntry;
use common::{Command, Response, ScreenSettings, ServiceStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Main command handler dispatcher
pub(super) fn handle_command(service: &mut Service, cmd: Command, now: Instant) -> Response {
    match cmd {
        Command::Play {
            video_path,
            screen,
            pause_on_max,
            volume,
            paused,
        } => {
            let spec = PlayerSpec {
                volume,
                pause_on_max,
                paused,
                ..PlayerSpec::new(screen, PathBuf::from(video_path))
            };
            play(service, spec, true, now)
        }
        Command::Stop { screen } => stop(service, screen),
        Command::Update {
            screen,
            per_screen,
            volume,
            paused,
            pause_on_max,
            speed,
        } => {
            let settings = ScreenSettings {
                volume,
                paused,
                pause_on_max,
                speed,
            };
            update(service, screen, per_screen, settings, now)
        }
        Command::Status => Response::Status(status(service, now)),
        Command::Ping => Response::Pong,
        Command::Quit => {
            log::info!("Quit requested");
            service.shutdown();
            Response::Ok
        }
    }
}

/// Start a player, replacing (with a fade) whatever runs on that screen.
///
/// `persist` is false for autoload, which replays entries already stored.
pub(super) fn play(
    service: &mut Service,
    mut spec: PlayerSpec,
    persist: bool,
    now: Instant,
) -> Response {
    let index = spec.index;
    if !spec.video_path.is_file() {
        log::warn!(
            "Screen {}: video {} does not exist, play dropped",
            index,
            spec.video_path.display()
        );
        return Response::Dropped(format!(
            "video not found: {}",
            spec.video_path.display()
        ));
    }

    if spec.name.is_none() {
        spec.name = service
            .inventory
            .monitors(now)
            .into_iter()
            .find(|m| m.index == index)
            .map(|m| m.name);
    }
    if persist && let Some(stored) = service.store.find(index, spec.name.as_deref()) {
        spec.speed = stored.speed;
    }

    let mut start_at = None;
    if let Some(mut previous) = service.players.remove(&index) {
        let fade = Duration::from_millis(service.config.player.fade_out_ms);
        spec.resume_hint = previous.position();
        log::info!(
            "Screen {}: replacing {}",
            index,
            previous.video_path().display()
        );
        previous.begin_fade(fade, now);
        service.fades.push(previous);
        start_at = Some(now + fade);
    }

    let mut player = match Player::new(spec, &service.backends, service.config.player.clone(), now)
    {
        Ok(player) => player,
        Err(e) => {
            log::error!("Screen {}: failed to create player: {:#}", index, e);
            return Response::Dropped(format!("player not created: {}", e));
        }
    };
    if let Some(at) = start_at {
        player.defer_start(at);
    }

    if persist {
        log_and_continue!(service.store.upsert(entry_for(&player)), "persist monitor entry");
    }

    service.players.insert(index, player);
    service.select_mirror_source(index, now);
    Response::Ok
}

fn stop(service: &mut Service, screen: usize) -> Response {
    let Some(mut player) = service.players.remove(&screen) else {
        log::info!("Screen {}: no player, stop dropped", screen);
        return Response::Dropped(format!("no player on screen {}", screen));
    };

    let name = player.name().map(str::to_string);
    player.destroy();
    match service.store.disable(screen, name.as_deref()) {
        Ok(true) => log::info!("Screen {}: entry disabled", screen),
        Ok(false) => log::debug!("Screen {}: no enabled entry to disable", screen),
        Err(e) => log::error!("Failed to disable monitor entry: {:#}", e),
    }
    service.release_mirror(screen);
    Response::Ok
}

fn update(
    service: &mut Service,
    screen: Option<i64>,
    per_screen: Option<BTreeMap<String, ScreenSettings>>,
    settings: ScreenSettings,
    now: Instant,
) -> Response {
    let targets: Vec<(usize, ScreenSettings)> = match per_screen {
        Some(map) => map
            .into_iter()
            .filter_map(|(key, mut entry)| {
                let Ok(index) = key.trim().parse::<usize>() else {
                    log::warn!("Ignoring per-screen settings for {:?}", key);
                    return None;
                };
                if settings.pause_on_max.is_some() {
                    entry.pause_on_max = settings.pause_on_max;
                }
                Some((index, entry))
            })
            .collect(),
        None => match screen.unwrap_or(0) {
            -1 => service
                .players
                .keys()
                .map(|&index| (index, settings.clone()))
                .collect(),
            index if index >= 0 => vec![(index as usize, settings)],
            index => {
                log::warn!("Invalid screen {} in update", index);
                return Response::Dropped(format!("invalid screen {}", index));
            }
        },
    };

    let mut applied = 0;
    for (index, settings) in targets {
        if settings.is_empty() {
            continue;
        }
        let Some(player) = service.players.get_mut(&index) else {
            log::info!("Screen {}: no player, update dropped", index);
            continue;
        };
        player.update(&settings, now);
        applied += 1;

        match service.store.upsert(entry_for(player)) {
            Ok(true) => log::debug!("Screen {}: settings persisted", index),
            Ok(false) => {}
            Err(e) => log::error!("Failed to persist monitor entry: {:#}", e),
        }
    }

    if applied == 0 {
        Response::Dropped("no matching player".to_string())
    } else {
        Response::Ok
    }
}

fn status(service: &Service, now: Instant) -> ServiceStatus {
    let status = ServiceStatus {
        service: "alive".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: now.saturating_duration_since(service.started).as_secs(),
        players_count: service.players.len(),
        players: service.players.values().map(Player::status).collect(),
    };

    log::info!(
        "Status: {} player(s), up {}s",
        status.players_count,
        status.uptime_secs
    );
    for player in &status.players {
        log::info!(
            "  screen {} ({}): {} [{}] volume {} rate {:.2}",
            player.screen_index,
            player.screen_name.as_deref().unwrap_or("?"),
            player.video_path,
            player.phase,
            player.volume,
            player.rate
        );
    }
    status
}

/// The durable form of a player's current settings.
fn entry_for(player: &Player) -> MonitorConfigEntry {
    MonitorConfigEntry {
        volume: player.volume(),
        pause_on_max: player.pause_on_max(),
        paused: player.user_paused(),
        speed: player.rate(),
        ..MonitorConfigEntry::new(
            player.index(),
            player.name().map(str::to_string),
            player.video_path().display().to_string(),
        )
    }
}
