use super::{Service, ServiceTimer, commands};
use crate::monitors::{MonitorDescriptor, layout_hash};
use crate::player::{PlayerSignal, PlayerSpec};
use crate::store::MonitorConfigEntry;
use common::Response;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Compare the current topology with the last one seen and reconcile on change.
pub(super) fn poll(service: &mut Service, now: Instant) {
    let monitors = service.inventory.monitors(now);
    if monitors.is_empty() {
        log::debug!("Topology poll saw no monitors, skipping");
        return;
    }

    let hash = layout_hash(&monitors);
    match service.layout_hash.replace(hash) {
        Some(previous) if previous != hash => {}
        _ => return,
    }

    let monitors = service.inventory.force_refresh(now);
    let names: Vec<&str> = monitors.iter().map(|m| m.name.as_str()).collect();
    log::info!("Monitor topology changed: {}", names.join(", "));

    reconcile(service, &monitors, now);
    service.timers.schedule_once(
        ServiceTimer::Autoload,
        now + Duration::from_millis(service.config.topology.autoload_delay_ms),
    );
}

/// Destroy players whose monitor is gone and follow renumbered ones.
///
/// Named players are matched by name only; unnamed ones by index.
fn reconcile(service: &mut Service, monitors: &[MonitorDescriptor], now: Instant) {
    let mut orphans = Vec::new();
    let mut moves = Vec::new();

    for (&index, player) in service.players.iter_mut() {
        let matched = match player.name() {
            Some(name) => monitors.iter().find(|m| m.name == name),
            None => monitors.iter().find(|m| m.index == index),
        };
        match matched {
            Some(monitor) => {
                if let Some(PlayerSignal::Rebound { to, .. }) = player.rebind(monitor.clone(), now)
                {
                    moves.push((index, to));
                }
            }
            None => orphans.push(index),
        }
    }

    for index in orphans {
        if let Some(mut player) = service.players.remove(&index) {
            log::info!(
                "Screen {}: monitor {} is gone, removing player",
                index,
                player.name().unwrap_or("?")
            );
            player.destroy();
            service.release_mirror(index);
        }
    }
    service.rekey(moves, now);
}

/// Start a player for every enabled entry whose monitor and file exist.
pub(super) fn autoload(service: &mut Service, now: Instant) {
    service.autoload_cycles += 1;

    let monitors = service.inventory.monitors(now);
    if service.layout_hash.is_none() && !monitors.is_empty() {
        service.layout_hash = Some(layout_hash(&monitors));
    }

    let entries: Vec<MonitorConfigEntry> = service
        .store
        .load()
        .into_iter()
        .filter(|entry| entry.enabled)
        .collect();
    if entries.is_empty() {
        log::debug!("Autoload: no enabled entries");
        return;
    }

    let targets = resolve(&entries, &monitors);

    let (mut started, mut running, mut skipped) = (0, 0, 0);
    for (entry, target) in entries.iter().zip(targets) {
        let Some(monitor) = target else {
            log::debug!(
                "Autoload: monitor {} (screen {}) not present",
                entry.screen_name.as_deref().unwrap_or("?"),
                entry.screen
            );
            skipped += 1;
            continue;
        };
        let Some(path) = entry.video_path.as_deref().map(PathBuf::from) else {
            skipped += 1;
            continue;
        };
        if !path.is_file() {
            log::warn!(
                "Autoload: {} does not exist, skipping screen {}",
                path.display(),
                monitor.index
            );
            skipped += 1;
            continue;
        }

        if let Some(existing) = service.players.get(&monitor.index)
            && existing.video_path() == path
            && existing.name().is_none_or(|name| name == monitor.name)
        {
            running += 1;
            continue;
        }

        let spec = PlayerSpec {
            name: Some(monitor.name.clone()),
            volume: entry.volume,
            pause_on_max: entry.pause_on_max,
            paused: entry.paused,
            speed: entry.speed,
            ..PlayerSpec::new(monitor.index, path)
        };
        match commands::play(service, spec, false, now) {
            Response::Ok => started += 1,
            _ => skipped += 1,
        }
    }

    log::info!(
        "Autoload: {} started, {} already running, {} skipped",
        started,
        running,
        skipped
    );
}

/// Resolve each entry to a monitor: names first, then indices, never
/// handing one monitor to two entries.
fn resolve<'a>(
    entries: &[MonitorConfigEntry],
    monitors: &'a [MonitorDescriptor],
) -> Vec<Option<&'a MonitorDescriptor>> {
    let mut claimed = HashSet::new();
    let mut targets = vec![None; entries.len()];

    for (target, entry) in targets.iter_mut().zip(entries) {
        if let Some(ref name) = entry.screen_name
            && let Some(monitor) = monitors.iter().find(|m| &m.name == name)
            && claimed.insert(monitor.index)
        {
            *target = Some(monitor);
        }
    }

    for (target, entry) in targets.iter_mut().zip(entries) {
        if target.is_some() {
            continue;
        }
        if let Some(monitor) = monitors.iter().find(|m| m.index == entry.screen)
            && claimed.insert(monitor.index)
        {
            *target = Some(monitor);
        }
    }

    targets
}
