//! Monitor inventory.
//!
//! The authoritative list comes from `xrandr --listmonitors` (it sees every
//! XWayland output), cached for a few seconds to bound subprocess cost. When
//! that fails or reports nothing, the native RandR monitor list is used.

use crate::cache::TtlCache;
use anyhow::Result;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::process::Command;
use std::time::{Duration, Instant};

const XRANDR_TIMEOUT: Duration = Duration::from_secs(2);

/// One active monitor at the time of the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorDescriptor {
    pub index: usize,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl MonitorDescriptor {
    /// Whether the size differs from `other` by more than `threshold` pixels
    /// on either axis.
    pub fn size_differs(&self, other: &Self, threshold: u32) -> bool {
        self.width.abs_diff(other.width) > threshold || self.height.abs_diff(other.height) > threshold
    }
}

/// A way of listing the active monitors.
pub trait TopologySource {
    fn name(&self) -> &'static str;
    fn query(&self) -> Result<Vec<MonitorDescriptor>>;
}

/// `xrandr --listmonitors`
pub struct XrandrSource;

impl TopologySource for XrandrSource {
    fn name(&self) -> &'static str {
        "xrandr"
    }

    fn query(&self) -> Result<Vec<MonitorDescriptor>> {
        let out = crate::process::stdout_of(
            Command::new("xrandr").arg("--listmonitors"),
            XRANDR_TIMEOUT,
        )?;
        Ok(parse_listmonitors(&out))
    }
}

/// Parse `xrandr --listmonitors` output.
///
/// ```text
/// Monitors: 2
///  0: +*DP-1 2560/597x1440/336+0+0  DP-1
///  1: +HDMI-1 1920/527x1080/296+2560+0  HDMI-1
/// ```
///
/// Indices follow line order; the name is the last token.
pub fn parse_listmonitors(output: &str) -> Vec<MonitorDescriptor> {
    let mut monitors = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.to_lowercase().starts_with("monitors:") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || !parts[0].ends_with(':') {
            continue;
        }
        let Some((width, height, x, y)) = parts.iter().find_map(|p| parse_geometry(p)) else {
            continue;
        };
        let Some(name) = parts.last() else {
            continue;
        };

        monitors.push(MonitorDescriptor {
            index: monitors.len(),
            name: name.to_string(),
            x,
            y,
            width,
            height,
        });
    }

    monitors
}

/// `W/mmxH/mm+X+Y`
fn parse_geometry(token: &str) -> Option<(u32, u32, i32, i32)> {
    let (width_part, rest) = token.split_once('x')?;
    let width = width_part.split_once('/')?.0.parse().ok()?;

    let (height_part, offsets) = rest.split_once('+')?;
    let height = height_part.split_once('/')?.0.parse().ok()?;

    // Offsets may be negative: "+-1920+0"
    let (x, y) = offsets.split_once('+')?;
    Some((width, height, x.parse().ok()?, y.parse().ok()?))
}

/// Choose between the authoritative list and the native one when placing a
/// surface.
///
/// Some compositors under-report monitors on one channel, so whichever source
/// sees more than one monitor wins when the other sees one or none.
pub fn choose_layout<'a>(
    authoritative: &'a [MonitorDescriptor],
    native: &'a [MonitorDescriptor],
) -> &'a [MonitorDescriptor] {
    if authoritative.len() > 1 && native.len() <= 1 {
        authoritative
    } else if native.len() > 1 && authoritative.len() <= 1 {
        native
    } else if authoritative.is_empty() {
        native
    } else {
        authoritative
    }
}

/// Hash of the sorted `(name, x, y, w, h)` tuples. Equal hashes mean an
/// unchanged topology.
pub fn layout_hash(monitors: &[MonitorDescriptor]) -> u64 {
    let mut tuples: Vec<(&str, i32, i32, u32, u32)> = monitors
        .iter()
        .map(|m| (m.name.as_str(), m.x, m.y, m.width, m.height))
        .collect();
    tuples.sort();

    let mut hasher = DefaultHasher::new();
    tuples.hash(&mut hasher);
    hasher.finish()
}

/// Cached view over the two topology sources.
pub struct MonitorInventory {
    primary: Box<dyn TopologySource>,
    fallback: Box<dyn TopologySource>,
    monitors: TtlCache<Vec<MonitorDescriptor>>,
    native: TtlCache<Vec<MonitorDescriptor>>,
}

impl MonitorInventory {
    pub fn new(
        primary: Box<dyn TopologySource>,
        fallback: Box<dyn TopologySource>,
        ttl: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            monitors: TtlCache::new(ttl),
            native: TtlCache::new(ttl),
        }
    }

    /// Ordered monitor list, from cache when fresh.
    pub fn monitors(&mut self, now: Instant) -> Vec<MonitorDescriptor> {
        if let Some(cached) = self.monitors.fresh(now) {
            return cached.clone();
        }

        match self.primary.query() {
            Ok(list) if !list.is_empty() => {
                self.monitors.store(list.clone(), now);
                return list;
            }
            Ok(_) => log::debug!("{} reported no monitors", self.primary.name()),
            Err(e) => log::warn!("{} query failed: {}", self.primary.name(), e),
        }

        let native = self.native_monitors(now);
        if !native.is_empty() {
            self.monitors.store(native.clone(), now);
            return native;
        }

        // Both failed: last known good
        self.monitors.stale().cloned().unwrap_or_default()
    }

    /// Drop cached lists so the next lookup queries again.
    pub fn force_refresh(&mut self, now: Instant) -> Vec<MonitorDescriptor> {
        self.monitors.invalidate();
        self.native.invalidate();
        self.monitors(now)
    }

    /// Layout used to place a surface (see [`choose_layout`]).
    pub fn placement_layout(&mut self, now: Instant) -> Vec<MonitorDescriptor> {
        let authoritative = self.monitors(now);
        let native = self.native_monitors(now);
        choose_layout(&authoritative, &native).to_vec()
    }

    fn native_monitors(&mut self, now: Instant) -> Vec<MonitorDescriptor> {
        if let Some(cached) = self.native.fresh(now) {
            return cached.clone();
        }
        match self.fallback.query() {
            Ok(list) => {
                self.native.store(list.clone(), now);
                list
            }
            Err(e) => {
                log::warn!("{} query failed: {}", self.fallback.name(), e);
                self.native.stale().cloned().unwrap_or_default()
            }
        }
    }
}

/// Stand-in used when no display connection is available.
pub struct NoTopology;

impl TopologySource for NoTopology {
    fn name(&self) -> &'static str {
        "none"
    }

    fn query(&self) -> Result<Vec<MonitorDescriptor>> {
        anyhow::bail!("no display connection")
    }
}
