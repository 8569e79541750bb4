//! Detection of a maximized window covering a player's monitor.
//!
//! Methods are tried in order until one answers:
//! 1. GNOME Shell scripting (focused window on this monitor, maximized both ways)
//! 2. EWMH properties of the active window over the X connection
//! 3. the `xprop` tool, with cached answers

use crate::cache::TtlCache;
use crate::monitors::MonitorDescriptor;
use crate::shell::GnomeShell;
use crate::x11::X11Session;
use anyhow::{Context, Result};
use std::process::Command;
use std::rc::Rc;
use std::time::{Duration, Instant};
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _};

const XPROP_TIMEOUT: Duration = Duration::from_secs(2);
const ACTIVE_WINDOW_TTL: Duration = Duration::from_secs(2);
const WINDOW_STATE_TTL: Duration = Duration::from_secs(5);
const XPROP_MAX_FAILURES: u32 = 5;
/// `Meta.MaximizeFlags.BOTH`
const SHELL_MAXIMIZED_BOTH: &str = "3";

pub trait MaximizedProbe {
    /// `None` when no method could answer.
    fn is_maximized(&mut self, monitor: &MonitorDescriptor, now: Instant) -> Option<bool>;
}

pub trait ProbeFactory {
    fn create(&self) -> Box<dyn MaximizedProbe>;
}

trait Method {
    fn name(&self) -> &'static str;
    fn query(&mut self, monitor: &MonitorDescriptor, now: Instant) -> Result<bool>;
}

/// Ordered fallback chain over the available methods.
pub struct ChainProbe {
    methods: Vec<Box<dyn Method>>,
}

impl MaximizedProbe for ChainProbe {
    fn is_maximized(&mut self, monitor: &MonitorDescriptor, now: Instant) -> Option<bool> {
        for method in &mut self.methods {
            match method.query(monitor, now) {
                Ok(maximized) => return Some(maximized),
                Err(e) => log::debug!("Maximized probe {} failed: {}", method.name(), e),
            }
        }
        None
    }
}

/// Builds a [`ChainProbe`] per player from whatever the session offers.
pub struct DesktopProbes {
    pub shell: Option<Rc<GnomeShell>>,
    pub session: Option<Rc<X11Session>>,
}

impl ProbeFactory for DesktopProbes {
    fn create(&self) -> Box<dyn MaximizedProbe> {
        let mut methods: Vec<Box<dyn Method>> = Vec::new();
        if let Some(ref shell) = self.shell {
            methods.push(Box::new(ShellMethod {
                shell: shell.clone(),
            }));
        }
        if let Some(ref session) = self.session {
            methods.push(Box::new(EwmhMethod {
                session: session.clone(),
            }));
        }
        methods.push(Box::new(XpropMethod::new()));
        Box::new(ChainProbe { methods })
    }
}

struct ShellMethod {
    shell: Rc<GnomeShell>,
}

impl Method for ShellMethod {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn query(&mut self, monitor: &MonitorDescriptor, _now: Instant) -> Result<bool> {
        let script = format!(
            "global.display.focus_window && global.display.focus_window.get_monitor() === {} \
             ? global.display.focus_window.get_maximized() : 0",
            monitor.index
        );
        let value = self.shell.eval(&script)?;
        Ok(value.trim() == SHELL_MAXIMIZED_BOTH)
    }
}

struct EwmhMethod {
    session: Rc<X11Session>,
}

impl Method for EwmhMethod {
    fn name(&self) -> &'static str {
        "ewmh"
    }

    fn query(&mut self, monitor: &MonitorDescriptor, _now: Instant) -> Result<bool> {
        let session = &self.session;
        let atoms = &session.atoms;
        let active = session
            .property_u32(session.root, atoms._NET_ACTIVE_WINDOW, AtomEnum::WINDOW)?
            .unwrap_or(0);
        if active == 0 {
            return Ok(false);
        }

        let states = session.property_atoms(active, atoms._NET_WM_STATE)?;
        if !(states.contains(&atoms._NET_WM_STATE_MAXIMIZED_VERT)
            && states.contains(&atoms._NET_WM_STATE_MAXIMIZED_HORZ))
        {
            return Ok(false);
        }

        let geometry = session.conn.get_geometry(active)?.reply()?;
        let origin = session
            .conn
            .translate_coordinates(active, session.root, 0, 0)?
            .reply()?;
        let center_x = origin.dst_x as i32 + geometry.width as i32 / 2;
        let center_y = origin.dst_y as i32 + geometry.height as i32 / 2;
        Ok(contains_point(monitor, center_x, center_y))
    }
}

fn contains_point(monitor: &MonitorDescriptor, x: i32, y: i32) -> bool {
    x >= monitor.x
        && y >= monitor.y
        && x < monitor.x + monitor.width as i32
        && y < monitor.y + monitor.height as i32
}

struct XpropMethod {
    active: TtlCache<u32>,
    state: TtlCache<(u32, bool)>,
    failures: u32,
}

impl XpropMethod {
    fn new() -> Self {
        Self {
            active: TtlCache::new(ACTIVE_WINDOW_TTL),
            state: TtlCache::new(WINDOW_STATE_TTL),
            failures: 0,
        }
    }

    fn lookup(&mut self, now: Instant) -> Result<bool> {
        let active = match self.active.fresh(now) {
            Some(&id) => id,
            None => {
                let out = crate::process::stdout_of(
                    Command::new("xprop").args(["-root", "_NET_ACTIVE_WINDOW"]),
                    XPROP_TIMEOUT,
                )?;
                let id = parse_active_window(&out).context("No active window reported")?;
                self.active.store(id, now);
                id
            }
        };
        if active == 0 {
            return Ok(false);
        }

        if let Some(&(id, maximized)) = self.state.fresh(now)
            && id == active
        {
            return Ok(maximized);
        }

        let out = crate::process::stdout_of(
            Command::new("xprop").args(["-id", &format!("0x{:x}", active), "_NET_WM_STATE"]),
            XPROP_TIMEOUT,
        )?;
        let maximized = parse_maximized(&out);
        self.state.store((active, maximized), now);
        Ok(maximized)
    }
}

impl Method for XpropMethod {
    fn name(&self) -> &'static str {
        "xprop"
    }

    fn query(&mut self, _monitor: &MonitorDescriptor, now: Instant) -> Result<bool> {
        if self.failures > XPROP_MAX_FAILURES {
            anyhow::bail!("disabled after repeated failures");
        }
        match self.lookup(now) {
            Ok(maximized) => {
                self.failures = 0;
                Ok(maximized)
            }
            Err(e) => {
                self.failures += 1;
                if self.failures > XPROP_MAX_FAILURES {
                    log::warn!("xprop failed {} times in a row, giving up on it", self.failures);
                }
                Err(e)
            }
        }
    }
}

/// `_NET_ACTIVE_WINDOW(WINDOW): window id # 0x3a00007`
fn parse_active_window(output: &str) -> Option<u32> {
    let hex = output.rsplit_once('#')?.1.trim();
    let hex = hex.split([',', ' ']).next()?;
    u32::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

/// `_NET_WM_STATE(ATOM) = _NET_WM_STATE_MAXIMIZED_VERT, _NET_WM_STATE_MAXIMIZED_HORZ`
fn parse_maximized(output: &str) -> bool {
    output.contains("_NET_WM_STATE_MAXIMIZED_VERT") && output.contains("_NET_WM_STATE_MAXIMIZED_HORZ")
}
