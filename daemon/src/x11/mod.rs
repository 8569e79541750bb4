//! X11 display plumbing: one shared connection used by the desktop-layer
//! surfaces, the native RandR monitor list and window-manager queries.

mod surface;
mod topology;

pub use surface::X11SurfaceFactory;
pub use topology::RandrSource;

use anyhow::{Context, Result};
use std::rc::Rc;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, Window};
use x11rb::rust_connection::RustConnection;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_STATE,
        _NET_WM_STATE_BELOW,
        _NET_WM_STATE_SKIP_TASKBAR,
        _NET_WM_STATE_SKIP_PAGER,
        _NET_WM_STATE_STICKY,
        _NET_WM_STATE_HIDDEN,
        _NET_WM_STATE_MAXIMIZED_VERT,
        _NET_WM_STATE_MAXIMIZED_HORZ,
        _NET_WM_WINDOW_OPACITY,
        _NET_WM_NAME,
        _NET_ACTIVE_WINDOW,
        _MOTIF_WM_HINTS,
        WM_STATE,
        UTF8_STRING,
    }
}

/// Shared X connection.
pub struct X11Session {
    pub conn: RustConnection,
    pub root: Window,
    pub root_visual: u32,
    pub black_pixel: u32,
    pub atoms: Atoms,
}

impl X11Session {
    /// Connect to `$DISPLAY`.
    ///
    /// On a Wayland session this drives XWayland, unless `force_x11` is off,
    /// in which case embedding is refused.
    pub fn connect(force_x11: bool) -> Result<Rc<Self>> {
        if is_wayland_session() && !force_x11 {
            anyhow::bail!("Wayland session and X11 embedding disabled (LOOPWALL_FORCE_X11=0)");
        }

        let (conn, screen_num) = RustConnection::connect(None).context("Failed to connect to X server")?;
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .context("X server reported no screens")?;
        let (root, root_visual, black_pixel) = (screen.root, screen.root_visual, screen.black_pixel);
        let atoms = Atoms::new(&conn)?.reply().context("Failed to intern atoms")?;

        log::info!("Connected to X server (screen {})", screen_num);
        Ok(Rc::new(Self {
            conn,
            root,
            root_visual,
            black_pixel,
            atoms,
        }))
    }

    /// First 32-bit value of a window property.
    pub fn property_u32(&self, window: Window, property: u32, kind: AtomEnum) -> Result<Option<u32>> {
        let reply = self
            .conn
            .get_property(false, window, property, kind, 0, 1)?
            .reply()?;
        Ok(reply.value32().and_then(|mut values| values.next()))
    }

    /// All atoms listed in a window's ATOM property.
    pub fn property_atoms(&self, window: Window, property: u32) -> Result<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::ATOM, 0, 64)?
            .reply()?;
        Ok(reply.value32().map(|values| values.collect()).unwrap_or_default())
    }

    /// Discard queued events; nothing here consumes them.
    pub fn drain_events(&self) {
        while let Ok(Some(_)) = self.conn.poll_for_event() {}
    }
}

fn is_wayland_session() -> bool {
    std::env::var("XDG_SESSION_TYPE").is_ok_and(|t| t.eq_ignore_ascii_case("wayland"))
        || std::env::var_os("WAYLAND_DISPLAY").is_some()
}
