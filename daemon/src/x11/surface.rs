use super::X11Session;
use crate::monitors::MonitorDescriptor;
use crate::surface::{Surface, SurfaceFactory, Visibility};
use anyhow::{Context, Result};
use std::rc::Rc;
use x11rb::connection::Connection;
use x11rb::protocol::shape::SK;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{
    AtomEnum, ConfigureWindowAux, ConnectionExt as _, CreateWindowAux, MapState, PropMode,
    StackMode, Window, WindowClass,
};
use x11rb::wrapper::ConnectionExt as _;
use x11rb::COPY_DEPTH_FROM_PARENT;

/// ICCCM `WM_STATE` value for an iconified window.
const ICONIC_STATE: u32 = 3;
/// `_MOTIF_WM_HINTS` flags: only the decorations field is set.
const MOTIF_HINTS_DECORATIONS: u32 = 1 << 1;
/// `WM_HINTS` flags: only the input field is set.
const WM_HINTS_INPUT: u32 = 1;

pub struct X11SurfaceFactory {
    session: Rc<X11Session>,
}

impl X11SurfaceFactory {
    pub fn new(session: Rc<X11Session>) -> Result<Self> {
        session
            .conn
            .xfixes_query_version(5, 0)?
            .reply()
            .context("XFixes extension unavailable")?;
        Ok(Self { session })
    }
}

impl SurfaceFactory for X11SurfaceFactory {
    fn create(&self) -> Result<Box<dyn Surface>> {
        Ok(Box::new(X11Surface::create(self.session.clone())?))
    }

    fn maintain(&self) {
        self.session.drain_events();
    }
}

/// A `_NET_WM_WINDOW_TYPE_DESKTOP` window.
pub struct X11Surface {
    session: Rc<X11Session>,
    window: Window,
    closed: bool,
}

impl X11Surface {
    fn create(session: Rc<X11Session>) -> Result<Self> {
        let conn = &session.conn;
        let atoms = &session.atoms;
        let window = conn.generate_id()?;

        conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            session.root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            session.root_visual,
            &CreateWindowAux::new().background_pixel(session.black_pixel),
        )
        .context("Failed to create window")?;

        conn.change_property8(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            b"loopwall",
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_WINDOW_TYPE,
            AtomEnum::ATOM,
            &[atoms._NET_WM_WINDOW_TYPE_DESKTOP],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_STATE,
            AtomEnum::ATOM,
            &[
                atoms._NET_WM_STATE_BELOW,
                atoms._NET_WM_STATE_SKIP_TASKBAR,
                atoms._NET_WM_STATE_SKIP_PAGER,
                atoms._NET_WM_STATE_STICKY,
            ],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._MOTIF_WM_HINTS,
            atoms._MOTIF_WM_HINTS,
            &[MOTIF_HINTS_DECORATIONS, 0, 0, 0, 0],
        )?;
        // Never take keyboard focus
        conn.change_property32(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_HINTS,
            AtomEnum::WM_HINTS,
            &[WM_HINTS_INPUT, 0, 0, 0, 0, 0, 0, 0, 0],
        )?;

        // Empty input shape: clicks fall through to whatever is below
        let region = conn.generate_id()?;
        conn.xfixes_create_region(region, &[])?;
        conn.xfixes_set_window_shape_region(window, SK::INPUT, 0, 0, region)?;
        conn.xfixes_destroy_region(region)?;

        conn.flush()?;
        log::debug!("Created desktop surface 0x{:x}", window);

        Ok(Self {
            session,
            window,
            closed: false,
        })
    }

    fn map_state(&self) -> Option<MapState> {
        let reply = self
            .session
            .conn
            .get_window_attributes(self.window)
            .ok()?
            .reply()
            .ok()?;
        Some(reply.map_state)
    }

    fn is_iconic(&self) -> bool {
        let atoms = &self.session.atoms;
        self.session
            .property_u32(self.window, atoms.WM_STATE, AtomEnum::ANY)
            .ok()
            .flatten()
            == Some(ICONIC_STATE)
    }
}

impl Surface for X11Surface {
    fn native_handle(&self) -> u32 {
        self.window
    }

    fn place(&mut self, monitor: &MonitorDescriptor) -> Result<()> {
        let conn = &self.session.conn;
        conn.configure_window(
            self.window,
            &ConfigureWindowAux::new()
                .x(monitor.x)
                .y(monitor.y)
                .width(monitor.width.max(1))
                .height(monitor.height.max(1)),
        )?;
        conn.flush()?;
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        self.session.conn.map_window(self.window)?;
        self.session.conn.flush()?;
        Ok(())
    }

    fn lower(&mut self) -> Result<()> {
        self.session.conn.configure_window(
            self.window,
            &ConfigureWindowAux::new().stack_mode(StackMode::BELOW),
        )?;
        self.session.conn.flush()?;
        Ok(())
    }

    fn is_exposed(&self) -> bool {
        self.map_state() == Some(MapState::VIEWABLE)
    }

    fn visibility(&self) -> Visibility {
        match self.map_state() {
            Some(MapState::VIEWABLE) => {
                let atoms = &self.session.atoms;
                let hidden = self
                    .session
                    .property_atoms(self.window, atoms._NET_WM_STATE)
                    .map(|states| states.contains(&atoms._NET_WM_STATE_HIDDEN))
                    .unwrap_or(false);
                if hidden {
                    Visibility::Minimized
                } else {
                    Visibility::Visible
                }
            }
            Some(MapState::UNVIEWABLE) => Visibility::Minimized,
            _ if self.is_iconic() => Visibility::Minimized,
            _ => Visibility::Hidden,
        }
    }

    fn set_opacity(&mut self, opacity: f64) -> Result<()> {
        let value = (opacity.clamp(0.0, 1.0) * u32::MAX as f64) as u32;
        self.session.conn.change_property32(
            PropMode::REPLACE,
            self.window,
            self.session.atoms._NET_WM_WINDOW_OPACITY,
            AtomEnum::CARDINAL,
            &[value],
        )?;
        self.session.conn.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.session.conn.destroy_window(self.window);
        let _ = self.session.conn.flush();
    }
}

impl Drop for X11Surface {
    fn drop(&mut self) {
        self.close();
    }
}
