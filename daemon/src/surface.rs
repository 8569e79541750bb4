//! Desktop-layer playback surfaces.
//!
//! A surface is a native window configured as a non-interactive, undecorated,
//! always-below, click-through background that the engine renders into.

use crate::monitors::MonitorDescriptor;
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    /// Unmapped by someone other than us
    Hidden,
    /// Iconified, or on a desktop that is not shown
    Minimized,
}

pub trait Surface {
    /// Native window id handed to the engine.
    fn native_handle(&self) -> u32;
    /// Move and resize to cover `monitor`.
    fn place(&mut self, monitor: &MonitorDescriptor) -> Result<()>;
    fn show(&mut self) -> Result<()>;
    /// Restack below every other window.
    fn lower(&mut self) -> Result<()>;
    /// Whether the window is mapped and viewable, i.e. safe to embed into.
    fn is_exposed(&self) -> bool;
    fn visibility(&self) -> Visibility;
    /// Window opacity in `[0, 1]`.
    fn set_opacity(&mut self, opacity: f64) -> Result<()>;
    fn close(&mut self);
}

pub trait SurfaceFactory {
    fn create(&self) -> Result<Box<dyn Surface>>;

    /// Housekeeping run once per service loop iteration.
    fn maintain(&self) {}
}

/// Factory used when no X11 display is usable.
///
/// Its surfaces never become exposed, so players stay inert instead of
/// letting the engine open a floating window of its own.
pub struct DetachedSurfaces;

impl SurfaceFactory for DetachedSurfaces {
    fn create(&self) -> Result<Box<dyn Surface>> {
        Ok(Box::new(DetachedSurface))
    }
}

struct DetachedSurface;

impl Surface for DetachedSurface {
    fn native_handle(&self) -> u32 {
        0
    }

    fn place(&mut self, _monitor: &MonitorDescriptor) -> Result<()> {
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        Ok(())
    }

    fn lower(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_exposed(&self) -> bool {
        false
    }

    fn visibility(&self) -> Visibility {
        Visibility::Hidden
    }

    fn set_opacity(&mut self, _opacity: f64) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}
