use super::X11Session;
use crate::monitors::{MonitorDescriptor, TopologySource};
use anyhow::{Context, Result};
use std::rc::Rc;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::ConnectionExt as _;

/// RandR 1.5 monitor list straight from the X server.
pub struct RandrSource {
    session: Rc<X11Session>,
}

impl RandrSource {
    pub fn new(session: Rc<X11Session>) -> Self {
        Self { session }
    }
}

impl TopologySource for RandrSource {
    fn name(&self) -> &'static str {
        "randr"
    }

    fn query(&self) -> Result<Vec<MonitorDescriptor>> {
        let conn = &self.session.conn;
        conn.randr_query_version(1, 5)?
            .reply()
            .context("RandR 1.5 unavailable")?;
        let reply = conn.randr_get_monitors(self.session.root, true)?.reply()?;

        let mut monitors = Vec::with_capacity(reply.monitors.len());
        for (index, info) in reply.monitors.iter().enumerate() {
            let name = conn
                .get_atom_name(info.name)?
                .reply()
                .map(|r| String::from_utf8_lossy(&r.name).into_owned())
                .unwrap_or_else(|_| format!("monitor-{}", index));
            monitors.push(MonitorDescriptor {
                index,
                name,
                x: info.x as i32,
                y: info.y as i32,
                width: info.width as u32,
                height: info.height as u32,
            });
        }
        Ok(monitors)
    }
}
