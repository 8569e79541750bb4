//! GNOME Shell scripting over the session bus.

use anyhow::{Context, Result};

const SHELL_DEST: &str = "org.gnome.Shell";
const SHELL_PATH: &str = "/org/gnome/Shell";

/// Whether the current desktop is GNOME.
pub fn is_gnome_session() -> bool {
    std::env::var("XDG_CURRENT_DESKTOP")
        .map(|d| d.to_uppercase().contains("GNOME"))
        .unwrap_or(false)
}

/// Blocking handle on `org.gnome.Shell.Eval`.
pub struct GnomeShell {
    conn: zbus::blocking::Connection,
}

impl GnomeShell {
    pub fn connect() -> Result<Self> {
        let conn = zbus::blocking::Connection::session().context("Failed to connect to session bus")?;
        Ok(Self { conn })
    }

    /// Evaluate `script` in the shell and return its stringified result.
    ///
    /// Fails when the shell refuses (Eval is disabled outside unsafe mode on
    /// recent releases).
    pub fn eval(&self, script: &str) -> Result<String> {
        let reply = self
            .conn
            .call_method(
                Some(SHELL_DEST),
                SHELL_PATH,
                Some(SHELL_DEST),
                "Eval",
                &(script,),
            )
            .context("Shell Eval call failed")?;
        let (ok, value): (bool, String) = reply
            .body()
            .deserialize()
            .context("Unexpected Eval reply")?;
        if !ok {
            anyhow::bail!("Shell refused script: {}", value);
        }
        Ok(value)
    }
}
