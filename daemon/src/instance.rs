//! Single-instance startup.
//!
//! A process first offers its command to a running service. Only if nobody
//! answers does it take the exclusive startup lock, ask once more (a service
//! may have come up while it waited), and then bind the socket itself. The
//! lock stays held for the life of the service.

use anyhow::{Context, Result};
use common::{Command, Response};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(3);

pub enum Startup {
    /// This process is the service
    Primary {
        listener: UnixListener,
        lock: Flock<File>,
    },
    /// A running service took the command
    Forwarded(Response),
}

/// Send one command to the service at `socket` and read its reply.
pub fn forward(command: &Command, socket: &Path) -> Result<Response> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("No service listening on {}", socket.display()))?;
    stream.set_read_timeout(Some(FORWARD_TIMEOUT))?;
    stream.set_write_timeout(Some(FORWARD_TIMEOUT))?;

    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    stream.write_all(line.as_bytes())?;
    stream.flush()?;

    let mut reply = String::new();
    BufReader::new(stream)
        .read_line(&mut reply)
        .context("Failed to read reply")?;
    if reply.trim().is_empty() {
        anyhow::bail!("Service closed the connection without replying");
    }
    serde_json::from_str(reply.trim()).context("Failed to parse reply")
}

/// Become the service, or hand `command` to the one already running.
pub fn acquire(command: &Command, socket: &Path, lock_path: &Path) -> Result<Startup> {
    if let Ok(response) = forward(command, socket) {
        return Ok(Startup::Forwarded(response));
    }

    if let Some(dir) = lock_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

    log::debug!("Waiting for startup lock {}", lock_path.display());
    let lock = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| anyhow::anyhow!("Failed to lock {}: {}", lock_path.display(), errno))?;

    if let Ok(response) = forward(command, socket) {
        return Ok(Startup::Forwarded(response));
    }

    // Left behind by a service that did not shut down cleanly
    if socket.exists() {
        std::fs::remove_file(socket)
            .with_context(|| format!("Failed to remove stale socket {}", socket.display()))?;
    }
    let listener = UnixListener::bind(socket)
        .with_context(|| format!("Failed to bind {}", socket.display()))?;

    Ok(Startup::Primary { listener, lock })
}
