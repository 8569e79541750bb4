//! Timeout-bounded external tool invocation.

use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// Output is captured. Only suitable for tools with small stdout, since the
/// pipe is drained after the child exits.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output> {
    let program = format!("{:?}", cmd.get_program());
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return child
                .wait_with_output()
                .with_context(|| format!("Failed to collect output of {}", program));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("{} timed out after {}ms", program, timeout.as_millis());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Run `cmd` and return its stdout as text, failing on a non-zero exit.
pub fn stdout_of(cmd: &mut Command, timeout: Duration) -> Result<String> {
    let output = run_with_timeout(cmd, timeout)?;
    if !output.status.success() {
        anyhow::bail!(
            "{:?} exited with {}: {}",
            cmd.get_program(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
