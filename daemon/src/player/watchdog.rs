//! Stall detection, evaluated once per watchdog interval.

use crate::engine::EngineState;

/// Distance from the media end that counts as a stalled loop boundary.
pub const END_MARGIN_MS: u64 = 150;
/// Consecutive "playing at 0ms" samples before a hard restart.
pub const STUCK_ZERO_LIMIT: u32 = 3;

/// What the watchdog saw this round.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub state: EngineState,
    pub time_ms: Option<u64>,
    pub length_ms: Option<u64>,
    /// Intentionally paused (user, maximized, idle, disappeared)
    pub suspended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Restart(StallReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    Ended,
    Errored,
    LoopBoundary,
    StuckAtZero,
}

impl std::fmt::Display for StallReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallReason::Ended => write!(f, "engine ended or stopped"),
            StallReason::Errored => write!(f, "engine stuck in error"),
            StallReason::LoopBoundary => write!(f, "stalled at loop boundary"),
            StallReason::StuckAtZero => write!(f, "clock stuck at 0ms while playing"),
        }
    }
}

/// Judge one sample. `streak` carries the stuck-at-zero count between calls.
pub fn evaluate(sample: Sample, streak: &mut u32) -> Verdict {
    if sample.suspended {
        *streak = 0;
        return Verdict::Healthy;
    }

    if matches!(sample.state, EngineState::Ended | EngineState::Stopped) {
        *streak = 0;
        return Verdict::Restart(StallReason::Ended);
    }

    if sample.state == EngineState::Error {
        *streak = 0;
        return Verdict::Restart(StallReason::Errored);
    }

    if let (Some(time), Some(length)) = (sample.time_ms, sample.length_ms)
        && length > 0
        && time + END_MARGIN_MS >= length
    {
        *streak = 0;
        return Verdict::Restart(StallReason::LoopBoundary);
    }

    if sample.state == EngineState::Playing && sample.time_ms.unwrap_or(0) == 0 {
        *streak += 1;
        if *streak >= STUCK_ZERO_LIMIT {
            *streak = 0;
            return Verdict::Restart(StallReason::StuckAtZero);
        }
        return Verdict::Healthy;
    }

    *streak = 0;
    Verdict::Healthy
}
