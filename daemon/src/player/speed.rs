//! Playback rate application with read-back verification.

use crate::engine::Engine;
use common::{SAFE_MAX_RATE, clamp_rate};

/// Rates closer than this are treated as equal and not re-applied.
const RATE_EPSILON: f64 = 1e-3;

/// Whether the engine's `actual` rate is too far from `target` to accept.
pub fn needs_fallback(target: f64, actual: f64) -> bool {
    (actual - target).abs() > (0.15 * target).max(0.1)
}

/// Apply `requested` and return the rate the player should report.
///
/// The request is clamped first. If the engine then plays at a rate too far
/// off, a conservative rate (at most [`SAFE_MAX_RATE`]) is applied instead
/// and whatever the engine then reports is returned. Playback is never
/// stopped.
pub fn apply(engine: &mut dyn Engine, requested: f64) -> f64 {
    let target = clamp_rate(requested);
    if (engine.rate() - target).abs() < RATE_EPSILON {
        return target;
    }

    if let Err(e) = engine.set_rate(target) {
        log::warn!("Engine rejected rate {:.2}: {}", target, e);
    }

    let actual = engine.rate();
    if !needs_fallback(target, actual) {
        return target;
    }

    let fallback = clamp_rate(target.min(SAFE_MAX_RATE));
    log::warn!(
        "Requested rate {:.2} plays at {:.2}; falling back to {:.2}",
        target,
        actual,
        fallback
    );
    if (actual - fallback).abs() >= RATE_EPSILON
        && let Err(e) = engine.set_rate(fallback)
    {
        log::warn!("Engine rejected fallback rate {:.2}: {}", fallback, e);
    }
    clamp_rate(engine.rate())
}
