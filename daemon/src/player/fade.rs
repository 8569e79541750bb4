use std::time::{Duration, Instant};

/// Ease in-out quadratic (slow start and end, fast middle)
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}

/// Opacity ramp from 1 to 0 on a surface that is about to be replaced.
#[derive(Debug, Clone, Copy)]
pub struct FadeOut {
    duration: Duration,
    start_time: Instant,
}

impl FadeOut {
    pub fn new(duration: Duration, now: Instant) -> Self {
        Self {
            duration,
            start_time: now,
        }
    }

    fn raw_progress(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.start_time);
        if elapsed >= self.duration || self.duration.is_zero() {
            1.0
        } else {
            elapsed.as_secs_f64() / self.duration.as_secs_f64()
        }
    }

    pub fn opacity(&self, now: Instant) -> f64 {
        1.0 - ease_in_out(self.raw_progress(now))
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start_time) >= self.duration
    }
}
