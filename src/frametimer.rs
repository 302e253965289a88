use std::thread;
use std::time::{Duration, Instant};

/// Largest timestep handed to an effect. Stalls longer than this are
/// absorbed as if only this much time had passed.
pub const MAX_TIME_STEP: f32 = 0.1;

/// Measures the time between frames and optionally logs the frame rate.
pub struct FrameTimer {
    last_tick: Option<Instant>,
    measure_fps: bool,
    last_fps_print: Instant,
    frames: u32,
}

impl FrameTimer {
    pub fn new(measure_fps: bool) -> FrameTimer {
        FrameTimer {
            last_tick: None,
            measure_fps,
            last_fps_print: Instant::now(),
            frames: 0,
        }
    }

    /// Seconds since the previous tick, clamped to [`MAX_TIME_STEP`].
    /// The first tick and a clock that went backwards both yield 0.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let delta = match self.last_tick {
            Some(last_tick) => now.saturating_duration_since(last_tick).as_secs_f32(),
            None => 0.0,
        };
        self.last_tick = Some(now);

        if self.measure_fps {
            self.update_fps(now);
        }

        delta.min(MAX_TIME_STEP)
    }

    fn update_fps(&mut self, now: Instant) {
        self.frames += 1;

        if now.saturating_duration_since(self.last_fps_print) > Duration::from_secs(1) {
            log::debug!("FPS: {}", self.frames);
            self.frames = 0;
            self.last_fps_print = now;
        }
    }
}

/// What is left of `min_time_delta` after a frame that took `time_delta`.
/// Intervals too long for a `Duration` saturate to `Duration::MAX`.
fn remaining_interval(time_delta: f32, min_time_delta: f32) -> Duration {
    let remaining = min_time_delta - time_delta;
    if !remaining.is_finite() || remaining <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f32(remaining).unwrap_or(Duration::MAX)
}

/// Sleeps for whatever is left of `min_time_delta` after a frame that took
/// `time_delta`. Returns how long it slept.
pub fn pace(time_delta: f32, min_time_delta: f32) -> Duration {
    let remaining = remaining_interval(time_delta, min_time_delta);
    if !remaining.is_zero() {
        thread::sleep(remaining);
    }
    remaining
}
