//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// Tracks per-frame delta time and a once-per-second FPS average.
#[derive(Debug)]
pub struct FrameTimer {
    last_frame: Instant,
    window_start: Instant,
    window_frames: u32,
}

impl FrameTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Marks the start of a frame and returns the seconds elapsed since
    /// the previous one.
    pub fn begin_frame(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.window_frames += 1;
        delta.as_secs_f32()
    }

    /// Average FPS over the last sampling window, reported once per
    /// second. Returns `None` until a full second has accumulated.
    pub fn fps_sample(&mut self) -> Option<f32> {
        let window = self.window_start.elapsed();
        if window < Duration::from_secs(1) {
            return None;
        }
        let fps = self.window_frames as f32 / window.as_secs_f32();
        self.window_start = Instant::now();
        self.window_frames = 0;
        Some(fps)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_non_negative_and_fps_waits_a_full_second() {
        let mut timer = FrameTimer::new();
        assert!(timer.begin_frame() >= 0.0);
        assert!(timer.fps_sample().is_none());
    }
}
