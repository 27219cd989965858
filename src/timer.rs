// Frame timer - delta time, FPS and run time
//
// FPS is averaged over windows of at least one second, so the number the
// demo puts in the title bar does not jitter from frame to frame.

use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
    delta: Duration,
    frame_count: u64,

    window_start: Instant,
    window_frames: u32,
    fps: f64,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            start: now,
            last_frame: now,
            delta: Duration::ZERO,
            frame_count: 0,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    /// Mark the end of a frame; returns the time since the previous one
    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Duration {
        self.delta = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;
        self.window_frames += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window >= FPS_WINDOW {
            self.fps = self.window_frames as f64 / window.as_secs_f64();
            self.window_frames = 0;
            self.window_start = now;
        }

        self.delta
    }

    /// Whether the last tick closed an FPS window
    pub fn fps_updated(&self) -> bool {
        self.window_frames == 0 && self.frame_count > 0
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Average over the last completed window; 0 until one completes
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn run_time(&self) -> Duration {
        self.last_frame.saturating_duration_since(self.start)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
