//! Frame coalescing and FPS measurement.

use std::time::{Duration, Instant};

/// Coalesces frame requests so the visible surface is composed at most once
/// per display refresh, and counts frames presented per second.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    min_interval: Duration,
    pending: bool,
    last_frame: Option<Instant>,
    window_start: Option<Instant>,
    frames_in_window: u32,
    fps: f64,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(60)
    }
}

impl FrameScheduler {
    /// Scheduler for a display refreshing `refresh_hz` times a second.
    pub fn new(refresh_hz: u32) -> Self {
        Self {
            min_interval: Duration::from_secs(1) / refresh_hz.max(1),
            pending: false,
            last_frame: None,
            window_start: None,
            frames_in_window: 0,
            fps: 0.0,
        }
    }

    /// Ask for a frame. Requests made before the next frame share it.
    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Whether a requested frame is due at `now`.
    pub fn should_present(&self, now: Instant) -> bool {
        self.pending
            && self
                .last_frame
                .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval)
    }

    /// Record that a frame was presented at `now`.
    pub fn mark_presented(&mut self, now: Instant) {
        self.pending = false;
        self.last_frame = Some(now);
        self.frames_in_window += 1;
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
            self.frames_in_window = 0;
            self.window_start = Some(now);
        }
    }

    /// Frames per second over the last completed one-second window.
    pub fn fps(&self) -> f64 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_coalesce() {
        let mut scheduler = FrameScheduler::new(60);
        let t0 = Instant::now();
        assert!(!scheduler.should_present(t0));

        scheduler.request();
        scheduler.request();
        assert!(scheduler.should_present(t0));
        scheduler.mark_presented(t0);
        assert!(!scheduler.is_pending());

        // Too soon for another frame even though one was requested.
        scheduler.request();
        assert!(!scheduler.should_present(t0 + Duration::from_millis(5)));
        assert!(scheduler.should_present(t0 + Duration::from_millis(17)));
    }

    #[test]
    fn test_fps_counts_presented_frames() {
        let mut scheduler = FrameScheduler::new(60);
        let t0 = Instant::now();
        for i in 0..=30 {
            scheduler.request();
            scheduler.mark_presented(t0 + Duration::from_millis(i * 1000 / 30));
        }
        // 31 frames counted over exactly one second.
        assert!((scheduler.fps() - 31.0).abs() < 1e-9);
    }
}
