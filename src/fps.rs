// FPS tracking for the window title

use std::time::{Duration, Instant};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsSample {
    pub fps: f32,
    pub frame_time_ms: f32,
}

impl FpsSample {
    pub fn title(&self, base: &str, fullscreen: bool) -> String {
        let mode = if fullscreen { "fullscreen" } else { "windowed" };
        format!(
            "{} - {:.0} FPS ({:.2}ms) [{}]",
            base, self.fps, self.frame_time_ms, mode
        )
    }
}

pub struct FrameTimer {
    frame_count: u32,
    last_sample: Instant,
    last_frame: Instant,
}

impl FrameTimer {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_sample: now,
            last_frame: now,
        }
    }

    /// Count a rendered frame; yields a sample at most once per second
    pub fn tick(&mut self, now: Instant) -> Option<FpsSample> {
        let frame_time = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_sample);
        if elapsed < SAMPLE_INTERVAL {
            return None;
        }

        let sample = FpsSample {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_time_ms: frame_time.as_secs_f32() * 1000.0,
        };

        self.frame_count = 0;
        self.last_sample = now;

        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sample_before_a_second() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);

        for i in 1..10 {
            assert!(timer.tick(start + Duration::from_millis(i * 100)).is_none());
        }
    }

    #[test]
    fn sixty_frames_in_a_second() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);
        let step = Duration::from_micros(1_000_000 / 60);

        let mut sample = None;
        for i in 1..=61 {
            if let Some(s) = timer.tick(start + step * i) {
                sample = Some(s);
                break;
            }
        }

        let sample = sample.expect("a sample after one second");
        assert!((sample.fps - 60.0).abs() < 1.0, "fps was {}", sample.fps);
        assert!((sample.frame_time_ms - 16.67).abs() < 0.1);
    }

    #[test]
    fn count_resets_after_sample() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);

        assert!(timer.tick(start + Duration::from_secs(1)).is_some());
        assert!(timer.tick(start + Duration::from_millis(1500)).is_none());

        let second = timer.tick(start + Duration::from_secs(2)).unwrap();
        assert!((second.fps - 2.0).abs() < 0.01);
    }

    #[test]
    fn title_format() {
        let sample = FpsSample {
            fps: 144.4,
            frame_time_ms: 6.9251,
        };
        assert_eq!(
            sample.title("voxel-renderer", false),
            "voxel-renderer - 144 FPS (6.93ms) [windowed]"
        );
        assert!(sample.title("x", true).ends_with("[fullscreen]"));
    }
}
