//! Per-cycle latency samples and rolling pipeline statistics.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Latency of one completed inference cycle, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceSample {
    pub preprocess_ms: f32,
    pub inference_ms: f32,
    pub postprocess_ms: f32,
    pub total_ms: f32,
}

impl PerformanceSample {
    pub fn from_durations(preprocess: Duration, inference: Duration, postprocess: Duration) -> Self {
        let ms = |d: Duration| d.as_secs_f32() * 1000.0;
        Self {
            preprocess_ms: ms(preprocess),
            inference_ms: ms(inference),
            postprocess_ms: ms(postprocess),
            total_ms: ms(preprocess + inference + postprocess),
        }
    }

    /// A sample carrying only a total, as produced by synthetic sources.
    pub fn total(total_ms: f32) -> Self {
        Self {
            total_ms,
            ..Self::default()
        }
    }
}

const FPS_HISTORY: usize = 10;

/// Completed-inference rate in one-second buckets, plus a short history.
#[derive(Debug)]
pub struct FpsCounter {
    bucket_start: Instant,
    bucket_frames: u32,
    history: VecDeque<u32>,
    current: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            bucket_start: Instant::now(),
            bucket_frames: 0,
            history: VecDeque::with_capacity(FPS_HISTORY),
            current: 0,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.bucket_frames += 1;
        if now.duration_since(self.bucket_start) >= Duration::from_secs(1) {
            self.current = self.bucket_frames;
            if self.history.len() == FPS_HISTORY {
                self.history.pop_front();
            }
            self.history.push_back(self.current);
            self.bucket_frames = 0;
            self.bucket_start = now;
        }
    }

    pub fn fps(&self) -> u32 {
        self.current
    }

    pub fn average(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<u32>() as f32 / self.history.len() as f32
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline health for logging and the control surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub fps: u32,
    pub avg_fps: f32,
    pub latency_ms: f32,
    pub last_sample: PerformanceSample,
    pub downsample: f32,
    pub frame_skip: u32,
    pub dropped_frames: u64,
    pub failed_frames: u64,
    pub inference_resolution: Option<(u32, u32)>,
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_buckets_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new();
        for i in 0..30 {
            counter.tick_at(start + Duration::from_millis(i * 10));
        }
        assert_eq!(counter.fps(), 0);
        counter.tick_at(start + Duration::from_millis(1001));
        assert_eq!(counter.fps(), 31);
        assert_eq!(counter.average(), 31.0);
    }

    #[test]
    fn sample_total_sums_stages() {
        let sample = PerformanceSample::from_durations(
            Duration::from_millis(2),
            Duration::from_millis(20),
            Duration::from_millis(3),
        );
        assert!((sample.total_ms - 25.0).abs() < 1e-3);
    }
}
