//! Adaptive quality controller.
//!
//! A hysteretic loop over a short window of total latency: over budget it
//! coarsens the encoder (then skips more frames), comfortably under budget
//! it gives quality back one small step at a time.

use std::collections::VecDeque;

use crate::config::AdaptiveConfig;
use crate::stats::PerformanceSample;

/// Weight of the newest sample in the smoothed latency estimate.
const LATENCY_EMA_WEIGHT: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Unchanged,
    Tightened { downsample: f32, frame_skip: u32 },
    Relaxed { downsample: f32, frame_skip: u32 },
}

#[derive(Debug)]
pub struct AdaptiveController {
    config: AdaptiveConfig,
    window: VecDeque<f32>,
    downsample: f32,
    frame_skip: u32,
    calm_samples: u32,
    latency_ms: f32,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Self {
        let downsample = config
            .downsample
            .clamp(config.min_downsample, config.max_downsample);
        let frame_skip = config
            .frame_skip
            .clamp(config.min_frame_skip, config.max_frame_skip);
        Self {
            window: VecDeque::with_capacity(config.window),
            downsample,
            frame_skip,
            calm_samples: 0,
            latency_ms: config.initial_latency_ms,
            config,
        }
    }

    /// Feed one completed cycle and possibly move a knob.
    pub fn observe(&mut self, sample: &PerformanceSample) -> Adjustment {
        let total = sample.total_ms.max(0.0);
        self.latency_ms =
            (1.0 - LATENCY_EMA_WEIGHT) * self.latency_ms + LATENCY_EMA_WEIGHT * total;

        if !self.config.enabled {
            return Adjustment::Unchanged;
        }

        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(total);
        if self.window.len() < self.config.min_samples {
            return Adjustment::Unchanged;
        }

        let average = self.window.iter().sum::<f32>() / self.window.len() as f32;
        let budget = self.config.budget_ms();

        if average > budget * self.config.over_budget_margin {
            self.calm_samples = 0;
            // Decide on fresh samples only, so one slow burst moves one step.
            self.window.clear();
            return self.tighten(average, budget);
        }

        if average < budget * self.config.under_budget_margin {
            self.calm_samples += 1;
            if self.calm_samples >= self.config.relax_after {
                self.calm_samples = 0;
                return self.relax(average, budget);
            }
        } else {
            self.calm_samples = 0;
        }
        Adjustment::Unchanged
    }

    fn tighten(&mut self, average: f32, budget: f32) -> Adjustment {
        let c = &self.config;
        if self.downsample < c.max_downsample {
            self.downsample = (self.downsample + c.downsample_step_up).min(c.max_downsample);
        } else if self.frame_skip < c.max_frame_skip {
            self.frame_skip += 1;
        } else {
            tracing::debug!("Over budget ({:.1}ms > {:.1}ms) with knobs at limit", average, budget);
            return Adjustment::Unchanged;
        }

        tracing::debug!(
            "Over budget ({:.1}ms > {:.1}ms): downsample={:.2}, skip={}",
            average,
            budget,
            self.downsample,
            self.frame_skip
        );
        Adjustment::Tightened {
            downsample: self.downsample,
            frame_skip: self.frame_skip,
        }
    }

    fn relax(&mut self, average: f32, budget: f32) -> Adjustment {
        let c = &self.config;
        if self.frame_skip > c.min_frame_skip {
            self.frame_skip -= 1;
        } else if self.downsample > c.min_downsample {
            self.downsample = (self.downsample - c.downsample_step_down).max(c.min_downsample);
        } else {
            return Adjustment::Unchanged;
        }

        tracing::debug!(
            "Under budget ({:.1}ms < {:.1}ms): downsample={:.2}, skip={}",
            average,
            budget,
            self.downsample,
            self.frame_skip
        );
        Adjustment::Relaxed {
            downsample: self.downsample,
            frame_skip: self.frame_skip,
        }
    }

    /// Replace the downsample bounds, clamping the current value into them.
    pub fn set_downsample_bounds(&mut self, min: f32, max: f32) {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.config.min_downsample = min;
        self.config.max_downsample = max;
        self.downsample = self.downsample.clamp(min, max);
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.calm_samples = 0;
        self.latency_ms = self.config.initial_latency_ms;
        self.downsample = self
            .config
            .downsample
            .clamp(self.config.min_downsample, self.config.max_downsample);
        self.frame_skip = self
            .config
            .frame_skip
            .clamp(self.config.min_frame_skip, self.config.max_frame_skip);
    }

    pub fn downsample(&self) -> f32 {
        self.downsample
    }

    pub fn frame_skip(&self) -> u32 {
        self.frame_skip
    }

    /// Smoothed total latency.
    pub fn latency_ms(&self) -> f32 {
        self.latency_ms
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }
}
