//! Temporal stabilization of the raw alpha matte.
//!
//! Exponential blend against the previous stabilized matte, with a hard
//! reset every `reset_interval` frames and on any resolution change.

use crate::config::StabilizerConfig;
use crate::segmentation::AlphaMatte;

#[derive(Debug)]
pub struct TemporalStabilizer {
    config: StabilizerConfig,
    previous: Option<AlphaMatte>,
    frames_since_reset: u32,
}

impl TemporalStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            previous: None,
            frames_since_reset: 0,
        }
    }

    /// Blend `raw` into the running average and return the shaped result.
    ///
    /// `stabilized = a * raw + (1 - a) * previous`. On the first frame, after
    /// a dimension change, or once `reset_interval` frames have been blended,
    /// the raw matte is taken unmodified.
    pub fn apply(&mut self, raw: &AlphaMatte) -> AlphaMatte {
        let _span = tracing::debug_span!("stabilize").entered();

        let clamped = raw.data().iter().map(|v| v.clamp(0.0, 1.0));

        let blended: Vec<f32> = match &self.previous {
            Some(prev)
                if prev.dimensions() == raw.dimensions()
                    && self.frames_since_reset < self.config.reset_interval =>
            {
                let a = self.config.ema_alpha;
                self.frames_since_reset += 1;
                clamped
                    .zip(prev.data())
                    .map(|(r, p)| a * r + (1.0 - a) * p)
                    .collect()
            }
            previous => {
                if let Some(prev) = previous {
                    if prev.dimensions() != raw.dimensions() {
                        tracing::debug!(
                            "Matte size changed {:?} -> {:?}, resetting stabilizer",
                            prev.dimensions(),
                            raw.dimensions()
                        );
                    }
                }
                self.frames_since_reset = 1;
                clamped.collect()
            }
        };

        let (width, height) = raw.dimensions();
        let shaped = blended.iter().map(|v| self.shape(*v)).collect();
        self.previous = Some(AlphaMatte::from_raw_parts(width, height, blended));
        AlphaMatte::from_raw_parts(width, height, shaped)
    }

    /// Gamma, then floor/push nudging toward foreground near the threshold.
    fn shape(&self, alpha: f32) -> f32 {
        let StabilizerConfig {
            gamma, floor, push, ..
        } = self.config;
        let a = if gamma == 1.0 { alpha } else { alpha.powf(gamma) };
        if a < floor {
            0.0
        } else {
            (a + push).min(1.0)
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.frames_since_reset = 0;
    }

    /// The unshaped blend carried into the next frame.
    pub fn previous(&self) -> Option<&AlphaMatte> {
        self.previous.as_ref()
    }

    pub fn frames_since_reset(&self) -> u32 {
        self.frames_since_reset
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(alpha: f32, interval: u32) -> StabilizerConfig {
        StabilizerConfig {
            ema_alpha: alpha,
            reset_interval: interval,
            ..StabilizerConfig::default()
        }
    }

    #[test]
    fn first_frame_passes_through() {
        let mut stabilizer = TemporalStabilizer::new(config(0.7, 150));
        let raw = AlphaMatte::filled(4, 4, 0.3);
        assert_eq!(stabilizer.apply(&raw), raw);
        assert_eq!(stabilizer.frames_since_reset(), 1);
    }

    #[test]
    fn blends_with_previous() {
        let mut stabilizer = TemporalStabilizer::new(config(0.75, 150));
        stabilizer.apply(&AlphaMatte::filled(2, 2, 0.0));
        let out = stabilizer.apply(&AlphaMatte::filled(2, 2, 1.0));
        assert!(out.data().iter().all(|v| (v - 0.75).abs() < 1e-6));
    }

    #[test]
    fn dimension_change_resets() {
        let mut stabilizer = TemporalStabilizer::new(config(0.5, 150));
        stabilizer.apply(&AlphaMatte::filled(2, 2, 0.0));
        stabilizer.apply(&AlphaMatte::filled(2, 2, 0.0));
        let raw = AlphaMatte::filled(3, 2, 1.0);
        assert_eq!(stabilizer.apply(&raw), raw);
        assert_eq!(stabilizer.frames_since_reset(), 1);
    }

    #[test]
    fn edge_shaping_floor_and_push() {
        let cfg = StabilizerConfig {
            floor: 0.2,
            push: 0.1,
            ..config(1.0, 150)
        };
        let mut stabilizer = TemporalStabilizer::new(cfg);
        let raw = AlphaMatte::new(3, 1, vec![0.1, 0.5, 0.95]).unwrap();
        let out = stabilizer.apply(&raw);
        assert_eq!(out.data()[0], 0.0);
        assert!((out.data()[1] - 0.6).abs() < 1e-6);
        assert_eq!(out.data()[2], 1.0);
        // The carried state stays unshaped.
        assert_eq!(stabilizer.previous().unwrap(), &raw);
    }
}
