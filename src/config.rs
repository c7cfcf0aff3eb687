//! Configuration loading and validation.
//!
//! Every tunable of the pipeline lives here. The document is TOML and every
//! section is optional, so an empty file yields the defaults below.

use std::path::Path;

use serde::Deserialize;
use tracing::instrument;

use crate::error::ConfigError;

/// Fully merged configuration set.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub model: ModelConfig,
    pub stabilizer: StabilizerConfig,
    pub adaptive: AdaptiveConfig,
    pub compositor: CompositorConfig,
    pub pipeline: PipelineConfig,
}

/// Capture-time scaling applied before frames enter the scheduler.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Short side of the inference frame, in pixels.
    pub target_short_side: u32,
    /// Both inference dimensions are aligned down to a multiple of this.
    pub block_size: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_short_side: 256,
            block_size: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Payloads smaller than this are rejected before reaching the runtime.
    pub min_model_bytes: usize,
    /// Intra-op thread hint for the runtime.
    pub threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_model_bytes: 100 * 1024,
            threads: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Weight of the raw matte in the exponential blend.
    pub ema_alpha: f32,
    /// Hard reset every this many frames.
    pub reset_interval: u32,
    /// Gamma applied to the blended alpha (1.0 disables).
    pub gamma: f32,
    /// Alpha below the floor snaps to zero.
    pub floor: f32,
    /// Added to alpha at or above the floor.
    pub push: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.75,
            reset_interval: 150,
            gamma: 1.0,
            floor: 0.0,
            push: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub target_fps: f32,
    /// Rolling window of total latency samples.
    pub window: usize,
    /// Samples needed in the window before any decision.
    pub min_samples: usize,
    /// Average above `budget * over_budget_margin` tightens the knobs.
    pub over_budget_margin: f32,
    /// Average below `budget * under_budget_margin` may relax the knobs.
    pub under_budget_margin: f32,
    /// Consecutive comfortable samples required before relaxing one step.
    pub relax_after: u32,
    /// Encoder reduction factor; larger is coarser.
    pub downsample: f32,
    pub min_downsample: f32,
    pub max_downsample: f32,
    pub downsample_step_up: f32,
    pub downsample_step_down: f32,
    /// Process every Nth captured frame.
    pub frame_skip: u32,
    pub min_frame_skip: u32,
    pub max_frame_skip: u32,
    /// Seed for the smoothed latency estimate.
    pub initial_latency_ms: f32,
}

impl AdaptiveConfig {
    pub fn budget_ms(&self) -> f32 {
        1000.0 / self.target_fps
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_fps: 30.0,
            window: 5,
            min_samples: 3,
            over_budget_margin: 1.15,
            under_budget_margin: 0.7,
            relax_after: 10,
            downsample: 1.0 / 0.45,
            min_downsample: 1.5,
            max_downsample: 5.0,
            downsample_step_up: 0.5,
            downsample_step_down: 0.1,
            frame_skip: 2,
            min_frame_skip: 1,
            max_frame_skip: 4,
            initial_latency_ms: 28.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatherConfig {
    pub enabled: bool,
    /// Alpha at or below this clamps to 0.
    pub low: f32,
    /// Alpha at or above this clamps to 1.
    pub high: f32,
}

impl Default for FeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low: 0.08,
            high: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpillConfig {
    pub enabled: bool,
    /// Only pixels with alpha below this are touched.
    pub threshold: f32,
    pub strength: f32,
    pub attenuation: f32,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.8,
            strength: 0.1,
            attenuation: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositorConfig {
    pub feather: FeatherConfig,
    pub spill: SpillConfig,
    /// 3x3 Gaussian over the upscaled matte.
    pub edge_smoothing: bool,
    /// Close-then-smooth refinement at inference resolution.
    pub refine: bool,
    /// Shown while a photo background is still loading.
    pub photo_fallback: String,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            feather: FeatherConfig::default(),
            spill: SpillConfig::default(),
            edge_smoothing: true,
            refine: false,
            photo_fallback: "#2e2e2e".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Queue one frame behind the in-flight one instead of dropping it.
    pub pipelining: bool,
    /// Forces a frame skip of 1.
    pub presentation_mode: bool,
    /// Consecutive inference failures before the pipeline reports failing.
    pub max_consecutive_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipelining: true,
            presentation_mode: false,
            max_consecutive_failures: 5,
        }
    }
}

impl AppConfig {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.block_size == 0 {
            return Err(ConfigError::invalid("capture.block_size must be positive"));
        }
        if self.capture.target_short_side < self.capture.block_size {
            return Err(ConfigError::invalid(format!(
                "capture.target_short_side {} is below block size {}",
                self.capture.target_short_side, self.capture.block_size
            )));
        }

        let s = &self.stabilizer;
        if !(s.ema_alpha > 0.0 && s.ema_alpha <= 1.0) {
            return Err(ConfigError::invalid(format!(
                "stabilizer.ema_alpha {} outside (0, 1]",
                s.ema_alpha
            )));
        }
        if s.reset_interval == 0 {
            return Err(ConfigError::invalid("stabilizer.reset_interval must be positive"));
        }
        if s.gamma <= 0.0 {
            return Err(ConfigError::invalid("stabilizer.gamma must be positive"));
        }

        let a = &self.adaptive;
        if a.target_fps <= 0.0 {
            return Err(ConfigError::invalid("adaptive.target_fps must be positive"));
        }
        if a.window == 0 || a.min_samples == 0 || a.min_samples > a.window {
            return Err(ConfigError::invalid(format!(
                "adaptive.min_samples {} must be in 1..={}",
                a.min_samples, a.window
            )));
        }
        if a.min_downsample <= 0.0 || a.min_downsample > a.max_downsample {
            return Err(ConfigError::invalid(format!(
                "adaptive downsample bounds [{}, {}] are inverted",
                a.min_downsample, a.max_downsample
            )));
        }
        if a.min_frame_skip == 0 || a.min_frame_skip > a.max_frame_skip {
            return Err(ConfigError::invalid(format!(
                "adaptive frame skip bounds [{}, {}] are invalid",
                a.min_frame_skip, a.max_frame_skip
            )));
        }
        if a.under_budget_margin >= a.over_budget_margin {
            return Err(ConfigError::invalid(
                "adaptive.under_budget_margin must be below over_budget_margin",
            ));
        }

        let f = &self.compositor.feather;
        if f.low >= f.high {
            return Err(ConfigError::invalid(format!(
                "compositor.feather low {} must be below high {}",
                f.low, f.high
            )));
        }
        Ok(())
    }
}

/// Parses `#rrggbb` (leading `#` optional). Malformed input yields green.
pub fn parse_hex_color(hex: &str) -> [u8; 3] {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return [0, 255, 0];
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).unwrap_or(0);
    [channel(0), channel(2), channel(4)]
}
