mod sequence;

pub use sequence::ImageSequenceCapture;

use anyhow::Result;
use image::RgbaImage;

/// Trait for frame sources
pub trait CaptureSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbaImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
