mod loopback;

pub use loopback::{LoopbackOutput, NullOutput};

use anyhow::Result;
use image::RgbaImage;

/// Trait for presentation targets
pub trait OutputSink {
    /// Present one composited frame
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}
