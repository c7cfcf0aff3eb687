//! Frames travelling from capture to the inference stage.

use image::{imageops, RgbaImage};

use crate::error::ResourceExhaustion;

/// Owned RGBA frame with its capture sequence number.
///
/// Deliberately not `Clone`: a frame is handed by value from capture to the
/// scheduler to the worker, and returned to the pool after consumption.
#[derive(Debug)]
pub struct Frame {
    seq: u64,
    image: RgbaImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbaImage) -> Self {
        Self { seq, image }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Recycles frame buffers of identical dimensions across cycles.
#[derive(Debug)]
pub struct FramePool {
    dimensions: (u32, u32),
    free: Vec<Vec<u8>>,
    max_free: usize,
}

impl FramePool {
    pub fn new(max_free: usize) -> Self {
        Self {
            dimensions: (0, 0),
            free: Vec::new(),
            max_free,
        }
    }

    /// Returns a buffer of `width * height * 4` bytes, reused when possible.
    pub fn acquire(&mut self, width: u32, height: u32) -> Result<Vec<u8>, ResourceExhaustion> {
        if self.dimensions != (width, height) {
            self.free.clear();
            self.dimensions = (width, height);
        }

        let len = width as usize * height as usize * 4;
        if let Some(buffer) = self.free.pop() {
            return Ok(buffer);
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| ResourceExhaustion { bytes: len })?;
        buffer.resize(len, 0);
        Ok(buffer)
    }

    /// Hands a consumed frame's buffer back for reuse.
    pub fn release(&mut self, frame: Frame) {
        if frame.dimensions() != self.dimensions || self.free.len() >= self.max_free {
            return;
        }
        self.free.push(frame.into_image().into_raw());
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Inference dimensions for a source frame: the short side is scaled to
/// `target_short_side` (never upscaled past the source) keeping the aspect
/// ratio, then both sides are aligned down to `block`, minimum one block.
pub fn inference_size(width: u32, height: u32, target_short_side: u32, block: u32) -> (u32, u32) {
    let block = block.max(1);
    let short = width.min(height).max(1);
    let target = target_short_side.min(short).max(1) as f32;
    let aspect = width as f32 / height.max(1) as f32;

    let (w, h) = if width <= height {
        (target, (target / aspect).round())
    } else {
        ((target * aspect).round(), target)
    };

    let align = |value: f32| ((value as u32 / block) * block).max(block);
    (align(w), align(h))
}

/// Downscales a captured image into a pooled frame at inference size.
pub fn scale_for_inference(
    source: &RgbaImage,
    size: (u32, u32),
    seq: u64,
    pool: &mut FramePool,
) -> Result<Frame, ResourceExhaustion> {
    let _span = tracing::debug_span!("scale", w = size.0, h = size.1).entered();

    let (width, height) = size;
    let mut buffer = pool.acquire(width, height)?;
    if source.dimensions() == size {
        buffer.copy_from_slice(source.as_raw());
    } else {
        let scaled = imageops::resize(source, width, height, imageops::FilterType::Triangle);
        buffer.copy_from_slice(scaled.as_raw());
    }
    let bytes = buffer.len();
    let image = RgbaImage::from_raw(width, height, buffer).ok_or(ResourceExhaustion { bytes })?;
    Ok(Frame::new(seq, image))
}
