use super::OutputSink;
use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes packed YUYV frames to a v4l2loopback device (or any file).
pub struct LoopbackOutput {
    file: File,
    width: u32,
    height: u32,
    yuyv: Vec<u8>,
}

impl LoopbackOutput {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening loopback output at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // v4l2loopback accepts raw frames written to the device node
        let file = File::options()
            .write(true)
            .create(!path.starts_with("/dev"))
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open output at {}", path.display()))?;

        Ok(Self {
            file,
            width,
            height,
            yuyv: Vec::with_capacity(width as usize * height as usize * 2),
        })
    }
}

/// Packs RGBA into YUYV 4:2:2, chroma averaged over each horizontal pair.
pub fn rgba_to_yuyv(frame: &RgbaImage, out: &mut Vec<u8>) {
    let (width, height) = frame.dimensions();
    out.clear();

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let p0 = frame.get_pixel(x, y);
            let p1 = if x + 1 < width {
                frame.get_pixel(x + 1, y)
            } else {
                p0
            };

            let (y0, u0, v0) = rgb_to_yuv(p0[0], p0[1], p0[2]);
            let (y1, u1, v1) = rgb_to_yuv(p1[0], p1[1], p1[2]);

            out.extend_from_slice(&[y0, average(u0, u1), y1, average(v0, v1)]);
        }
    }
}

fn average(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) / 2) as u8
}

/// BT.601 full range
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;

    let q = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    (q(y), q(u), q(v))
}

impl OutputSink for LoopbackOutput {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let _span = tracing::debug_span!("output").entered();

        if frame.dimensions() == (self.width, self.height) {
            rgba_to_yuyv(frame, &mut self.yuyv);
        } else {
            let scaled = imageops::resize(
                frame,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
            rgba_to_yuyv(&scaled, &mut self.yuyv);
        }

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to loopback output")?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Discards frames. Useful for benchmarking the pipeline alone.
pub struct NullOutput {
    width: u32,
    height: u32,
}

impl NullOutput {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl OutputSink for NullOutput {
    fn write_frame(&mut self, _frame: &RgbaImage) -> Result<()> {
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
