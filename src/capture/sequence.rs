use super::CaptureSource;
use anyhow::{bail, Context, Result};
use image::{imageops, RgbaImage};
use std::path::{Path, PathBuf};

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// Replays still images from disk in name order, looping forever.
pub struct ImageSequenceCapture {
    paths: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl ImageSequenceCapture {
    /// `path` is either one image or a directory of images. Every frame is
    /// scaled to `width` x `height`.
    pub fn new<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(
            "Opening image sequence at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let paths = if path.is_dir() {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
            {
                let entry = entry?.path();
                if is_image(&entry) {
                    paths.push(entry);
                }
            }
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            bail!("{} does not exist", path.display());
        };

        if paths.is_empty() {
            bail!("No images found in {}", path.display());
        }
        tracing::info!("Image sequence has {} frames", paths.len());

        Ok(Self {
            paths,
            next: 0,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl CaptureSource for ImageSequenceCapture {
    fn capture_frame(&mut self) -> Result<RgbaImage> {
        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();

        let decoded = image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_rgba8();

        if decoded.dimensions() == (self.width, self.height) {
            return Ok(decoded);
        }
        Ok(imageops::resize(
            &decoded,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        ))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_image_extensions() {
        assert!(is_image(Path::new("a/frame_001.PNG")));
        assert!(is_image(Path::new("b.jpeg")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("no_extension")));
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(ImageSequenceCapture::new("/nonexistent/frames", 64, 64).is_err());
    }
}
