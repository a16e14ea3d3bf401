//! Diagnostic montage
//!
//! Pipeline stages, calibration and recognizers can append intermediate
//! images here. The driver stacks them into a single `<file>_debug.png`
//! next to the source image. Purely diagnostic, never read back.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use tracing::debug;

use crate::error::Result;

/// Gap between stacked frames, in pixels
const FRAME_GAP: u32 = 4;

/// Collected debug frames for one cycle
#[derive(Debug, Default)]
pub struct DebugFrames {
    frames: Vec<(String, RgbaImage)>,
}

impl DebugFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, title: &str, frame: RgbaImage) {
        debug!("debug frame '{}' ({}x{})", title, frame.width(), frame.height());
        self.frames.push((title.to_string(), frame));
    }

    pub fn push_gray(&mut self, title: &str, frame: &GrayImage) {
        self.push(title, DynamicImage::ImageLuma8(frame.clone()).into_rgba8());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().map(|(title, _)| title.as_str())
    }

    /// Stack all frames top to bottom on a mid-gray canvas
    pub fn compose(&self) -> Option<RgbaImage> {
        if self.frames.is_empty() {
            return None;
        }

        let width = self.frames.iter().map(|(_, f)| f.width()).max().unwrap_or(0);
        let height = self.frames.iter().map(|(_, f)| f.height()).sum::<u32>()
            + FRAME_GAP * (self.frames.len() as u32 - 1);

        let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), Rgba([128, 128, 128, 255]));
        let mut y = 0i64;
        for (_, frame) in &self.frames {
            image::imageops::overlay(&mut canvas, frame, 0, y);
            y += i64::from(frame.height() + FRAME_GAP);
        }

        Some(canvas)
    }

    /// Write the composite to `path`. Does nothing without frames.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(canvas) = self.compose() {
            canvas.save(path)?;
            debug!("wrote {} debug frames to {:?}", self.frames.len(), path);
        }
        Ok(())
    }
}

/// `<source>_debug.png` for a source image path
pub fn debug_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push("_debug.png");
    PathBuf::from(name)
}
