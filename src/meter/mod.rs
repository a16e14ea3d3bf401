//! Meter reading driver
//!
//! [`MeterOcr`] runs one read cycle per call: load the image, rotate,
//! calibrate, let every recognizer add its results, then emit readings.
//! Nothing but the configuration survives between cycles.

mod readings;

pub use readings::{RawReadings, Reading};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use tracing::{debug, error, info, warn};

use crate::config::MeterConfig;
use crate::error::Result;
use crate::vision::{debug_path, rotate, CalibrationWindow, DebugFrames, EngineProvider, Offset, Recognizer};

const WINDOW_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const ANCHOR_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);

/// Reads numeric values off a meter photo
pub struct MeterOcr {
    file: PathBuf,
    rotate: f64,
    debug: bool,
    window: Option<CalibrationWindow>,
    recognizers: Vec<Box<dyn Recognizer>>,
}

impl MeterOcr {
    /// Build from configuration, driving the tesseract program each
    /// recognizer names
    pub fn new(config: &MeterConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build from configuration with every tesseract recognizer using
    /// `provider` for its engines
    pub fn with_provider(config: &MeterConfig, provider: Arc<dyn EngineProvider>) -> Result<Self> {
        Self::build(config, Some(provider))
    }

    fn build(config: &MeterConfig, provider: Option<Arc<dyn EngineProvider>>) -> Result<Self> {
        let file = config.image_file()?.to_path_buf();
        let recognizers = config
            .recognizers()?
            .iter()
            .map(|r| r.build(provider.clone()))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "meter ocr: file {:?}, rotate {}, {} recognizers",
            file,
            config.rotate,
            recognizers.len()
        );

        Ok(Self {
            file,
            rotate: config.rotate,
            debug: config.debug,
            window: config.calibration_window(),
            recognizers,
        })
    }

    pub fn recognizers(&self) -> &[Box<dyn Recognizer>] {
        &self.recognizers
    }

    /// Check once that the image file can be opened. Every cycle opens it
    /// again, so this only catches obvious mistakes early.
    pub fn open(&self) -> Result<()> {
        std::fs::File::open(&self.file).map_err(|e| {
            error!("open({:?}): {}", self.file, e);
            e
        })?;
        Ok(())
    }

    /// Run one cycle and return at most `max_reads` readings.
    ///
    /// Only engine initialization failures are errors; anything else
    /// degrades the result and is logged.
    pub fn read(&self, max_reads: usize) -> Result<Vec<Reading>> {
        if max_reads < 1 {
            return Ok(vec![]);
        }

        let source = match image::open(&self.file) {
            Ok(image) => image.to_rgba8(),
            Err(e) => {
                warn!("could not read {:?}: {}", self.file, e);
                return Ok(vec![]);
            }
        };
        let image = rotate(source, self.rotate);

        let mut frames = self.debug.then(DebugFrames::new);

        let offset = match &self.window {
            Some(window) => window.detect(&image, frames.as_mut()),
            None => Offset::default(),
        };
        if offset != Offset::default() {
            info!("autofix offset ({}, {})", offset.dx, offset.dy);
        }

        if let Some(frames) = frames.as_mut() {
            frames.push("source", self.source_overlay(&image, offset));
        }

        let mut reads = RawReadings::new();
        for recognizer in &self.recognizers {
            match recognizer.recognize(&image, offset, &mut reads, frames.as_mut()) {
                Ok(true) => {}
                Ok(false) => debug!("{}: some regions could not be read", recognizer.kind()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("{}: {}", recognizer.kind(), e),
            }
        }

        if let Some(frames) = frames {
            let path = debug_path(&self.file);
            if let Err(e) = frames.write(&path) {
                warn!("could not write {:?}: {}", path, e);
            }
        }

        let readings = reads.into_readings(max_reads, Utc::now());
        debug!("cycle produced {} readings", readings.len());
        Ok(readings)
    }

    /// Source image with the autofix window and the detected anchor
    fn source_overlay(&self, image: &RgbaImage, offset: Offset) -> RgbaImage {
        let mut overlay = image.clone();
        let Some(window) = self.window.filter(|w| w.fits(image.width(), image.height())) else {
            return overlay;
        };

        // the window fits, so every coordinate below is inside the image
        let (x, y) = window.anchor();
        let r = window.range() as i32;
        let rect = imageproc::rect::Rect::at(x as i32 - r, y as i32 - r).of_size(window.size(), window.size());
        draw_hollow_rect_mut(&mut overlay, rect, WINDOW_COLOR);
        draw_cross_mut(&mut overlay, ANCHOR_COLOR, x as i32 + offset.dx, y as i32 + offset.dy);
        overlay
    }
}
