//! Recognizer backends
//!
//! A recognizer owns a set of regions and turns the (rotated) source image
//! into raw per-identifier results. Backends are independent of the driver;
//! a new one only has to implement [`Recognizer`].

use std::sync::{Arc, OnceLock};

use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{MeterError, Result};
use crate::meter::RawReadings;

use super::calibration::Offset;
use super::debug::DebugFrames;
use super::ocr::{EngineProvider, EngineSettings, Segmentation, METER_CHAR_WHITELIST};
use super::preprocess::{GammaCurve, Preprocessor};
use super::region::{Rect, Region, RegionBounds};

/// Words need a confidence above this to be accepted
pub const MIN_WORD_CONFIDENCE: f32 = 15.0;

const SEARCH_BOX_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const WORD_BOX_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);

/// A recognition backend
pub trait Recognizer: Send + Sync {
    /// Backend name as used in the configuration
    fn kind(&self) -> &str;

    /// Regions this recognizer reads
    fn regions(&self) -> &[Region];

    /// Recognize all regions of `image`, shifted by `offset`, into `reads`.
    ///
    /// Returns whether every region could be read. Errors are reserved for
    /// failures that must stop the cycle (engine initialization).
    fn recognize(
        &self,
        image: &RgbaImage,
        offset: Offset,
        reads: &mut RawReadings,
        debug: Option<&mut DebugFrames>,
    ) -> Result<bool>;
}

/// Tesseract-style recognizer: preprocessing chain plus one OCR pass per region
pub struct TesseractRecognizer {
    regions: Vec<Region>,
    preprocessor: Preprocessor,
    settings: EngineSettings,
    provider: Arc<dyn EngineProvider>,
}

impl TesseractRecognizer {
    pub fn new(
        regions: Vec<Region>,
        gamma: GammaCurve,
        language: impl Into<String>,
        provider: Arc<dyn EngineProvider>,
    ) -> Result<Self> {
        if regions.is_empty() {
            return Err(MeterError::config("tesseract recognizer needs at least one boundingbox"));
        }

        let segmentation = if regions.iter().all(Region::is_digit) {
            Segmentation::SingleChar
        } else {
            Segmentation::SingleBlock
        };

        let settings = EngineSettings {
            language: language.into(),
            whitelist: METER_CHAR_WHITELIST.to_string(),
            segmentation,
        };
        info!(
            "tesseract recognizer: {} boundingboxes, {:?}, gamma {:?}",
            regions.len(),
            segmentation,
            gamma
        );

        Ok(Self {
            regions,
            preprocessor: Preprocessor::new(gamma),
            settings,
            provider,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl Recognizer for TesseractRecognizer {
    fn kind(&self) -> &str {
        "tesseract"
    }

    fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn recognize(
        &self,
        image: &RgbaImage,
        offset: Offset,
        reads: &mut RawReadings,
        mut debug: Option<&mut DebugFrames>,
    ) -> Result<bool> {
        // fresh handle every cycle, dropped on every return path below
        let mut engine = self.provider.create(&self.settings)?;

        let bounds = RegionBounds::of(&self.regions);
        let crop = (!bounds.is_open())
            .then(|| bounds.crop_rect(offset, image.width(), image.height()))
            .filter(|rect| !rect.is_empty());
        let origin = crop.map_or((0, 0), |rect| (rect.left, rect.top));

        let binary = self.preprocessor.run(image, crop, debug.as_deref_mut());
        let (width, height) = binary.dimensions();
        debug!("recognizing {} regions on {}x{} image", self.regions.len(), width, height);

        if let Err(e) = engine.set_image(&binary) {
            warn!("{}: could not set image: {}", self.provider.name(), e);
            self.regions.iter().for_each(|region| reads.mark_unreadable(region));
            return Ok(false);
        }

        let mut all_read = true;
        let mut search_boxes: Vec<Rect> = Vec::with_capacity(self.regions.len());
        let mut word_boxes: Vec<Rect> = Vec::new();

        for region in &self.regions {
            let rect = region.rect_in(offset, origin, width, height);
            search_boxes.push(rect);
            if rect.is_empty() {
                warn!("boundingbox <{}> lies outside of the image", region.identifier());
                reads.mark_unreadable(region);
                all_read = false;
                continue;
            }

            engine.set_rectangle(rect.left, rect.top, rect.width, rect.height);
            let words = engine.recognize().unwrap_or_else(|e| {
                warn!("<{}>: recognition failed: {}", region.identifier(), e);
                Vec::new()
            });

            for word in &words {
                debug!(
                    "word: '{}'; conf: {:.2}; box: {:?}",
                    word.text, word.confidence, word.bounds
                );
                word_boxes.push(word.bounds);
            }

            // first word above the threshold wins, even if a later one is better
            match words.iter().find(|w| w.confidence > MIN_WORD_CONFIDENCE) {
                Some(word) => {
                    let value = parse_numeric_prefix(&word.text) * region.scale_factor();
                    debug!("<{}> += {} ('{}')", region.identifier(), value, word.text);
                    reads.add(region, value, f64::from(word.confidence));
                }
                None => {
                    warn!(
                        "<{}>: no word with confidence above {}",
                        region.identifier(),
                        MIN_WORD_CONFIDENCE
                    );
                    reads.mark_unreadable(region);
                    all_read = false;
                }
            }
        }

        if let Some(frames) = debug {
            let mut overlay = DynamicImage::ImageLuma8(binary).into_rgba8();
            for rect in search_boxes.iter().filter_map(|r| r.to_drawable()) {
                draw_hollow_rect_mut(&mut overlay, rect, SEARCH_BOX_COLOR);
            }
            for rect in word_boxes.iter().filter_map(|r| r.to_drawable()) {
                draw_hollow_rect_mut(&mut overlay, rect, WORD_BOX_COLOR);
            }
            frames.push("tesseract boxes", overlay);
        }

        Ok(all_read)
    }
}

/// Template matching ("needle") recognizer.
///
/// Not implemented yet: it accepts its configuration and always succeeds
/// without contributing readings.
pub struct NeedleRecognizer {
    regions: Vec<Region>,
}

impl NeedleRecognizer {
    pub fn new(regions: Vec<Region>) -> Self {
        info!("needle recognizer: {} boundingboxes (no readings produced)", regions.len());
        Self { regions }
    }
}

impl Recognizer for NeedleRecognizer {
    fn kind(&self) -> &str {
        "needle"
    }

    fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn recognize(
        &self,
        _image: &RgbaImage,
        _offset: Offset,
        _reads: &mut RawReadings,
        _debug: Option<&mut DebugFrames>,
    ) -> Result<bool> {
        debug!("needle recognizer: nothing to do");
        Ok(true)
    }
}

/// Leading number of `text`, like C `strtod`. Text without one reads as 0.
fn parse_numeric_prefix(text: &str) -> f64 {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER.get_or_init(|| {
        Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid number regex")
    });

    re.find(text)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}
