//! OCR capability boundary
//!
//! The recognition algorithm itself is not part of this crate. Anything able
//! to take an image, restrict itself to a rectangle and list the words it
//! found (with confidence and box) can back a recognizer.

use image::GrayImage;

use crate::error::Result;

use super::region::Rect;

/// Characters a meter display can show
pub const METER_CHAR_WHITELIST: &str = "0123456789.m";

/// Page segmentation the engine should assume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmentation {
    /// Each rectangle holds exactly one character
    SingleChar,
    /// Each rectangle holds one uniform block of text
    SingleBlock,
}

/// Per-cycle engine setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub language: String,
    pub whitelist: String,
    pub segmentation: Segmentation,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            whitelist: METER_CHAR_WHITELIST.to_string(),
            segmentation: Segmentation::SingleBlock,
        }
    }
}

/// One recognized word
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    /// Recognized text
    pub text: String,
    /// Confidence (0.0 - 100.0)
    pub confidence: f32,
    /// Word box in image coordinates
    pub bounds: Rect,
}

/// A live recognition engine handle.
///
/// Handles are short-lived: one is created per read cycle and dropped at the
/// end of it, which must release every resource the engine holds.
pub trait OcrEngine {
    /// Set the image subsequent calls work on. Clears the rectangle.
    fn set_image(&mut self, image: &GrayImage) -> Result<()>;

    /// Restrict recognition to a rectangle of the current image
    fn set_rectangle(&mut self, left: u32, top: u32, width: u32, height: u32);

    /// Recognize the current rectangle, returning words in reading order
    fn recognize(&mut self) -> Result<Vec<OcrWord>>;
}

/// Creates fresh engine handles.
///
/// Errors from [`EngineProvider::create`] are engine initialization failures
/// and stop the cycle.
pub trait EngineProvider: Send + Sync {
    fn create(&self, settings: &EngineSettings) -> Result<Box<dyn OcrEngine>>;

    /// Short name for logs
    fn name(&self) -> &str;
}
