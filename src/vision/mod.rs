//! Vision Layer
//!
//! Turns a photo of a meter display into raw per-identifier results:
//! - region geometry and cropping
//! - autofix calibration (edge based offset detection)
//! - preprocessing chain (grayscale down to a binary image)
//! - recognizer backends on top of a pluggable OCR engine

pub mod calibration;
pub mod debug;
pub mod ocr;
pub mod preprocess;
pub mod recognizer;
pub mod region;
pub mod tesseract;

pub use calibration::{CalibrationWindow, Offset};
pub use debug::{debug_path, DebugFrames};
pub use ocr::{EngineProvider, EngineSettings, OcrEngine, OcrWord, Segmentation, METER_CHAR_WHITELIST};
pub use preprocess::{rotate, GammaCurve, Preprocessor};
pub use recognizer::{NeedleRecognizer, Recognizer, TesseractRecognizer, MIN_WORD_CONFIDENCE};
pub use region::{Rect, Region, RegionBounds};
pub use tesseract::TesseractProvider;

/// Recognizer backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    /// Tesseract OCR over preprocessed binary images
    #[default]
    Tesseract,
    /// Template matching, accepted but produces no readings
    Needle,
}

impl std::fmt::Display for RecognizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognizerKind::Tesseract => f.write_str("tesseract"),
            RecognizerKind::Needle => f.write_str("needle"),
        }
    }
}
