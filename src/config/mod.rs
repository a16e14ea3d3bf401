//! Meter Configuration
//!
//! The raw document (JSON, or TOML when the file ends in `.toml`) and its
//! validation into immutable domain types. Anything wrong with the document
//! is a [`MeterError::Config`] and stops construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MeterError, Result};
use crate::vision::{
    CalibrationWindow, EngineProvider, GammaCurve, NeedleRecognizer, Recognizer, RecognizerKind, Region,
    TesseractProvider, TesseractRecognizer,
};

/// Default OCR language
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Complete meter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Image file read every cycle
    pub file: Option<PathBuf>,
    /// Clockwise rotation in degrees applied before anything else
    #[serde(default)]
    pub rotate: f64,
    /// Write `<file>_debug.png` every cycle
    #[serde(default)]
    pub debug: bool,
    /// Drift compensation window
    #[serde(default)]
    pub autofix: Option<AutofixConfig>,
    /// Recognizers, run in this order
    #[serde(default)]
    pub recognizer: Vec<RecognizerConfig>,
    /// Legacy form: regions of a single default tesseract recognizer
    #[serde(default)]
    pub boundingboxes: Vec<BoundingBoxConfig>,
}

/// Autofix anchor and search range
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AutofixConfig {
    pub range: Option<i64>,
    pub x: Option<i64>,
    pub y: Option<i64>,
}

/// One recognizer and its regions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(rename = "type")]
    pub kind: RecognizerKind,
    /// Gamma exponent
    pub gamma: Option<f64>,
    /// Black point of the gamma curve
    pub gamma_min: Option<u8>,
    /// White point of the gamma curve
    pub gamma_max: Option<u8>,
    /// Tesseract language, e.g. "eng" or "deu"
    pub language: Option<String>,
    /// Path of the tesseract executable
    pub tesseract: Option<PathBuf>,
    /// Tesseract data directory
    pub tessdata: Option<PathBuf>,
    #[serde(default)]
    pub boundingboxes: Vec<BoundingBoxConfig>,
}

/// One region descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundingBoxConfig {
    pub identifier: Option<String>,
    pub confidence_id: Option<String>,
    /// Informational only
    pub unit: Option<String>,
    #[serde(default)]
    pub scaler: i32,
    #[serde(default)]
    pub digit: bool,
    #[serde(rename = "box")]
    pub bounds: Option<BoxConfig>,
}

/// Box coordinates, -1 or absent means open
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoxConfig {
    #[serde(default = "open_coordinate")]
    pub x1: i64,
    #[serde(default = "open_coordinate")]
    pub y1: i64,
    #[serde(default = "open_coordinate")]
    pub x2: i64,
    #[serde(default = "open_coordinate")]
    pub y2: i64,
}

fn open_coordinate() -> i64 {
    -1
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            x1: -1,
            y1: -1,
            x2: -1,
            y2: -1,
        }
    }
}

impl MeterConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Source image path
    pub fn image_file(&self) -> Result<&Path> {
        match self.file.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(MeterError::config("missing image file name ('file')")),
        }
    }

    /// Validated autofix window. An incomplete or out-of-range triple is
    /// ignored with a warning.
    pub fn calibration_window(&self) -> Option<CalibrationWindow> {
        let autofix = self.autofix?;
        let window = match (autofix.range, autofix.x, autofix.y) {
            (Some(range), Some(x), Some(y)) => CalibrationWindow::new(range, x, y),
            _ => None,
        };
        if window.is_none() {
            warn!(
                "ignoring autofix {:?}: needs range >= 1, x >= range and y >= range",
                autofix
            );
        }
        window
    }

    /// Recognizer list, falling back to the legacy top-level boundingboxes
    pub fn recognizers(&self) -> Result<Vec<RecognizerConfig>> {
        if !self.recognizer.is_empty() {
            if !self.boundingboxes.is_empty() {
                warn!("top-level boundingboxes are ignored when recognizers are configured");
            }
            return Ok(self.recognizer.clone());
        }
        if self.boundingboxes.is_empty() {
            return Err(MeterError::config("no recognizer given"));
        }

        info!("legacy configuration: one tesseract recognizer");
        Ok(vec![RecognizerConfig {
            boundingboxes: self.boundingboxes.clone(),
            ..RecognizerConfig::new(RecognizerKind::Tesseract)
        }])
    }
}

impl RecognizerConfig {
    pub fn new(kind: RecognizerKind) -> Self {
        Self {
            kind,
            gamma: None,
            gamma_min: None,
            gamma_max: None,
            language: None,
            tesseract: None,
            tessdata: None,
            boundingboxes: Vec::new(),
        }
    }

    pub fn gamma_curve(&self) -> Result<GammaCurve> {
        let defaults = GammaCurve::default();
        let curve = GammaCurve {
            gamma: self.gamma.unwrap_or(defaults.gamma),
            black: self.gamma_min.unwrap_or(defaults.black),
            white: self.gamma_max.unwrap_or(defaults.white),
        };

        if !(curve.gamma > 0.0) {
            return Err(MeterError::config(format!("gamma must be positive, got {}", curve.gamma)));
        }
        if curve.white <= curve.black {
            return Err(MeterError::config(format!(
                "gamma_max ({}) must be above gamma_min ({})",
                curve.white, curve.black
            )));
        }
        Ok(curve)
    }

    pub fn regions(&self) -> Result<Vec<Region>> {
        if self.boundingboxes.is_empty() {
            return Err(MeterError::config(format!("{} recognizer: no boundingboxes given", self.kind)));
        }
        self.boundingboxes.iter().map(BoundingBoxConfig::to_region).collect()
    }

    /// Build the recognizer. Tesseract recognizers use `provider` when given,
    /// otherwise the tesseract program named in this configuration.
    pub fn build(&self, provider: Option<Arc<dyn EngineProvider>>) -> Result<Box<dyn Recognizer>> {
        let regions = self.regions()?;

        match self.kind {
            RecognizerKind::Tesseract => {
                let provider = provider.unwrap_or_else(|| {
                    Arc::new(TesseractProvider::new(self.tesseract.clone(), self.tessdata.clone()))
                });
                let language = self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
                Ok(Box::new(TesseractRecognizer::new(
                    regions,
                    self.gamma_curve()?,
                    language,
                    provider,
                )?))
            }
            RecognizerKind::Needle => Ok(Box::new(NeedleRecognizer::new(regions))),
        }
    }
}

impl BoundingBoxConfig {
    pub fn to_region(&self) -> Result<Region> {
        let identifier = self
            .identifier
            .as_deref()
            .ok_or_else(|| MeterError::config("boundingbox without identifier"))?;
        let bounds = self.bounds.unwrap_or_default();

        let region = Region::new(identifier)?
            .with_confidence_id(self.confidence_id.clone())
            .with_scaler(self.scaler)
            .with_digit(self.digit)
            .with_box(bounds.x1, bounds.y1, bounds.x2, bounds.y2)?;

        info!(
            "boundingbox <{}>: unit=<{}>, scaler={}, digit={}, ({},{})-({},{})",
            identifier,
            self.unit.as_deref().unwrap_or(""),
            self.scaler,
            self.digit,
            bounds.x1,
            bounds.y1,
            bounds.x2,
            bounds.y2
        );
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_JSON: &str = r#"{
        "file": "meter.png",
        "rotate": -2.0,
        "autofix": {"range": 30, "x": 33, "y": 52},
        "recognizer": [
            {
                "type": "tesseract",
                "gamma": 2.0,
                "gamma_min": 60,
                "gamma_max": 140,
                "language": "deu",
                "boundingboxes": [
                    {"identifier": "id1", "scaler": 2, "digit": true, "box": {"x1": 42, "y1": 10, "x2": 100, "y2": 65}},
                    {"identifier": "id1", "scaler": 1, "digit": true, "confidence_id": "id1_conf", "box": {"x1": 120, "y1": 12, "x2": 180, "y2": 60}}
                ]
            },
            {"type": "needle", "boundingboxes": [{"identifier": "id2"}]}
        ]
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config = MeterConfig::from_json_str(FULL_JSON).unwrap();
        assert_eq!(config.image_file().unwrap(), Path::new("meter.png"));
        assert_eq!(config.rotate, -2.0);
        assert!(!config.debug);

        let window = config.calibration_window().unwrap();
        assert_eq!(window.anchor(), (33, 52));
        assert_eq!(window.range(), 30);

        let recognizers = config.recognizers().unwrap();
        assert_eq!(recognizers.len(), 2);
        assert_eq!(recognizers[0].kind, RecognizerKind::Tesseract);
        assert_eq!(recognizers[1].kind, RecognizerKind::Needle);

        let curve = recognizers[0].gamma_curve().unwrap();
        assert_eq!(curve, GammaCurve { gamma: 2.0, black: 60, white: 140 });

        let regions = recognizers[0].regions().unwrap();
        assert_eq!(regions[1].confidence_id(), Some("id1_conf"));
        assert_eq!(regions[0].scaler(), 2);
        assert!(regions[0].is_digit());
    }

    #[test]
    fn test_build_recognizers() {
        let config = MeterConfig::from_json_str(FULL_JSON).unwrap();
        let built: Vec<_> = config
            .recognizers()
            .unwrap()
            .iter()
            .map(|r| r.build(None).unwrap())
            .collect();
        assert_eq!(built[0].kind(), "tesseract");
        assert_eq!(built[0].regions().len(), 2);
        assert_eq!(built[1].kind(), "needle");
    }

    #[test]
    fn test_legacy_boundingboxes() {
        let config = MeterConfig::from_json_str(
            r#"{"file": "m.png", "boundingboxes": [{"identifier": "id1", "box": {"x1": 1, "x2": 5}}]}"#,
        )
        .unwrap();
        let recognizers = config.recognizers().unwrap();
        assert_eq!(recognizers.len(), 1);
        assert_eq!(recognizers[0].kind, RecognizerKind::Tesseract);
        assert_eq!(recognizers[0].gamma_curve().unwrap(), GammaCurve::default());
        assert!(!recognizers[0].regions().unwrap()[0].is_open());
    }

    #[test]
    fn test_default_language_reaches_engine() {
        use crate::meter::RawReadings;
        use crate::vision::ocr::testing::{word, ScriptedProvider};
        use crate::vision::Offset;

        let mut config = RecognizerConfig::new(RecognizerKind::Tesseract);
        config.boundingboxes = vec![BoundingBoxConfig {
            identifier: Some("id1".to_string()),
            ..Default::default()
        }];
        let provider = Arc::new(ScriptedProvider::new(vec![vec![word("7", 80.0)]]));
        let recognizer = config.build(Some(provider.clone() as Arc<dyn EngineProvider>)).unwrap();

        let image = image::RgbaImage::from_pixel(20, 10, image::Rgba([255, 255, 255, 255]));
        let mut reads = RawReadings::new();
        recognizer.recognize(&image, Offset::default(), &mut reads, None).unwrap();
        assert_eq!(provider.log.lock().unwrap().settings[0].language, "eng");
    }

    #[test]
    fn test_missing_recognizers_rejected() {
        let config = MeterConfig::from_json_str(r#"{"file": "m.png"}"#).unwrap();
        assert!(matches!(config.recognizers(), Err(MeterError::Config(_))));

        let config = MeterConfig::from_json_str(
            r#"{"file": "m.png", "recognizer": [{"type": "tesseract", "boundingboxes": []}]}"#,
        )
        .unwrap();
        let recognizers = config.recognizers().unwrap();
        assert!(matches!(recognizers[0].build(None), Err(MeterError::Config(_))));
    }

    #[test]
    fn test_missing_file_rejected() {
        let config = MeterConfig::from_json_str(r#"{"boundingboxes": [{"identifier": "a"}]}"#).unwrap();
        assert!(matches!(config.image_file(), Err(MeterError::Config(_))));
    }

    #[test]
    fn test_bad_boundingboxes_rejected() {
        let missing_id = BoundingBoxConfig {
            scaler: 1,
            ..Default::default()
        };
        assert!(matches!(missing_id.to_region(), Err(MeterError::Config(_))));

        let inverted = BoundingBoxConfig {
            identifier: Some("id1".to_string()),
            bounds: Some(BoxConfig { x1: 10, y1: 0, x2: 5, y2: 20 }),
            ..Default::default()
        };
        assert!(matches!(inverted.to_region(), Err(MeterError::Config(_))));

        // open ends never conflict
        let half_open = BoundingBoxConfig {
            identifier: Some("id1".to_string()),
            bounds: Some(BoxConfig { x1: 10, y1: -1, x2: -1, y2: 20 }),
            ..Default::default()
        };
        assert!(half_open.to_region().is_ok());
    }

    #[test]
    fn test_invalid_autofix_ignored() {
        for autofix in [
            r#"{"range": 0, "x": 10, "y": 10}"#,
            r#"{"range": 20, "x": 10, "y": 30}"#,
            r#"{"range": 5, "x": 10}"#,
        ] {
            let json = format!(r#"{{"file": "m.png", "autofix": {autofix}}}"#);
            let config = MeterConfig::from_json_str(&json).unwrap();
            assert!(config.calibration_window().is_none(), "{autofix}");
        }
    }

    #[test]
    fn test_wrong_types_rejected() {
        assert!(MeterConfig::from_json_str(r#"{"file": "m.png", "rotate": "left"}"#).is_err());
        assert!(MeterConfig::from_json_str(
            r#"{"file": "m.png", "recognizer": [{"type": "paddle", "boundingboxes": []}]}"#
        )
        .is_err());
        assert!(MeterConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_invalid_gamma_rejected() {
        let mut recognizer = RecognizerConfig::new(RecognizerKind::Tesseract);
        recognizer.gamma_min = Some(120);
        recognizer.gamma_max = Some(100);
        assert!(recognizer.gamma_curve().is_err());

        let mut recognizer = RecognizerConfig::new(RecognizerKind::Tesseract);
        recognizer.gamma = Some(0.0);
        assert!(recognizer.gamma_curve().is_err());
    }

    #[test]
    fn test_load_toml_and_json_files() {
        let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            toml_file,
            r#"
file = "meter.png"
debug = true

[[recognizer]]
type = "tesseract"
gamma = 1.5

[[recognizer.boundingboxes]]
identifier = "id1"
box = {{ x1 = 0, y1 = 0, x2 = 40, y2 = 20 }}
"#
        )
        .unwrap();
        let config = MeterConfig::load(toml_file.path()).unwrap();
        assert!(config.debug);
        assert_eq!(config.recognizer[0].gamma, Some(1.5));
        assert_eq!(config.recognizer[0].regions().unwrap()[0].identifier(), "id1");

        let mut json_file = NamedTempFile::new().unwrap();
        write!(json_file, "{}", FULL_JSON).unwrap();
        let config = MeterConfig::load(json_file.path()).unwrap();
        assert_eq!(config.recognizer.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(MeterConfig::load(Path::new("/nonexistent/meter.json")).is_err());
    }
}
