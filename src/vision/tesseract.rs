//! Tesseract OCR backend
//!
//! Drives the `tesseract` command line program and reads its TSV output.
//! Each engine handle owns a scratch directory that is removed when the
//! handle is dropped, so a handle never outlives its read cycle.

use std::path::PathBuf;
use std::process::Command;

use image::GrayImage;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{MeterError, Result};

use super::ocr::{EngineProvider, EngineSettings, OcrEngine, OcrWord, Segmentation};
use super::region::Rect;

/// TSV level of word rows
const TSV_WORD_LEVEL: i32 = 5;

/// Creates tesseract engine handles
#[derive(Debug, Clone)]
pub struct TesseractProvider {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl Default for TesseractProvider {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl TesseractProvider {
    /// `executable` defaults to `tesseract` on the `PATH`
    pub fn new(executable: Option<PathBuf>, tessdata: Option<PathBuf>) -> Self {
        Self {
            executable: executable.unwrap_or_else(|| PathBuf::from("tesseract")),
            tessdata,
        }
    }
}

impl EngineProvider for TesseractProvider {
    fn create(&self, settings: &EngineSettings) -> Result<Box<dyn OcrEngine>> {
        let output = Command::new(&self.executable)
            .arg("--version")
            .output()
            .map_err(|e| MeterError::EngineInit(format!("{}: {e}", self.executable.display())))?;
        if !output.status.success() {
            return Err(MeterError::EngineInit(format!(
                "{} --version failed: {}",
                self.executable.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let workdir = tempfile::Builder::new()
            .prefix("meter-ocr-")
            .tempdir()
            .map_err(|e| MeterError::EngineInit(format!("scratch directory: {e}")))?;
        debug!("tesseract engine created in {:?}", workdir.path());

        Ok(Box::new(TesseractEngine {
            executable: self.executable.clone(),
            tessdata: self.tessdata.clone(),
            settings: settings.clone(),
            workdir,
            image: None,
            rect: None,
        }))
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

struct TesseractEngine {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
    settings: EngineSettings,
    workdir: TempDir,
    image: Option<GrayImage>,
    rect: Option<Rect>,
}

impl TesseractEngine {
    fn page_seg_mode(&self) -> &'static str {
        match self.settings.segmentation {
            Segmentation::SingleChar => "10",
            Segmentation::SingleBlock => "6",
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn set_image(&mut self, image: &GrayImage) -> Result<()> {
        self.image = Some(image.clone());
        self.rect = None;
        Ok(())
    }

    fn set_rectangle(&mut self, left: u32, top: u32, width: u32, height: u32) {
        self.rect = Some(Rect::new(left, top, width, height));
    }

    fn recognize(&mut self) -> Result<Vec<OcrWord>> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| MeterError::Recognition("no image set".to_string()))?;
        let (width, height) = image.dimensions();

        let rect = self.rect.unwrap_or(Rect::new(0, 0, width, height));
        let left = rect.left.min(width);
        let top = rect.top.min(height);
        let rect = Rect::new(left, top, rect.width.min(width - left), rect.height.min(height - top));
        if rect.is_empty() {
            return Ok(vec![]);
        }

        let input = self.workdir.path().join("region.png");
        image::imageops::crop_imm(image, rect.left, rect.top, rect.width, rect.height)
            .to_image()
            .save(&input)?;

        let mut command = Command::new(&self.executable);
        command
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .arg("--psm")
            .arg(self.page_seg_mode());
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        command
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", self.settings.whitelist))
            .arg("-c")
            .arg("load_system_dawg=F")
            .arg("-c")
            .arg("load_freq_dawg=F")
            .arg("tsv");

        let output = command.output()?;
        if !output.status.success() {
            return Err(MeterError::Recognition(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout), (rect.left, rect.top)))
    }
}

impl Drop for TesseractEngine {
    fn drop(&mut self) {
        debug!("tesseract engine released ({:?})", self.workdir.path());
    }
}

/// Parse tesseract TSV output into words, translating boxes by `origin`.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text
fn parse_tsv(tsv: &str, origin: (u32, u32)) -> Vec<OcrWord> {
    let mut words = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != TSV_WORD_LEVEL {
            continue;
        }

        let text = fields[11].trim();
        let confidence: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || confidence < 0.0 {
            continue;
        }

        let number = |i: usize| fields[i].trim().parse::<u32>().unwrap_or(0);
        let bounds = Rect::new(origin.0 + number(6), origin.1 + number(7), number(8), number(9));

        words.push(OcrWord {
            text: text.to_string(),
            confidence,
            bounds,
        });
    }

    if words.is_empty() && !tsv.trim().is_empty() {
        warn!("tesseract returned no words");
    }
    words
}
