//! meter-ocr - numeric readings from photos of meter displays
//!
//! A configured set of regions is located on the image (optionally corrected
//! for camera drift), preprocessed down to a binary image and read by OCR.
//! Regions sharing an identifier add up to one reading.

pub mod config;
pub mod error;
pub mod meter;
pub mod vision;

pub use config::MeterConfig;
pub use error::{MeterError, Result};
pub use meter::{MeterOcr, Reading};
