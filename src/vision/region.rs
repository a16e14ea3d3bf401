//! Regions of interest on the meter image
//!
//! A region ties a rectangle of the photo to the logical reading it
//! contributes to. Coordinates are absolute pixels in the rotated source
//! image; a missing coordinate is "open" and extends to the image edge.

use crate::error::{MeterError, Result};

use super::calibration::Offset;

/// Axis-aligned rectangle in pixel coordinates (left, top, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Drawing rectangle for imageproc, `None` when empty
    pub fn to_drawable(self) -> Option<imageproc::rect::Rect> {
        if self.is_empty() {
            return None;
        }
        Some(imageproc::rect::Rect::at(self.left as i32, self.top as i32).of_size(self.width, self.height))
    }
}

/// A bounding box contributing to one reading identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    identifier: String,
    confidence_id: Option<String>,
    scaler: i32,
    digit: bool,
    x1: Option<u32>,
    y1: Option<u32>,
    x2: Option<u32>,
    y2: Option<u32>,
}

impl Region {
    /// Create a fully open region (the whole image) for `identifier`
    pub fn new(identifier: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(MeterError::config("boundingbox identifier must not be empty"));
        }

        Ok(Self {
            identifier,
            confidence_id: None,
            scaler: 0,
            digit: false,
            x1: None,
            y1: None,
            x2: None,
            y2: None,
        })
    }

    /// Restrict the region to a box. Negative coordinates mean "open".
    pub fn with_box(mut self, x1: i64, y1: i64, x2: i64, y2: i64) -> Result<Self> {
        let open = |v: i64| u32::try_from(v).ok();
        self.x1 = open(x1);
        self.y1 = open(y1);
        self.x2 = open(x2);
        self.y2 = open(y2);

        if let (Some(a), Some(b)) = (self.x1, self.x2) {
            if b < a {
                return Err(MeterError::config(format!(
                    "boundingbox <{}>: x2 ({b}) < x1 ({a})",
                    self.identifier
                )));
            }
        }
        if let (Some(a), Some(b)) = (self.y1, self.y2) {
            if b < a {
                return Err(MeterError::config(format!(
                    "boundingbox <{}>: y2 ({b}) < y1 ({a})",
                    self.identifier
                )));
            }
        }

        Ok(self)
    }

    pub fn with_scaler(mut self, scaler: i32) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_digit(mut self, digit: bool) -> Self {
        self.digit = digit;
        self
    }

    pub fn with_confidence_id(mut self, confidence_id: Option<String>) -> Self {
        self.confidence_id = confidence_id.filter(|id| !id.is_empty());
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn confidence_id(&self) -> Option<&str> {
        self.confidence_id.as_deref()
    }

    pub fn scaler(&self) -> i32 {
        self.scaler
    }

    pub fn is_digit(&self) -> bool {
        self.digit
    }

    /// True when no coordinate is bounded
    pub fn is_open(&self) -> bool {
        self.x1.is_none() && self.y1.is_none() && self.x2.is_none() && self.y2.is_none()
    }

    /// Multiplier applied to the recognized value (10^scaler)
    pub fn scale_factor(&self) -> f64 {
        10f64.powi(self.scaler)
    }

    /// Rectangle of this region inside an image of `width`x`height` whose
    /// top-left corner sits at `origin` of the source image, after shifting
    /// the region by the calibration offset. Clamped to the image.
    pub fn rect_in(&self, offset: Offset, origin: (u32, u32), width: u32, height: u32) -> Rect {
        let place = |v: Option<u32>, shift: i32, base: u32, edge: u32, default: u32| -> u32 {
            match v {
                Some(v) => (i64::from(v) + i64::from(shift) - i64::from(base)).clamp(0, i64::from(edge)) as u32,
                None => default,
            }
        };

        let left = place(self.x1, offset.dx, origin.0, width, 0);
        let top = place(self.y1, offset.dy, origin.1, height, 0);
        let right = place(self.x2, offset.dx, origin.0, width, width).max(left);
        let bottom = place(self.y2, offset.dy, origin.1, height, height).max(top);

        Rect::new(left, top, right - left, bottom - top)
    }
}

/// Union of the bounded coordinates of a region set. Each side is `None` when
/// no region bounds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionBounds {
    pub min_x1: Option<u32>,
    pub min_y1: Option<u32>,
    pub max_x2: Option<u32>,
    pub max_y2: Option<u32>,
}

impl RegionBounds {
    pub fn of(regions: &[Region]) -> Self {
        Self {
            min_x1: regions.iter().filter_map(|r| r.x1).min(),
            min_y1: regions.iter().filter_map(|r| r.y1).min(),
            max_x2: regions.iter().filter_map(|r| r.x2).max(),
            max_y2: regions.iter().filter_map(|r| r.y2).max(),
        }
    }

    /// True when every side is open and cropping would keep the whole image
    pub fn is_open(&self) -> bool {
        self.min_x1.is_none() && self.min_y1.is_none() && self.max_x2.is_none() && self.max_y2.is_none()
    }

    /// Crop rectangle in an image of `width`x`height`, shifted by `offset`.
    /// Open sides stay at the image edge.
    pub fn crop_rect(&self, offset: Offset, width: u32, height: u32) -> Rect {
        let shift = |v: u32, d: i32, edge: u32| (i64::from(v) + i64::from(d)).clamp(0, i64::from(edge)) as u32;

        let left = self.min_x1.map_or(0, |v| shift(v, offset.dx, width));
        let top = self.min_y1.map_or(0, |v| shift(v, offset.dy, height));
        let right = self.max_x2.map_or(width, |v| shift(v, offset.dx, width)).max(left);
        let bottom = self.max_y2.map_or(height, |v| shift(v, offset.dy, height)).max(top);

        Rect::new(left, top, right - left, bottom - top)
    }
}
