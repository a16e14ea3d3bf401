//! Autofix calibration
//!
//! Compensates small physical drift of camera or meter between captures.
//! A square window around a configured anchor (typically the corner of the
//! digit frame) is searched for a vertical and a horizontal edge; their
//! displacement from the window center is the offset applied to every region
//! for the rest of the cycle.

use image::{GrayImage, Luma, RgbaImage};
use tracing::{debug, warn};

use super::debug::DebugFrames;

/// Edge strength at or above which an edge pixel counts as "on"
const EDGE_THRESHOLD: u8 = 40;

/// Per-cycle translation correcting drift. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

/// Search window for autofix: anchor `(x, y)` and half-range `range`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationWindow {
    x: u32,
    y: u32,
    range: u32,
}

/// Which edges an edge map responds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeAxis {
    /// Vertical edges, found by comparing left and right neighbours
    Vertical,
    /// Horizontal edges, found by comparing upper and lower neighbours
    Horizontal,
}

impl CalibrationWindow {
    /// Validate an autofix triple. Returns `None` unless `range >= 1`,
    /// `x >= range` and `y >= range`.
    pub fn new(range: i64, x: i64, y: i64) -> Option<Self> {
        if range < 1 || x < range || y < range {
            return None;
        }
        Some(Self {
            x: u32::try_from(x).ok()?,
            y: u32::try_from(y).ok()?,
            range: u32::try_from(range).ok()?,
        })
    }

    pub fn anchor(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn range(&self) -> u32 {
        self.range
    }

    /// Side length of the square search window
    pub fn size(&self) -> u32 {
        self.range.saturating_mul(2).saturating_add(1)
    }

    /// Whether the whole search window lies inside a `width`x`height` image
    pub fn fits(&self, width: u32, height: u32) -> bool {
        let r = u64::from(self.range);
        u64::from(self.x) + r < u64::from(width) && u64::from(self.y) + r < u64::from(height)
    }

    /// Detect the drift offset on the (rotated, otherwise untouched) source
    /// image. Never fails: a window that does not fit or holds no edges
    /// yields a zero offset.
    pub fn detect(&self, image: &RgbaImage, debug: Option<&mut DebugFrames>) -> Offset {
        let (width, height) = image.dimensions();
        let r = self.range;
        if !self.fits(width, height) {
            warn!(
                "autofix window ({}, {}) +-{} outside of {}x{} image, no offset applied",
                self.x, self.y, r, width, height
            );
            return Offset::default();
        }

        let size = self.size();
        let window = image::imageops::crop_imm(image, self.x - r, self.y - r, size, size).to_image();
        let gray = image::imageops::grayscale(&window);

        let vertical = two_sided_edges(&gray, EdgeAxis::Vertical);
        let horizontal = two_sided_edges(&gray, EdgeAxis::Horizontal);

        if let Some(frames) = debug {
            frames.push_gray("autofix vertical edges", &vertical);
            frames.push_gray("autofix horizontal edges", &horizontal);
        }

        let on = |img: &GrayImage, x: u32, y: u32| img.get_pixel(x, y)[0] >= EDGE_THRESHOLD;

        // rightmost edge pixel of each row, minimum over rows
        let min_on_x = (0..size)
            .filter_map(|row| (0..size).filter(|&col| on(&vertical, col, row)).last())
            .min();

        // topmost edge pixel of each column (last hit scanning upwards),
        // maximum over columns
        let max_on_y = (0..size)
            .filter_map(|col| (0..size).rev().filter(|&row| on(&horizontal, col, row)).last())
            .max();

        match (min_on_x, max_on_y) {
            (Some(x), Some(y)) => {
                let offset = Offset {
                    dx: x as i32 - r as i32,
                    dy: y as i32 - r as i32,
                };
                debug!("autofix: edges at ({}, {}) in window, offset {:?}", x, y, offset);
                offset
            }
            _ => {
                warn!(
                    "autofix: no edges found around ({}, {}) +-{} (vertical: {:?}, horizontal: {:?})",
                    self.x, self.y, r, min_on_x, max_on_y
                );
                Offset::default()
            }
        }
    }
}

/// Two-sided edge filter. For each interior pixel the gradients towards both
/// neighbours along the axis are taken; if they have the same sign the
/// smaller magnitude is stored, otherwise zero. Border pixels stay zero.
fn two_sided_edges(gray: &GrayImage, axis: EdgeAxis) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut edges = GrayImage::new(w, h);
    let (x_range, y_range) = match axis {
        EdgeAxis::Vertical => (1..w.saturating_sub(1), 0..h),
        EdgeAxis::Horizontal => (0..w, 1..h.saturating_sub(1)),
    };

    for y in y_range {
        for x in x_range.clone() {
            let (prev, next) = match axis {
                EdgeAxis::Vertical => (gray.get_pixel(x - 1, y)[0], gray.get_pixel(x + 1, y)[0]),
                EdgeAxis::Horizontal => (gray.get_pixel(x, y - 1)[0], gray.get_pixel(x, y + 1)[0]),
            };
            let center = i32::from(gray.get_pixel(x, y)[0]);
            let g1 = center - i32::from(prev);
            let g2 = i32::from(next) - center;

            if g1 * g2 > 0 {
                let value = g1.abs().min(g2.abs());
                edges.put_pixel(x, y, Luma([value as u8]));
            }
        }
    }

    edges
}
