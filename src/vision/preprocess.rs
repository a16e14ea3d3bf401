//! Image preprocessing for meter OCR
//!
//! A fixed chain of transforms turning a photo of the meter into a clean
//! black-on-white binary image. Every stage takes the previous image and
//! produces a new one; the predecessor is dropped the moment its successor
//! is stored in the [`Pipeline`]. A stage that cannot produce output keeps
//! the previous image.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::filter::box_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::{grayscale_close, Mask};
use tracing::{debug, warn};

use super::debug::DebugFrames;
use super::region::Rect;

/// Rotations below this magnitude (degrees) are skipped
pub const MIN_ROTATION_DEGREES: f64 = 0.1;

/// Unsharp mask half-width and weight
const UNSHARP_HALF_WIDTH: u32 = 3;
const UNSHARP_FRACTION: f32 = 0.5;

/// Background estimate: reduction factor, closing size and target level
const BACKGROUND_REDUCTION: u32 = 4;
const BACKGROUND_CLOSE_RADIUS: u8 = 2;
const BACKGROUND_LEVEL: u32 = 200;

/// Radius of the final smoothing box filter
const SMOOTH_RADIUS: u32 = 1;

/// Gray values below this become ink (black)
pub const BINARY_THRESHOLD: u8 = 120;

/// Gamma transfer curve: values at or below `black` map to 0, values at or
/// above `white` map to 255, the range between is stretched with `gamma`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaCurve {
    pub gamma: f64,
    pub black: u8,
    pub white: u8,
}

impl Default for GammaCurve {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            black: 50,
            white: 120,
        }
    }
}

impl GammaCurve {
    fn lookup_table(&self) -> [u8; 256] {
        let mut lut = [0u8; 256];
        let (black, white) = (f64::from(self.black), f64::from(self.white));
        for (v, out) in lut.iter_mut().enumerate() {
            let v = v as f64;
            *out = if v <= black {
                0
            } else if v >= white {
                255
            } else {
                let x = (v - black) / (white - black);
                (255.0 * x.powf(1.0 / self.gamma) + 0.5).clamp(0.0, 255.0) as u8
            };
        }
        lut
    }
}

/// Images that can be shown in the debug montage
pub trait DebugFrame {
    fn to_debug_frame(&self) -> RgbaImage;
}

impl DebugFrame for GrayImage {
    fn to_debug_frame(&self) -> RgbaImage {
        DynamicImage::ImageLuma8(self.clone()).into_rgba8()
    }
}

impl DebugFrame for RgbaImage {
    fn to_debug_frame(&self) -> RgbaImage {
        self.clone()
    }
}

impl<T: DebugFrame> DebugFrame for &T {
    fn to_debug_frame(&self) -> RgbaImage {
        (**self).to_debug_frame()
    }
}

/// Owner of the current image of a transform chain
pub struct Pipeline<'a, I> {
    image: I,
    debug: Option<&'a mut DebugFrames>,
}

impl<'a, I: DebugFrame> Pipeline<'a, I> {
    pub fn new(image: I, debug: Option<&'a mut DebugFrames>) -> Self {
        Self { image, debug }
    }

    /// Run a same-type stage. `None` from the stage keeps the current image.
    pub fn then(mut self, name: &str, stage: impl FnOnce(&I) -> Option<I>) -> Self {
        match stage(&self.image) {
            Some(next) => {
                self.image = next;
                self.record(name);
            }
            None => debug!("preprocess stage '{}' made no change", name),
        }
        self
    }

    /// Run a stage that consumes the current image and changes its type
    pub fn convert<J: DebugFrame>(self, name: &str, stage: impl FnOnce(I) -> J) -> Pipeline<'a, J> {
        let Pipeline { image, debug } = self;
        let mut next = Pipeline {
            image: stage(image),
            debug,
        };
        next.record(name);
        next
    }

    pub fn finish(self) -> I {
        self.image
    }

    fn record(&mut self, name: &str) {
        if let Some(frames) = self.debug.as_deref_mut() {
            frames.push(name, self.image.to_debug_frame());
        }
    }
}

/// Preprocessing parameters of one recognizer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Preprocessor {
    pub gamma: GammaCurve,
}

impl Preprocessor {
    pub fn new(gamma: GammaCurve) -> Self {
        Self { gamma }
    }

    /// Crop, then run the grayscale chain down to a binary image
    pub fn run(&self, image: &RgbaImage, crop: Option<Rect>, debug: Option<&mut DebugFrames>) -> GrayImage {
        let source = Pipeline::new(image, debug);
        let gray = match crop {
            Some(rect) if !rect.is_empty() => source
                .convert("crop", |img| {
                    image::imageops::crop_imm(img, rect.left, rect.top, rect.width, rect.height).to_image()
                })
                .convert("grayscale", |img| image::imageops::grayscale(&img)),
            _ => source.convert("grayscale", |img| image::imageops::grayscale(img)),
        };

        let gamma = self.gamma;
        gray
            .then("gamma", |img| gamma_trc(img, gamma))
            .then("unsharp mask", unsharp_mask)
            .then("background normalization", normalize_background)
            .then("smooth", smooth)
            .then("binarize", |img| binarize(img, BINARY_THRESHOLD))
            .finish()
    }
}

/// Rotate clockwise by `degrees` about the center, keeping the canvas size
/// and filling uncovered area white. Small angles return the input as is.
pub fn rotate(image: RgbaImage, degrees: f64) -> RgbaImage {
    if degrees.abs() < MIN_ROTATION_DEGREES {
        return image;
    }
    debug!("rotating {}x{} image by {} degrees", image.width(), image.height(), degrees);
    rotate_about_center(
        &image,
        degrees.to_radians() as f32,
        Interpolation::Bilinear,
        Rgba([255, 255, 255, 255]),
    )
}

/// Gamma transfer curve correction
pub fn gamma_trc(image: &GrayImage, curve: GammaCurve) -> Option<GrayImage> {
    if curve.white <= curve.black || curve.gamma <= 0.0 {
        warn!("invalid gamma curve {:?}, stage skipped", curve);
        return None;
    }
    let lut = curve.lookup_table();
    Some(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([lut[image.get_pixel(x, y)[0] as usize]])
    }))
}

/// Unsharp mask: `src + fraction * (src - box_blur(src))`
pub fn unsharp_mask(image: &GrayImage) -> Option<GrayImage> {
    if is_empty(image) {
        return None;
    }
    let blurred = box_filter(image, UNSHARP_HALF_WIDTH, UNSHARP_HALF_WIDTH);
    Some(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let src = f32::from(image.get_pixel(x, y)[0]);
        let blur = f32::from(blurred.get_pixel(x, y)[0]);
        Luma([(src + UNSHARP_FRACTION * (src - blur)).round().clamp(0.0, 255.0) as u8])
    }))
}

/// Flatten uneven illumination. The background is estimated by a gray
/// closing on a reduced copy (removing dark strokes) and scaled back up;
/// each pixel is then mapped so the background lands on a fixed level.
pub fn normalize_background(image: &GrayImage) -> Option<GrayImage> {
    if is_empty(image) {
        return None;
    }
    let (w, h) = image.dimensions();
    let reduced = image::imageops::resize(
        image,
        w.div_ceil(BACKGROUND_REDUCTION),
        h.div_ceil(BACKGROUND_REDUCTION),
        FilterType::Nearest,
    );
    let closed = grayscale_close(&reduced, &Mask::square(BACKGROUND_CLOSE_RADIUS));
    let background = image::imageops::resize(&closed, w, h, FilterType::Triangle);

    Some(GrayImage::from_fn(w, h, |x, y| {
        let src = u32::from(image.get_pixel(x, y)[0]);
        let bg = u32::from(background.get_pixel(x, y)[0]).max(1);
        Luma([(src * BACKGROUND_LEVEL / bg).min(255) as u8])
    }))
}

/// Light box smoothing
pub fn smooth(image: &GrayImage) -> Option<GrayImage> {
    if is_empty(image) {
        return None;
    }
    Some(box_filter(image, SMOOTH_RADIUS, SMOOTH_RADIUS))
}

/// Binarize: below `threshold` is ink (0), everything else paper (255)
pub fn binarize(image: &GrayImage, threshold: u8) -> Option<GrayImage> {
    if is_empty(image) {
        return None;
    }
    Some(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if image.get_pixel(x, y)[0] < threshold { 0 } else { 255 }])
    }))
}

fn is_empty(image: &GrayImage) -> bool {
    image.width() == 0 || image.height() == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_square(size: u32) -> RgbaImage {
        RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_rotation_below_threshold_is_skipped() {
        let image = black_square(100);
        let rotated = rotate(image.clone(), 0.05);
        assert_eq!(rotated.as_raw(), image.as_raw());

        let rotated = rotate(image.clone(), -0.09);
        assert_eq!(rotated.as_raw(), image.as_raw());
    }

    #[test]
    fn test_rotation_above_threshold_is_applied() {
        let image = black_square(100);
        let rotated = rotate(image.clone(), 0.2);
        assert_eq!(rotated.dimensions(), image.dimensions());
        assert_ne!(rotated.as_raw(), image.as_raw());
        // uncovered corners are filled white
        assert!(rotated.pixels().any(|p| p[0] == 255));
    }

    #[test]
    fn test_gamma_defaults() {
        let curve = GammaCurve::default();
        assert_eq!(curve.black, 50);
        assert_eq!(curve.white, 120);
        assert!((curve.gamma - 1.0).abs() < f64::EPSILON);

        let lut = curve.lookup_table();
        assert_eq!(lut[0], 0);
        assert_eq!(lut[50], 0);
        assert_eq!(lut[85], 128);
        assert_eq!(lut[120], 255);
        assert_eq!(lut[200], 255);
    }

    #[test]
    fn test_invalid_gamma_curve_is_noop() {
        let image = GrayImage::from_pixel(4, 4, Luma([90]));
        let curve = GammaCurve {
            gamma: 1.0,
            black: 120,
            white: 50,
        };
        assert!(gamma_trc(&image, curve).is_none());
    }

    #[test]
    fn test_binarize_threshold() {
        let image = GrayImage::from_fn(3, 1, |x, _| Luma([[119, 120, 200][x as usize]]));
        let binary = binarize(&image, BINARY_THRESHOLD).unwrap();
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(1, 0)[0], 255);
        assert_eq!(binary.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_unsharp_mask_keeps_flat_areas() {
        let image = GrayImage::from_pixel(10, 10, Luma([100]));
        let sharpened = unsharp_mask(&image).unwrap();
        assert!(sharpened.pixels().all(|p| p[0] == 100));
    }

    #[test]
    fn test_background_normalization_flattens_gradient() {
        // paper brightening from left to right with one dark stroke
        let image = GrayImage::from_fn(64, 32, |x, y| {
            if (30..34).contains(&x) && (8..24).contains(&y) {
                Luma([20])
            } else {
                Luma([(120 + x) as u8])
            }
        });
        let normalized = normalize_background(&image).unwrap();
        let left = i32::from(normalized.get_pixel(4, 2)[0]);
        let right = i32::from(normalized.get_pixel(60, 2)[0]);
        assert!((left - right).abs() < 20, "left {left}, right {right}");
        assert!(normalized.get_pixel(31, 16)[0] < 100);
    }

    #[test]
    fn test_empty_image_stages_are_noops() {
        let empty = GrayImage::new(0, 0);
        assert!(unsharp_mask(&empty).is_none());
        assert!(normalize_background(&empty).is_none());
        assert!(smooth(&empty).is_none());
        assert!(binarize(&empty, BINARY_THRESHOLD).is_none());
    }

    #[test]
    fn test_pipeline_keeps_image_on_noop() {
        let image = GrayImage::from_pixel(2, 2, Luma([7]));
        let mut frames = DebugFrames::new();
        let out = Pipeline::new(image, Some(&mut frames))
            .then("nothing", |_| None)
            .then("invert", |img| Some(GrayImage::from_fn(2, 2, |x, y| Luma([255 - img.get_pixel(x, y)[0]]))))
            .finish();
        assert_eq!(out.get_pixel(0, 0)[0], 248);
        assert_eq!(frames.titles().collect::<Vec<_>>(), vec!["invert"]);
    }

    #[test]
    fn test_run_produces_binary_crop() {
        let image = RgbaImage::from_fn(80, 40, |x, _| {
            if (20..24).contains(&x) {
                Rgba([10, 10, 10, 255])
            } else {
                Rgba([230, 230, 230, 255])
            }
        });
        let mut frames = DebugFrames::new();
        let binary = Preprocessor::default().run(&image, Some(Rect::new(10, 5, 40, 30)), Some(&mut frames));

        assert_eq!(binary.dimensions(), (40, 30));
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(binary.get_pixel(11, 15)[0], 0);
        assert_eq!(binary.get_pixel(30, 15)[0], 255);
        assert_eq!(
            frames.titles().collect::<Vec<_>>(),
            vec![
                "crop",
                "grayscale",
                "gamma",
                "unsharp mask",
                "background normalization",
                "smooth",
                "binarize"
            ]
        );
    }

    #[test]
    fn test_run_without_crop_keeps_full_image() {
        let image = RgbaImage::from_pixel(30, 20, Rgba([230, 230, 230, 255]));
        let mut frames = DebugFrames::new();
        let binary = Preprocessor::default().run(&image, None, Some(&mut frames));

        assert_eq!(binary.dimensions(), (30, 20));
        assert_eq!(frames.titles().next(), Some("grayscale"));
        assert_eq!(frames.len(), 6);
    }
}
