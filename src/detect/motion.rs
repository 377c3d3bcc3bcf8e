//! Background-subtraction motion detector.
//!
//! `MotionDetector` keeps a per-pixel Gaussian mixture model of the grayscale
//! background. Every frame updates the model, whether or not it produced
//! motion, so gradual lighting change is absorbed.
//!
//! Pipeline per frame:
//! - Update the model and classify each pixel as foreground or background
//! - Threshold to a hard binary mask
//! - Erode with a 9x9 square, then dilate three times with the same square
//! - Take the bounding rectangle of each outer contour
//!
//! Constants are fixed; they are not configuration.

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

use crate::frame::MotionRegion;

/// Frames of history the learning rate converges to.
pub const HISTORY: u32 = 500;
/// Squared Mahalanobis distance under which a pixel is explained by a
/// background mode.
pub const VAR_THRESHOLD: f32 = 16.0;
/// Squared distance under which a pixel is assigned to an existing mode.
const VAR_THRESHOLD_GEN: f32 = 9.0;
/// Share of total weight that counts as background.
const BACKGROUND_RATIO: f32 = 0.9;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
const MODES: usize = 3;

pub const MASK_THRESHOLD: u8 = 25;
/// Chebyshev radius of the 9x9 square structuring element.
pub const KERNEL_RADIUS: u8 = 4;
pub const DILATE_ITERATIONS: usize = 3;

const FOREGROUND: u8 = 255;

#[derive(Clone, Copy, Debug, Default)]
struct Mode {
    weight: f32,
    mean: f32,
    var: f32,
}

/// Running background model for one device.
#[derive(Default)]
pub struct MotionDetector {
    width: u32,
    height: u32,
    model: Vec<[Mode; MODES]>,
    frames_seen: u32,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames folded into the model since it was last seeded.
    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    /// Update the model with `image` and return the moving regions.
    ///
    /// The first frame (or the first after a resolution change) only seeds
    /// the model and yields no regions.
    pub fn apply(&mut self, image: &RgbImage) -> Vec<MotionRegion> {
        let gray = imageops::grayscale(image);
        if self.model.is_empty() || gray.width() != self.width || gray.height() != self.height {
            self.seed(&gray);
            return Vec::new();
        }

        self.frames_seen = self.frames_seen.saturating_add(1);
        let alpha = 1.0 / (2 * self.frames_seen).min(HISTORY) as f32;

        let mut mask = GrayImage::new(self.width, self.height);
        let mut any_foreground = false;
        for (x, y, pixel) in gray.enumerate_pixels() {
            let index = (y * self.width + x) as usize;
            if update_pixel(&mut self.model[index], pixel[0] as f32, alpha) {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
                any_foreground = true;
            }
        }
        if !any_foreground {
            return Vec::new();
        }

        let mask = threshold(&mask, MASK_THRESHOLD, ThresholdType::Binary);
        let mut mask = erode(&mask, Norm::LInf, KERNEL_RADIUS);
        for _ in 0..DILATE_ITERATIONS {
            mask = dilate(&mask, Norm::LInf, KERNEL_RADIUS);
        }
        bounding_regions(&mask)
    }

    fn seed(&mut self, gray: &GrayImage) {
        self.width = gray.width();
        self.height = gray.height();
        self.model = gray
            .pixels()
            .map(|pixel| {
                let mut modes = [Mode::default(); MODES];
                modes[0] = Mode {
                    weight: 1.0,
                    mean: pixel[0] as f32,
                    var: VAR_INIT,
                };
                modes
            })
            .collect();
        self.frames_seen = 1;
    }
}

/// Fold one sample into a pixel's mixture. Returns true when the sample is
/// foreground. Modes stay sorted by descending weight.
fn update_pixel(modes: &mut [Mode; MODES], value: f32, alpha: f32) -> bool {
    let mut background = false;
    let mut matched = None;
    let mut cumulative = 0.0;
    for (k, mode) in modes.iter().enumerate() {
        if mode.weight <= 0.0 {
            break;
        }
        let diff = value - mode.mean;
        let dist2 = diff * diff;
        if cumulative < BACKGROUND_RATIO && dist2 < VAR_THRESHOLD * mode.var {
            background = true;
        }
        cumulative += mode.weight;
        if matched.is_none() && dist2 < VAR_THRESHOLD_GEN * mode.var {
            matched = Some(k);
        }
    }

    for (k, mode) in modes.iter_mut().enumerate() {
        let ownership = if matched == Some(k) { 1.0 } else { 0.0 };
        mode.weight += alpha * (ownership - mode.weight);
    }

    match matched {
        Some(k) => {
            let mode = &mut modes[k];
            let rho = alpha / mode.weight.max(alpha);
            let diff = value - mode.mean;
            mode.mean += rho * diff;
            mode.var = (mode.var + rho * (diff * diff - mode.var)).clamp(VAR_MIN, VAR_MAX);
        }
        None => {
            modes[MODES - 1] = Mode {
                weight: alpha,
                mean: value,
                var: VAR_INIT,
            };
        }
    }

    let total: f32 = modes.iter().map(|mode| mode.weight).sum();
    if total > 0.0 {
        for mode in modes.iter_mut() {
            mode.weight /= total;
        }
    }
    modes.sort_by(|a, b| b.weight.total_cmp(&a.weight));

    !background
}

fn bounding_regions(mask: &GrayImage) -> Vec<MotionRegion> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .filter_map(|contour| {
            let first = contour.points.first()?;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
            for point in &contour.points {
                min_x = min_x.min(point.x);
                min_y = min_y.min(point.y);
                max_x = max_x.max(point.x);
                max_y = max_y.max(point.y);
            }
            Some(MotionRegion::new(
                min_x,
                min_y,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scene(square: Option<(u32, u32, u32)>) -> RgbImage {
        let mut image = RgbImage::from_pixel(160, 120, Rgb([60, 60, 60]));
        if let Some((x0, y0, side)) = square {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    image.put_pixel(x, y, Rgb([230, 230, 230]));
                }
            }
        }
        image
    }

    #[test]
    fn first_frame_and_static_scene_yield_nothing() {
        let mut detector = MotionDetector::new();
        for _ in 0..10 {
            assert!(detector.apply(&scene(None)).is_empty());
        }
        assert_eq!(detector.frames_seen(), 10);
    }

    #[test]
    fn moving_block_yields_one_region_covering_it() {
        let mut detector = MotionDetector::new();
        for _ in 0..20 {
            detector.apply(&scene(None));
        }
        let regions = detector.apply(&scene(Some((40, 40, 40))));
        assert_eq!(regions.len(), 1);
        let region = regions[0];
        assert!(region.left() <= 44 && region.top() <= 44);
        assert!(region.right() >= 76 && region.bottom() >= 76);
    }

    #[test]
    fn parked_object_is_absorbed_into_background() {
        let mut detector = MotionDetector::new();
        for _ in 0..20 {
            detector.apply(&scene(None));
        }
        let parked = scene(Some((60, 30, 40)));
        assert_eq!(detector.apply(&parked).len(), 1);

        let absorbed_after = (1..=50).find(|_| detector.apply(&parked).is_empty());
        assert!(absorbed_after.is_some(), "parked object never absorbed");
        for _ in 0..10 {
            assert!(detector.apply(&parked).is_empty());
        }
    }

    #[test]
    fn isolated_pixel_noise_is_suppressed() {
        let mut detector = MotionDetector::new();
        for _ in 0..20 {
            detector.apply(&scene(None));
        }
        let mut noisy = scene(None);
        noisy.put_pixel(80, 60, Rgb([255, 255, 255]));
        noisy.put_pixel(10, 100, Rgb([0, 0, 0]));
        assert!(detector.apply(&noisy).is_empty());
    }

    #[test]
    fn resolution_change_reseeds() {
        let mut detector = MotionDetector::new();
        detector.apply(&scene(None));
        detector.apply(&scene(None));
        assert!(detector
            .apply(&RgbImage::from_pixel(32, 32, Rgb([200, 0, 0])))
            .is_empty());
        assert_eq!(detector.frames_seen(), 1);
    }
}
