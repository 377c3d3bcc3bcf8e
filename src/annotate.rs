//! Frame annotation.
//!
//! Motion regions are outlined in yellow at a fixed thickness. Classification
//! boxes are outlined in red with a thickness that grows with frame height,
//! and carry a white label box anchored above the box. Label text uses a 5x7
//! bitmap font scaled against `REFERENCE_HEIGHT` so it stays legible from
//! CIF up to 4K.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Classification;
use crate::frame::{MotionRegion, Region};

/// Frame height at which label text is drawn at its base scale.
pub const REFERENCE_HEIGHT: u32 = 500;

pub const MOTION_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const MOTION_THICKNESS: u32 = 2;
pub const CLASSIFICATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_FILL: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// Draw motion rectangles and classification boxes onto `image`.
pub fn annotate(
    image: &mut RgbImage,
    motion: &[MotionRegion],
    classifications: &[Classification],
) {
    draw_motion(image, motion);
    draw_classifications(image, classifications);
}

pub fn draw_motion(image: &mut RgbImage, regions: &[MotionRegion]) {
    for region in regions {
        draw_box(image, region, MOTION_COLOR, MOTION_THICKNESS);
    }
}

pub fn draw_classifications(image: &mut RgbImage, classifications: &[Classification]) {
    let thickness = classification_thickness(image.height());
    let scale = text_scale(image.height());
    for classification in classifications {
        draw_box(image, &classification.region, CLASSIFICATION_COLOR, thickness);
        let text = format!(
            "{} {:.0}%",
            classification.label,
            classification.score * 100.0
        );
        draw_label_above(image, &classification.region, &text, thickness, scale);
    }
}

/// Stroke width for classification boxes.
pub fn classification_thickness(height: u32) -> u32 {
    height / REFERENCE_HEIGHT + 1
}

/// Pixel multiplier for the bitmap font.
pub fn text_scale(height: u32) -> u32 {
    ((height as f32 * 2.0 / REFERENCE_HEIGHT as f32).round() as u32).max(1)
}

/// Outline `region`, growing the stroke inward. Parts outside the image are
/// clipped.
fn draw_box(image: &mut RgbImage, region: &Region, color: Rgb<u8>, thickness: u32) {
    let bounds = Region::full(image.width(), image.height());
    for inset in 0..thickness {
        let width = region.width.saturating_sub(2 * inset);
        let height = region.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let ring = Region::new(
            region.x + inset as i32,
            region.y + inset as i32,
            width,
            height,
        );
        if !ring.overlaps(&bounds) {
            continue;
        }
        draw_hollow_rect_mut(image, to_rect(&ring), color);
    }
}

fn draw_label_above(image: &mut RgbImage, anchor: &Region, text: &str, thickness: u32, scale: u32) {
    let margin = 2 * thickness;
    let text_width = text.chars().count() as u32 * GLYPH_ADVANCE * scale;
    let text_height = GLYPH_HEIGHT * scale;
    let box_width = text_width + 2 * margin;
    let box_height = text_height + 2 * margin;

    let mut top = anchor.y - box_height as i32;
    if top < 0 {
        top = anchor.y.max(0);
    }
    let label = Region::new(anchor.x, top, box_width, box_height);
    let bounds = Region::full(image.width(), image.height());
    let visible = label.intersect(&bounds);
    if visible.is_empty() {
        return;
    }
    draw_filled_rect_mut(image, to_rect(&visible), LABEL_FILL);
    draw_hollow_rect_mut(image, to_rect(&visible), CLASSIFICATION_COLOR);
    draw_text(
        image,
        anchor.x + margin as i32,
        top + margin as i32,
        text,
        scale,
        LABEL_TEXT,
    );
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, scale: u32, color: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let scale = scale as i32;
    for ch in text.chars().flat_map(char::to_uppercase) {
        let glyph = glyph_bits(ch);
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                let px0 = x + col as i32 * scale;
                let py0 = y + row as i32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (px, py) = (px0 + dx, py0 + dy);
                        if px >= 0 && px < width && py >= 0 && py < height {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE as i32 * scale;
    }
}

fn to_rect(region: &Region) -> Rect {
    Rect::at(region.x, region.y).of_size(region.width.max(1), region.height.max(1))
}

/// 5x7 glyphs, one row per byte, MSB of the low five bits on the left.
/// Unsupported characters render as `?`.
fn glyph_bits(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}
