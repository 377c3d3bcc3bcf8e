//! Decoded frames and pixel-space rectangles.
//!
//! - `DecodedFrame`: one decoded RGB bitmap plus its arrival time. Exactly one is in
//!   flight per device; it moves from the source into the filter by value.
//! - `Region`: axis-aligned rectangle in frame-pixel coordinates, used for motion
//!   regions, classification boxes and crop rectangles.

use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use serde::Deserialize;

/// Bytes per pixel of the decoded representation (packed RGB).
pub const BYTES_PER_PIXEL: u32 = 3;

// ----------------------------------------------------------------------------
// Region
// ----------------------------------------------------------------------------

/// Axis-aligned rectangle in pixel coordinates.
///
/// `x`/`y` may be negative for boxes derived from classifier output that
/// extend past the frame edge; drawing clips them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A motion region is a plain pixel rectangle.
pub type MotionRegion = Region;

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole `width` x `height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    /// Intersection of two regions; empty (all zero) when they do not overlap.
    pub fn intersect(&self, other: &Region) -> Region {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Region::default();
        }
        Region::new(left, top, (right - left) as u32, (bottom - top) as u32)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        !self.intersect(other).is_empty()
    }
}

// ----------------------------------------------------------------------------
// DecodedFrame
// ----------------------------------------------------------------------------

/// A decoded bitmap and its arrival timestamp.
///
/// Not `Clone`: ownership moves stage to stage so a device never aliases a frame.
#[derive(Debug)]
pub struct DecodedFrame {
    image: RgbImage,
    pub timestamp: SystemTime,
}

impl DecodedFrame {
    pub fn new(image: RgbImage, timestamp: SystemTime) -> Self {
        Self { image, timestamp }
    }

    /// Decode a compressed image (JPEG, PNG, BMP) stamped with the current time.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode frame")?;
        Ok(Self::new(image.into_rgb8(), SystemTime::now()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.image.width() as usize * BYTES_PER_PIXEL as usize
    }

    pub fn bounds(&self) -> Region {
        Region::full(self.width(), self.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Copy of the pixels inside `region`, which must lie within the frame.
    pub fn sub_image(&self, region: &Region) -> Result<RgbImage> {
        let clipped = region.intersect(&self.bounds());
        if clipped != *region || region.is_empty() {
            return Err(anyhow!(
                "region {:?} is not inside {}x{} frame",
                region,
                self.width(),
                self.height()
            ));
        }
        Ok(imageops::crop_imm(
            &self.image,
            region.x as u32,
            region.y as u32,
            region.width,
            region.height,
        )
        .to_image())
    }

    /// Crop to the intersection of `crop` and the frame bounds.
    ///
    /// An empty intersection keeps the whole frame.
    pub fn crop_to(self, crop: &Region) -> DecodedFrame {
        let bounds = self.bounds();
        let area = crop.intersect(&bounds);
        if area.is_empty() || area == bounds {
            return self;
        }
        let image = imageops::crop_imm(
            &self.image,
            area.x as u32,
            area.y as u32,
            area.width,
            area.height,
        )
        .to_image();
        DecodedFrame::new(image, self.timestamp)
    }
}
