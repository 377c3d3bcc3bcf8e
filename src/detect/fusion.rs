//! Classification fusion.
//!
//! Runs a classifier over a region of interest and turns its normalized
//! predictions into pixel-space `Classification`s in frame coordinates.
//!
//! The confidence floor is applied here, once, against the prediction score.
//! Background classes are dropped here as well.

use anyhow::{anyhow, Result};

use super::backend::{Classifier, Prediction};
use super::labels::LabelMap;
use crate::frame::{DecodedFrame, Region};

/// A labelled box in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: String,
    pub score: f32,
    pub region: Region,
}

/// Classify `roi` of `frame` (or the whole frame when `roi` is `None`).
///
/// The ROI is clipped to the frame; an ROI entirely outside the frame is
/// classified as the whole frame.
pub fn classify(
    classifier: &dyn Classifier,
    frame: &DecodedFrame,
    roi: Option<&Region>,
    labels: &LabelMap,
    min_confidence: f32,
) -> Result<Vec<Classification>> {
    let bounds = frame.bounds();
    let area = roi
        .map(|roi| roi.intersect(&bounds))
        .filter(|area| !area.is_empty())
        .unwrap_or(bounds);

    let predictions = if area == bounds {
        classifier.predict(frame.image())?
    } else {
        let sub = frame.sub_image(&area)?;
        classifier.predict(&sub)?
    };

    Ok(fuse(predictions, &area, labels, min_confidence))
}

/// Filter and denormalize raw predictions made on `area`.
pub fn fuse(
    predictions: Vec<Prediction>,
    area: &Region,
    labels: &LabelMap,
    min_confidence: f32,
) -> Vec<Classification> {
    predictions
        .into_iter()
        .filter(|prediction| !labels.is_background(prediction.class_index))
        .filter(|prediction| prediction.score >= min_confidence)
        .filter_map(|prediction| {
            let region = denormalize(&prediction.bbox, area).ok()?;
            Some(Classification {
                label: prediction
                    .label
                    .unwrap_or_else(|| labels.label(prediction.class_index)),
                score: prediction.score,
                region,
            })
        })
        .collect()
}

/// Map a normalized `[top, left, bottom, right]` box onto `area`.
fn denormalize(bbox: &[f32; 4], area: &Region) -> Result<Region> {
    if bbox.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("non-finite box {:?}", bbox));
    }
    let clamp = |v: f32| v.clamp(0.0, 1.0);
    let (top, left) = (clamp(bbox[0]), clamp(bbox[1]));
    let (bottom, right) = (clamp(bbox[2]).max(top), clamp(bbox[3]).max(left));

    let w = area.width as f32;
    let h = area.height as f32;
    let x0 = (left * w).round() as i32;
    let y0 = (top * h).round() as i32;
    let x1 = (right * w).round() as i32;
    let y1 = (bottom * h).round() as i32;
    Ok(Region::new(
        area.x + x0,
        area.y + y0,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ))
}
