#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{Classifier, Prediction};

/// Local SSD-style object detector running an ONNX model through tract.
///
/// The model takes a `1 x H x W x 3` u8 image and produces four outputs:
/// boxes `[1, N, 4]` (top, left, bottom, right), classes `[1, N]`,
/// scores `[1, N]` and the detection count `[1]`.
///
/// The plan sits behind a mutex; only inference itself is serialized.
pub struct TractClassifier {
    model: Mutex<SimplePlan<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model: Mutex::new(model),
            width,
            height,
        })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized;
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
            &resized
        };
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, self.width as usize, 3),
            |(_, y, x, channel)| image.get_pixel(x as u32, y as u32)[channel],
        );
        input.into_tensor()
    }

    fn extract_predictions(outputs: TVec<TValue>) -> Result<Vec<Prediction>> {
        if outputs.len() < 4 {
            return Err(anyhow!("expected 4 model outputs, got {}", outputs.len()));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("box output tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("class output tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("score output tensor was not f32")?;
        let count = outputs[3]
            .to_array_view::<f32>()
            .context("count output tensor was not f32")?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0)
            .round()
            .max(0.0) as usize;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        let count = count.min(classes.len()).min(scores.len()).min(boxes.len() / 4);

        Ok((0..count)
            .map(|i| Prediction {
                class_index: classes[i].round().max(0.0) as u32,
                label: None,
                score: scores[i],
                bbox: [
                    boxes[i * 4],
                    boxes[i * 4 + 1],
                    boxes[i * 4 + 2],
                    boxes[i * 4 + 3],
                ],
            })
            .collect())
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<Prediction>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .lock()
            .map_err(|_| anyhow!("tract plan lock poisoned"))?
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Self::extract_predictions(outputs)
    }
}
