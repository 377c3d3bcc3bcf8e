use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{Classifier, Prediction};

/// Stub classifier for testing. Returns the same predictions for every image.
pub struct StubClassifier {
    predictions: Vec<Prediction>,
    calls: AtomicU64,
    last_input_size: Mutex<Option<(u32, u32)>>,
}

impl StubClassifier {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self {
            predictions,
            calls: AtomicU64::new(0),
            last_input_size: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Dimensions of the most recent image passed to `predict`.
    pub fn last_input_size(&self) -> Option<(u32, u32)> {
        match self.last_input_size.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<Prediction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.last_input_size.lock() {
            Ok(mut guard) => *guard = Some(image.dimensions()),
            Err(poisoned) => *poisoned.into_inner() = Some(image.dimensions()),
        }
        Ok(self.predictions.clone())
    }
}
