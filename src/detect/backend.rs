use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

/// One raw detection as reported by a classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    /// Class index in the classifier's label space.
    pub class_index: u32,
    /// Label resolved by the classifier itself, if it knows one.
    pub label: Option<String>,
    pub score: f32,
    /// Normalized box as `[top, left, bottom, right]`, each in 0..1.
    pub bbox: [f32; 4],
}

/// Object classifier collaborator.
///
/// Implementations receive the region of interest as an owned RGB image and
/// report boxes normalized to that image. One instance is shared by every
/// device, so `predict` takes `&self` and concurrent calls must not wait on
/// each other. Implementations MUST NOT:
/// - Retain the image beyond the `predict` call
/// - Apply frame-level coordinate offsets (fusion does that)
/// - Hold a lock across a network round-trip
pub trait Classifier: Send + Sync {
    /// Classifier identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one image.
    ///
    /// Return `ClassifierDisconnected` (wrapped in `anyhow::Error`) when the
    /// classifier endpoint is unreachable; the device loop treats it as fatal
    /// for the current connection.
    fn predict(&self, image: &RgbImage) -> Result<Vec<Prediction>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Classifier handle shared by every device of a process.
pub type SharedClassifier = Arc<dyn Classifier>;

/// The classifier endpoint went away. Callers detect it with
/// `anyhow::Error::is::<ClassifierDisconnected>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierDisconnected {
    pub classifier: String,
    pub reason: String,
}

impl ClassifierDisconnected {
    pub fn new(classifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            classifier: classifier.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ClassifierDisconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "classifier '{}' disconnected: {}",
            self.classifier, self.reason
        )
    }
}

impl std::error::Error for ClassifierDisconnected {}
