//! Motion detection and object classification.
//!
//! - `MotionDetector`: per-device background model producing motion regions
//! - `Classifier`: object classifier collaborator, with stub, remote (HTTP) and
//!   optional tract (ONNX) implementations
//! - `fusion`: turns classifier output into labelled pixel boxes

mod backend;
pub mod backends;
pub mod fusion;
pub mod labels;
pub mod motion;

pub use backend::{Classifier, ClassifierDisconnected, Prediction, SharedClassifier};
pub use backends::{RemoteClassifier, StubClassifier};
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use fusion::{classify, Classification};
pub use labels::LabelMap;
pub use motion::MotionDetector;
