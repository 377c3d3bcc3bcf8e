//! camwatch: network camera watcher
//!
//! This crate watches network cameras and raises events when something happens
//! in front of them.
//!
//! # Pipeline
//!
//! Each configured device runs its own event loop on its own thread:
//!
//! 1. **Ingest**: an MJPEG multipart HTTP stream (or a still image) is cut into
//!    JPEG payloads and decoded, one frame at a time.
//! 2. **Crop**: the frame is cropped to the device's crop rectangle, if any.
//! 3. **Motion**: a background-subtraction model yields moving regions.
//! 4. **Classification**: an object classifier labels what is in the frame.
//! 5. **Event**: matching frames are annotated, saved as `image{N}.bmp` and a
//!    throttled webhook notification is queued.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and pixel rectangles
//! - `ingest`: frame sources, multipart demuxer, provider registry
//! - `detect`: motion detector, classifier collaborators, fusion, labels
//! - `annotate`: drawing of motion and classification boxes
//! - `storage`: persistence of annotated frames
//! - `notify`: webhook notifications, background queue, throttle
//! - `filter`: per-device decision pipeline
//! - `device`: per-device event loop and thread handles
//! - `config`: configuration loading

pub mod annotate;
pub mod config;
pub mod detect;
pub mod device;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod storage;

pub use config::{
    CamwatchConfig, ClassifierKind, ClassifierSettings, DeviceConfig, StreamSettings,
};
pub use detect::{
    Classification, Classifier, ClassifierDisconnected, LabelMap, MotionDetector, Prediction,
    SharedClassifier,
};
pub use device::{
    spawn_device, spawn_devices, DeviceEventLoop, DeviceHandle, DeviceState, DeviceStats,
    PipelineContext,
};
pub use filter::{FrameFilter, FrameOutcome, MatchReport};
pub use frame::{DecodedFrame, MotionRegion, Region};
pub use ingest::{
    CancellationToken, FrameDemuxer, FrameSource, ImageSource, MjpegSource, MjpegStream,
    ProtocolError, ProviderRegistry,
};
pub use notify::{
    NotificationQueue, NotificationSink, NotificationThrottle, Notifier, WebhookNotifier,
};
pub use storage::{FilesystemSink, LocalFilesystem, PersistenceCounter};
