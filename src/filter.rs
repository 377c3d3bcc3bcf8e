//! Per-device frame filter.
//!
//! `FrameFilter` decides, frame by frame, whether something happened:
//! - Motion stage (when enabled): no motion regions means the frame is discarded
//! - Classification stage (when enabled): no classification above the floor
//!   means the frame is discarded
//! - Otherwise the frame is annotated, persisted when a folder is configured
//!   and a notification is queued when one is configured and the cooldown
//!   has expired
//!
//! The filter owns the device's background model, persistence counter and
//! notification throttle; it lives for one device run, across reconnects.
//! Classification runs over the whole frame.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::annotate;
use crate::config::DeviceConfig;
use crate::detect::{
    classify, Classification, ClassifierDisconnected, LabelMap, MotionDetector, SharedClassifier,
};
use crate::frame::{DecodedFrame, MotionRegion};
use crate::notify::{NotificationThrottle, Notifier, NOTIFICATION_COOLDOWN};
use crate::storage::{FilesystemSink, LocalFilesystem, PersistenceCounter};

/// What the filter did with one frame.
#[derive(Debug, PartialEq)]
pub enum FrameOutcome {
    /// Neither stage is enabled.
    Ignored,
    /// An enabled stage found nothing.
    Discarded,
    Matched(MatchReport),
}

#[derive(Debug, Default, PartialEq)]
pub struct MatchReport {
    pub motion: Vec<MotionRegion>,
    pub classifications: Vec<Classification>,
    pub saved: Option<PathBuf>,
    pub notified: bool,
}

pub struct FrameFilter {
    device: String,
    motion_enabled: bool,
    classification_enabled: bool,
    folder: Option<PathBuf>,
    notification: Option<String>,
    min_confidence: f32,
    motion: MotionDetector,
    classifier: Option<SharedClassifier>,
    labels: Arc<LabelMap>,
    filesystem: Arc<dyn FilesystemSink>,
    notifier: Option<Notifier>,
    counter: PersistenceCounter,
    throttle: NotificationThrottle,
}

impl FrameFilter {
    pub fn new(device: &DeviceConfig, min_confidence: f32) -> Self {
        Self {
            device: device.name.clone(),
            motion_enabled: device.motion_detection,
            classification_enabled: device.object_detection,
            folder: device.folder.clone(),
            notification: device.notification.clone(),
            min_confidence,
            motion: MotionDetector::new(),
            classifier: None,
            labels: Arc::new(LabelMap::new()),
            filesystem: Arc::new(LocalFilesystem),
            notifier: None,
            counter: PersistenceCounter::new(),
            throttle: NotificationThrottle::new(NOTIFICATION_COOLDOWN),
        }
    }

    pub fn with_classifier(mut self, classifier: SharedClassifier, labels: Arc<LabelMap>) -> Self {
        self.classifier = Some(classifier);
        self.labels = labels;
        self
    }

    pub fn with_filesystem(mut self, filesystem: Arc<dyn FilesystemSink>) -> Self {
        self.filesystem = filesystem;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.throttle = NotificationThrottle::new(cooldown);
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// True when object detection is configured but no classifier is attached,
    /// in which case the stage is skipped.
    pub fn classifier_missing(&self) -> bool {
        self.classification_enabled && self.classifier.is_none()
    }

    pub fn process_frame(&mut self, frame: DecodedFrame) -> Result<FrameOutcome> {
        self.process_frame_at(frame, Instant::now())
    }

    /// Run one frame through the pipeline with `now` as the throttle clock.
    ///
    /// Errors are device-level failures: a disconnected classifier or a
    /// failed write of the annotated frame.
    pub fn process_frame_at(
        &mut self,
        mut frame: DecodedFrame,
        now: Instant,
    ) -> Result<FrameOutcome> {
        let classification_active = self.classification_enabled && self.classifier.is_some();
        if !self.motion_enabled && !classification_active {
            return Ok(FrameOutcome::Ignored);
        }

        let motion = if self.motion_enabled {
            let regions = self.motion.apply(frame.image());
            if regions.is_empty() {
                return Ok(FrameOutcome::Discarded);
            }
            regions
        } else {
            Vec::new()
        };

        let classifications = if classification_active {
            let found = self.run_classifier(&frame)?;
            if found.is_empty() {
                log::debug!(
                    "FrameFilter[{}]: {} motion regions, nothing classified",
                    self.device,
                    motion.len()
                );
                return Ok(FrameOutcome::Discarded);
            }
            found
        } else {
            Vec::new()
        };

        log::debug!(
            "FrameFilter[{}]: {} motion regions, {} classifications",
            self.device,
            motion.len(),
            classifications.len()
        );
        annotate::annotate(frame.image_mut(), &motion, &classifications);

        let saved = match &self.folder {
            Some(folder) => Some(self.counter.persist(
                folder,
                self.filesystem.as_ref(),
                frame.image(),
            )?),
            None => None,
        };

        let mut notified = false;
        if let (Some(url), Some(notifier)) = (&self.notification, &self.notifier) {
            if self.throttle.try_acquire(now) {
                notified = notifier.enqueue(url, &self.device, frame.timestamp);
            }
        }

        Ok(FrameOutcome::Matched(MatchReport {
            motion,
            classifications,
            saved,
            notified,
        }))
    }

    /// Classifier failures count as "nothing found" except a disconnect,
    /// which is handed back to the device loop.
    fn run_classifier(&self, frame: &DecodedFrame) -> Result<Vec<Classification>> {
        let Some(classifier) = &self.classifier else {
            return Ok(Vec::new());
        };
        match classify(classifier.as_ref(), frame, None, &self.labels, self.min_confidence) {
            Ok(found) => Ok(found),
            Err(err) if err.is::<ClassifierDisconnected>() => Err(err),
            Err(err) => {
                log::warn!(
                    "FrameFilter[{}]: classification failed, treating as empty: {:#}",
                    self.device,
                    err
                );
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::SystemTime;

    #[test]
    fn no_stage_enabled_is_ignored() -> Result<()> {
        let device = DeviceConfig {
            name: "idle".to_string(),
            source: "x".to_string(),
            ..DeviceConfig::default()
        };
        let mut filter = FrameFilter::new(&device, 0.6);
        let frame = DecodedFrame::new(RgbImage::new(8, 8), SystemTime::now());
        assert_eq!(filter.process_frame(frame)?, FrameOutcome::Ignored);
        Ok(())
    }

    #[test]
    fn object_detection_without_classifier_is_skipped() -> Result<()> {
        let device = DeviceConfig {
            name: "cam".to_string(),
            source: "x".to_string(),
            object_detection: true,
            ..DeviceConfig::default()
        };
        let mut filter = FrameFilter::new(&device, 0.6);
        assert!(filter.classifier_missing());
        let frame = DecodedFrame::new(RgbImage::new(8, 8), SystemTime::now());
        assert_eq!(filter.process_frame(frame)?, FrameOutcome::Ignored);
        Ok(())
    }
}
