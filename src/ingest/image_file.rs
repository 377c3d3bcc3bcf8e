//! Static image frame source.
//!
//! `ImageSource` decodes one local image file, emits it as a single frame and
//! then idles until the device is cancelled. Useful for testing a filter
//! configuration against a captured still.
//!
//! The image source MUST NOT:
//! - Fetch remote URLs
//! - Re-emit the frame (one image is one event)

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};

use super::{CancellationToken, FrameSink, FrameSource};
use crate::config::DeviceConfig;
use crate::frame::DecodedFrame;

/// One-shot source backed by a local image file.
pub struct ImageSource {
    device_name: String,
    path: PathBuf,
    frames_emitted: u64,
}

impl ImageSource {
    pub fn new(device: &DeviceConfig) -> Result<Self> {
        if device.source.contains("://") {
            return Err(anyhow!(
                "image provider only supports local paths, got '{}'",
                device.source
            ));
        }
        Ok(Self {
            device_name: device.name.clone(),
            path: PathBuf::from(&device.source),
            frames_emitted: 0,
        })
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }
}

impl FrameSource for ImageSource {
    fn name(&self) -> &'static str {
        "image"
    }

    fn run(&mut self, cancel: &CancellationToken, sink: &mut FrameSink<'_>) -> Result<()> {
        let image = image::open(&self.path)
            .with_context(|| format!("open image {}", self.path.display()))?
            .into_rgb8();
        log::info!(
            "ImageSource[{}]: loaded {} ({}x{})",
            self.device_name,
            self.path.display(),
            image.width(),
            image.height()
        );
        self.frames_emitted += 1;
        sink(DecodedFrame::new(image, SystemTime::now()))?;
        cancel.wait();
        Ok(())
    }
}
