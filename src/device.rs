//! Device event loop.
//!
//! One `DeviceEventLoop` runs per camera on its own thread. It is responsible for:
//! - Building a frame source for the device's provider kind on each attempt
//! - Cropping each frame and feeding it to the device's `FrameFilter`
//! - Reconnecting after stream end or failure, after a cancellable delay
//! - Stopping promptly when its `CancellationToken` fires
//!
//! It MUST NOT:
//! - Queue frames (one frame is in flight at a time)
//! - Share its filter or background model with another device

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::config::{CamwatchConfig, DeviceConfig, StreamSettings};
use crate::detect::{LabelMap, SharedClassifier};
use crate::filter::{FrameFilter, FrameOutcome};
use crate::frame::DecodedFrame;
use crate::ingest::{CancellationToken, FrameSource, ProviderRegistry};
use crate::notify::Notifier;
use crate::storage::{FilesystemSink, LocalFilesystem};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Starting,
    Streaming,
    Reconnecting,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceStats {
    pub state: DeviceState,
    pub reconnects: u64,
    pub frames_processed: u64,
    pub events: u64,
    pub last_error: Option<String>,
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self {
            state: DeviceState::Starting,
            reconnects: 0,
            frames_processed: 0,
            events: 0,
            last_error: None,
        }
    }
}

/// Collaborators shared by every device of a process.
#[derive(Clone)]
pub struct PipelineContext {
    pub providers: Arc<ProviderRegistry>,
    pub classifier: Option<SharedClassifier>,
    pub labels: Arc<LabelMap>,
    pub filesystem: Arc<dyn FilesystemSink>,
    pub notifier: Option<Notifier>,
    pub stream: StreamSettings,
    pub reconnect_delay: Duration,
    pub min_confidence: f32,
}

impl PipelineContext {
    pub fn from_config(config: &CamwatchConfig) -> Self {
        Self {
            providers: Arc::new(ProviderRegistry::with_defaults()),
            classifier: None,
            labels: Arc::new(LabelMap::new()),
            filesystem: Arc::new(LocalFilesystem),
            notifier: None,
            stream: config.stream,
            reconnect_delay: config.reconnect_delay,
            min_confidence: config.classifier.min_confidence,
        }
    }

    fn build_filter(&self, device: &DeviceConfig) -> FrameFilter {
        let mut filter =
            FrameFilter::new(device, self.min_confidence).with_filesystem(self.filesystem.clone());
        if let Some(classifier) = &self.classifier {
            filter = filter.with_classifier(classifier.clone(), self.labels.clone());
        }
        if let Some(notifier) = &self.notifier {
            filter = filter.with_notifier(notifier.clone());
        }
        if filter.classifier_missing() {
            log::warn!(
                "DeviceEventLoop[{}]: object detection enabled but no classifier configured; stage skipped",
                device.name
            );
        }
        filter
    }
}

pub struct DeviceEventLoop {
    device: DeviceConfig,
    providers: Arc<ProviderRegistry>,
    stream: StreamSettings,
    reconnect_delay: Duration,
    filter: FrameFilter,
    stats: Arc<Mutex<DeviceStats>>,
}

impl DeviceEventLoop {
    pub fn new(device: DeviceConfig, ctx: &PipelineContext) -> Self {
        let filter = ctx.build_filter(&device);
        Self {
            device,
            providers: ctx.providers.clone(),
            stream: ctx.stream,
            reconnect_delay: ctx.reconnect_delay,
            filter,
            stats: Arc::new(Mutex::new(DeviceStats::default())),
        }
    }

    pub fn stats_handle(&self) -> Arc<Mutex<DeviceStats>> {
        self.stats.clone()
    }

    pub fn is_active(&self) -> bool {
        self.device.active
    }

    /// Connect, stream and reconnect until cancelled or the device is
    /// deactivated (unknown provider kind).
    pub fn run(&mut self, cancel: &CancellationToken) {
        let name = self.device.name.clone();
        while self.device.active && !cancel.is_cancelled() {
            update_stats(&self.stats, |stats| stats.state = DeviceState::Starting);
            let source = match self.providers.create(&self.device, &self.stream) {
                Ok(Some(source)) => Some(source),
                Ok(None) => {
                    log::warn!(
                        "DeviceEventLoop[{}]: unknown provider kind '{}'; device deactivated",
                        name,
                        self.device.format
                    );
                    self.device.active = false;
                    break;
                }
                Err(err) => {
                    log::warn!("DeviceEventLoop[{}]: cannot create source: {:#}", name, err);
                    record_error(&self.stats, &err);
                    None
                }
            };

            if let Some(source) = source {
                match self.stream_from(source, cancel) {
                    Ok(()) => log::info!("DeviceEventLoop[{}]: stream ended", name),
                    Err(err) => {
                        log::warn!("DeviceEventLoop[{}]: stream failed: {:#}", name, err);
                        record_error(&self.stats, &err);
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            update_stats(&self.stats, |stats| {
                stats.state = DeviceState::Reconnecting;
                stats.reconnects += 1;
            });
            log::info!(
                "DeviceEventLoop[{}]: reconnecting in {:?}",
                name,
                self.reconnect_delay
            );
            if cancel.wait_timeout(self.reconnect_delay) {
                break;
            }
        }
        update_stats(&self.stats, |stats| stats.state = DeviceState::Stopped);
        log::info!("DeviceEventLoop[{}]: stopped", name);
    }

    /// Run one source to completion. The source is dropped on every exit path.
    fn stream_from(
        &mut self,
        mut source: Box<dyn FrameSource>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!(
            "DeviceEventLoop[{}]: starting {} source",
            self.device.name,
            source.name()
        );
        let crop = self.device.crop;
        let filter = &mut self.filter;
        let stats = &self.stats;
        let mut streaming = false;
        let mut sink = |frame: DecodedFrame| -> Result<()> {
            if !streaming {
                streaming = true;
                update_stats(stats, |stats| stats.state = DeviceState::Streaming);
            }
            let frame = match crop {
                Some(crop) => frame.crop_to(&crop),
                None => frame,
            };
            let outcome = filter.process_frame(frame)?;
            let matched = matches!(outcome, FrameOutcome::Matched(_));
            if let FrameOutcome::Matched(report) = &outcome {
                log::info!(
                    "DeviceEventLoop[{}]: event ({} motion, {} classified, saved {:?}, notified {})",
                    filter.device(),
                    report.motion.len(),
                    report.classifications.len(),
                    report.saved,
                    report.notified
                );
            }
            update_stats(stats, |stats| {
                stats.frames_processed += 1;
                if matched {
                    stats.events += 1;
                }
            });
            Ok(())
        };
        source.run(cancel, &mut sink)
    }
}

/// Owner-side handle of a running device thread.
pub struct DeviceHandle {
    name: String,
    cancel: CancellationToken,
    stats: Arc<Mutex<DeviceStats>>,
    join: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> DeviceStats {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Signal the device to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Cancel and wait for the device thread to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("device thread '{}' panicked", self.name))?;
        }
        Ok(())
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{:#}", err);
        }
    }
}

/// Start one device on its own thread.
pub fn spawn_device(device: DeviceConfig, ctx: &PipelineContext) -> Result<DeviceHandle> {
    let name = device.name.clone();
    let cancel = CancellationToken::new();
    let mut event_loop = DeviceEventLoop::new(device, ctx);
    let stats = event_loop.stats_handle();
    let token = cancel.clone();
    let join = std::thread::Builder::new()
        .name(format!("camwatch-{}", name))
        .spawn(move || event_loop.run(&token))
        .with_context(|| format!("spawn device thread for {}", name))?;
    Ok(DeviceHandle {
        name,
        cancel,
        stats,
        join: Some(join),
    })
}

/// Start every active device. Devices configured inactive are skipped.
pub fn spawn_devices(devices: &[DeviceConfig], ctx: &PipelineContext) -> Result<Vec<DeviceHandle>> {
    let mut handles = Vec::new();
    for device in devices {
        if !device.active {
            log::info!("DeviceEventLoop[{}]: inactive in configuration, skipped", device.name);
            continue;
        }
        handles.push(spawn_device(device.clone(), ctx)?);
    }
    Ok(handles)
}

fn update_stats(stats: &Mutex<DeviceStats>, f: impl FnOnce(&mut DeviceStats)) {
    match stats.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

fn record_error(stats: &Mutex<DeviceStats>, err: &anyhow::Error) {
    let message = format!("{:#}", err);
    update_stats(stats, |stats| stats.last_error = Some(message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Instant;

    fn context() -> PipelineContext {
        PipelineContext {
            providers: Arc::new(ProviderRegistry::with_defaults()),
            classifier: None,
            labels: Arc::new(LabelMap::new()),
            filesystem: Arc::new(LocalFilesystem),
            notifier: None,
            stream: StreamSettings::default(),
            reconnect_delay: Duration::from_millis(10),
            min_confidence: 0.6,
        }
    }

    #[test]
    fn unknown_provider_deactivates_device() {
        let device = DeviceConfig {
            name: "odd".to_string(),
            format: "onvif".to_string(),
            source: "onvif://cam".to_string(),
            ..DeviceConfig::default()
        };
        let mut event_loop = DeviceEventLoop::new(device, &context());
        event_loop.run(&CancellationToken::new());
        assert!(!event_loop.is_active());
        let stats = event_loop.stats_handle();
        let stats = stats.lock().unwrap();
        assert_eq!(stats.state, DeviceState::Stopped);
        assert_eq!(stats.reconnects, 0);
    }

    #[test]
    fn image_device_streams_then_stops_on_cancel() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("still.png");
        RgbImage::from_pixel(64, 48, Rgb([10, 20, 30])).save(&path)?;
        let device = DeviceConfig {
            name: "still".to_string(),
            format: "image".to_string(),
            source: path.to_string_lossy().into_owned(),
            motion_detection: true,
            crop: Some(crate::frame::Region::new(0, 0, 32, 24)),
            ..DeviceConfig::default()
        };
        let handle = spawn_device(device, &context())?;

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().frames_processed == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.stats();
        assert_eq!(stats.state, DeviceState::Streaming);
        assert_eq!(stats.frames_processed, 1);

        handle.cancel();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_finished());
        assert_eq!(handle.stats().state, DeviceState::Stopped);
        handle.stop()
    }

    #[test]
    fn failing_source_reconnects_until_cancelled() -> Result<()> {
        let device = DeviceConfig {
            name: "gone".to_string(),
            format: "image".to_string(),
            source: "/nonexistent/camwatch/frame.png".to_string(),
            ..DeviceConfig::default()
        };
        let handle = spawn_device(device, &context())?;
        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().reconnects < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.stats();
        assert!(stats.reconnects >= 2);
        assert!(stats.last_error.is_some());
        handle.stop()
    }
}
