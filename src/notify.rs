//! Event notifications.
//!
//! - `NotificationSink`: delivers one event to a webhook URL
//! - `WebhookNotifier`: JSON POST over ureq
//! - `NotificationQueue`: background worker so a slow webhook never stalls a
//!   camera; delivery failures are logged and dropped
//! - `NotificationThrottle`: per-device cooldown gate

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

/// Minimum spacing between two notifications of one device.
pub const NOTIFICATION_COOLDOWN: Duration = Duration::from_secs(10 * 60);

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Notification delivery collaborator.
pub trait NotificationSink: Send + Sync {
    fn post_event(&self, url: &str, device: &str, timestamp: SystemTime) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Webhook
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub value1: String,
    pub value2: String,
    pub value3: String,
}

impl WebhookPayload {
    pub fn new(device: &str, timestamp: SystemTime) -> Self {
        let local: DateTime<Local> = timestamp.into();
        Self {
            value1: device.to_string(),
            value2: local.format("%Y-%m-%d %H:%M:%S").to_string(),
            value3: "value3".to_string(),
        }
    }
}

pub struct WebhookNotifier {
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(WEBHOOK_TIMEOUT).build(),
        }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for WebhookNotifier {
    fn post_event(&self, url: &str, device: &str, timestamp: SystemTime) -> Result<()> {
        let body = serde_json::to_string(&WebhookPayload::new(device, timestamp))
            .context("serialize webhook payload")?;
        self.agent
            .post(url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_string(&body)
            .map_err(|e| anyhow!("webhook {} failed: {}", url, e))?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Background queue
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct NotificationRequest {
    url: String,
    device: String,
    timestamp: SystemTime,
}

/// Cloneable producer side of a `NotificationQueue`.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: Sender<NotificationRequest>,
}

impl Notifier {
    /// Queue a notification. Returns false when the worker is gone.
    pub fn enqueue(&self, url: &str, device: &str, timestamp: SystemTime) -> bool {
        let request = NotificationRequest {
            url: url.to_string(),
            device: device.to_string(),
            timestamp,
        };
        match self.tx.send(request) {
            Ok(()) => true,
            Err(_) => {
                log::warn!("Notifier[{}]: worker stopped, notification dropped", device);
                false
            }
        }
    }
}

/// Owns the delivery thread. Dropping the queue waits for queued
/// notifications once every `Notifier` has been dropped.
pub struct NotificationQueue {
    notifier: Option<Notifier>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationQueue {
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("camwatch-notify".to_string())
            .spawn(move || deliver(sink, rx))
            .context("spawn notification worker")?;
        Ok(Self {
            notifier: Some(Notifier { tx }),
            worker: Some(worker),
        })
    }

    pub fn notifier(&self) -> Option<Notifier> {
        self.notifier.clone()
    }

    /// Close the queue and wait for pending deliveries.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.notifier = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("NotificationQueue: worker panicked");
            }
        }
    }
}

impl Drop for NotificationQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn deliver(sink: Arc<dyn NotificationSink>, rx: Receiver<NotificationRequest>) {
    for request in rx {
        match sink.post_event(&request.url, &request.device, request.timestamp) {
            Ok(()) => log::info!("NotificationQueue[{}]: event posted", request.device),
            Err(err) => log::warn!(
                "NotificationQueue[{}]: delivery failed: {:#}",
                request.device,
                err
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Throttle
// ----------------------------------------------------------------------------

/// Cooldown gate. The baseline is taken when the gate opens, before any send
/// completes, so two overlapping events cannot both pass.
#[derive(Clone, Debug)]
pub struct NotificationThrottle {
    cooldown: Duration,
    last: Option<Instant>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// Open the gate if more than `cooldown` has passed since it last opened.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) <= self.cooldown {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last
    }
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(NOTIFICATION_COOLDOWN)
    }
}
