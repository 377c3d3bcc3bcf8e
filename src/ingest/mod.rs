//! Frame ingestion sources.
//!
//! This module provides the sources that feed decoded frames into a device pipeline:
//! - MJPEG multipart HTTP streams (network cameras)
//! - Static image files
//!
//! Sources are constructed through a `ProviderRegistry` keyed by provider kind.
//! Every source is responsible for:
//! - Observing the device's `CancellationToken` at each blocking read
//! - Handing each decoded frame to the consumer synchronously, one at a time
//! - Releasing its connection or file handle on every exit path (by drop)
//!
//! A source MUST NOT queue frames internally; backpressure comes from the
//! consumer blocking the read loop.

pub mod byte_search;
pub mod image_file;
pub mod mjpeg;
pub mod registry;

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::frame::DecodedFrame;

pub use image_file::ImageSource;
pub use mjpeg::{FrameDemuxer, MjpegSource, MjpegStats, MjpegStream, ProtocolError};
pub use registry::{ProviderFactory, ProviderRegistry};

/// Consumer callback for decoded frames. An error aborts the current connection.
pub type FrameSink<'a> = dyn FnMut(DecodedFrame) -> Result<()> + 'a;

/// A running frame source for one device connection.
pub trait FrameSource: Send {
    /// Provider identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Produce frames until the stream ends, an error occurs, or `cancel` fires.
    ///
    /// Returns `Ok(())` on normal stream end or cancellation.
    fn run(&mut self, cancel: &CancellationToken, sink: &mut FrameSink<'_>) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a device worker and its owner.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until cancelled or `timeout` elapses. Returns true when cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = match cvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *cancelled
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*cancelled {
            cancelled = match cvar.wait(cancelled) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}
