use std::collections::HashMap;

use anyhow::Result;

use super::{FrameSource, ImageSource, MjpegSource};
use crate::config::{DeviceConfig, StreamSettings};

/// Builds a frame source for one connection attempt of a device.
pub type ProviderFactory =
    Box<dyn Fn(&DeviceConfig, &StreamSettings) -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Explicit map from provider kind (`"mjpeg"`, `"image"`, ...) to factory.
///
/// Kinds are matched case-insensitively.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `mjpeg` and `image` providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "mjpeg",
            Box::new(|device, settings| {
                Ok(Box::new(MjpegSource::new(device, settings)?) as Box<dyn FrameSource>)
            }),
        );
        registry.register(
            "image",
            Box::new(|device, _| Ok(Box::new(ImageSource::new(device)?) as Box<dyn FrameSource>)),
        );
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register(&mut self, kind: &str, factory: ProviderFactory) {
        self.factories.insert(kind.to_ascii_lowercase(), factory);
    }

    /// Construct a source for `device`.
    ///
    /// Returns `Ok(None)` when the device's kind is not registered; the caller
    /// decides what an unknown kind means (the event loop deactivates the device).
    pub fn create(
        &self,
        device: &DeviceConfig,
        settings: &StreamSettings,
    ) -> Result<Option<Box<dyn FrameSource>>> {
        match self.factories.get(&device.format.to_ascii_lowercase()) {
            Some(factory) => factory(device, settings).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
