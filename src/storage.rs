//! Annotated frame persistence.
//!
//! Frames are written as `image{N}.bmp` into the device's output folder.
//! `PersistenceCounter` never overwrites: when `image{N}.bmp` already exists
//! the counter moves forward until it finds a free name.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};

const FILE_PREFIX: &str = "image";
const FILE_EXTENSION: &str = "bmp";

/// Filesystem collaborator used by the frame filter.
pub trait FilesystemSink: Send + Sync {
    fn ensure_directory(&self, path: &Path) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    fn write_image(&self, path: &Path, image: &RgbImage) -> Result<()>;
}

/// Local disk, BMP encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFilesystem;

impl FilesystemSink for LocalFilesystem {
    fn ensure_directory(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create output directory {}", path.display()))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_image(&self, path: &Path, image: &RgbImage) -> Result<()> {
        image
            .save_with_format(path, ImageFormat::Bmp)
            .with_context(|| format!("write frame {}", path.display()))
    }
}

/// Per-device monotonic file index.
#[derive(Clone, Debug, Default)]
pub struct PersistenceCounter {
    next: u64,
}

impl PersistenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index that will be tried first on the next `persist`.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Write `image` under the first free `image{N}.bmp` in `folder`.
    pub fn persist(
        &mut self,
        folder: &Path,
        sink: &dyn FilesystemSink,
        image: &RgbImage,
    ) -> Result<PathBuf> {
        sink.ensure_directory(folder)?;
        let path = loop {
            let candidate = folder.join(file_name(self.next));
            self.next += 1;
            if !sink.file_exists(&candidate) {
                break candidate;
            }
        };
        sink.write_image(&path, image)?;
        Ok(path)
    }
}

pub fn file_name(index: u64) -> String {
    format!("{}{}.{}", FILE_PREFIX, index, FILE_EXTENSION)
}
