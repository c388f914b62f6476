//! Frame source abstraction and the file-backed camera emulator.
//!
//! A source follows the camera grab lifecycle: open, configure, start a
//! bounded grab, retrieve results one at a time, stop, close. The orchestrator
//! owns the source exclusively for the whole run.

use crate::error::SourceError;
use crate::frame::{Frame, PixelFormat};
use crate::staging;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Options applied to a source before grabbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    /// Serve frames from image files instead of a sensor
    pub image_file_mode: bool,
    /// Disable the built-in synthetic test image
    pub test_image_selector_off: bool,
    /// Pixel format delivered for the whole run
    pub pixel_format: PixelFormat,
}

impl SourceOptions {
    /// File-based emulation with the given pixel format.
    pub fn file_emulation(pixel_format: PixelFormat) -> Self {
        Self {
            image_file_mode: true,
            test_image_selector_off: true,
            pixel_format,
        }
    }
}

/// Outcome of one retrieve.
#[derive(Debug)]
pub enum Grab {
    /// A complete frame
    Frame(Frame),
    /// The grab completed but carried no image payload
    Empty,
    /// Nothing arrived within the wait; no more frames are coming
    TimedOut,
    /// The grab itself failed; grabbing cannot continue
    Failed { reason: String },
}

/// A camera, real or emulated.
#[async_trait]
pub trait FrameSource: Send {
    async fn open(&mut self) -> Result<(), SourceError>;

    async fn configure(&mut self, options: &SourceOptions) -> Result<(), SourceError>;

    /// Start grabbing; the grab ends on its own after `max_count` results.
    async fn start_grab(&mut self, max_count: u64) -> Result<(), SourceError>;

    fn is_grabbing(&self) -> bool;

    /// Wait at most `timeout` for the next grab result.
    async fn retrieve(&mut self, timeout: Duration) -> Result<Grab, SourceError>;

    async fn stop(&mut self) -> Result<(), SourceError>;

    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Camera emulator that serves the files in a staging directory.
pub struct EmulatedCamera {
    staging_dir: PathBuf,
    open: bool,
    options: Option<SourceOptions>,
    pending: VecDeque<PathBuf>,
    remaining: u64,
    grabbing: bool,
}

impl EmulatedCamera {
    pub fn new(staging_dir: impl AsRef<Path>) -> Self {
        Self {
            staging_dir: staging_dir.as_ref().to_path_buf(),
            open: false,
            options: None,
            pending: VecDeque::new(),
            remaining: 0,
            grabbing: false,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.open {
            Ok(())
        } else {
            Err(SourceError::NotOpen)
        }
    }

    async fn load(&self, path: &Path, pixel_format: PixelFormat) -> Grab {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Grab::Failed {
                    reason: format!("{}: {}", path.display(), e),
                }
            }
        };

        if bytes.is_empty() {
            return Grab::Empty;
        }

        let decoded = tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
            Frame::from_image(&image, pixel_format).map_err(|e| e.to_string())
        })
        .await;

        match decoded {
            Ok(Ok(frame)) => Grab::Frame(frame),
            Ok(Err(reason)) => Grab::Failed {
                reason: format!("{}: {}", path.display(), reason),
            },
            Err(e) => Grab::Failed {
                reason: format!("decoder task failed: {e}"),
            },
        }
    }
}

#[async_trait]
impl FrameSource for EmulatedCamera {
    async fn open(&mut self) -> Result<(), SourceError> {
        if self.open {
            return Err(SourceError::AlreadyOpen);
        }
        self.open = true;
        info!(staging_dir = %self.staging_dir.display(), "Emulated camera opened");
        Ok(())
    }

    async fn configure(&mut self, options: &SourceOptions) -> Result<(), SourceError> {
        self.ensure_open()?;
        if !options.image_file_mode {
            return Err(SourceError::UnsupportedOption(
                "emulator only serves image files".to_string(),
            ));
        }
        debug!(
            pixel_format = %options.pixel_format,
            test_image_selector_off = options.test_image_selector_off,
            "Emulated camera configured"
        );
        self.options = Some(options.clone());
        Ok(())
    }

    async fn start_grab(&mut self, max_count: u64) -> Result<(), SourceError> {
        self.ensure_open()?;
        if self.options.is_none() {
            return Err(SourceError::NotConfigured);
        }

        let files = staging::list_frames(&self.staging_dir)
            .await
            .map_err(|e| SourceError::Staging(format!("{}: {}", self.staging_dir.display(), e)))?;

        self.pending = files.into_iter().take(max_count as usize).collect();
        self.remaining = max_count;
        self.grabbing = max_count > 0;

        info!(max_count = max_count, staged = self.pending.len(), "Grabbing started");
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    async fn retrieve(&mut self, timeout: Duration) -> Result<Grab, SourceError> {
        self.ensure_open()?;
        let pixel_format = self
            .options
            .as_ref()
            .map(|o| o.pixel_format)
            .ok_or(SourceError::NotConfigured)?;

        if !self.grabbing {
            return Ok(Grab::TimedOut);
        }

        let Some(path) = self.pending.pop_front() else {
            // Staged files vanished after the grab was sized.
            debug!(timeout_ms = timeout.as_millis() as u64, "No staged frame left");
            self.grabbing = false;
            return Ok(Grab::TimedOut);
        };

        self.remaining -= 1;
        if self.remaining == 0 {
            self.grabbing = false;
        }

        match tokio::time::timeout(timeout, self.load(&path, pixel_format)).await {
            Ok(grab) => Ok(grab),
            Err(_) => {
                warn!(path = %path.display(), "Staged frame not loaded within timeout");
                self.grabbing = false;
                Ok(Grab::TimedOut)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        self.grabbing = false;
        self.pending.clear();
        self.remaining = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.ensure_open()?;
        self.open = false;
        self.options = None;
        info!("Emulated camera closed");
        Ok(())
    }
}
