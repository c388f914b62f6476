//! Raster frame model and PNG encoding.

use crate::error::SinkError;
use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when building a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame buffer holds {actual} bytes, expected {expected} for {width}x{height} {format}")]
    BufferSize {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("Frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

/// Pixel layout of a frame buffer. A run uses a single format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit grayscale
    #[default]
    Mono8,
    /// 8-bit interleaved RGB
    #[serde(rename = "RGB8")]
    Rgb8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }

    fn color_type(&self) -> ExtendedColorType {
        match self {
            PixelFormat::Mono8 => ExtendedColorType::L8,
            PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Mono8 => f.write_str("Mono8"),
            PixelFormat::Rgb8 => f.write_str("RGB8"),
        }
    }
}

/// One raster image grabbed from a frame source.
///
/// The pixel buffer is immutable; transformations always build a new frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    data: Bytes,
}

impl Frame {
    /// Build a frame from a tightly packed, row-major pixel buffer.
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }

        let data = data.into();
        let expected = width as usize * height as usize * pixel_format.channels();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                format: pixel_format,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            pixel_format,
            data,
        })
    }

    /// Build a frame from a buffer already known to match its dimensions.
    pub(crate) fn from_raw_parts(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * pixel_format.channels()
        );
        Self {
            width,
            height,
            pixel_format,
            data: Bytes::from(data),
        }
    }

    /// Convert a decoded image into a frame of the requested pixel format.
    pub fn from_image(image: &DynamicImage, pixel_format: PixelFormat) -> Result<Self, FrameError> {
        let (width, height, raw) = match pixel_format {
            PixelFormat::Mono8 => {
                let buffer = image.to_luma8();
                (buffer.width(), buffer.height(), buffer.into_raw())
            }
            PixelFormat::Rgb8 => {
                let buffer = image.to_rgb8();
                (buffer.width(), buffer.height(), buffer.into_raw())
            }
        };
        Self::new(width, height, pixel_format, raw)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// `<width>:<height>`, the form recorded in frame metadata.
    pub fn dimensions(&self) -> String {
        format!("{}:{}", self.width, self.height)
    }

    /// Encode the frame as a PNG byte string.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut encoded = Vec::new();
        PngEncoder::new(&mut encoded).write_image(
            &self.data,
            self.width,
            self.height,
            self.pixel_format.color_type(),
        )?;
        Ok(encoded)
    }

    /// [`encode_png`](Self::encode_png) on the blocking thread pool.
    pub async fn encode_png_blocking(&self) -> Result<Vec<u8>, SinkError> {
        let frame = self.clone();
        match tokio::task::spawn_blocking(move || frame.encode_png()).await {
            Ok(encoded) => Ok(encoded?),
            Err(e) => Err(SinkError::serialization(format!("encoder task failed: {e}"))),
        }
    }
}
