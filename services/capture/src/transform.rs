//! Downscaling for the secondary archived copy.
//!
//! Resampling is area averaging: every output pixel is the coverage-weighted
//! mean of the source pixels under its footprint.

use crate::frame::{Frame, PixelFormat};
use image::{imageops, ImageBuffer, Luma, Pixel, Rgb};

/// Default factor for the scaled copy.
pub const DEFAULT_SCALE_FACTOR: f64 = 0.6;

/// Produces scaled copies of frames.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransformer {
    factor: f64,
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE_FACTOR)
    }
}

impl ImageTransformer {
    /// `factor` must lie in (0, 1]; the configuration layer enforces this.
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Scale `frame` by the configured factor.
    pub fn scale(&self, frame: &Frame) -> Frame {
        scale(frame, self.factor)
    }

    /// [`scale`](Self::scale) on the blocking thread pool.
    pub async fn scale_blocking(&self, frame: &Frame) -> Frame {
        let frame = frame.clone();
        let factor = self.factor;
        match tokio::task::spawn_blocking(move || scale(&frame, factor)).await {
            Ok(scaled) => scaled,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Output size for one axis: `floor(len * factor)`, at least one pixel.
pub fn scaled_len(len: u32, factor: f64) -> u32 {
    ((len as f64 * factor).floor() as u32).max(1)
}

/// Area-averaged copy of `frame` with each axis multiplied by `factor`.
pub fn scale(frame: &Frame, factor: f64) -> Frame {
    let dst_w = scaled_len(frame.width(), factor);
    let dst_h = scaled_len(frame.height(), factor);

    if dst_w == frame.width() && dst_h == frame.height() {
        return frame.clone();
    }

    let resampled = match frame.pixel_format() {
        PixelFormat::Mono8 => resample::<Luma<u8>>(frame, dst_w, dst_h),
        PixelFormat::Rgb8 => resample::<Rgb<u8>>(frame, dst_w, dst_h),
    };

    match resampled {
        Some(data) => Frame::from_raw_parts(dst_w, dst_h, frame.pixel_format(), data),
        // Unreachable: a Frame's buffer always matches its dimensions.
        None => frame.clone(),
    }
}

fn resample<P>(frame: &Frame, width: u32, height: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let source = ImageBuffer::<P, &[u8]>::from_raw(frame.width(), frame.height(), frame.data())?;
    Some(imageops::thumbnail(&source, width, height).into_raw())
}
