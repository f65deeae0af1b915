//! Frames handed from a source to a camera worker.
//!
//! A `Frame` is owned by exactly one worker for one inference cycle. It is
//! never buffered or shared between workers; the only copy that outlives the
//! cycle is the JPEG still written by the event sink.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use std::time::Instant;

/// JPEG quality for screenshots.
pub const SCREENSHOT_JPEG_QUALITY: u8 = 90;

/// Decoded RGB8 frame plus its capture instant.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Local wall-clock capture time, whole seconds. Used for log records and
    /// screenshot names only.
    pub captured_at: NaiveDateTime,
    /// Monotonic capture instant. Cooldown windows are measured on this.
    pub captured_instant: Instant,
}

impl Frame {
    /// Wraps an RGB8 buffer. The buffer length must match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: NaiveDateTime) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
            captured_instant: Instant::now(),
        })
    }

    /// Frame stamped with the current local time.
    pub fn captured_now(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::new(pixels, width, height, crate::now_local())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Copies the frame into an `image` buffer (for resizing before inference).
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Encodes the frame as a JPEG still.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut out, SCREENSHOT_JPEG_QUALITY)
            .encode(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode jpeg screenshot")?;
        Ok(out)
    }

    /// Decodes a JPEG (or any format the `image` build supports) into a frame.
    pub fn decode_jpeg(bytes: &[u8], captured_at: NaiveDateTime) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height, captured_at)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::captured_now(vec![value; (width * height * 3) as usize], width, height).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::captured_now(vec![0u8; 10], 4, 4).is_err());
    }

    #[test]
    fn jpeg_encode_then_decode_keeps_dimensions() {
        let frame = solid(16, 8, 200);
        let jpeg = frame.encode_jpeg().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::decode_jpeg(&jpeg, frame.captured_at).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 8));
    }

    #[test]
    fn rgb_image_view_matches_frame() {
        let frame = solid(3, 2, 7);
        let image = frame.to_rgb_image().unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [7, 7, 7]);
    }
}
