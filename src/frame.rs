//! Decoded video frames.

use image::RgbImage;

/// One decoded, scaled frame from the robot camera.
///
/// Frames are immutable once published; the source hands them out as
/// `Arc<VideoFrame>`, so a reader can never observe a partially written one.
pub struct VideoFrame {
    seq: u64,
    image: RgbImage,
}

impl VideoFrame {
    pub(crate) fn new(seq: u64, image: RgbImage) -> Self {
        Self { seq, image }
    }

    /// Acquisition sequence number. Increments once per published frame,
    /// including frames published silently while paused.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
