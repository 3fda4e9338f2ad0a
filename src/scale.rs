//! Frame scaling.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Resample a decoded frame to exactly `width` x `height`.
///
/// Scale factors are computed per axis: a frame whose aspect ratio differs
/// from the target is stretched, not letterboxed. Interpolation is smooth
/// (Catmull-Rom), never nearest-neighbor.
pub fn scale_frame(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(image, width, height, FilterType::CatmullRom)
}
