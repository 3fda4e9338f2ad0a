//! Frame datagram decoding.
//!
//! Every Raw Cam Server datagram carries one frame: a fixed-size header the
//! client does not interpret, immediately followed by a complete JPEG image.
//! A payload that fails to decode is a dropped frame, never a fatal
//! condition; the stream carries on with the next datagram.

use image::RgbImage;

/// Fixed per-frame header the Raw Cam Server prepends to the JPEG bytes.
/// Opaque protocol metadata, skipped without inspection.
pub const FRAME_HEADER_BYTES: usize = 89;

/// Why a frame datagram failed to decode.
#[derive(Debug)]
pub enum DecodeError {
    /// The payload ends at or inside the frame header.
    ShortPayload { len: usize },
    /// The bytes after the header are not a decodable JPEG image.
    Image(image::ImageError),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ShortPayload { len } => write!(
                f,
                "payload of {} bytes ends inside the {}-byte frame header",
                len, FRAME_HEADER_BYTES
            ),
            DecodeError::Image(err) => write!(f, "decode jpeg: {}", err),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::ShortPayload { .. } => None,
            DecodeError::Image(err) => Some(err),
        }
    }
}

/// Strip the frame header and decode the remaining bytes as JPEG.
pub fn decode_frame(payload: &[u8]) -> Result<RgbImage, DecodeError> {
    if payload.len() <= FRAME_HEADER_BYTES {
        return Err(DecodeError::ShortPayload { len: payload.len() });
    }
    let image =
        image::load_from_memory(&payload[FRAME_HEADER_BYTES..]).map_err(DecodeError::Image)?;
    Ok(image.into_rgb8())
}
