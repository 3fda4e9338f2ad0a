//! AIBO Raw Cam Server client
//!
//! This crate pulls live JPEG frames from an AIBO robot's Raw Cam Server
//! over UDP and presents them behind a play/pause/step playback surface.
//!
//! # Architecture
//!
//! Frames flow through a fixed pipeline on a background thread:
//!
//! 1. **Handshake**: probe datagrams are re-sent until the camera server
//!    answers; with the default policy the client waits forever for a
//!    robot that is still booting.
//! 2. **Receive**: each datagram carries one frame, an 89-byte header in
//!    front of a JPEG image.
//! 3. **Decode and scale**: the JPEG is decoded to RGB and resampled to
//!    the configured output dimensions.
//! 4. **Publish**: the frame replaces the single current-frame slot, and
//!    subscribers hear about it only while the source is playing.
//!
//! Pausing silences notifications but the slot keeps advancing, so a
//! viewer that resumes sees the newest frame, not a backlog.
//!
//! # Module Structure
//!
//! - `transport`: UDP handshake and datagram receive
//! - `decode`: header strip and JPEG decode
//! - `scale`: resampling to the configured dimensions
//! - `frame`: the published frame type
//! - `source`: playback state, subscriptions, the public `RawCamSource`
//! - `config`: file and environment configuration

mod acquire;

pub mod config;
pub mod decode;
pub mod frame;
pub mod scale;
pub mod source;
pub mod transport;

pub use config::RawCamConfig;
pub use decode::{decode_frame, DecodeError, FRAME_HEADER_BYTES};
pub use frame::VideoFrame;
pub use scale::scale_frame;
pub use source::{RawCamSource, SourceEvent, SourceStats, Subscription};
pub use transport::{
    FrameConnection, HandshakeExhausted, RetryPolicy, CONNECTION_REQUEST, MAX_DATAGRAM_BYTES,
    RAW_CAM_PORT,
};
