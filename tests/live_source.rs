//! End-to-end tests against a fake camera server on the loopback.
//!
//! The fake speaks just enough of the wire protocol: it swallows a
//! configurable number of connection probes before answering, then sends
//! header-prefixed JPEG datagrams (or raw garbage) on demand.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use rawcam::{
    HandshakeExhausted, RawCamConfig, RawCamSource, RetryPolicy, SourceEvent, VideoFrame,
    CONNECTION_REQUEST, FRAME_HEADER_BYTES,
};

struct FakeCamServer {
    socket: UdpSocket,
    client: std::net::SocketAddr,
}

impl FakeCamServer {
    /// Swallow `ignored_probes` connection probes, then answer the next
    /// one and remember the client's address for frame delivery.
    fn accept(socket: UdpSocket, ignored_probes: usize) -> Result<Self> {
        let mut buf = [0u8; 64];
        for _ in 0..ignored_probes {
            let (len, _peer) = socket.recv_from(&mut buf)?;
            assert_eq!(&buf[..len], CONNECTION_REQUEST);
        }
        let (len, client) = socket.recv_from(&mut buf)?;
        assert_eq!(&buf[..len], CONNECTION_REQUEST);
        socket.send_to(b"k", client)?;
        Ok(Self { socket, client })
    }

    fn send_frame(&self, jpeg: &[u8]) -> Result<()> {
        let mut payload = vec![0x55u8; FRAME_HEADER_BYTES];
        payload.extend_from_slice(jpeg);
        self.socket.send_to(&payload, self.client)?;
        Ok(())
    }

    fn send_raw(&self, payload: &[u8]) -> Result<()> {
        self.socket.send_to(payload, self.client)?;
        Ok(())
    }
}

/// Spin up a fake server and a connected source with test-sized timeouts.
fn connect_pair(
    ignored_probes: usize,
    width: u32,
    height: u32,
) -> Result<(FakeCamServer, RawCamSource)> {
    let socket = UdpSocket::bind(("127.0.0.1", 0))?;
    let addr = socket.local_addr()?;
    let accept = thread::spawn(move || FakeCamServer::accept(socket, ignored_probes));

    let mut config = RawCamConfig::for_host("127.0.0.1");
    config.port = addr.port();
    config.width = width;
    config.height = height;
    config.handshake = RetryPolicy {
        probe_timeout: Duration::from_millis(40),
        fault_backoff: Duration::from_millis(20),
        max_probes: None,
    };
    config.poll_interval = Duration::from_millis(25);
    let source = RawCamSource::connect(config)?;

    let server = accept
        .join()
        .map_err(|_| anyhow!("camera server thread panicked"))??;
    Ok((server, source))
}

fn jpeg_frame(width: u32, height: u32, tint: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([tint, 64, 92]));
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, 85);
    encoder.encode_image(&image).expect("encode jpeg");
    out
}

fn wait_for_frame(source: &RawCamSource, min_seq: u64) -> Arc<VideoFrame> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(frame) = source.current_frame() {
            if frame.seq() >= min_seq {
                return frame;
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for frame {}",
            min_seq
        );
        thread::sleep(Duration::from_millis(10));
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn connects_after_ignored_probes_and_scales_frames() -> Result<()> {
    let (server, source) = connect_pair(2, 208, 160)?;

    server.send_frame(&jpeg_frame(64, 48, 10))?;
    let frame = wait_for_frame(&source, 1);
    assert_eq!(frame.width(), 208);
    assert_eq!(frame.height(), 160);
    assert!(source.is_healthy());

    source.stop()?;
    Ok(())
}

#[test]
fn playback_gating_and_step_forward() -> Result<()> {
    let (server, source) = connect_pair(0, 104, 80)?;
    let events: Arc<Mutex<Vec<SourceEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let subscription = source.subscribe(move |event| sink.lock().unwrap().push(event));

    // Paused: frames land in the slot without a single notification.
    server.send_frame(&jpeg_frame(104, 80, 50))?;
    let first = wait_for_frame(&source, 1);
    thread::sleep(Duration::from_millis(50));
    assert!(events.lock().unwrap().is_empty());
    assert!(source.can_play());
    assert!(!source.can_pause());
    assert!(source.can_step_forward());

    // Step: exactly one notification, the slot untouched.
    source.step_forward();
    assert_eq!(
        *events.lock().unwrap(),
        vec![SourceEvent::NewImageAvailable]
    );
    assert_eq!(source.current_frame().expect("frame").seq(), first.seq());

    events.lock().unwrap().clear();
    source.play();
    assert_eq!(*events.lock().unwrap(), vec![SourceEvent::StateChanged]);
    assert!(!source.can_play());
    assert!(source.can_pause());
    assert!(!source.can_step_forward());

    // Playing: the next frame surfaces as StateChanged then NewImageAvailable.
    events.lock().unwrap().clear();
    server.send_frame(&jpeg_frame(104, 80, 90))?;
    wait_until("the published frame's notifications", || {
        events.lock().unwrap().len() >= 2
    });
    assert_eq!(
        *events.lock().unwrap(),
        vec![SourceEvent::StateChanged, SourceEvent::NewImageAvailable]
    );

    assert!(!source.can_seek());
    assert!(!source.can_loop());
    assert!(!source.can_rewind());
    assert!(!source.can_step_backward());

    subscription.unsubscribe();
    source.pause();
    assert_eq!(events.lock().unwrap().len(), 2);

    source.stop()?;
    Ok(())
}

#[test]
fn malformed_payloads_are_dropped_and_the_stream_continues() -> Result<()> {
    let (server, source) = connect_pair(0, 208, 160)?;

    // Too short to clear the header, then a header full of garbage.
    server.send_raw(&[0x55; 50])?;
    let mut garbage = vec![0x55u8; FRAME_HEADER_BYTES];
    garbage.extend_from_slice(b"not a jpeg image");
    server.send_raw(&garbage)?;
    wait_until("both payloads to be rejected", || {
        source.stats().decode_failures == 2
    });
    assert!(source.current_frame().is_none());
    assert_eq!(source.stats().frames_published, 0);

    server.send_frame(&jpeg_frame(32, 32, 77))?;
    let frame = wait_for_frame(&source, 1);
    assert_eq!(frame.seq(), 1);

    source.stop()?;
    Ok(())
}

#[test]
fn stop_returns_promptly_when_no_frames_are_flowing() -> Result<()> {
    let (_server, source) = connect_pair(0, 208, 160)?;

    let begun = Instant::now();
    source.stop()?;
    assert!(begun.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test]
fn dropping_the_source_shuts_down_without_blocking() -> Result<()> {
    let (_server, source) = connect_pair(0, 208, 160)?;

    let begun = Instant::now();
    drop(source);
    assert!(begun.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test]
fn bounded_handshake_failure_surfaces_from_connect() {
    // Bound but never read, so probes go unanswered.
    let socket = UdpSocket::bind(("127.0.0.1", 0)).expect("bind");
    let addr = socket.local_addr().expect("local addr");

    let mut config = RawCamConfig::for_host("127.0.0.1");
    config.port = addr.port();
    config.handshake = RetryPolicy {
        probe_timeout: Duration::from_millis(30),
        fault_backoff: Duration::from_millis(10),
        ..RetryPolicy::bounded(2)
    };

    let err = RawCamSource::connect(config).expect_err("server never answers");
    let exhausted = err
        .downcast_ref::<HandshakeExhausted>()
        .expect("handshake exhausted");
    assert_eq!(exhausted.attempts, 2);
}
