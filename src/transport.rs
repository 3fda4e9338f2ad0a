//! Raw Cam Server datagram transport.
//!
//! TekkotsuMon's Raw Cam Server speaks a minimal UDP protocol:
//!
//! - The client sends the literal text `connection request` to the server
//!   port until any datagram comes back. The reply's content is meaningless;
//!   its arrival is what subscribes this socket to the frame stream.
//! - From then on, every datagram the server sends carries one complete
//!   frame. Frames never span datagrams.
//!
//! The server does not announce readiness, so the client probes. A robot
//! that is still booting simply stays silent, which is why probe timeouts
//! are the normal rhythm of the handshake rather than faults.

use anyhow::{Context, Result};
use std::io;
use std::net::UdpSocket;
use std::time::Duration;

/// Well-known port the Raw Cam Server listens on.
pub const RAW_CAM_PORT: u16 = 10011;

/// Literal handshake probe the server expects.
pub const CONNECTION_REQUEST: &[u8] = b"connection request";

/// Largest datagram the server will send.
pub const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_FAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Handshake retry policy.
///
/// The default retries forever, matching a robot that may be switched on
/// minutes after the client. Setting `max_probes` turns an absent camera
/// into a [`HandshakeExhausted`] error instead of an indefinite block.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// How long to wait for a reply before re-sending the probe.
    pub probe_timeout: Duration,
    /// Pause after a transport fault before the next attempt.
    pub fault_backoff: Duration,
    /// Probe budget. `None` retries until the server answers.
    pub max_probes: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            fault_backoff: DEFAULT_FAULT_BACKOFF,
            max_probes: None,
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up after `max_probes` unanswered attempts.
    pub fn bounded(max_probes: u64) -> Self {
        Self {
            max_probes: Some(max_probes),
            ..Self::default()
        }
    }
}

/// A bounded handshake ran out of probes without a server reply.
#[derive(Debug)]
pub struct HandshakeExhausted {
    pub attempts: u64,
}

impl std::fmt::Display for HandshakeExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "camera server did not answer {} connection probe(s)",
            self.attempts
        )
    }
}
impl std::error::Error for HandshakeExhausted {}

/// A UDP socket subscribed to one Raw Cam Server's frame stream.
///
/// Created connected: `connect` only returns once the server has answered
/// a probe, so a `FrameConnection` in hand means frames are on their way.
#[derive(Debug)]
pub struct FrameConnection {
    socket: UdpSocket,
}

impl FrameConnection {
    /// Bind an ephemeral socket, aim it at `host:port`, and run the probe
    /// loop until the server answers or the policy's budget runs out.
    ///
    /// An unresolvable or unconnectable endpoint is logged and retried
    /// like any other transport fault; a robot that appears later still
    /// gets connected. Every attempt, whatever its failure mode, counts
    /// against a bounded policy.
    pub fn connect(host: &str, port: u16, policy: &RetryPolicy) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("bind udp socket")?;
        socket
            .set_read_timeout(Some(policy.probe_timeout))
            .context("set probe timeout")?;

        let mut attempts: u64 = 0;
        let mut associated = false;
        // The reply is usually a full frame datagram. An undersized buffer
        // turns it into a receive error on platforms that report
        // truncation instead of silently dropping the tail.
        let mut reply = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            if let Some(max) = policy.max_probes {
                if attempts >= max {
                    return Err(HandshakeExhausted { attempts }.into());
                }
            }
            attempts += 1;

            if !associated {
                if let Err(err) = socket.connect((host, port)) {
                    log::warn!("camera server {}:{} unreachable: {}", host, port, err);
                    std::thread::sleep(policy.fault_backoff);
                    continue;
                }
                associated = true;
            }

            if let Err(err) = socket.send(CONNECTION_REQUEST) {
                log::warn!("connection probe send failed: {}", err);
                std::thread::sleep(policy.fault_backoff);
                continue;
            }

            match socket.recv(&mut reply) {
                // Any reply, empty included, means the stream is live.
                // Its content is discarded.
                Ok(_) => break,
                Err(err) if is_timeout(&err) => {
                    log::debug!("camera server silent, re-sending connection probe");
                }
                Err(err) => {
                    log::warn!("connection probe receive failed: {}", err);
                    std::thread::sleep(policy.fault_backoff);
                }
            }
        }

        // Back to fully blocking. The acquisition loop installs its own
        // poll timeout on top.
        socket.set_read_timeout(None).context("clear probe timeout")?;
        log::info!(
            "camera server {}:{} answered after {} probe(s)",
            host,
            port,
            attempts
        );
        Ok(Self { socket })
    }

    /// Receive one frame datagram, truncated to its actual length. One
    /// call, one frame; the server never splits an image across datagrams.
    pub fn receive(&self) -> io::Result<Vec<u8>> {
        let mut packet = vec![0u8; MAX_DATAGRAM_BYTES];
        let len = self.socket.recv(&mut packet)?;
        packet.truncate(len);
        Ok(packet)
    }

    /// Install or clear a receive timeout. The acquisition loop sets a
    /// short one so shutdown is noticed between datagrams.
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }
}

/// Read-timeout expiry surfaces as `WouldBlock` on Unix and `TimedOut`
/// elsewhere.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
