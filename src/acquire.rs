//! Background frame acquisition.
//!
//! One thread per source runs receive, decode, scale, publish until the
//! owning source asks it to stop. Transport faults and undecodable frames
//! are absorbed here; neither ends the loop.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::decode;
use crate::frame::VideoFrame;
use crate::scale;
use crate::source::SourceState;
use crate::transport::{is_timeout, FrameConnection};

pub(crate) struct AcquisitionHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Start the acquisition thread for `state`, taking ownership of the
    /// connection. The poll timeout is how the loop notices the shutdown
    /// flag between datagrams; its expiry is not a transport fault.
    pub(crate) fn spawn(
        conn: FrameConnection,
        state: Arc<SourceState>,
        poll_interval: Duration,
        fault_backoff: Duration,
    ) -> Result<Self> {
        conn.set_receive_timeout(Some(poll_interval))
            .context("set receive poll timeout")?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            run_loop(conn, state, shutdown_thread, fault_backoff);
        });
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    /// Cooperative shutdown: flag the loop, join the thread. The socket
    /// drops with the loop.
    pub(crate) fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("acquisition thread panicked"))?;
        }
        Ok(())
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join
            .as_ref()
            .map(|join| join.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_loop(
    conn: FrameConnection,
    state: Arc<SourceState>,
    shutdown: Arc<AtomicBool>,
    fault_backoff: Duration,
) {
    let mut seq: u64 = 0;
    while !shutdown.load(Ordering::SeqCst) {
        let payload = match conn.receive() {
            Ok(payload) => payload,
            Err(err) if is_timeout(&err) => continue,
            Err(err) => {
                state.record_transport_fault();
                log::warn!("frame receive failed: {}", err);
                std::thread::sleep(fault_backoff);
                continue;
            }
        };

        let image = match decode::decode_frame(&payload) {
            Ok(image) => image,
            Err(err) => {
                state.record_decode_failure();
                log::debug!("dropped frame: {}", err);
                continue;
            }
        };

        let scaled = scale::scale_frame(&image, state.width(), state.height());
        seq += 1;
        state.publish_frame(VideoFrame::new(seq, scaled));
    }
    log::debug!("acquisition loop stopped after {} frame(s)", seq);
}
