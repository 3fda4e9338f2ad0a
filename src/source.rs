//! The video source: current-frame slot, playback state, subscriptions.
//!
//! `RawCamSource` is the public surface of this crate. It is responsible for:
//! - Running the camera server handshake at construction
//! - Owning the background acquisition loop
//! - Holding the single current-frame slot (sole writer: the loop)
//! - The Playing/Paused machine gating frame notifications
//! - Synchronous fan-out of typed events to subscribers
//!
//! The source MUST NOT:
//! - Keep frame history (the slot holds the newest frame only)
//! - Seek, loop, rewind, or step backward (a live camera cannot)
//! - Drive the robot's command channel (callers switch the camera server
//!   on before connecting; see the `rawcam_watch` binary)
//!
//! The playback model is lopsided: frames keep advancing even while
//! paused. Playing only controls whether subscribers are told.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::acquire::AcquisitionHandle;
use crate::config::RawCamConfig;
use crate::frame::VideoFrame;
use crate::transport::FrameConnection;

const HEALTH_GRACE: Duration = Duration::from_secs(5);

/// Events delivered to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// Playback state changed. Also precedes `NewImageAvailable` every
    /// time a frame is surfaced while playing.
    StateChanged,
    /// The slot holds a frame the subscriber has not been told about;
    /// re-fetch it with `current_frame`.
    NewImageAvailable,
}

type EventCallback = Arc<dyn Fn(SourceEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: EventCallback,
}

/// Handle returned by [`RawCamSource::subscribe`].
///
/// `unsubscribe` removes the callback. Dropping the handle without calling
/// it leaves the callback registered for the source's lifetime.
pub struct Subscription {
    id: u64,
    state: Arc<SourceState>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.state.remove_subscriber(self.id);
    }
}

/// Point-in-time acquisition counters.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_published: u64,
    pub decode_failures: u64,
    pub transport_faults: u64,
    /// Age of the newest frame, `None` before the first one.
    pub last_frame_age: Option<Duration>,
}

// ----------------------------------------------------------------------------
// State shared between the acquisition loop and callers
// ----------------------------------------------------------------------------

pub(crate) struct SourceState {
    width: u32,
    height: u32,
    slot: Mutex<Option<Arc<VideoFrame>>>,
    playing: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    frames_published: AtomicU64,
    decode_failures: AtomicU64,
    transport_faults: AtomicU64,
    last_frame_at: Mutex<Option<Instant>>,
    connected_at: Instant,
}

impl SourceState {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            slot: Mutex::new(None),
            playing: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            frames_published: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            transport_faults: AtomicU64::new(0),
            last_frame_at: Mutex::new(None),
            connected_at: Instant::now(),
        }
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    // The guarded values are plain assignments; a poisoned lock still
    // holds a fully written value, so the guard is recovered throughout.

    pub(crate) fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loop-only entry point: replace the slot, then notify if playing.
    ///
    /// The slot advances unconditionally; pausing gates the notifications,
    /// never the writes. A subscriber reading the slot inside its callback
    /// observes exactly this frame: the loop is the sole writer and the
    /// fan-out below finishes before it can publish again.
    pub(crate) fn publish_frame(&self, frame: VideoFrame) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(Arc::new(frame));
        }
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        {
            let mut last = self
                .last_frame_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *last = Some(Instant::now());
        }
        if self.playing.load(Ordering::SeqCst) {
            self.emit(SourceEvent::StateChanged);
            self.emit(SourceEvent::NewImageAvailable);
        }
    }

    pub(crate) fn play(&self) {
        if self
            .playing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.emit(SourceEvent::StateChanged);
        }
    }

    pub(crate) fn pause(&self) {
        if self
            .playing
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.emit(SourceEvent::StateChanged);
        }
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// One catch-up notification. The slot itself is untouched.
    pub(crate) fn step_forward(&self) {
        self.emit(SourceEvent::NewImageAvailable);
    }

    pub(crate) fn register(&self, callback: EventCallback) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, callback });
        id
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|subscriber| subscriber.id != id);
    }

    /// Synchronous fan-out. Callbacks run outside the registry lock so
    /// they may subscribe, unsubscribe, or read the slot freely.
    fn emit(&self, event: SourceEvent) {
        let callbacks: Vec<EventCallback> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.iter().map(|s| s.callback.clone()).collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_fault(&self) {
        self.transport_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> SourceStats {
        let last = *self
            .last_frame_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        SourceStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            transport_faults: self.transport_faults.load(Ordering::Relaxed),
            last_frame_age: last.map(|at| at.elapsed()),
        }
    }

    pub(crate) fn is_fresh(&self) -> bool {
        let last = *self
            .last_frame_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match last {
            Some(at) => at.elapsed() <= HEALTH_GRACE,
            None => self.connected_at.elapsed() <= HEALTH_GRACE,
        }
    }
}

// ----------------------------------------------------------------------------
// RawCamSource: the public surface
// ----------------------------------------------------------------------------

/// Live video source backed by one robot camera stream.
pub struct RawCamSource {
    state: Arc<SourceState>,
    handle: AcquisitionHandle,
}

impl std::fmt::Debug for RawCamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCamSource").finish_non_exhaustive()
    }
}

impl RawCamSource {
    /// Connect to the camera server and start acquiring frames.
    ///
    /// Blocks on the handshake. With the default unbounded retry policy
    /// this waits for a robot that may still be booting; a bounded policy
    /// fails with [`HandshakeExhausted`](crate::transport::HandshakeExhausted)
    /// once the probe budget is spent. The camera server must already be
    /// switched on via the robot's command channel or no frames will flow.
    pub fn connect(config: RawCamConfig) -> Result<Self> {
        config.validate()?;
        let conn = FrameConnection::connect(&config.host, config.port, &config.handshake)?;
        let state = Arc::new(SourceState::new(config.width, config.height));
        let handle = AcquisitionHandle::spawn(
            conn,
            state.clone(),
            config.poll_interval,
            config.handshake.fault_backoff,
        )?;
        log::info!(
            "rawcam source streaming from {}:{} at {}x{}",
            config.host,
            config.port,
            config.width,
            config.height
        );
        Ok(Self { state, handle })
    }

    /// Latest frame, or `None` until the first successful decode. Never
    /// blocks beyond a brief slot lock. Once `Some`, never `None` again.
    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.state.current_frame()
    }

    /// Configured output width; every published frame has exactly this.
    pub fn width(&self) -> u32 {
        self.state.width()
    }

    /// Configured output height; every published frame has exactly this.
    pub fn height(&self) -> u32 {
        self.state.height()
    }

    /// Start surfacing frames. No-op, and no event, if already playing.
    pub fn play(&self) {
        self.state.play();
    }

    /// Stop surfacing frames. The slot keeps advancing silently; only the
    /// notifications stop. No-op, and no event, if already paused.
    pub fn pause(&self) {
        self.state.pause();
    }

    pub fn can_play(&self) -> bool {
        !self.state.is_playing()
    }

    pub fn can_pause(&self) -> bool {
        self.state.is_playing()
    }

    /// Let a paused viewer catch up by one notification: emits a single
    /// `NewImageAvailable` without touching the slot. Callers gate this
    /// on `can_step_forward`; frames keep arriving regardless.
    pub fn step_forward(&self) {
        self.state.step_forward();
    }

    pub fn can_step_forward(&self) -> bool {
        !self.state.is_playing()
    }

    /// A live camera is strictly forward and unbuffered; these four are
    /// never supported.
    pub fn can_seek(&self) -> bool {
        false
    }

    pub fn can_loop(&self) -> bool {
        false
    }

    pub fn can_rewind(&self) -> bool {
        false
    }

    pub fn can_step_backward(&self) -> bool {
        false
    }

    /// Register a callback for source events. Fan-out is synchronous:
    /// every current subscriber runs before the emitting call returns.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SourceEvent) + Send + Sync + 'static,
    {
        let id = self.state.register(Arc::new(callback));
        Subscription {
            id,
            state: self.state.clone(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.state.stats()
    }

    /// True while the acquisition thread is alive and, once frames have
    /// flowed, the newest one is not stale.
    pub fn is_healthy(&self) -> bool {
        !self.handle.is_finished() && self.state.is_fresh()
    }

    /// Stop the acquisition loop, join its thread, and release the socket.
    /// Dropping the source without calling this performs the same shutdown
    /// best-effort.
    pub fn stop(mut self) -> Result<()> {
        self.handle.stop()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
