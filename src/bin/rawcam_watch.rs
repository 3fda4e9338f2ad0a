//! rawcam_watch - Watch an AIBO's raw camera from the console.
//!
//! This tool:
//! 1. Switches the robot's Raw Cam Server on over the command port
//! 2. Connects a `RawCamSource` and starts playback
//! 3. Logs source health and frame counters every few seconds
//! 4. Optionally writes the newest frame to a JPEG file on an interval
//! 5. Switches the Raw Cam Server back off on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageFormat;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rawcam::{RawCamConfig, RawCamSource};

/// Tekkotsu main command port.
const COMMAND_PORT: u16 = 10001;
/// Control-tree toggle for the raw camera stream server.
const RAW_CAM_TOGGLE: &str = "!root \"TekkotsuMon\" \"Raw Cam Server\"";

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch an AIBO's raw camera stream from the console"
)]
struct Args {
    /// Robot hostname or IP. Omit to load the RAWCAM_CONFIG file instead.
    #[arg(long, env = "RAWCAM_HOST")]
    host: Option<String>,

    /// Camera server port (the protocol default when omitted).
    #[arg(long, env = "RAWCAM_PORT")]
    port: Option<u16>,

    /// Output frame width in pixels.
    #[arg(long, env = "RAWCAM_WIDTH")]
    width: Option<u32>,

    /// Output frame height in pixels.
    #[arg(long, env = "RAWCAM_HEIGHT")]
    height: Option<u32>,

    /// Give up after this many unanswered probes (0 retries forever).
    #[arg(long, env = "RAWCAM_MAX_PROBES", default_value_t = 0)]
    max_probes: u64,

    /// Skip toggling the Raw Cam Server over the command port.
    #[arg(long)]
    no_bootstrap: bool,

    /// Write the newest frame to this JPEG path on an interval.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Seconds between snapshot writes.
    #[arg(long, default_value_t = 5)]
    snapshot_secs: u64,
}

/// The Raw Cam Server is toggled, not commanded on or off, so this
/// tracks whether this process flipped it and undoes exactly that on
/// shutdown. State is per connection; two watchers each manage their
/// own toggle.
struct CameraServerSwitch {
    stream: TcpStream,
    started: bool,
}

impl CameraServerSwitch {
    fn open(host: &str) -> Result<Self> {
        let stream = TcpStream::connect((host, COMMAND_PORT))
            .with_context(|| format!("connect to command port {}:{}", host, COMMAND_PORT))?;
        Ok(Self {
            stream,
            started: false,
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.started {
            self.send_toggle()?;
            self.started = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.started {
            self.send_toggle()?;
            self.started = false;
        }
        Ok(())
    }

    fn send_toggle(&mut self) -> Result<()> {
        writeln!(self.stream, "{}", RAW_CAM_TOGGLE).context("send camera server toggle")?;
        self.stream.flush().context("flush camera server toggle")?;
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.host.as_deref() {
        Some(host) => RawCamConfig::for_host(host),
        None => RawCamConfig::load()?,
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }
    if args.max_probes > 0 {
        config.handshake.max_probes = Some(args.max_probes);
    }

    let mut switch = if args.no_bootstrap {
        None
    } else {
        let mut switch = CameraServerSwitch::open(&config.host)?;
        switch.start()?;
        log::info!("raw cam server toggled on via {}:{}", config.host, COMMAND_PORT);
        Some(switch)
    };

    let source = RawCamSource::connect(config)?;
    let subscription = source.subscribe(|event| log::debug!("source event: {:?}", event));
    source.play();

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");
    log::info!("watching; stop with Ctrl-C");

    let snapshot_interval = Duration::from_secs(args.snapshot_secs.max(1));
    let mut last_stats = Instant::now();
    let mut last_snapshot = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} decode_failures={} transport_faults={} last_frame_age={:?}",
                source.is_healthy(),
                stats.frames_published,
                stats.decode_failures,
                stats.transport_faults,
                stats.last_frame_age
            );
            last_stats = Instant::now();
        }

        if let Some(path) = args.snapshot.as_deref() {
            if last_snapshot.elapsed() >= snapshot_interval {
                if let Some(frame) = source.current_frame() {
                    match frame.image().save_with_format(path, ImageFormat::Jpeg) {
                        Ok(()) => log::debug!("snapshot written to {}", path.display()),
                        Err(err) => log::warn!("snapshot write failed: {}", err),
                    }
                }
                last_snapshot = Instant::now();
            }
        }
    }

    log::info!("shutting down");
    subscription.unsubscribe();
    source.stop()?;
    if let Some(switch) = switch.as_mut() {
        if let Err(err) = switch.stop() {
            log::warn!("raw cam server toggle off failed: {}", err);
        }
    }
    Ok(())
}
