use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::transport::{RetryPolicy, RAW_CAM_PORT};

const DEFAULT_WIDTH: u32 = 208;
const DEFAULT_HEIGHT: u32 = 160;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;
const DEFAULT_FAULT_BACKOFF_MS: u64 = 500;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Deserialize, Default)]
struct RawCamConfigFile {
    host: Option<String>,
    port: Option<u16>,
    width: Option<u32>,
    height: Option<u32>,
    handshake: Option<HandshakeConfigFile>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HandshakeConfigFile {
    probe_timeout_ms: Option<u64>,
    fault_backoff_ms: Option<u64>,
    /// 0 means retry forever.
    max_probes: Option<u64>,
}

/// Everything needed to reach one robot's camera server.
#[derive(Debug, Clone)]
pub struct RawCamConfig {
    pub host: String,
    pub port: u16,
    pub width: u32,
    pub height: u32,
    pub handshake: RetryPolicy,
    /// Receive timeout of the acquisition loop; bounds shutdown latency.
    pub poll_interval: Duration,
}

impl RawCamConfig {
    /// Load from the JSON file named by `RAWCAM_CONFIG` (if set), then
    /// apply `RAWCAM_*` environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RAWCAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Protocol defaults for a robot at `host`: standard raw cam port,
    /// native resolution, unbounded handshake retries.
    pub fn for_host(host: &str) -> Self {
        Self::from_file(RawCamConfigFile {
            host: Some(host.to_string()),
            ..RawCamConfigFile::default()
        })
    }

    fn from_file(file: RawCamConfigFile) -> Self {
        let handshake = RetryPolicy {
            probe_timeout: Duration::from_millis(
                file.handshake
                    .as_ref()
                    .and_then(|handshake| handshake.probe_timeout_ms)
                    .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
            ),
            fault_backoff: Duration::from_millis(
                file.handshake
                    .as_ref()
                    .and_then(|handshake| handshake.fault_backoff_ms)
                    .unwrap_or(DEFAULT_FAULT_BACKOFF_MS),
            ),
            max_probes: match file
                .handshake
                .as_ref()
                .and_then(|handshake| handshake.max_probes)
            {
                Some(0) | None => None,
                bounded => bounded,
            },
        };
        Self {
            host: file.host.unwrap_or_default(),
            port: file.port.unwrap_or(RAW_CAM_PORT),
            width: file.width.unwrap_or(DEFAULT_WIDTH),
            height: file.height.unwrap_or(DEFAULT_HEIGHT),
            handshake,
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("RAWCAM_HOST") {
            if !host.trim().is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var("RAWCAM_PORT") {
            self.port = port
                .parse()
                .map_err(|_| anyhow!("RAWCAM_PORT must be a port number"))?;
        }
        if let Ok(width) = std::env::var("RAWCAM_WIDTH") {
            self.width = width
                .parse()
                .map_err(|_| anyhow!("RAWCAM_WIDTH must be an integer pixel count"))?;
        }
        if let Ok(height) = std::env::var("RAWCAM_HEIGHT") {
            self.height = height
                .parse()
                .map_err(|_| anyhow!("RAWCAM_HEIGHT must be an integer pixel count"))?;
        }
        if let Ok(max_probes) = std::env::var("RAWCAM_MAX_PROBES") {
            let max_probes: u64 = max_probes
                .parse()
                .map_err(|_| anyhow!("RAWCAM_MAX_PROBES must be an integer (0 for unbounded)"))?;
            self.handshake.max_probes = if max_probes == 0 {
                None
            } else {
                Some(max_probes)
            };
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("camera host is required"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("frame dimensions must be greater than zero"));
        }
        if self.handshake.probe_timeout.is_zero() {
            return Err(anyhow!("probe timeout must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RawCamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
