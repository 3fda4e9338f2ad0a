use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use rawcam::RawCamConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RAWCAM_CONFIG",
        "RAWCAM_HOST",
        "RAWCAM_PORT",
        "RAWCAM_WIDTH",
        "RAWCAM_HEIGHT",
        "RAWCAM_MAX_PROBES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "host": "aibo.lan",
        "port": 10012,
        "width": 104,
        "height": 80,
        "handshake": {
            "probe_timeout_ms": 250,
            "fault_backoff_ms": 100,
            "max_probes": 40
        },
        "poll_interval_ms": 200
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RAWCAM_CONFIG", file.path());
    std::env::set_var("RAWCAM_HEIGHT", "240");
    std::env::set_var("RAWCAM_MAX_PROBES", "0");

    let cfg = RawCamConfig::load().expect("load config");

    assert_eq!(cfg.host, "aibo.lan");
    assert_eq!(cfg.port, 10012);
    assert_eq!(cfg.width, 104);
    assert_eq!(cfg.height, 240);
    assert_eq!(cfg.handshake.probe_timeout, Duration::from_millis(250));
    assert_eq!(cfg.handshake.fault_backoff, Duration::from_millis(100));
    assert_eq!(cfg.handshake.max_probes, None);
    assert_eq!(cfg.poll_interval, Duration::from_millis(200));

    clear_env();
}

#[test]
fn env_alone_is_enough() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RAWCAM_HOST", "192.168.1.54");
    std::env::set_var("RAWCAM_MAX_PROBES", "6");

    let cfg = RawCamConfig::load().expect("load config");

    assert_eq!(cfg.host, "192.168.1.54");
    assert_eq!(cfg.port, rawcam::RAW_CAM_PORT);
    assert_eq!(cfg.width, 208);
    assert_eq!(cfg.height, 160);
    assert_eq!(cfg.handshake.max_probes, Some(6));
    assert_eq!(cfg.handshake.probe_timeout, Duration::from_millis(500));

    clear_env();
}

#[test]
fn missing_host_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = RawCamConfig::load().expect_err("host is required");
    assert!(err.to_string().contains("host"));

    clear_env();
}

#[test]
fn rejects_unparsable_env_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RAWCAM_HOST", "aibo.lan");
    std::env::set_var("RAWCAM_PORT", "not-a-port");

    let err = RawCamConfig::load().expect_err("bad port");
    assert!(err.to_string().contains("RAWCAM_PORT"));

    clear_env();
}
