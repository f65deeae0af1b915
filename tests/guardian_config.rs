use std::sync::Mutex;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use room_guardian::config::GuardianConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GUARDIAN_CONFIG",
        "GUARDIAN_CAMERAS_PATH",
        "GUARDIAN_API_ADDR",
        "GUARDIAN_SCREENSHOT_DIR",
        "GUARDIAN_LOG_PATH",
        "GUARDIAN_STATE_PATH",
        "GUARDIAN_DETECTOR",
        "GUARDIAN_MODEL_PATH",
        "GUARDIAN_LABELS",
        "GUARDIAN_COOLDOWN_SECS",
        "GUARDIAN_UPLOAD_URL",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "cameras": [
                {"room": "Lab", "source": "phone1", "url": "stub://lab"},
                {"room": "Office", "source": "phone2", "ip": "http://10.0.0.7:8080"}
            ],
            "storage": {
                "screenshot_dir": "/var/lib/guardian/shots",
                "log_path": "/var/lib/guardian/events.csv"
            },
            "detection": {
                "labels": ["phone"],
                "min_confidence": 0.6,
                "interval_ms": 500,
                "cooldown_secs": 30
            },
            "stream": {"reconnect_backoff_ms": 1500},
            "api": {"addr": "127.0.0.1:6000"}
        }"#,
    );

    std::env::set_var("GUARDIAN_CONFIG", file.path());
    std::env::set_var("GUARDIAN_API_ADDR", "127.0.0.1:7000");
    std::env::set_var("GUARDIAN_LABELS", "cell phone, tablet");
    std::env::set_var("GUARDIAN_COOLDOWN_SECS", "90");

    let cfg = GuardianConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].url, "stub://lab");
    assert_eq!(cfg.cameras[1].url, "http://10.0.0.7:8080/video");
    assert_eq!(cfg.cameras_path, None);
    assert_eq!(
        cfg.storage.log_path.to_str(),
        Some("/var/lib/guardian/events.csv")
    );
    assert_eq!(cfg.storage.state_path.to_str(), Some("detection_state.json"));
    assert_eq!(cfg.api.addr, "127.0.0.1:7000");
    assert_eq!(cfg.detector.labels, vec!["cell phone", "tablet"]);
    assert_eq!(cfg.detector.min_confidence, 0.6);
    assert_eq!(cfg.timing.detection_interval, Duration::from_millis(500));
    assert_eq!(cfg.timing.cooldown_window, Duration::from_secs(90));
    assert_eq!(cfg.timing.reconnect_backoff, Duration::from_millis(1500));

    let settings = cfg.worker_settings();
    assert_eq!(settings.cooldown_window, Duration::from_secs(90));
    assert_eq!(settings.pause_poll_interval, Duration::from_secs(5));
    assert_eq!(cfg.detection_filter().unwrap().labels(), ["cell phone", "tablet"]);
}

#[test]
fn loads_legacy_camera_registry() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("camera_config.json");
    std::fs::write(
        &registry,
        r#"[
            {"ip": "http://192.168.1.20:8080", "room": "Room101", "source": "phone"},
            {"ip": "http://192.168.1.21:8080/", "room": "Room102", "source": "phone"}
        ]"#,
    )
    .unwrap();
    std::env::set_var("GUARDIAN_CAMERAS_PATH", &registry);

    let cfg = GuardianConfig::load().expect("load config");
    clear_env();

    let urls: Vec<&str> = cfg.cameras.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "http://192.168.1.20:8080/video",
            "http://192.168.1.21:8080/video"
        ]
    );
    assert_eq!(cfg.cameras[0].label(), "Room101/phone");
}

#[test]
fn missing_registry_yields_no_cameras() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = TempDir::new().unwrap();
    std::env::set_var("GUARDIAN_CAMERAS_PATH", dir.path().join("absent.json"));
    let cfg = GuardianConfig::load().expect("load config");
    clear_env();

    assert!(cfg.cameras.is_empty());
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
[[cameras]]
room = "Lab"
source = "cam1"
url = "stub://lab?width=32&height=24"

[detection]
backend = "stub"
stub_label = "mobile phone"

[control]
pause_poll_ms = 250

[upload]
endpoint = "https://collector.example/events"
max_attempts = 5
"#,
    );
    std::env::set_var("GUARDIAN_CONFIG", file.path());
    let cfg = GuardianConfig::load().expect("load toml config");
    clear_env();

    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.detector.stub_label, "mobile phone");
    assert_eq!(cfg.timing.pause_poll_interval, Duration::from_millis(250));
    let upload = cfg.upload.expect("upload settings");
    assert_eq!(upload.endpoint, "https://collector.example/events");
    assert_eq!(upload.max_attempts, 5);
}

#[test]
fn rejects_invalid_configurations() {
    let _guard = ENV_LOCK.lock().unwrap();

    let cases = [
        r#"{"cameras": [{"room": "a/b", "source": "cam", "url": "stub://x"}]}"#,
        r#"{"cameras": [{"room": "Lab", "source": "cam,1", "url": "stub://x"}]}"#,
        r#"{"cameras": [
            {"room": "Lab", "source": "cam", "url": "stub://x"},
            {"room": "Lab", "source": "cam", "url": "stub://y"}
        ]}"#,
        r#"{"cameras": [{"room": "Lab", "source": "cam"}]}"#,
        r#"{"cameras": [], "cameras_path": "/nonexistent/registry.json", "detection": {"labels": []}}"#,
        r#"{"cameras": [], "cameras_path": "/nonexistent/registry.json", "detection": {"min_confidence": 1.5}}"#,
        r#"{"cameras": [], "cameras_path": "/nonexistent/registry.json", "detection": {"interval_ms": 0}}"#,
        r#"{"cameras": [], "cameras_path": "/nonexistent/registry.json", "upload": {"endpoint": "ftp://x"}}"#,
    ];
    for case in cases {
        clear_env();
        let file = write_config(".json", case);
        std::env::set_var("GUARDIAN_CONFIG", file.path());
        assert!(GuardianConfig::load().is_err(), "accepted: {}", case);
    }

    clear_env();
    std::env::set_var("GUARDIAN_CAMERAS_PATH", "/nonexistent/registry.json");
    std::env::set_var("GUARDIAN_COOLDOWN_SECS", "two minutes");
    assert!(GuardianConfig::load().is_err());
    clear_env();
}
