use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DetectionFilter, DEFAULT_LABELS};
use crate::worker::WorkerSettings;

const DEFAULT_CAMERAS_PATH: &str = "camera_config.json";
const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";
const DEFAULT_LOG_PATH: &str = "logs.csv";
const DEFAULT_STATE_PATH: &str = "detection_state.json";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5001";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_STUB_LABEL: &str = "cell phone";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_DETECTION_INTERVAL_MS: u64 = 2_000;
const DEFAULT_COOLDOWN_SECS: u64 = 120;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PAUSE_POLL_MS: u64 = 5_000;
const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;
const DEFAULT_UPLOAD_RETRY_MS: u64 = 1_000;
/// Path appended to a bare camera address from the dashboard registry.
const LEGACY_STREAM_PATH: &str = "/video";

#[derive(Debug, Deserialize, Default)]
struct GuardianConfigFile {
    cameras: Option<Vec<CameraEntryFile>>,
    cameras_path: Option<PathBuf>,
    storage: Option<StorageConfigFile>,
    detection: Option<DetectionConfigFile>,
    stream: Option<StreamConfigFile>,
    control: Option<ControlConfigFile>,
    api: Option<ApiConfigFile>,
    upload: Option<UploadConfigFile>,
}

/// Camera entry as written by operators or by the dashboard registry.
///
/// The dashboard stores `{"ip", "room", "source"}`; `url` wins when both are present.
#[derive(Debug, Deserialize)]
struct CameraEntryFile {
    room: String,
    source: String,
    url: Option<String>,
    ip: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    screenshot_dir: Option<PathBuf>,
    log_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
    labels: Option<Vec<String>>,
    stub_label: Option<String>,
    interval_ms: Option<u64>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    reconnect_backoff_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ControlConfigFile {
    pause_poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    endpoint: Option<String>,
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

/// One camera: the room it watches, a source label, and its stream locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub room: String,
    pub source: String,
    pub url: String,
}

impl CameraConfig {
    pub fn new(room: &str, source: &str, url: &str) -> Self {
        Self {
            room: room.trim().to_string(),
            source: source.trim().to_string(),
            url: url.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        crate::validate_identifier("room", &self.room)?;
        crate::validate_identifier("source", &self.source)?;
        if self.url.trim().is_empty() {
            return Err(anyhow!("camera {}/{} has no stream url", self.room, self.source));
        }
        Ok(())
    }

    /// Short display name used in logs and thread names.
    pub fn label(&self) -> String {
        format!("{}/{}", self.room, self.source)
    }
}

impl TryFrom<CameraEntryFile> for CameraConfig {
    type Error = anyhow::Error;

    fn try_from(entry: CameraEntryFile) -> Result<Self> {
        let url = match (entry.url, entry.ip) {
            (Some(url), _) if !url.trim().is_empty() => url,
            (_, Some(ip)) if !ip.trim().is_empty() => {
                format!("{}{}", ip.trim().trim_end_matches('/'), LEGACY_STREAM_PATH)
            }
            _ => {
                return Err(anyhow!(
                    "camera {}/{} needs either 'url' or 'ip'",
                    entry.room,
                    entry.source
                ))
            }
        };
        Ok(CameraConfig::new(&entry.room, &entry.source, &url))
    }
}

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub cameras: Vec<CameraConfig>,
    pub cameras_path: Option<PathBuf>,
    pub storage: StorageSettings,
    pub detector: DetectorSettings,
    pub timing: TimingSettings,
    pub api: ApiSettings,
    pub upload: Option<UploadSettings>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub screenshot_dir: PathBuf,
    pub log_path: PathBuf,
    pub state_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub min_confidence: f32,
    pub labels: Vec<String>,
    /// Label reported by the `stub` backend.
    pub stub_label: String,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            stub_label: DEFAULT_STUB_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub detection_interval: Duration,
    pub cooldown_window: Duration,
    pub reconnect_backoff: Duration,
    pub read_timeout: Duration,
    pub pause_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub endpoint: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl GuardianConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GUARDIAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.load_registry()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GuardianConfigFile) -> Result<Self> {
        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .map(CameraConfig::try_from)
            .collect::<Result<Vec<_>>>()?;
        let cameras_path = file.cameras_path.or_else(|| {
            if cameras.is_empty() {
                Some(PathBuf::from(DEFAULT_CAMERAS_PATH))
            } else {
                None
            }
        });

        let storage = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            screenshot_dir: storage
                .screenshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            log_path: storage
                .log_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            state_path: storage
                .state_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
        };

        let detection = file.detection.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detection.backend.unwrap_or(defaults.backend),
            model_path: detection.model_path,
            input_size: detection.input_size.unwrap_or(defaults.input_size),
            min_confidence: detection.min_confidence.unwrap_or(defaults.min_confidence),
            labels: detection.labels.unwrap_or(defaults.labels),
            stub_label: detection.stub_label.unwrap_or(defaults.stub_label),
        };

        let stream = file.stream.unwrap_or_default();
        let timing = TimingSettings {
            detection_interval: Duration::from_millis(
                detection
                    .interval_ms
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL_MS),
            ),
            cooldown_window: Duration::from_secs(
                detection.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            reconnect_backoff: Duration::from_millis(
                stream
                    .reconnect_backoff_ms
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
            ),
            read_timeout: Duration::from_millis(
                stream.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            pause_poll_interval: Duration::from_millis(
                file.control
                    .and_then(|control| control.pause_poll_ms)
                    .unwrap_or(DEFAULT_PAUSE_POLL_MS),
            ),
        };

        let api = file.api.unwrap_or_default();
        let api = ApiSettings {
            enabled: api.enabled.unwrap_or(true),
            addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        };

        let upload = file.upload.and_then(|upload| {
            upload.endpoint.map(|endpoint| UploadSettings {
                endpoint,
                max_attempts: upload.max_attempts.unwrap_or(DEFAULT_UPLOAD_ATTEMPTS),
                retry_delay: Duration::from_millis(
                    upload.retry_delay_ms.unwrap_or(DEFAULT_UPLOAD_RETRY_MS),
                ),
                timeout: timing.read_timeout,
            })
        });

        Ok(Self {
            cameras,
            cameras_path,
            storage,
            detector,
            timing,
            api,
            upload,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("GUARDIAN_CAMERAS_PATH") {
            if !path.trim().is_empty() {
                self.cameras_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(addr) = std::env::var("GUARDIAN_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api.addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("GUARDIAN_SCREENSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.storage.screenshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("GUARDIAN_LOG_PATH") {
            if !path.trim().is_empty() {
                self.storage.log_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("GUARDIAN_STATE_PATH") {
            if !path.trim().is_empty() {
                self.storage.state_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("GUARDIAN_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("GUARDIAN_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(labels) = std::env::var("GUARDIAN_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detector.labels = parsed;
            }
        }
        if let Ok(cooldown) = std::env::var("GUARDIAN_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("GUARDIAN_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.timing.cooldown_window = Duration::from_secs(seconds);
        }
        if let Ok(endpoint) = std::env::var("GUARDIAN_UPLOAD_URL") {
            if !endpoint.trim().is_empty() {
                match self.upload.as_mut() {
                    Some(upload) => upload.endpoint = endpoint,
                    None => {
                        self.upload = Some(UploadSettings {
                            endpoint,
                            max_attempts: DEFAULT_UPLOAD_ATTEMPTS,
                            retry_delay: Duration::from_millis(DEFAULT_UPLOAD_RETRY_MS),
                            timeout: self.timing.read_timeout,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends the cameras from the registry file, if one is configured.
    fn load_registry(&mut self) -> Result<()> {
        if let Some(path) = self.cameras_path.clone() {
            let registry = load_camera_registry(&path)?;
            self.cameras.extend(registry);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !seen.insert((camera.room.clone(), camera.source.clone())) {
                return Err(anyhow!("camera {} is configured twice", camera.label()));
            }
        }

        // Fails on an empty allow-list or an out-of-range confidence.
        DetectionFilter::new(&self.detector.labels, self.detector.min_confidence)?;

        if self.detector.input_size == 0 {
            return Err(anyhow!("detection.input_size must be greater than zero"));
        }
        for (name, value) in [
            ("detection.interval_ms", self.timing.detection_interval),
            ("stream.reconnect_backoff_ms", self.timing.reconnect_backoff),
            ("stream.read_timeout_ms", self.timing.read_timeout),
            ("control.pause_poll_ms", self.timing.pause_poll_interval),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if let Some(upload) = &self.upload {
            if !upload.endpoint.starts_with("http://") && !upload.endpoint.starts_with("https://") {
                return Err(anyhow!("upload endpoint must be an http(s) url"));
            }
            if upload.max_attempts == 0 {
                return Err(anyhow!("upload.max_attempts must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn detection_filter(&self) -> Result<DetectionFilter> {
        DetectionFilter::new(&self.detector.labels, self.detector.min_confidence)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            detection_interval: self.timing.detection_interval,
            pause_poll_interval: self.timing.pause_poll_interval,
            reconnect_backoff: self.timing.reconnect_backoff,
            cooldown_window: self.timing.cooldown_window,
        }
    }
}

/// Reads the dashboard camera registry (`[{"ip", "room", "source"}]`).
///
/// A missing file is an empty registry; a malformed one is an error.
pub fn load_camera_registry(path: &Path) -> Result<Vec<CameraConfig>> {
    if !path.exists() {
        log::warn!("camera registry {} not found", path.display());
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read camera registry {}: {}", path.display(), e))?;
    let entries: Vec<CameraEntryFile> = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid camera registry {}: {}", path.display(), e))?;
    entries.into_iter().map(CameraConfig::try_from).collect()
}

/// Writes the registry as `[{"room", "source", "url"}]`, replacing the file
/// atomically.
pub fn save_camera_registry(path: &Path, cameras: &[CameraConfig]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cameras)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, format!("{}\n", json))
        .map_err(|e| anyhow!("failed to write camera registry {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| anyhow!("failed to replace camera registry {}: {}", path.display(), e))?;
    Ok(())
}

fn read_config_file(path: &Path) -> Result<GuardianConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_entry_appends_video_path() {
        let entry = CameraEntryFile {
            room: "Lab".into(),
            source: "phone1".into(),
            url: None,
            ip: Some("http://192.168.1.20:8080/".into()),
        };
        let camera = CameraConfig::try_from(entry).unwrap();
        assert_eq!(camera.url, "http://192.168.1.20:8080/video");
    }

    #[test]
    fn entry_without_locator_is_rejected() {
        let entry = CameraEntryFile {
            room: "Lab".into(),
            source: "phone1".into(),
            url: None,
            ip: Some("  ".into()),
        };
        assert!(CameraConfig::try_from(entry).is_err());
    }

    #[test]
    fn defaults_match_deployment() {
        let cfg = GuardianConfig::from_file(GuardianConfigFile::default()).unwrap();
        assert_eq!(cfg.cameras_path, Some(PathBuf::from(DEFAULT_CAMERAS_PATH)));
        assert_eq!(cfg.timing.detection_interval, Duration::from_secs(2));
        assert_eq!(cfg.timing.cooldown_window, Duration::from_secs(120));
        assert_eq!(cfg.timing.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(cfg.timing.pause_poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.detector.labels, vec!["mobile phone", "cell phone", "phone"]);
        assert_eq!(cfg.api.addr, "127.0.0.1:5001");
        assert!(cfg.upload.is_none());
    }

    #[test]
    fn saved_registry_loads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cams").join("camera_config.json");
        assert!(load_camera_registry(&path).unwrap().is_empty());
        let cameras = vec![
            CameraConfig::new("Lab", "phone1", "http://10.0.0.5:8080/video"),
            CameraConfig::new("Office", "cam2", "stub://office"),
        ];
        save_camera_registry(&path, &cameras).unwrap();
        assert_eq!(load_camera_registry(&path).unwrap(), cameras);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn split_csv_trims_entries() {
        assert_eq!(split_csv(" phone, ,tablet "), vec!["phone", "tablet"]);
    }
}
