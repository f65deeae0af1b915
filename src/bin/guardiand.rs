//! guardiand - Room Guardian daemon
//!
//! This daemon:
//! 1. Loads configuration and the camera registry
//! 2. Opens the event sink (local screenshots + CSV log, or a remote endpoint)
//! 3. Starts one camera worker per camera under the supervisor
//! 4. Serves the loopback control API
//! 5. Shuts everything down cleanly on Ctrl-C / SIGTERM

use anyhow::{anyhow, Result};
use std::sync::Arc;

use room_guardian::api::{ApiConfig, ApiServer, ApiState};
use room_guardian::ingest::default_source_factory;
use room_guardian::{
    BackendRegistry, DetectionGate, EventSink, FileStateStore, GuardianConfig, LocalEventSink,
    Shutdown, Supervisor,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = GuardianConfig::load()?;
    if cfg.cameras.is_empty() {
        return Err(anyhow!(
            "no cameras configured (registry: {})",
            cfg.cameras_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        ));
    }
    log::info!(
        "guardiand {} starting with {} camera(s), detector '{}'",
        env!("CARGO_PKG_VERSION"),
        cfg.cameras.len(),
        cfg.detector.backend
    );

    let registry = BackendRegistry::with_builtin(&cfg.detector);
    let detectors = registry.factory(&cfg.detector.backend)?;
    let shutdown = Shutdown::new();
    let sink = open_sink(&cfg, &shutdown)?;
    let gate = DetectionGate::new(Arc::new(FileStateStore::new(&cfg.storage.state_path)))?;
    log::info!("detection state: {}", gate.state());

    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        handler_shutdown.trigger();
    })?;

    let supervisor = Supervisor::new(
        cfg.worker_settings(),
        cfg.detection_filter()?,
        gate.clone(),
        sink,
        default_source_factory(cfg.timing.read_timeout),
        detectors,
    )
    .with_shutdown(shutdown);
    let handle = supervisor.start(&cfg.cameras)?;

    let api = if cfg.api.enabled {
        let api_cfg = ApiConfig {
            addr: cfg.api.addr.clone(),
            log_path: cfg.storage.log_path.clone(),
            screenshot_dir: cfg.storage.screenshot_dir.clone(),
        };
        let state = ApiState {
            gate,
            workers: handle.status_handles(),
        };
        let api = ApiServer::new(api_cfg, state).spawn()?;
        log::info!("control api listening on {}", api.addr);
        Some(api)
    } else {
        None
    };

    handle.wait();
    if let Some(api) = api {
        api.stop()?;
    }
    log::info!("guardiand stopped");
    Ok(())
}

fn open_sink(cfg: &GuardianConfig, shutdown: &Shutdown) -> Result<Arc<dyn EventSink>> {
    #[cfg(feature = "upload")]
    if let Some(upload) = &cfg.upload {
        log::info!("uploading events to {}", upload.endpoint);
        let sink = room_guardian::sink::RemoteEventSink::new(upload).with_shutdown(shutdown.clone());
        return Ok(Arc::new(sink));
    }
    #[cfg(not(feature = "upload"))]
    {
        let _ = shutdown;
        if cfg.upload.is_some() {
            return Err(anyhow!("upload endpoint configured but the upload feature is disabled"));
        }
    }

    let sink = LocalEventSink::open(&cfg.storage.screenshot_dir, &cfg.storage.log_path)?;
    log::info!(
        "recording events to {} (screenshots in {})",
        cfg.storage.log_path.display(),
        cfg.storage.screenshot_dir.display()
    );
    Ok(Arc::new(sink))
}
