//! Starts one worker thread per camera and owns the shutdown signal.
//!
//! The camera list is fixed for the lifetime of a supervisor. Workers are not
//! restarted: they only exit on shutdown.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::CameraConfig;
use crate::control::DetectionGate;
use crate::cooldown::CooldownTracker;
use crate::detect::{DetectionFilter, DetectorFactory};
use crate::ingest::SourceFactory;
use crate::shutdown::Shutdown;
use crate::sink::EventSink;
use crate::worker::{CameraWorker, WorkerContext, WorkerSettings, WorkerSnapshot, WorkerStatus};

pub struct Supervisor {
    ctx: WorkerContext,
    sources: SourceFactory,
    detectors: DetectorFactory,
    shutdown: Shutdown,
}

impl Supervisor {
    pub fn new(
        settings: WorkerSettings,
        filter: DetectionFilter,
        gate: DetectionGate,
        sink: Arc<dyn EventSink>,
        sources: SourceFactory,
        detectors: DetectorFactory,
    ) -> Self {
        let cooldown = Arc::new(CooldownTracker::new(settings.cooldown_window));
        Self {
            ctx: WorkerContext {
                gate,
                filter,
                cooldown,
                sink,
                settings,
            },
            sources,
            detectors,
            shutdown: Shutdown::new(),
        }
    }

    /// Uses an existing shutdown signal instead of a fresh one.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn cooldown(&self) -> Arc<CooldownTracker> {
        Arc::clone(&self.ctx.cooldown)
    }

    /// Spawns a worker per camera.
    ///
    /// An empty camera list is a configuration error. A camera whose source or
    /// detector cannot be built is logged and skipped; a camera whose stream is
    /// merely unreachable still gets a worker, which keeps retrying.
    pub fn start(self, cameras: &[CameraConfig]) -> Result<SupervisorHandle> {
        if cameras.is_empty() {
            return Err(anyhow!(
                "no cameras configured; add entries to the camera registry"
            ));
        }

        let mut workers = Vec::with_capacity(cameras.len());
        let mut statuses = Vec::with_capacity(cameras.len());
        for camera in cameras {
            match self.spawn_worker(camera) {
                Ok((handle, status)) => {
                    workers.push(handle);
                    statuses.push(status);
                }
                Err(e) => log::error!("camera {} not started: {:#}", camera.label(), e),
            }
        }

        if workers.is_empty() {
            self.shutdown.trigger();
            return Err(anyhow!(
                "none of the {} configured cameras could be started",
                cameras.len()
            ));
        }
        log::info!("started {}/{} camera workers", workers.len(), cameras.len());

        let watcher = self.spawn_gate_watcher()?;
        Ok(SupervisorHandle {
            shutdown: self.shutdown,
            gate: self.ctx.gate,
            workers,
            statuses,
            watcher: Some(watcher),
        })
    }

    fn spawn_worker(&self, camera: &CameraConfig) -> Result<(JoinHandle<()>, Arc<WorkerStatus>)> {
        camera.validate()?;
        let source = (self.sources)(camera).context("open frame source")?;
        let detector = (self.detectors)().context("create detector")?;
        let worker = CameraWorker::new(camera.clone(), source, detector, self.ctx.clone());
        let status = worker.status();
        let shutdown = self.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(format!("cam-{}-{}", camera.room, camera.source))
            .spawn(move || worker.run(&shutdown))
            .context("spawn worker thread")?;
        Ok((handle, status))
    }

    /// Re-reads the persisted detection state so external writers are picked
    /// up within one poll interval.
    fn spawn_gate_watcher(&self) -> Result<JoinHandle<()>> {
        let gate = self.ctx.gate.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.ctx.settings.pause_poll_interval;
        std::thread::Builder::new()
            .name("gate-watcher".to_string())
            .spawn(move || {
                while !shutdown.wait_timeout(interval) {
                    if let Err(e) = gate.refresh() {
                        log::warn!("failed to refresh detection state: {:#}", e);
                    }
                }
            })
            .context("spawn gate watcher thread")
    }
}

/// Running pipeline.
pub struct SupervisorHandle {
    shutdown: Shutdown,
    gate: DetectionGate,
    workers: Vec<JoinHandle<()>>,
    statuses: Vec<Arc<WorkerStatus>>,
    watcher: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn gate(&self) -> &DetectionGate {
        &self.gate
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Live status handles, one per started worker.
    pub fn status_handles(&self) -> Vec<Arc<WorkerStatus>> {
        self.statuses.clone()
    }

    pub fn statuses(&self) -> Vec<WorkerSnapshot> {
        self.statuses.iter().map(|status| status.snapshot()).collect()
    }

    /// Triggers shutdown and waits for every worker to release its source.
    pub fn stop(self) {
        self.shutdown.trigger();
        self.wait();
    }

    /// Blocks until shutdown is triggered elsewhere and all threads exit.
    pub fn wait(mut self) {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{} panicked", name);
            }
        }
        self.shutdown.trigger();
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                log::error!("gate watcher panicked");
            }
        }
        log::info!("all camera workers stopped");
    }
}
