use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tempfile::TempDir;

use room_guardian::config::DetectorSettings;
use room_guardian::ingest::default_source_factory;
use room_guardian::{
    BackendRegistry, CameraConfig, CsvEventLog, Detection, DetectionEvent, DetectionFilter,
    DetectionGate, DetectionState, DetectorBackend, DetectorFactory, EventLogStore, EventSink,
    FileStateStore, Frame, FrameSource, LocalEventSink, SourceFactory, SourceStats, StateStore,
    StreamState, Supervisor, SupervisorHandle, WorkerSettings,
};

// -------------------- Fakes --------------------

/// Shared switches and counters for a scripted camera.
#[derive(Default)]
struct Script {
    down: AtomicBool,
    connects: AtomicU64,
    releases: AtomicU64,
}

struct ScriptedSource {
    script: Arc<Script>,
    connected: bool,
    frames: u64,
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if self.script.down.load(Ordering::SeqCst) {
            return Err(anyhow!("camera offline"));
        }
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected || self.script.down.load(Ordering::SeqCst) {
            return Err(anyhow!("stream closed"));
        }
        self.frames += 1;
        Frame::captured_now(vec![42u8; 8 * 8 * 3], 8, 8)
    }

    fn release(&mut self) {
        self.connected = false;
        self.script.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames,
            locator: "scripted://".into(),
        }
    }
}

/// Source factory keyed by room; rooms without a script fail to build.
fn scripted_sources(scripts: Vec<(&str, Arc<Script>)>) -> SourceFactory {
    let scripts: Vec<(String, Arc<Script>)> = scripts
        .into_iter()
        .map(|(room, script)| (room.to_string(), script))
        .collect();
    Arc::new(move |camera: &CameraConfig| -> Result<Box<dyn FrameSource>> {
        let script = scripts
            .iter()
            .find(|(room, _)| *room == camera.room)
            .map(|(_, script)| Arc::clone(script))
            .ok_or_else(|| anyhow!("no stream for {}", camera.room))?;
        Ok(Box::new(ScriptedSource {
            script,
            connected: false,
            frames: 0,
        }) as Box<dyn FrameSource>)
    })
}

/// Reports the same label on every frame.
struct AlwaysDetector(&'static str);

impl DetectorBackend for AlwaysDetector {
    fn name(&self) -> &'static str {
        "always"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(vec![
            Detection::new(self.0, 0.9),
            Detection::new("person", 0.95),
        ])
    }
}

/// Reports `phone-N` with a fresh N each frame, so cooldown never suppresses.
struct CountingDetector(u64);

impl DetectorBackend for CountingDetector {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.0 += 1;
        Ok(vec![Detection::new(format!("phone-{}", self.0), 0.9)])
    }
}

/// Fails every other frame.
struct FlakyDetector(u64);

impl DetectorBackend for FlakyDetector {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.0 += 1;
        if self.0 % 2 == 0 {
            return Err(anyhow!("inference crashed"));
        }
        Ok(vec![Detection::new(format!("phone-{}", self.0), 0.9)])
    }
}

fn detectors<F>(make: F) -> DetectorFactory
where
    F: Fn() -> Box<dyn DetectorBackend> + Send + Sync + 'static,
{
    Arc::new(move || -> Result<Box<dyn DetectorBackend>> { Ok(make()) })
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<DetectionEvent>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn rooms(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.room.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &DetectionEvent, _frame: &Frame) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct FailingSink;

impl EventSink for FailingSink {
    fn record(&self, _event: &DetectionEvent, _frame: &Frame) -> Result<()> {
        Err(anyhow!("disk full"))
    }
}

// -------------------- Helpers --------------------

fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        detection_interval: Duration::from_millis(10),
        pause_poll_interval: Duration::from_millis(20),
        reconnect_backoff: Duration::from_millis(20),
        cooldown_window: Duration::from_secs(120),
    }
}

fn camera(room: &str, source: &str) -> CameraConfig {
    CameraConfig::new(room, source, &format!("scripted://{}", room))
}

fn start(
    gate: DetectionGate,
    sink: Arc<dyn EventSink>,
    sources: SourceFactory,
    detectors: DetectorFactory,
    cameras: &[CameraConfig],
) -> SupervisorHandle {
    Supervisor::new(
        fast_settings(),
        DetectionFilter::default(),
        gate,
        sink,
        sources,
        detectors,
    )
    .start(cameras)
    .expect("supervisor start")
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

// -------------------- Tests --------------------

#[test]
fn repeated_frame_yields_single_event_per_cooldown() {
    let script = Arc::new(Script::default());
    let sink = Arc::new(RecordingSink::default());
    let handle = start(
        DetectionGate::in_memory(),
        sink.clone(),
        scripted_sources(vec![("Lab", script)]),
        detectors(|| Box::new(AlwaysDetector("Cell Phone"))),
        &[camera("Lab", "cam1")],
    );

    wait_until("ten processed frames", || handle.statuses()[0].frames_processed >= 10);
    let snapshot = handle.statuses()[0].clone();
    handle.stop();

    assert_eq!(sink.count(), 1);
    assert_eq!(snapshot.events_emitted, 1);
    let event = sink.events.lock().unwrap()[0].clone();
    assert_eq!(event.label, "Cell Phone");
    assert!(event.image.starts_with("Lab_cam1_"));
}

#[test]
fn pause_stops_events_and_resume_restarts_them() {
    let script = Arc::new(Script::default());
    let sink = Arc::new(RecordingSink::default());
    let gate = DetectionGate::in_memory();
    gate.set_state(DetectionState::Paused).unwrap();

    let handle = start(
        gate.clone(),
        sink.clone(),
        scripted_sources(vec![("Lab", script.clone())]),
        detectors(|| Box::new(CountingDetector(0))),
        &[camera("Lab", "cam1")],
    );

    wait_until("paused state", || handle.statuses()[0].state == StreamState::Paused);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sink.count(), 0);
    assert_eq!(handle.statuses()[0].frames_processed, 0);
    assert_eq!(script.connects.load(Ordering::SeqCst), 0);

    gate.set_state(DetectionState::Active).unwrap();
    wait_until("event after resume", || sink.count() >= 1);

    gate.set_state(DetectionState::Paused).unwrap();
    wait_until("paused again", || handle.statuses()[0].state == StreamState::Paused);
    let paused_at = sink.count();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sink.count(), paused_at);
    assert!(script.releases.load(Ordering::SeqCst) >= 1);

    handle.stop();
}

#[test]
fn external_state_file_writes_reach_workers() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("detection_state.json");
    let gate = DetectionGate::new(Arc::new(FileStateStore::new(&state_path))).unwrap();
    // Stands in for `guardianctl`, which only shares the file with the daemon.
    let operator = FileStateStore::new(&state_path);

    let script = Arc::new(Script::default());
    let sink = Arc::new(RecordingSink::default());
    let handle = start(
        gate.clone(),
        sink.clone(),
        scripted_sources(vec![("Lab", script.clone()), ("Office", script)]),
        detectors(|| Box::new(CountingDetector(0))),
        &[camera("Lab", "cam1"), camera("Office", "cam1")],
    );
    wait_until("events before pause", || sink.count() >= 2);

    operator.store(DetectionState::Paused).unwrap();
    wait_until("workers paused by the state file", || {
        handle
            .statuses()
            .iter()
            .all(|s| s.state == StreamState::Paused)
    });
    assert!(gate.is_paused());
    let paused_at = sink.count();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sink.count(), paused_at);

    operator.store(DetectionState::Active).unwrap();
    wait_until("events after external resume", || sink.count() > paused_at + 1);
    assert!(!gate.is_paused());
    handle.stop();
}

#[test]
fn unreachable_camera_does_not_block_others() {
    let broken = Arc::new(Script::default());
    broken.down.store(true, Ordering::SeqCst);
    let healthy = Arc::new(Script::default());
    let sink = Arc::new(RecordingSink::default());

    let handle = start(
        DetectionGate::in_memory(),
        sink.clone(),
        scripted_sources(vec![("RoomA", broken.clone()), ("RoomB", healthy)]),
        detectors(|| Box::new(CountingDetector(0))),
        &[
            camera("RoomA", "cam"),
            camera("RoomB", "cam"),
            // No script: the source cannot be built, so this camera is skipped.
            camera("RoomC", "cam"),
        ],
    );
    assert_eq!(handle.worker_count(), 2);

    wait_until("events from RoomB", || sink.count() >= 3);
    wait_until("RoomA retries", || broken.connects.load(Ordering::SeqCst) >= 3);
    let statuses = handle.statuses();
    handle.stop();

    assert!(sink.rooms().iter().all(|room| room == "RoomB"));
    let room_a = statuses.iter().find(|s| s.camera == "RoomA/cam").unwrap();
    assert_eq!(room_a.events_emitted, 0);
    assert!(room_a.stream_failures >= 1);
    assert!(room_a
        .last_failure
        .as_deref()
        .unwrap()
        .starts_with("stream_unavailable"));
}

#[test]
fn stream_recovers_after_mid_stream_failure() {
    let script = Arc::new(Script::default());
    let sink = Arc::new(RecordingSink::default());
    let handle = start(
        DetectionGate::in_memory(),
        sink.clone(),
        scripted_sources(vec![("Lab", script.clone())]),
        detectors(|| Box::new(CountingDetector(0))),
        &[camera("Lab", "cam1")],
    );

    wait_until("initial events", || sink.count() >= 2);
    script.down.store(true, Ordering::SeqCst);
    wait_until("reconnecting", || {
        handle.statuses()[0].state == StreamState::Reconnecting
            && script.connects.load(Ordering::SeqCst) >= 3
    });

    let before = sink.count();
    script.down.store(false, Ordering::SeqCst);
    wait_until("events after recovery", || sink.count() > before + 1);
    assert_eq!(handle.statuses()[0].state, StreamState::Streaming);
    handle.stop();
}

#[test]
fn empty_or_unbuildable_camera_list_is_an_error() {
    let sink: Arc<dyn EventSink> = Arc::new(RecordingSink::default());
    let supervisor = Supervisor::new(
        fast_settings(),
        DetectionFilter::default(),
        DetectionGate::in_memory(),
        sink.clone(),
        scripted_sources(Vec::new()),
        detectors(|| Box::new(CountingDetector(0))),
    );
    let err = supervisor.start(&[]).err().unwrap();
    assert!(err.to_string().contains("no cameras configured"));

    let supervisor = Supervisor::new(
        fast_settings(),
        DetectionFilter::default(),
        DetectionGate::in_memory(),
        sink,
        scripted_sources(Vec::new()),
        detectors(|| Box::new(CountingDetector(0))),
    );
    assert!(supervisor.start(&[camera("Lab", "cam1")]).is_err());
}

#[test]
fn shutdown_releases_every_source() {
    let a = Arc::new(Script::default());
    let b = Arc::new(Script::default());
    let handle = start(
        DetectionGate::in_memory(),
        Arc::new(RecordingSink::default()),
        scripted_sources(vec![("RoomA", a.clone()), ("RoomB", b.clone())]),
        detectors(|| Box::new(CountingDetector(0))),
        &[camera("RoomA", "cam"), camera("RoomB", "cam")],
    );
    let status_handles = handle.status_handles();
    wait_until("both streaming", || {
        handle
            .statuses()
            .iter()
            .all(|s| s.state == StreamState::Streaming)
    });

    let shutdown = handle.shutdown();
    shutdown.trigger();
    handle.wait();

    assert!(a.releases.load(Ordering::SeqCst) >= 1);
    assert!(b.releases.load(Ordering::SeqCst) >= 1);
    assert!(status_handles
        .iter()
        .all(|s| s.state() == StreamState::Stopped));
}

#[test]
fn detector_and_sink_failures_do_not_stop_the_worker() {
    let script = Arc::new(Script::default());
    let handle = start(
        DetectionGate::in_memory(),
        Arc::new(FailingSink),
        scripted_sources(vec![("Lab", script)]),
        detectors(|| Box::new(FlakyDetector(0))),
        &[camera("Lab", "cam1")],
    );

    wait_until("both failure kinds", || {
        let s = &handle.statuses()[0];
        s.inference_failures >= 2 && s.sink_failures >= 2
    });
    let snapshot = handle.statuses()[0].clone();
    handle.stop();

    assert_eq!(snapshot.events_emitted, 0);
    assert_eq!(snapshot.stream_failures, 0);
    assert!(snapshot.frames_processed >= 4);
}

#[test]
fn local_sink_pipeline_writes_image_before_log() {
    let dir = TempDir::new().unwrap();
    let shots = dir.path().join("screenshots");
    let log_path = dir.path().join("logs.csv");
    let sink = Arc::new(LocalEventSink::open(&shots, &log_path).unwrap());

    let registry = BackendRegistry::with_builtin(&DetectorSettings::default());
    let cameras = [
        CameraConfig::new("Lab", "cam1", "stub://lab?width=16&height=16&scene_every=1"),
        CameraConfig::new("Office", "cam2", "stub://office?width=16&height=16&scene_every=1"),
    ];
    let handle = Supervisor::new(
        fast_settings(),
        DetectionFilter::default(),
        DetectionGate::in_memory(),
        sink.clone(),
        default_source_factory(Duration::from_secs(1)),
        registry.factory("stub").unwrap(),
    )
    .start(&cameras)
    .unwrap();

    wait_until("one event per room", || {
        handle.statuses().iter().all(|s| s.events_emitted == 1)
    });
    wait_until("frames past the first", || {
        handle.statuses().iter().all(|s| s.frames_processed >= 5)
    });
    handle.stop();

    let mut log = CsvEventLog::open_existing(&log_path).unwrap();
    let events = log.recent(10).unwrap();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event.label, "cell phone");
        assert!(shots.join(&event.image).is_file(), "missing {}", event.image);
    }
    assert_eq!(sink.screenshots().latest(10).unwrap().len(), 2);

    let raw = std::fs::read_to_string(&log_path).unwrap();
    assert!(raw.starts_with("timestamp,room,label,image\n"));
}
