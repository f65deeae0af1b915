use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Global monitoring state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    #[default]
    Active,
    Paused,
}

impl DetectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Active => "active",
            DetectionState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for DetectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(DetectionState::Active),
            "paused" => Ok(DetectionState::Paused),
            other => Err(anyhow!("unknown detection state '{}'", other)),
        }
    }
}

/// Durable home of the detection state flag.
pub trait StateStore: Send + Sync {
    /// Returns `None` when no state has ever been stored.
    fn load(&self) -> Result<Option<DetectionState>>;

    fn store(&self, state: DetectionState) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    status: DetectionState,
}

/// JSON file store: `{"status": "active"}`.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a half-written record.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<DetectionState>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow!(
                    "failed to read detection state {}: {}",
                    self.path.display(),
                    e
                ))
            }
        };
        let record: StateRecord = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection state {}: {}", self.path.display(), e))?;
        Ok(Some(record.status))
    }

    fn store(&self, state: DetectionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create state directory {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string(&StateRecord { status: state })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format!("{json}\n"))
            .with_context(|| format!("write detection state {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace detection state {}", self.path.display()))?;
        Ok(())
    }
}

/// Process-local store for tests and API-only deployments.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<Option<DetectionState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<Option<DetectionState>> {
        Ok(*self
            .state
            .lock()
            .map_err(|_| anyhow!("state store lock poisoned"))?)
    }

    fn store(&self, state: DetectionState) -> Result<()> {
        *self
            .state
            .lock()
            .map_err(|_| anyhow!("state store lock poisoned"))? = Some(state);
        Ok(())
    }
}

/// Global pause/resume gate read by every camera worker.
///
/// # Polling contract
///
/// - `state()` / `is_paused()` are a single atomic load; workers call them every cycle.
/// - `set_state()` persists first, then flips the in-process flag.
/// - Writes made to the store by another process (e.g. `guardianctl pause`) are
///   picked up by `refresh()`, which the supervisor calls once per pause-poll
///   interval. They become visible to workers within that interval.
/// - `set_state()` and `refresh()` hold one shared lock across their store and
///   flag updates, so a refresh never applies a state older than a concurrent set.
#[derive(Clone)]
pub struct DetectionGate {
    paused: Arc<AtomicBool>,
    store: Arc<dyn StateStore>,
    update: Arc<Mutex<()>>,
}

impl DetectionGate {
    /// Opens the gate with the persisted state, defaulting to active.
    pub fn new(store: Arc<dyn StateStore>) -> Result<Self> {
        let initial = store.load()?.unwrap_or_default();
        Ok(Self {
            paused: Arc::new(AtomicBool::new(initial == DetectionState::Paused)),
            store,
            update: Arc::new(Mutex::new(())),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            store: Arc::new(InMemoryStateStore::new()),
            update: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> DetectionState {
        if self.paused.load(Ordering::Acquire) {
            DetectionState::Paused
        } else {
            DetectionState::Active
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == DetectionState::Paused
    }

    pub fn set_state(&self, state: DetectionState) -> Result<()> {
        let _update = self.update.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.store.store(state)?;
        let previous = self.apply(state);
        if previous != state {
            log::info!("detection state changed: {} -> {}", previous, state);
        }
        Ok(())
    }

    /// Reloads the persisted state. A missing record leaves the current state alone.
    pub fn refresh(&self) -> Result<DetectionState> {
        let _update = self.update.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(state) = self.store.load()? {
            let previous = self.apply(state);
            if previous != state {
                log::info!("detection state changed externally: {} -> {}", previous, state);
            }
        }
        Ok(self.state())
    }

    fn apply(&self, state: DetectionState) -> DetectionState {
        let was_paused = self
            .paused
            .swap(state == DetectionState::Paused, Ordering::AcqRel);
        if was_paused {
            DetectionState::Paused
        } else {
            DetectionState::Active
        }
    }
}

impl std::fmt::Debug for DetectionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionGate")
            .field("state", &self.state())
            .finish()
    }
}
