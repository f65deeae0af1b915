//! guardianctl - operator commands for a Room Guardian deployment
//!
//! Works directly on the files the daemon uses: the detection state file, the
//! event log, the screenshot directory and the camera registry. A running
//! daemon picks up pause/resume within one poll interval; registry edits take
//! effect on the next daemon start.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{DetectionGate, DetectionState, FileStateStore};
use crate::config::{load_camera_registry, save_camera_registry, CameraConfig};
use crate::sink::{CsvEventLog, EventLogStore, ScreenshotStore};

#[derive(Parser, Debug)]
#[command(name = "guardianctl", about = "Control and inspect the Room Guardian pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stop detection on every camera
    Pause {
        #[arg(long, env = "GUARDIAN_STATE_PATH", default_value = "detection_state.json")]
        state_path: PathBuf,
    },

    /// Resume detection on every camera
    Resume {
        #[arg(long, env = "GUARDIAN_STATE_PATH", default_value = "detection_state.json")]
        state_path: PathBuf,
    },

    /// Print the current detection state
    Status {
        #[arg(long, env = "GUARDIAN_STATE_PATH", default_value = "detection_state.json")]
        state_path: PathBuf,
    },

    /// Print the most recent events, newest first
    Events {
        #[arg(long, env = "GUARDIAN_LOG_PATH", default_value = "logs.csv")]
        log_path: PathBuf,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Print JSON instead of CSV
        #[arg(long)]
        json: bool,
    },

    /// Print the newest screenshot names
    Screenshots {
        #[arg(long, env = "GUARDIAN_SCREENSHOT_DIR", default_value = "screenshots")]
        screenshot_dir: PathBuf,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List the cameras in the registry
    Cameras {
        #[arg(long, env = "GUARDIAN_CAMERAS_PATH", default_value = "camera_config.json")]
        registry: PathBuf,
    },

    /// Add a camera to the registry
    AddCamera {
        #[arg(long, env = "GUARDIAN_CAMERAS_PATH", default_value = "camera_config.json")]
        registry: PathBuf,
        #[arg(long)]
        room: String,
        #[arg(long)]
        source: String,
        /// Stream url (http(s):// or stub://)
        #[arg(long)]
        url: String,
    },

    /// Remove a camera from the registry
    RemoveCamera {
        #[arg(long, env = "GUARDIAN_CAMERAS_PATH", default_value = "camera_config.json")]
        registry: PathBuf,
        #[arg(long)]
        room: String,
        #[arg(long)]
        source: String,
    },
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    match args.command {
        Command::Pause { state_path } => cmd_set_state(&state_path, DetectionState::Paused),
        Command::Resume { state_path } => cmd_set_state(&state_path, DetectionState::Active),
        Command::Status { state_path } => cmd_status(&state_path),
        Command::Events {
            log_path,
            limit,
            json,
        } => cmd_events(&log_path, limit, json),
        Command::Screenshots {
            screenshot_dir,
            limit,
        } => cmd_screenshots(&screenshot_dir, limit),
        Command::Cameras { registry } => cmd_cameras(&registry),
        Command::AddCamera {
            registry,
            room,
            source,
            url,
        } => cmd_add_camera(&registry, CameraConfig::new(&room, &source, &url)),
        Command::RemoveCamera {
            registry,
            room,
            source,
        } => cmd_remove_camera(&registry, &room, &source),
    }
}

fn open_gate(state_path: &Path) -> Result<DetectionGate> {
    DetectionGate::new(Arc::new(FileStateStore::new(state_path)))
}

fn cmd_set_state(state_path: &Path, state: DetectionState) -> Result<()> {
    let gate = open_gate(state_path)?;
    gate.set_state(state)?;
    println!("detection {}", state);
    Ok(())
}

fn cmd_status(state_path: &Path) -> Result<()> {
    let gate = open_gate(state_path)?;
    println!("detection {}", gate.state());
    Ok(())
}

fn cmd_events(log_path: &Path, limit: usize, json: bool) -> Result<()> {
    if !log_path.exists() {
        return Err(anyhow!("event log {} not found", log_path.display()));
    }
    let events = CsvEventLog::open_existing(log_path)?.recent(limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    for event in events {
        println!(
            "{},{},{},{}",
            crate::format_log_timestamp(&event.timestamp),
            event.room,
            event.label,
            event.image
        );
    }
    Ok(())
}

fn cmd_screenshots(dir: &Path, limit: usize) -> Result<()> {
    if !dir.is_dir() {
        return Err(anyhow!("screenshot directory {} not found", dir.display()));
    }
    for name in ScreenshotStore::open(dir)?.latest(limit)? {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_cameras(registry: &Path) -> Result<()> {
    let cameras = load_camera_registry(registry)?;
    if cameras.is_empty() {
        println!("no cameras in {}", registry.display());
    }
    for camera in cameras {
        println!("{:<24} {}", camera.label(), camera.url);
    }
    Ok(())
}

fn cmd_add_camera(registry: &Path, camera: CameraConfig) -> Result<()> {
    camera.validate()?;
    let mut cameras = load_camera_registry(registry)?;
    if cameras
        .iter()
        .any(|c| c.room == camera.room && c.source == camera.source)
    {
        return Err(anyhow!("camera {} already registered", camera.label()));
    }
    let label = camera.label();
    cameras.push(camera);
    save_camera_registry(registry, &cameras)?;
    println!("added {}", label);
    Ok(())
}

fn cmd_remove_camera(registry: &Path, room: &str, source: &str) -> Result<()> {
    let mut cameras = load_camera_registry(registry)?;
    let before = cameras.len();
    cameras.retain(|c| !(c.room == room && c.source == source));
    if cameras.len() == before {
        return Err(anyhow!("camera {}/{} not found in {}", room, source, registry.display()));
    }
    save_camera_registry(registry, &cameras)?;
    println!("removed {}/{}", room, source);
    Ok(())
}
