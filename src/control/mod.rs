//! Detection state gate and the `guardianctl` CLI.

mod gate;

pub mod cli;

pub use cli::run;
pub use gate::{DetectionGate, DetectionState, FileStateStore, InMemoryStateStore, StateStore};
