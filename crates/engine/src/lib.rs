//! tfengine Engine - Subprocess execution and output streaming for tfengine.

mod engine;
mod launcher;
mod multiplexer;

pub use engine::Engine;
pub use launcher::{Launcher, RunningProcess, SpawnedProcess, exit_code};
pub use multiplexer::Multiplexer;
