pub mod alert;
pub mod config;
pub mod import;
pub mod init;
pub mod policy;
pub mod serve;
pub mod sweep;
pub mod trip;
pub mod workflow;

use anyhow::Context;
use standby_core::Engine;
use std::path::Path;

/// Open the engine at `root`, delivering notifications as configured.
pub fn open(root: &Path) -> anyhow::Result<Engine> {
    Engine::open(root).with_context(|| format!("cannot open standby project at {}", root.display()))
}
