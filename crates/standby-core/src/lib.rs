pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod io;
pub mod matcher;
pub mod notify;
pub mod orchestrator;
pub mod paths;
pub mod policy;
pub mod roster;
pub mod store;
pub mod sweep;
pub mod types;

#[cfg(test)]
mod testkit;

pub use engine::Engine;
pub use error::{EngineError, Result};
