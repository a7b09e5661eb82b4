use std::path::{Path, PathBuf};

pub const STANDBY_DIR: &str = ".standby";
pub const CONFIG_FILE: &str = ".standby/config.yaml";
pub const DB_FILE: &str = ".standby/standby.db";

pub fn standby_dir(root: &Path) -> PathBuf {
    root.join(STANDBY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

/// Ids are used as redb key segments joined with `/`.
pub fn validate_id(id: &str) -> crate::error::Result<()> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(crate::error::EngineError::InvalidId(id.to_string()));
    }
    Ok(())
}
