//! Engine configuration discovery.

use std::path::{Path, PathBuf};

use miette::{Result, miette};
use tfengine_core::EngineConfig;
use tracing::debug;

/// Loads the engine configuration.
///
/// An explicit path must exist. Otherwise the per-user config file is used
/// when present, and built-in defaults when it is not.
pub fn load(explicit: Option<&Path>) -> Result<EngineConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path().filter(|p| p.is_file()) {
            Some(path) => path,
            None => {
                debug!("no config file found, using defaults");
                return Ok(EngineConfig::default());
            }
        },
    };

    debug!(path = %path.display(), "loading config");
    EngineConfig::from_file(&path)
        .map_err(|e| miette!("Failed to load config from {}: {}", path.display(), e))
}

/// `<config dir>/tfengine/config.json`, e.g. `~/.config/tfengine/config.json`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tfengine").join("config.json"))
}
