//! Config file discovery for the CLI.
//!
//! Lookup order: explicit `--config` path, then the per-user file at
//! `<config dir>/testforge/config.yaml`, then built-in defaults.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "testforge";
const CONFIG_FILE: &str = "config.yaml";

/// Per-user config location (~/.config/testforge/config.yaml on Linux)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join(APP_DIR).join(CONFIG_FILE))
}

/// Config file to load, if any
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    resolve_with(explicit, user_config_path().as_deref())
}

fn resolve_with(explicit: Option<&str>, user_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }
    user_path.filter(|p| p.is_file()).map(Path::to_path_buf)
}
