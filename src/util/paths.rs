//! Path utilities for tagcap data directories

use std::path::PathBuf;

/// Get the base tagcap data directory (~/.tagcap)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tagcap"))
        .unwrap_or_else(|| PathBuf::from(".tagcap"))
}

/// Get the config file path (~/.tagcap/config.toml)
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
