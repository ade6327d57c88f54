use anyhow::Result;
use std::path::PathBuf;

/// Place a config file under the spoctl XDG config directory,
/// creating parent directories as needed
pub fn place_config_file(filename: &str) -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("spoctl")
        .map_err(|e| anyhow::anyhow!("Failed to initialize XDG base directories: {}", e))?;

    xdg_dirs
        .place_config_file(filename)
        .map_err(|e| anyhow::anyhow!("Failed to determine path for {}: {}", filename, e))
}
