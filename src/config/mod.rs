mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./gatehouse.toml",
        "./config.toml",
        "~/.config/gatehouse/config.toml",
        "/etc/gatehouse/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be greater than 0");
    }

    if let Some(secret) = &config.server.token_secret {
        let decoded = hex::decode(secret).context("server.token_secret must be hex")?;
        if decoded.len() < 16 {
            anyhow::bail!("server.token_secret must be at least 16 bytes");
        }
    }

    if config.access.lockout_threshold == 0 {
        anyhow::bail!("access.lockout_threshold must be at least 1");
    }

    for method in &config.raster.methods {
        if method != "pdftoppm" && method != "mutool" {
            anyhow::bail!("Unknown raster method '{}' (expected pdftoppm or mutool)", method);
        }
    }
    if config.raster.methods.is_empty() {
        tracing::warn!("No raster methods configured; every page image will be a placeholder");
    }

    if !(36..=600).contains(&config.raster.dpi) {
        anyhow::bail!("raster.dpi must be between 36 and 600");
    }

    if config.video.workers == 0 {
        anyhow::bail!("video.workers must be at least 1");
    }

    if config.video.segment_seconds == 0 {
        anyhow::bail!("video.segment_seconds must be greater than 0");
    }

    Ok(())
}
