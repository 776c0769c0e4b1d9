//! # Configuration Loading
//!
//! Reads an optional TOML file into [`PipelineConfig`], then applies
//! `VIGIL_*` environment overrides and validates the result.

use std::path::{Path, PathBuf};
use vigil_core::{PipelineConfig, VigilError};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "vigil.toml";

/// Environment variables that override `[paths]` entries.
pub const ENV_ARTIFACT_ROOT: &str = "VIGIL_ARTIFACT_ROOT";
pub const ENV_REGISTRY_ROOT: &str = "VIGIL_REGISTRY_ROOT";
pub const ENV_DATA_ROOT: &str = "VIGIL_DATA_ROOT";

/// Parse a TOML document. Missing sections and keys take their defaults.
pub fn parse_config(text: &str) -> Result<PipelineConfig, VigilError> {
    toml::from_str(text).map_err(|e| VigilError::ConfigError(e.to_string()))
}

/// Apply path overrides from `lookup` (normally the process environment).
pub fn apply_overrides<F>(config: &mut PipelineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let paths = &mut config.paths;
    for (key, slot) in [
        (ENV_ARTIFACT_ROOT, &mut paths.artifact_root),
        (ENV_REGISTRY_ROOT, &mut paths.registry_root),
        (ENV_DATA_ROOT, &mut paths.data_root),
    ] {
        if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
            tracing::debug!(key, value = %value, "config override from environment");
            *slot = PathBuf::from(value);
        }
    }
}

/// Load the configuration used by every command.
///
/// A missing file is not an error; defaults are used instead.
pub fn load_config(path: &Path) -> Result<PipelineConfig, VigilError> {
    let mut config = if path.is_file() {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VigilError::IoError(format!("{}: {}", path.display(), e)))?;
        parse_config(&text)?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        PipelineConfig::default()
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
