//! Command handlers.

pub mod cache;
pub mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use simvlm_core::error::ConfigError;
use simvlm_core::Config;

/// Load from an explicit file, or from the default location when none is given.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// The configuration commands run with.
///
/// A file named with `--config` or `SIMVLM_CONFIG` must load. A broken
/// default config only warns and falls back to defaults. Logging isn't
/// initialized yet, so the warning goes through eprintln.
pub fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    match Config::load() {
        Ok(config) => Ok(config),
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `simvlm config path`."
            );
            Ok(Config::default())
        }
    }
}

/// The config file commands operate on.
pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_malformed_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mine.toml");
        std::fs::write(&path, "[cache\nfile = ").unwrap();

        let err = resolve_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_explicit_invalid_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mine.toml");
        std::fs::write(&path, "[cache]\nmemory_capacity = 0\n").unwrap();

        assert!(resolve_config(Some(&path)).is_err());
    }

    #[test]
    fn test_explicit_config_is_used() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mine.toml");
        let store = dir.path().join("store");
        std::fs::write(
            &path,
            format!("[cache]\nfile = {:?}\n", store.display().to_string()),
        )
        .unwrap();

        let config = resolve_config(Some(&path)).unwrap();
        assert_eq!(config.cache.resolved_file(), Some(store));
    }
}
