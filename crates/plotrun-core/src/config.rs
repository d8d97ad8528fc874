//! Engine configuration loader.
//!
//! Reads `plotrun.toml` into [`EngineConfig`]. An explicitly requested file
//! must exist and parse; the implicit default location falls back to
//! defaults with a log line, the same way a missing file does.
//! `PLOTRUN_TRACE` (`1`, `true`, `yes`) turns the trace sink on regardless.

use std::path::{Path, PathBuf};

use plotrun_types::config::EngineConfig;
use thiserror::Error;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "plotrun.toml";

/// Environment variable enabling the JSONL trace sink.
pub const TRACE_ENV_VAR: &str = "PLOTRUN_TRACE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Read and parse `path`. Both a missing file and bad TOML are errors.
pub fn read_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `{dir}/plotrun.toml`, falling back to defaults when it is missing or
/// malformed.
pub fn load_engine_config(dir: &Path) -> EngineConfig {
    let path = dir.join(DEFAULT_CONFIG_FILE);
    match read_engine_config(&path) {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}

/// Apply environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut EngineConfig) {
    if let Ok(value) = std::env::var(TRACE_ENV_VAR) {
        if is_truthy(&value) {
            config.trace.enabled = true;
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path());
        assert_eq!(config.metrics_window, 1024);
        assert!(!config.trace.enabled);
    }

    #[test]
    fn load_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(DEFAULT_CONFIG_FILE),
            "default_max_duration_ms = 5000\n[trace]\nenabled = true\n",
        )
        .unwrap();
        let config = load_engine_config(tmp.path());
        assert_eq!(config.default_max_duration_ms, Some(5000));
        assert!(config.trace.enabled);
    }

    #[test]
    fn load_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(DEFAULT_CONFIG_FILE), "this is not { valid toml").unwrap();
        let config = load_engine_config(tmp.path());
        assert_eq!(config.default_max_duration_ms, None);
    }

    #[test]
    fn read_explicit_file_reports_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = read_engine_config(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let bad = tmp.path().join("bad.toml");
        std::fs::write(&bad, "metrics_window = \"lots\"").unwrap();
        assert!(matches!(read_engine_config(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", " yes "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "false", "", "on"] {
            assert!(!is_truthy(v), "{v}");
        }
    }
}
