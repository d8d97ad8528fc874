//! Engine configuration types.
//!
//! `EngineConfig` represents the optional `plotrun.toml` that controls run
//! defaults, metrics sampling, and the JSONL trace sink. All fields have
//! defaults, so an empty file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run deadline applied when the caller does not pass one.
    #[serde(default)]
    pub default_max_duration_ms: Option<u64>,

    /// Number of recent step durations kept for metrics.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,

    /// Structured trace sink.
    #[serde(default)]
    pub trace: TraceConfig,
}

fn default_metrics_window() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_duration_ms: None,
            metrics_window: default_metrics_window(),
            trace: TraceConfig::default(),
        }
    }
}

/// Append-only JSONL trace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Write one line per lifecycle event.
    #[serde(default)]
    pub enabled: bool,

    /// Directory receiving `trace-<timestamp>.jsonl` files.
    #[serde(default = "default_trace_dir")]
    pub dir: PathBuf,
}

fn default_trace_dir() -> PathBuf {
    PathBuf::from("reports/traces")
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_trace_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_duration_ms, None);
        assert_eq!(config.metrics_window, 1024);
        assert!(!config.trace.enabled);
        assert_eq!(config.trace.dir, PathBuf::from("reports/traces"));
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.metrics_window, 1024);
        assert!(!config.trace.enabled);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
default_max_duration_ms = 30000
metrics_window = 64

[trace]
enabled = true
dir = "/tmp/plot-traces"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_max_duration_ms, Some(30_000));
        assert_eq!(config.metrics_window, 64);
        assert!(config.trace.enabled);
        assert_eq!(config.trace.dir, PathBuf::from("/tmp/plot-traces"));
    }
}
