/*!
 * Configuration types for Scanlink
 */

use scanlink_connect::{ConnectError, ConnectOptions, ServiceAddress};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ScanlinkError};

/// Main configuration for scanner sessions and capture workflows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scanner service URI (`scan+tcp://host:port?service=name`)
    #[serde(default = "default_service_uri")]
    pub service_uri: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-call timeout in seconds. Must exceed the service heartbeat.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound on draining a prepare stream, in seconds (0 = no limit)
    #[serde(default = "default_prepare_timeout")]
    pub prepare_timeout_secs: u64,

    /// Largest message sent or accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Request textures with captured meshes
    #[serde(default)]
    pub with_texture: bool,

    /// Number of deferred captures per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directory encoded meshes are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name prefix for batch STL files (`<prefix>_<index>.stl`)
    #[serde(default = "default_stl_file_prefix")]
    pub stl_file_prefix: String,

    /// File name for a single STL capture
    #[serde(default = "default_single_stl_file")]
    pub single_stl_file: String,

    /// Behavior when a batch item fails to retrieve
    #[serde(default)]
    pub error_mode: ErrorMode,

    /// Show progress bar
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

fn default_service_uri() -> String {
    "scan+tcp://localhost:64238?service=scanner".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_prepare_timeout() -> u64 {
    600
}

fn default_max_message_size() -> usize {
    100_000_000
}

fn default_batch_size() -> usize {
    100
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_stl_file_prefix() -> String {
    "deferred_captured_mesh".to_string()
}

fn default_single_stl_file() -> String {
    "captured_mesh.stl".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            service_uri: default_service_uri(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            prepare_timeout_secs: default_prepare_timeout(),
            max_message_size: default_max_message_size(),
            with_texture: false,
            batch_size: default_batch_size(),
            output_dir: default_output_dir(),
            stl_file_prefix: default_stl_file_prefix(),
            single_stl_file: default_single_stl_file(),
            error_mode: ErrorMode::Continue,
            show_progress: true,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// What to do when retrieving one batch item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Report the failed item and keep retrieving the rest
    #[default]
    Continue,

    /// Stop at the first failed item
    Abort,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl ScanConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScanlinkError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| ScanlinkError::Config(format!("Invalid {}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ScanlinkError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|source| ScanlinkError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn service_address(&self) -> std::result::Result<ServiceAddress, ConnectError> {
        ServiceAddress::parse(&self.service_uri)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_max_message_size(self.max_message_size)
    }

    /// Barrier timeout, `None` when unlimited
    pub fn prepare_timeout(&self) -> Option<Duration> {
        (self.prepare_timeout_secs > 0).then(|| Duration::from_secs(self.prepare_timeout_secs))
    }

    /// Path of the STL file for 1-based batch `index`
    pub fn stl_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.stl", self.stl_file_prefix, index))
    }

    /// Check that the configuration can drive a workflow
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ScanlinkError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ScanlinkError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.stl_file_prefix.is_empty() || self.single_stl_file.is_empty() {
            return Err(ScanlinkError::Config(
                "output file names must not be empty".to_string(),
            ));
        }
        self.service_address()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.error_mode, ErrorMode::Continue);
        assert!(config.show_progress);
        assert!(!config.with_texture);
        assert_eq!(config.prepare_timeout(), Some(Duration::from_secs(600)));
        config.validate().unwrap();
    }

    #[test]
    fn test_default_address() {
        let address = ScanConfig::default().service_address().unwrap();
        assert_eq!(address.host(), "localhost");
        assert_eq!(address.port(), 64238);
        assert_eq!(address.service(), "scanner");
    }

    #[test]
    fn test_zero_prepare_timeout_means_unlimited() {
        let config = ScanConfig {
            prepare_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.prepare_timeout(), None);
    }

    #[test]
    fn test_stl_paths_use_one_based_index() {
        let config = ScanConfig {
            output_dir: PathBuf::from("out"),
            ..Default::default()
        };
        assert_eq!(
            config.stl_path(1),
            PathBuf::from("out").join("deferred_captured_mesh_1.stl")
        );
        assert_eq!(
            config.stl_path(100),
            PathBuf::from("out").join("deferred_captured_mesh_100.stl")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ScanConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanlinkError::Config(_))));

        let config = ScanConfig {
            service_uri: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scanlink.toml");

        let config = ScanConfig {
            batch_size: 12,
            with_texture: true,
            error_mode: ErrorMode::Abort,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = ScanConfig::from_file(&path).unwrap();
        assert_eq!(loaded.batch_size, 12);
        assert!(loaded.with_texture);
        assert_eq!(loaded.error_mode, ErrorMode::Abort);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ScanConfig::from_file(Path::new("/nonexistent/scanlink.toml")).unwrap_err();
        assert!(matches!(err, ScanlinkError::Config(_)));
    }

    #[test]
    fn test_readme_config_example() {
        let toml_str = r#"
service_uri = "scan+tcp://scanner-host:64238?service=scanner"
request_timeout_secs = 30
prepare_timeout_secs = 0
with_texture = true
batch_size = 25
output_dir = "/tmp/scans"
error_mode = "abort"
show_progress = false
log_level = "debug"
"#;

        let config: ScanConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service_address().unwrap().host(), "scanner-host");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.prepare_timeout(), None);
        assert!(config.with_texture);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/scans"));
        assert_eq!(config.error_mode, ErrorMode::Abort);
        assert!(!config.show_progress);
        assert_eq!(config.log_level, LogLevel::Debug);
        // unspecified fields keep their defaults
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.stl_file_prefix, "deferred_captured_mesh");
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
