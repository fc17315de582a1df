//! Configuration management for BatchResize

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{Result, ResizeError};
use crate::processing::FilterType;

pub mod policy;
pub use policy::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where uploads and outputs live
    pub storage: StorageConfig,

    /// Worker pool and task settings
    pub processing: ProcessingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage locations and upload limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving uploaded files
    pub upload_dir: PathBuf,

    /// Directory receiving resized outputs
    pub output_dir: PathBuf,

    /// Largest accepted upload (in bytes)
    pub max_file_size: u64,

    /// Most files accepted in one upload batch
    pub max_files: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            max_file_size: 50 * 1024 * 1024, // 50MB
            max_files: 100,
        }
    }
}

/// Worker pool and task configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of worker threads, which is also the wave size (None = auto-detect)
    pub workers: Option<usize>,

    /// Mark a task as failed when any of its images failed
    pub fail_on_partial: bool,

    /// Resampling filter
    pub filter: FilterType,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ResizeError::config(
                format!("Failed to read config file {:?}: {}", path.as_ref(), e)
            ))?;

        match extension_of(path.as_ref()).as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(ResizeError::config(
                "Unsupported config file format. Use .toml or .yaml"
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = match extension_of(path.as_ref()).as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| ResizeError::config(format!("TOML serialization failed: {}", e)))?,
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map_err(|e| ResizeError::config(format!("YAML serialization failed: {}", e)))?,
            _ => return Err(ResizeError::config(
                "Unsupported config file format. Use .toml or .yaml"
            )),
        };

        std::fs::write(&path, content)
            .map_err(|e| ResizeError::config(
                format!("Failed to write config file {:?}: {}", path.as_ref(), e)
            ))?;

        Ok(())
    }

    /// Load from an optional file, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `RESIZER_*` variables.
    ///
    /// The lookup is injected so tests do not have to mutate the process
    /// environment.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("RESIZER_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("RESIZER_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("RESIZER_MAX_FILE_SIZE") {
            self.storage.max_file_size = parse_env("RESIZER_MAX_FILE_SIZE", &size)?;
        }
        if let Some(count) = lookup("RESIZER_MAX_FILES") {
            self.storage.max_files = parse_env("RESIZER_MAX_FILES", &count)?;
        }
        if let Some(workers) = lookup("RESIZER_WORKERS") {
            self.processing.workers = Some(parse_env("RESIZER_WORKERS", &workers)?);
        }
        if let Some(level) = lookup("RESIZER_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.upload_dir.as_os_str().is_empty() {
            return Err(ResizeError::config("Upload directory must not be empty"));
        }
        if self.storage.output_dir.as_os_str().is_empty() {
            return Err(ResizeError::config("Output directory must not be empty"));
        }
        if self.storage.max_file_size == 0 {
            return Err(ResizeError::config("Maximum file size must be greater than 0"));
        }
        if self.storage.max_files == 0 {
            return Err(ResizeError::config("Maximum file count must be greater than 0"));
        }
        if let Some(workers) = self.processing.workers {
            if workers == 0 {
                return Err(ResizeError::config(
                    "Worker count must be greater than 0"
                ));
            }
        }
        Ok(())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        ResizeError::config(format!("Invalid value for {}: '{}' ({})", key, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.storage.max_files, 100);
        assert!(!config.processing.fail_on_partial);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_io() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.processing.workers = Some(3);
        config.processing.fail_on_partial = true;

        let toml_path = dir.path().join("batchresize.toml");
        config.to_file(&toml_path).unwrap();
        assert_eq!(Config::from_file(&toml_path).unwrap(), config);

        let yaml_path = dir.path().join("batchresize.yaml");
        config.to_file(&yaml_path).unwrap();
        assert_eq!(Config::from_file(&yaml_path).unwrap(), config);

        let json_path = dir.path().join("batchresize.json");
        assert!(config.to_file(&json_path).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[processing]\nworkers = 2\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.processing.workers, Some(2));
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RESIZER_UPLOAD_DIR", "/tmp/in"),
            ("RESIZER_WORKERS", "6"),
            ("RESIZER_MAX_FILES", "7"),
            ("RESIZER_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.upload_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.storage.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.processing.workers, Some(6));
        assert_eq!(config.storage.max_files, 7);
        assert_eq!(config.logging.level, "debug");

        let bad = Config::default()
            .apply_env(|key| (key == "RESIZER_WORKERS").then(|| "many".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.processing.workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.max_file_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.output_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
