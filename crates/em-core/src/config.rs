//! Configuration system for the elfmod loader

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetSpec,
    pub loader: LoaderConfig,
    pub debug: DebugConfig,
}

/// Identification of the module format accepted by the header validator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetSpec {
    /// `EI_CLASS` value (1 = ELFCLASS32)
    pub class: u8,
    /// `EI_DATA` value (1 = little endian)
    pub data: u8,
    /// Expected `EI_VERSION` and `e_version`
    pub version: u8,
    /// `e_machine` value (3 = EM_386)
    pub machine: u16,
}

/// Module loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Suffix appended to a module name to form its file name
    pub module_suffix: String,
    /// Directories searched, in order, for module images
    pub search_paths: Vec<PathBuf>,
    /// Maximum length of a module name in bytes
    pub max_name_len: usize,
    /// Refuse to register two modules with the same name
    pub reject_duplicates: bool,
}

/// Debug and logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Log every ELF header field while loading
    pub dump_headers: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// Default implementations

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            class: 1,
            data: 1,
            version: 1,
            machine: 3,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            module_suffix: ".so".to_string(),
            search_paths: vec![PathBuf::from(".")],
            max_name_len: 64,
            reject_duplicates: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            dump_headers: false,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from a file, falling back to defaults if it doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default path of the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("elfmod")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target.class, 1);
        assert_eq!(config.target.machine, 3);
        assert_eq!(config.loader.module_suffix, ".so");
        assert_eq!(config.loader.max_name_len, 64);
        assert!(config.loader.reject_duplicates);
        assert_eq!(config.debug.log_level, LogLevel::Info);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.target, config.target);
        assert_eq!(parsed.loader.search_paths, config.loader.search_paths);
    }

    #[test]
    fn test_partial_config() {
        let parsed: Config = toml::from_str(
            r#"
            [target]
            machine = 40

            [debug]
            log_level = "trace"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.target.machine, 40);
        assert_eq!(parsed.target.class, 1);
        assert_eq!(parsed.debug.log_level, LogLevel::Trace);
        assert_eq!(parsed.loader.module_suffix, ".so");
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("elfmod-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.loader.module_suffix = ".c32".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(&path).unwrap();
        assert_eq!(loaded.loader.module_suffix, ".c32");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
