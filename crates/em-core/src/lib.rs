//! Core types for the elfmod module loader
//!
//! This crate provides the error types, configuration, and logging
//! infrastructure shared by the memory and loader crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DebugConfig, LoaderConfig, LogLevel, TargetSpec};
pub use error::{ConfigError, Error, LoaderError, MemoryError, RegistryError, Result};
