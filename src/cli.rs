use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use em_core::config::LogLevel;

/// Load ELF32 shared objects and resolve their symbols.
#[derive(Parser, Debug)]
#[command(name = "elfmod", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the user config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a module file and show its segments without mapping it.
    Inspect(InspectArgs),

    /// Load modules into a registry and resolve symbols across them.
    Load(LoadArgs),
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to the shared object.
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Module names; each is looked up as `<name><suffix>` in the search paths.
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Extra directory searched before the configured ones.
    #[arg(long = "search-path")]
    pub search_paths: Vec<PathBuf>,

    /// Symbol to resolve after loading; may be repeated.
    #[arg(long = "resolve")]
    pub symbols: Vec<String>,
}
