//! Error types for the elfmod module loader

use thiserror::Error;

/// Main error type for the loader
#[derive(Error, Debug)]
pub enum Error {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Allocator and mapped-region errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Out of memory: could not allocate 0x{size:x} bytes aligned to 0x{align:x}")]
    OutOfMemory { size: usize, align: usize },

    #[error("Invalid alignment: 0x{0:x} is not a power of two")]
    InvalidAlignment(usize),

    #[error("Zero-sized allocation requested")]
    ZeroSize,

    #[error("Access out of bounds: 0x{addr:x} (+0x{len:x})")]
    OutOfBounds { addr: usize, len: usize },
}

/// Module loading errors
///
/// Every variant is a terminal condition for the load attempt that raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Image unavailable for module '{name}': {reason}")]
    ImageUnavailable { name: String, reason: String },

    #[error("Truncated image: {what} at offset 0x{offset:x} (0x{len:x} bytes) exceeds image of 0x{image_len:x} bytes")]
    Truncated {
        what: &'static str,
        offset: usize,
        len: usize,
        image_len: usize,
    },

    #[error("The file is not an ELF object (magic {0:02X?})")]
    BadMagic([u8; 4]),

    #[error("Invalid ELF class code: {0}")]
    UnsupportedClass(u8),

    #[error("Invalid ELF data encoding: {0}")]
    UnsupportedEndianness(u8),

    #[error("Invalid ELF file version: ident={ident}, header={header}")]
    UnsupportedVersion { ident: u8, header: u32 },

    #[error("The ELF file must be a shared object (e_type={0})")]
    NotSharedObject(u16),

    #[error("Invalid ELF architecture: {0}")]
    UnsupportedMachine(u16),

    #[error("Program header table missing")]
    MissingProgramHeaders,

    #[error("No loadable segments found")]
    NoLoadableSegments,

    #[error("Malformed segment: {0}")]
    MalformedSegment(String),

    #[error("Could not allocate segments: {0}")]
    AllocationFailed(MemoryError),

    #[error("Dynamic linking information not found")]
    MissingDynamicSection,

    #[error("Malformed dynamic entries: {0}")]
    MalformedDynamicEntries(String),

    #[error("Required dynamic table missing: {0}")]
    MissingDynamicTable(&'static str),

    #[error("{table} at 0x{addr:x} lies outside the module mapping")]
    TableOutOfBounds { table: &'static str, addr: usize },

    #[error("Malformed hash table: {0}")]
    MalformedHashTable(String),

    #[error("Module '{0}' is already loaded")]
    AlreadyLoaded(String),
}

/// Module registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A module named '{0}' is already registered")]
    DuplicateName(String),

    #[error("Module '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Module '{0}' not found")]
    NotFound(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, Error>;
