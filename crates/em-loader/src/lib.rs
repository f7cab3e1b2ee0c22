//! ELF32 shared-object loader
//!
//! This crate maps `ET_DYN` images into a single allocation, resolves
//! their dynamic section and answers symbol queries through the SysV hash
//! table. Relocations are recognized but not applied.

pub mod dynamic;
pub mod elf;
pub mod header;
pub mod image;
pub mod loader;
pub mod module;
pub mod registry;
pub mod reloc;
pub mod segment;
pub mod symbol;
pub mod tables;

pub use dynamic::{Dependency, SymbolTables};
pub use elf::{ElfImage, Encoding};
pub use header::validate_header;
pub use image::{FileImageProvider, Image, ImageProvider, MemoryImageProvider};
pub use loader::{load_module, ModuleLoader};
pub use module::{alloc_module, find_symbol, unload_module, Module, ModuleInfo};
pub use registry::{InsertError, ModuleRegistry};
pub use reloc::RelocationSummary;
pub use segment::LoadLayout;
pub use symbol::{elf_hash, SymbolBinding, SymbolDescriptor, SymbolKind};
