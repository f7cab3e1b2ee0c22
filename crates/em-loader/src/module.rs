//! Loaded module state

use crate::dynamic::{Dependency, SymbolTables};
use crate::elf::Encoding;
use crate::reloc::RelocationSummary;
use crate::symbol::{self, SymbolDescriptor};
use crate::tables::{HashTable, StringTable, SymbolTable};
use em_memory::MappedRegion;
use serde::Serialize;
use tracing::{debug, info};

/// Default bound on module names, in bytes
pub const DEFAULT_MAX_NAME_LEN: usize = 64;

/// Everything a successful load produces. Table addresses point into `region`.
#[derive(Debug)]
pub(crate) struct Mapping {
    pub region: MappedRegion,
    pub base_addr: usize,
    pub encoding: Encoding,
    pub tables: SymbolTables,
    pub dependencies: Vec<Dependency>,
    pub soname: Option<String>,
    pub relocations: RelocationSummary,
}

/// A shared object, either freshly allocated or fully loaded.
///
/// A loaded module exclusively owns its mapping; dropping or unloading the
/// module frees it.
#[derive(Debug)]
pub struct Module {
    name: String,
    mapping: Option<Mapping>,
}

/// Serializable summary of a loaded module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub soname: Option<String>,
    pub base_addr: usize,
    pub region_start: usize,
    pub module_size: usize,
    pub tables: SymbolTables,
    pub dependencies: Vec<Dependency>,
    pub relocations: RelocationSummary,
}

/// Cut `name` to at most `max` bytes on a character boundary
fn bound_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

impl Module {
    /// Create an unloaded module named `name`
    pub fn alloc(name: &str) -> Self {
        Self::alloc_bounded(name, DEFAULT_MAX_NAME_LEN)
    }

    /// Create an unloaded module, truncating the name to `max_name_len` bytes
    pub fn alloc_bounded(name: &str, max_name_len: usize) -> Self {
        let bounded = bound_name(name, max_name_len);
        if bounded.len() != name.len() {
            debug!("Module name '{}' truncated to '{}'", name, bounded);
        }
        Self {
            name: bounded,
            mapping: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.mapping.is_some()
    }

    pub(crate) fn commit(&mut self, mapping: Mapping) {
        self.mapping = Some(mapping);
    }

    /// Load bias
    pub fn base_addr(&self) -> Option<usize> {
        self.mapping.as_ref().map(|m| m.base_addr)
    }

    /// Size of the mapped block
    pub fn module_size(&self) -> Option<usize> {
        self.mapping.as_ref().map(|m| m.region.size())
    }

    /// Address of the first byte of the mapped block
    pub fn region_start(&self) -> Option<usize> {
        self.mapping.as_ref().map(|m| m.region.start())
    }

    /// The mapped block itself
    pub fn region(&self) -> Option<&MappedRegion> {
        self.mapping.as_ref().map(|m| &m.region)
    }

    pub fn tables(&self) -> Option<&SymbolTables> {
        self.mapping.as_ref().map(|m| &m.tables)
    }

    /// `DT_NEEDED` entries, in file order; empty while unloaded
    pub fn dependencies(&self) -> &[Dependency] {
        self.mapping
            .as_ref()
            .map_or(&[][..], |m| m.dependencies.as_slice())
    }

    pub fn soname(&self) -> Option<&str> {
        self.mapping.as_ref().and_then(|m| m.soname.as_deref())
    }

    pub fn relocations(&self) -> Option<&RelocationSummary> {
        self.mapping.as_ref().map(|m| &m.relocations)
    }

    pub fn info(&self) -> Option<ModuleInfo> {
        let m = self.mapping.as_ref()?;
        Some(ModuleInfo {
            name: self.name.clone(),
            soname: m.soname.clone(),
            base_addr: m.base_addr,
            region_start: m.region.start(),
            module_size: m.region.size(),
            tables: m.tables,
            dependencies: m.dependencies.clone(),
            relocations: m.relocations.clone(),
        })
    }

    /// Resolve `name` through the module's hash table
    pub fn find_symbol(&self, name: &str) -> Option<SymbolDescriptor> {
        let m = self.mapping.as_ref()?;
        let t = &m.tables;

        // The extents were checked at load time, so these views always succeed
        let hash_bytes = m.region.bytes(t.hash_table, t.hash_size).ok()?;
        let hash = HashTable::parse(hash_bytes, m.encoding).ok()?;
        let symbols = SymbolTable::new(
            m.region.bytes(t.sym_table, t.sym_count * t.syment_size).ok()?,
            t.syment_size,
            m.encoding,
        )?;
        let strings = StringTable::new(m.region.bytes(t.str_table, t.strtable_size).ok()?);

        let (index, sym) = symbol::lookup(&hash, &symbols, &strings, name.as_bytes())?;
        Some(SymbolDescriptor::new(name, index, &sym, m.base_addr))
    }

    /// Release the module and its mapping
    pub fn unload(self) {
        if let Some(m) = &self.mapping {
            info!(
                "Unloading module '{}' (0x{:x} bytes at 0x{:x})",
                self.name,
                m.region.size(),
                m.region.start()
            );
        }
    }
}

/// Create an unloaded module
pub fn alloc_module(name: &str) -> Module {
    Module::alloc(name)
}

/// Resolve `name` in `module`
pub fn find_symbol(module: &Module, name: &str) -> Option<SymbolDescriptor> {
    module.find_symbol(name)
}

/// Release a module and its mapping
pub fn unload_module(module: Module) {
    module.unload()
}
