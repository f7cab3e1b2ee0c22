//! Symbol resolution through the SysV ELF hash table

use crate::elf::{
    Elf32Sym, STB_GLOBAL, STB_LOCAL, STB_WEAK, STN_UNDEF, STT_FILE, STT_FUNC, STT_NOTYPE,
    STT_OBJECT, STT_SECTION,
};
use crate::tables::{HashTable, StringTable, SymbolTable};
use serde::Serialize;
use tracing::{trace, warn};

/// SysV ELF hash of a symbol name
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &c in name {
        h = (h << 4).wrapping_add(c as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Symbol binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl From<u8> for SymbolBinding {
    fn from(bind: u8) -> Self {
        match bind {
            STB_LOCAL => Self::Local,
            STB_GLOBAL => Self::Global,
            STB_WEAK => Self::Weak,
            other => Self::Other(other),
        }
    }
}

/// Symbol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    NoType,
    Object,
    Function,
    Section,
    File,
    Other(u8),
}

impl From<u8> for SymbolKind {
    fn from(kind: u8) -> Self {
        match kind {
            STT_NOTYPE => Self::NoType,
            STT_OBJECT => Self::Object,
            STT_FUNC => Self::Function,
            STT_SECTION => Self::Section,
            STT_FILE => Self::File,
            other => Self::Other(other),
        }
    }
}

/// A resolved symbol of a loaded module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolDescriptor {
    pub name: String,
    /// Index in the symbol table
    pub index: u32,
    /// `st_value` as declared in the file
    pub value: u32,
    /// Mapped address: load bias + `st_value`
    pub address: usize,
    pub size: u32,
    pub binding: SymbolBinding,
    pub kind: SymbolKind,
    pub section: u16,
}

impl SymbolDescriptor {
    pub(crate) fn new(name: &str, index: u32, sym: &Elf32Sym, base_addr: usize) -> Self {
        Self {
            name: name.to_string(),
            index,
            value: sym.st_value,
            address: base_addr.wrapping_add(sym.st_value as usize),
            size: sym.st_size,
            binding: sym.binding().into(),
            kind: sym.sym_type().into(),
            section: sym.st_shndx,
        }
    }

    pub fn is_global(&self) -> bool {
        self.binding == SymbolBinding::Global
    }

    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::Function
    }
}

/// Walk the hash chain of `name`.
///
/// The walk ends at `STN_UNDEF`, at an index outside the chain or symbol
/// table, or after `nchain` steps; the last two indicate a corrupt table.
pub fn lookup(
    hash: &HashTable<'_>,
    symbols: &SymbolTable<'_>,
    strings: &StringTable<'_>,
    name: &[u8],
) -> Option<(u32, Elf32Sym)> {
    let h = elf_hash(name);
    let mut index = hash.bucket_for(h);
    let mut steps = 0u32;

    while index != STN_UNDEF {
        if steps >= hash.chain_count() {
            warn!("Hash chain for hash 0x{:08x} does not terminate", h);
            return None;
        }
        steps += 1;

        let Some(sym) = symbols.get(index) else {
            warn!(
                "Hash chain points at symbol {} past the symbol table",
                index
            );
            return None;
        };

        trace!("Probing symbol {} (name offset 0x{:x})", index, sym.st_name);
        if strings.get(sym.st_name) == Some(name) {
            return Some((index, sym));
        }

        index = match hash.chain(index) {
            Some(next) => next,
            None => {
                warn!("Symbol index {} is outside the hash chain array", index);
                return None;
            }
        };
    }

    None
}
