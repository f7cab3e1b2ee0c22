//! Dynamic-section extraction
//!
//! Tags are mapped onto [`DynamicInfo`] fields through [`DYNAMIC_FIELDS`].
//! Address-valued entries are rebased by the load bias; every resolved table
//! is then checked to lie inside the module mapping before it is recorded.

use crate::elf::{dt, pt, Elf32Dyn, Elf32Phdr, Encoding, SYM_SIZE};
use crate::segment::MappedImage;
use crate::tables::{DynamicTable, HashTable, StringTable};
use em_core::error::LoaderError;
use serde::Serialize;
use tracing::{debug, trace};

/// How an entry's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    /// Module-relative address, rebased by the load bias
    Address,
    /// Plain size or offset
    Value,
}

/// Tag-to-field mapping rule
pub struct FieldRule {
    pub name: &'static str,
    pub tag: i32,
    kind: ValueKind,
    apply: fn(&mut DynamicInfo, usize),
}

/// Fields recorded from the dynamic section
pub const DYNAMIC_FIELDS: &[FieldRule] = &[
    FieldRule {
        name: "DT_NEEDED",
        tag: dt::NEEDED,
        kind: ValueKind::Value,
        apply: |info, v| info.needed.push(v),
    },
    FieldRule {
        name: "DT_HASH",
        tag: dt::HASH,
        kind: ValueKind::Address,
        apply: |info, v| info.hash_table = Some(v),
    },
    FieldRule {
        name: "DT_GNU_HASH",
        tag: dt::GNU_HASH,
        kind: ValueKind::Address,
        apply: |info, v| info.gnu_hash_table = Some(v),
    },
    FieldRule {
        name: "DT_STRTAB",
        tag: dt::STRTAB,
        kind: ValueKind::Address,
        apply: |info, v| info.str_table = Some(v),
    },
    FieldRule {
        name: "DT_SYMTAB",
        tag: dt::SYMTAB,
        kind: ValueKind::Address,
        apply: |info, v| info.sym_table = Some(v),
    },
    FieldRule {
        name: "DT_STRSZ",
        tag: dt::STRSZ,
        kind: ValueKind::Value,
        apply: |info, v| info.strtable_size = Some(v),
    },
    FieldRule {
        name: "DT_SYMENT",
        tag: dt::SYMENT,
        kind: ValueKind::Value,
        apply: |info, v| info.syment_size = Some(v),
    },
    FieldRule {
        name: "DT_SONAME",
        tag: dt::SONAME,
        kind: ValueKind::Value,
        apply: |info, v| info.soname = Some(v),
    },
];

/// Raw values gathered from the dynamic entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicInfo {
    pub hash_table: Option<usize>,
    pub gnu_hash_table: Option<usize>,
    pub str_table: Option<usize>,
    pub sym_table: Option<usize>,
    pub strtable_size: Option<usize>,
    pub syment_size: Option<usize>,
    /// String-table offsets of `DT_NEEDED` names, in entry order
    pub needed: Vec<usize>,
    /// String-table offset of `DT_SONAME`
    pub soname: Option<usize>,
}

impl DynamicInfo {
    /// Apply every recognized entry; unknown tags are ignored
    pub fn collect(entries: impl Iterator<Item = Elf32Dyn>, base_addr: usize) -> Self {
        let mut info = Self::default();
        for entry in entries {
            if let Some(rule) = DYNAMIC_FIELDS.iter().find(|r| r.tag == entry.d_tag) {
                let value = match rule.kind {
                    ValueKind::Address => base_addr.wrapping_add(entry.d_val as usize),
                    ValueKind::Value => entry.d_val as usize,
                };
                trace!("Dynamic tag {} -> 0x{:x}", entry.d_tag, value);
                (rule.apply)(&mut info, value);
            }
        }
        info
    }
}

/// Absolute addresses and extents of the lookup tables, all inside the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SymbolTables {
    pub hash_table: usize,
    pub hash_size: usize,
    pub str_table: usize,
    pub strtable_size: usize,
    pub sym_table: usize,
    pub syment_size: usize,
    pub sym_count: usize,
    /// Captured but not used by lookup
    pub gnu_hash_table: Option<usize>,
}

/// A `DT_NEEDED` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: String,
}

/// Everything the extractor resolves from a mapped module
#[derive(Debug, Clone)]
pub struct DynamicSection {
    pub tables: SymbolTables,
    pub dependencies: Vec<Dependency>,
    pub soname: Option<String>,
    /// Entries up to the terminator, for the relocation scanner
    pub entries: Vec<Elf32Dyn>,
}

/// Check that `[addr, addr + len)` is inside the mapping
fn check_table(
    mapped: &MappedImage,
    table: &'static str,
    addr: usize,
    len: usize,
) -> Result<(), LoaderError> {
    if mapped.region.contains(addr, len) {
        Ok(())
    } else {
        Err(LoaderError::TableOutOfBounds { table, addr })
    }
}

fn resolve_name(
    strings: &StringTable<'_>,
    offset: usize,
    what: &str,
) -> Result<String, LoaderError> {
    u32::try_from(offset)
        .ok()
        .and_then(|off| strings.get(off))
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .ok_or_else(|| {
            LoaderError::MalformedDynamicEntries(format!(
                "{} name offset 0x{:x} is outside the string table",
                what, offset
            ))
        })
}

/// Resolve the dynamic section of a mapped module
pub fn extract(
    phdrs: &[Elf32Phdr],
    mapped: &MappedImage,
    encoding: Encoding,
) -> Result<DynamicSection, LoaderError> {
    let dyn_ph = phdrs
        .iter()
        .find(|p| p.p_type == pt::DYNAMIC)
        .ok_or(LoaderError::MissingDynamicSection)?;

    let dyn_addr = mapped.address_of(dyn_ph.p_vaddr);
    let dyn_bytes = mapped
        .region
        .bytes(dyn_addr, dyn_ph.p_memsz as usize)
        .map_err(|_| {
            LoaderError::MalformedDynamicEntries(format!(
                "dynamic section at vaddr 0x{:08x} (0x{:x} bytes) lies outside the mapping",
                dyn_ph.p_vaddr, dyn_ph.p_memsz
            ))
        })?;

    let table = DynamicTable::parse(dyn_bytes, encoding)?;
    debug!(
        "Dynamic section at 0x{:x}: {} entries",
        dyn_addr,
        table.len()
    );

    let info = DynamicInfo::collect(table.iter(), mapped.base_addr);
    let tables = resolve_tables(&info, mapped, encoding)?;

    let strings = StringTable::new(
        mapped
            .region
            .bytes(tables.str_table, tables.strtable_size)
            .map_err(|_| LoaderError::TableOutOfBounds {
                table: "string table",
                addr: tables.str_table,
            })?,
    );

    let dependencies = info
        .needed
        .iter()
        .map(|&off| resolve_name(&strings, off, "DT_NEEDED").map(|name| Dependency { name }))
        .collect::<Result<Vec<_>, _>>()?;

    let soname = info
        .soname
        .map(|off| resolve_name(&strings, off, "DT_SONAME"))
        .transpose()?;

    for dep in &dependencies {
        debug!("Module depends on '{}' (not resolved)", dep.name);
    }

    Ok(DynamicSection {
        tables,
        dependencies,
        soname,
        entries: table.iter().collect(),
    })
}

/// Turn the raw field values into bounds-checked table extents
fn resolve_tables(
    info: &DynamicInfo,
    mapped: &MappedImage,
    encoding: Encoding,
) -> Result<SymbolTables, LoaderError> {
    let region = &mapped.region;

    let hash_table = info.hash_table.ok_or(LoaderError::MissingDynamicTable("DT_HASH"))?;
    let str_table = info.str_table.ok_or(LoaderError::MissingDynamicTable("DT_STRTAB"))?;
    let sym_table = info.sym_table.ok_or(LoaderError::MissingDynamicTable("DT_SYMTAB"))?;

    // Hash table header first, then its full extent
    check_table(mapped, "hash table", hash_table, 8)?;
    let hash_bytes = region
        .bytes_from(hash_table)
        .map_err(|_| LoaderError::TableOutOfBounds {
            table: "hash table",
            addr: hash_table,
        })?;
    let hash = HashTable::parse(hash_bytes, encoding)?;
    let hash_size = hash
        .byte_len()
        .ok_or_else(|| LoaderError::MalformedHashTable("table size overflows".to_string()))?;

    let strtable_size = match info.strtable_size {
        Some(size) => size,
        None => region.end().saturating_sub(str_table),
    };
    check_table(mapped, "string table", str_table, strtable_size.max(1))?;

    let syment_size = info.syment_size.unwrap_or(SYM_SIZE);
    if syment_size < SYM_SIZE {
        return Err(LoaderError::MalformedDynamicEntries(format!(
            "symbol entry size {} is smaller than {}",
            syment_size, SYM_SIZE
        )));
    }

    // The chain array has one slot per symbol table entry
    let sym_count = hash.chain_count() as usize;
    let sym_len = sym_count
        .checked_mul(syment_size)
        .ok_or(LoaderError::TableOutOfBounds {
            table: "symbol table",
            addr: sym_table,
        })?;
    check_table(mapped, "symbol table", sym_table, sym_len.max(1))?;

    if let Some(gnu_hash) = info.gnu_hash_table {
        check_table(mapped, "GNU hash table", gnu_hash, 16)?;
    }

    debug!(
        "Tables: hash 0x{:x} ({} buckets, {} chains), strtab 0x{:x} (0x{:x} bytes), symtab 0x{:x} (entry {} bytes)",
        hash_table,
        hash.bucket_count(),
        hash.chain_count(),
        str_table,
        strtable_size,
        sym_table,
        syment_size
    );

    Ok(SymbolTables {
        hash_table,
        hash_size,
        str_table,
        strtable_size,
        sym_table,
        syment_size,
        sym_count,
        gnu_hash_table: info.gnu_hash_table,
    })
}
