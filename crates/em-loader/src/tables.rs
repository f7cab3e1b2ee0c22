//! Views over the dynamic-linking tables of a mapped module

use crate::elf::{dt, Elf32Dyn, Elf32Sym, Encoding, DYN_SIZE, SYM_SIZE};
use em_core::error::LoaderError;

/// Dynamic entry array, known to contain a `DT_NULL` terminator
#[derive(Debug, Clone, Copy)]
pub struct DynamicTable<'a> {
    bytes: &'a [u8],
    encoding: Encoding,
    /// Entries before the terminator
    count: usize,
}

impl<'a> DynamicTable<'a> {
    /// Locate the terminator within `bytes`; entries past it are ignored
    pub fn parse(bytes: &'a [u8], encoding: Encoding) -> Result<Self, LoaderError> {
        let capacity = bytes.len() / DYN_SIZE;
        let count = (0..capacity)
            .position(|i| Elf32Dyn::decode(&bytes[i * DYN_SIZE..], encoding).d_tag == dt::NULL)
            .ok_or_else(|| {
                LoaderError::MalformedDynamicEntries(format!(
                    "no DT_NULL terminator within {} entries",
                    capacity
                ))
            })?;

        Ok(Self {
            bytes,
            encoding,
            count,
        })
    }

    /// Number of entries before the terminator
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Elf32Dyn> + 'a {
        let bytes = self.bytes;
        let encoding = self.encoding;
        (0..self.count).map(move |i| Elf32Dyn::decode(&bytes[i * DYN_SIZE..], encoding))
    }
}

/// String table
#[derive(Debug, Clone, Copy)]
pub struct StringTable<'a> {
    bytes: &'a [u8],
}

impl<'a> StringTable<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// NUL-terminated string at `offset`, without the terminator.
    ///
    /// Returns `None` when the offset or the terminator falls outside the table.
    pub fn get(&self, offset: u32) -> Option<&'a [u8]> {
        let tail = self.bytes.get(offset as usize..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..len])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Symbol table with a fixed entry size
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'a> {
    bytes: &'a [u8],
    entsize: usize,
    encoding: Encoding,
}

impl<'a> SymbolTable<'a> {
    /// `entsize` must be at least [`SYM_SIZE`]
    pub fn new(bytes: &'a [u8], entsize: usize, encoding: Encoding) -> Option<Self> {
        (entsize >= SYM_SIZE).then_some(Self {
            bytes,
            entsize,
            encoding,
        })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.bytes.len() / self.entsize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: u32) -> Option<Elf32Sym> {
        let offset = (index as usize).checked_mul(self.entsize)?;
        let buf = self.bytes.get(offset..offset.checked_add(SYM_SIZE)?)?;
        Some(Elf32Sym::decode(buf, self.encoding))
    }
}

/// SysV hash table: `nbucket`, `nchain`, `bucket[nbucket]`, `chain[nchain]`
#[derive(Debug, Clone, Copy)]
pub struct HashTable<'a> {
    bytes: &'a [u8],
    encoding: Encoding,
    nbucket: u32,
    nchain: u32,
}

impl<'a> HashTable<'a> {
    /// Parse the header and check that both arrays fit within `bytes`
    pub fn parse(bytes: &'a [u8], encoding: Encoding) -> Result<Self, LoaderError> {
        if bytes.len() < 8 {
            return Err(LoaderError::MalformedHashTable(format!(
                "header needs 8 bytes, {} available",
                bytes.len()
            )));
        }

        let nbucket = encoding.u32_at(bytes, 0);
        let nchain = encoding.u32_at(bytes, 4);
        if nbucket == 0 {
            return Err(LoaderError::MalformedHashTable("bucket count is zero".to_string()));
        }

        let table = Self {
            bytes,
            encoding,
            nbucket,
            nchain,
        };
        match table.byte_len() {
            Some(len) if len <= bytes.len() => Ok(table),
            _ => Err(LoaderError::MalformedHashTable(format!(
                "{} buckets and {} chains exceed the 0x{:x} bytes available",
                nbucket,
                nchain,
                bytes.len()
            ))),
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.nbucket
    }

    pub fn chain_count(&self) -> u32 {
        self.nchain
    }

    /// Encoded size of the whole table
    pub fn byte_len(&self) -> Option<usize> {
        let words = (self.nbucket as usize)
            .checked_add(self.nchain as usize)?
            .checked_add(2)?;
        words.checked_mul(4)
    }

    fn word(&self, index: usize) -> u32 {
        self.encoding.u32_at(self.bytes, index * 4)
    }

    /// First symbol index of bucket `index`
    pub fn bucket(&self, index: u32) -> Option<u32> {
        (index < self.nbucket).then(|| self.word(2 + index as usize))
    }

    /// Next symbol index after `index`; `None` outside `[0, nchain)`
    pub fn chain(&self, index: u32) -> Option<u32> {
        (index < self.nchain).then(|| self.word(2 + self.nbucket as usize + index as usize))
    }

    /// Chain head for a name hash
    pub fn bucket_for(&self, hash: u32) -> u32 {
        self.word(2 + (hash % self.nbucket) as usize)
    }
}
