//! Synthetic ELF32 little-endian shared objects for loader tests
//!
//! Layout of a built image: ELF header, program headers, string table,
//! symbol table, hash table, dynamic array, then extra segment data. The
//! first `PT_LOAD` covers everything up to the end of the dynamic array at
//! `vaddr + file offset`.

#![allow(dead_code)]

use em_loader::elf::{dt, em, et, pt, EHDR_SIZE, PHDR_SIZE, SYM_SIZE};

pub const STB_GLOBAL_FUNC: u8 = 0x12;
pub const STB_GLOBAL_OBJECT: u8 = 0x11;

/// Header field offsets
pub const E_TYPE: usize = 16;
pub const E_MACHINE: usize = 18;
pub const E_VERSION: usize = 20;
pub const E_PHOFF: usize = 28;
pub const E_PHENTSIZE: usize = 42;
pub const E_PHNUM: usize = 44;

/// Program header field offsets
pub const P_TYPE: usize = 0;
pub const P_OFFSET: usize = 4;
pub const P_VADDR: usize = 8;
pub const P_FILESZ: usize = 16;
pub const P_MEMSZ: usize = 20;
pub const P_ALIGN: usize = 28;

/// Reference SysV hash, kept separate from the crate under test
pub fn sysv_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in name {
        h = (h << 4).wrapping_add(b as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub info: u8,
}

/// Additional `PT_LOAD` segment placed after the dynamic array
#[derive(Debug, Clone)]
pub struct ExtraSegment {
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub bss: u32,
    pub align: u32,
}

#[derive(Debug, Clone)]
pub struct ElfBuilder {
    pub vaddr: u32,
    pub align: u32,
    pub bss: u32,
    pub e_type: u16,
    pub machine: u16,
    pub nbucket: u32,
    pub symbols: Vec<Symbol>,
    pub needed: Vec<String>,
    pub soname: Option<String>,
    pub skip_tags: Vec<i32>,
    pub extra_dynamic: Vec<(i32, u32)>,
    pub extra_segments: Vec<ExtraSegment>,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self {
            vaddr: 0,
            align: 0x1000,
            bss: 0,
            e_type: et::DYN,
            machine: em::I386,
            nbucket: 3,
            symbols: Vec::new(),
            needed: Vec::new(),
            soname: None,
            skip_tags: Vec::new(),
            extra_dynamic: Vec::new(),
            extra_segments: Vec::new(),
        }
    }
}

/// A built image and where its parts landed
#[derive(Debug, Clone)]
pub struct Built {
    pub bytes: Vec<u8>,
    pub strtab: usize,
    pub symtab: usize,
    pub hash: usize,
    pub dynamic: usize,
    pub dynamic_len: usize,
    /// File size of the first `PT_LOAD`
    pub load_filesz: usize,
    pub nbucket: u32,
    /// File offsets of the extra segments' data
    pub extra_offsets: Vec<usize>,
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

struct Phdr {
    ty: u32,
    offset: usize,
    vaddr: u32,
    filesz: usize,
    memsz: usize,
    align: u32,
}

fn put_phdr(buf: &mut [u8], at: usize, ph: &Phdr) {
    put_u32(buf, at + P_TYPE, ph.ty);
    put_u32(buf, at + P_OFFSET, ph.offset as u32);
    put_u32(buf, at + P_VADDR, ph.vaddr);
    put_u32(buf, at + 12, ph.vaddr);
    put_u32(buf, at + P_FILESZ, ph.filesz as u32);
    put_u32(buf, at + P_MEMSZ, ph.memsz as u32);
    put_u32(buf, at + 24, 0x6);
    put_u32(buf, at + P_ALIGN, ph.align);
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    while buf.len() % align != 0 {
        buf.push(0);
    }
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(mut self, name: &str, value: u32) -> Self {
        self.symbols.push(Symbol {
            name: name.to_string(),
            value,
            size: 4,
            info: STB_GLOBAL_FUNC,
        });
        self
    }

    pub fn object(mut self, name: &str, value: u32, size: u32) -> Self {
        self.symbols.push(Symbol {
            name: name.to_string(),
            value,
            size,
            info: STB_GLOBAL_OBJECT,
        });
        self
    }

    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.to_string());
        self
    }

    pub fn soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_string());
        self
    }

    pub fn skip_tag(mut self, tag: i32) -> Self {
        self.skip_tags.push(tag);
        self
    }

    pub fn dynamic_entry(mut self, tag: i32, value: u32) -> Self {
        self.extra_dynamic.push((tag, value));
        self
    }

    pub fn segment(mut self, vaddr: u32, data: Vec<u8>, bss: u32, align: u32) -> Self {
        self.extra_segments.push(ExtraSegment {
            vaddr,
            data,
            bss,
            align,
        });
        self
    }

    pub fn build(&self) -> Built {
        let phnum = 2 + self.extra_segments.len();
        let mut buf = vec![0u8; EHDR_SIZE + phnum * PHDR_SIZE];

        // String table
        let strtab = buf.len();
        buf.push(0);
        let add_str = |buf: &mut Vec<u8>, s: &str| -> u32 {
            let off = (buf.len() - strtab) as u32;
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
            off
        };
        let sym_names: Vec<u32> = self.symbols.iter().map(|s| add_str(&mut buf, &s.name)).collect();
        let needed: Vec<u32> = self.needed.iter().map(|s| add_str(&mut buf, s)).collect();
        let soname = self.soname.as_ref().map(|s| add_str(&mut buf, s));
        let strsz = buf.len() - strtab;

        // Symbol table, null entry first
        pad_to(&mut buf, 4);
        let symtab = buf.len();
        buf.extend_from_slice(&[0u8; SYM_SIZE]);
        for (sym, &name) in self.symbols.iter().zip(&sym_names) {
            let mut entry = [0u8; SYM_SIZE];
            put_u32(&mut entry, 0, name);
            put_u32(&mut entry, 4, sym.value);
            put_u32(&mut entry, 8, sym.size);
            entry[12] = sym.info;
            put_u16(&mut entry, 14, 1);
            buf.extend_from_slice(&entry);
        }

        // Hash table with head insertion into the buckets
        let nchain = self.symbols.len() as u32 + 1;
        let nbucket = self.nbucket.max(1);
        let mut buckets = vec![0u32; nbucket as usize];
        let mut chains = vec![0u32; nchain as usize];
        for (i, sym) in self.symbols.iter().enumerate() {
            let index = i as u32 + 1;
            let b = (sysv_hash(sym.name.as_bytes()) % nbucket) as usize;
            chains[index as usize] = buckets[b];
            buckets[b] = index;
        }
        let hash = buf.len();
        for word in [self.nbucket, nchain].iter().chain(&buckets).chain(&chains) {
            buf.extend_from_slice(&word.to_le_bytes());
        }

        // Dynamic array
        pad_to(&mut buf, 8);
        let dynamic = buf.len();
        let vaddr_of = |off: usize| self.vaddr + off as u32;
        let mut entries = vec![
            (dt::HASH, vaddr_of(hash)),
            (dt::STRTAB, vaddr_of(strtab)),
            (dt::SYMTAB, vaddr_of(symtab)),
            (dt::STRSZ, strsz as u32),
            (dt::SYMENT, SYM_SIZE as u32),
        ];
        entries.extend(needed.iter().map(|&off| (dt::NEEDED, off)));
        entries.extend(soname.map(|off| (dt::SONAME, off)));
        entries.extend(self.extra_dynamic.iter().copied());
        entries.retain(|(tag, _)| !self.skip_tags.contains(tag));
        entries.push((dt::NULL, 0));
        for (tag, value) in &entries {
            buf.extend_from_slice(&(*tag as u32).to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        let dynamic_len = buf.len() - dynamic;
        let load_filesz = buf.len();

        // Extra segment data
        let mut extra_offsets = Vec::new();
        for seg in &self.extra_segments {
            pad_to(&mut buf, 4);
            extra_offsets.push(buf.len());
            buf.extend_from_slice(&seg.data);
        }

        // ELF header
        buf[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        buf[4] = 1;
        buf[5] = 1;
        buf[6] = 1;
        put_u16(&mut buf, E_TYPE, self.e_type);
        put_u16(&mut buf, E_MACHINE, self.machine);
        put_u32(&mut buf, E_VERSION, 1);
        put_u32(&mut buf, E_PHOFF, EHDR_SIZE as u32);
        put_u16(&mut buf, 40, EHDR_SIZE as u16);
        put_u16(&mut buf, E_PHENTSIZE, PHDR_SIZE as u16);
        put_u16(&mut buf, E_PHNUM, phnum as u16);

        // Program headers
        let mut phdrs = vec![
            Phdr {
                ty: pt::LOAD,
                offset: 0,
                vaddr: self.vaddr,
                filesz: load_filesz,
                memsz: load_filesz + self.bss as usize,
                align: self.align,
            },
            Phdr {
                ty: pt::DYNAMIC,
                offset: dynamic,
                vaddr: vaddr_of(dynamic),
                filesz: dynamic_len,
                memsz: dynamic_len,
                align: 4,
            },
        ];
        for (seg, &offset) in self.extra_segments.iter().zip(&extra_offsets) {
            phdrs.push(Phdr {
                ty: pt::LOAD,
                offset,
                vaddr: seg.vaddr,
                filesz: seg.data.len(),
                memsz: seg.data.len() + seg.bss as usize,
                align: seg.align,
            });
        }
        for (i, ph) in phdrs.iter().enumerate() {
            put_phdr(&mut buf, EHDR_SIZE + i * PHDR_SIZE, ph);
        }

        Built {
            bytes: buf,
            strtab,
            symtab,
            hash,
            dynamic,
            dynamic_len,
            load_filesz,
            nbucket,
            extra_offsets,
        }
    }
}

impl Built {
    /// File offset of program header `index`
    pub fn phdr(&self, index: usize) -> usize {
        EHDR_SIZE + index * PHDR_SIZE
    }

    /// File offset of hash chain slot `index`
    pub fn chain_slot(&self, index: usize) -> usize {
        self.hash + 8 + 4 * (self.nbucket as usize + index)
    }

    /// File offset of hash bucket `index`
    pub fn bucket_slot(&self, index: usize) -> usize {
        self.hash + 8 + 4 * index
    }

    pub fn set_u16(&mut self, off: usize, v: u16) {
        put_u16(&mut self.bytes, off, v);
    }

    pub fn set_u32(&mut self, off: usize, v: u32) {
        put_u32(&mut self.bytes, off, v);
    }

    /// Overwrite the value of the first dynamic entry tagged `tag`
    pub fn set_dynamic(&mut self, tag: i32, value: u32) {
        let off = self.dynamic_entry(tag).expect("tag not present");
        put_u32(&mut self.bytes, off + 4, value);
    }

    /// Overwrite the tag of the first dynamic entry tagged `tag`
    pub fn retag_dynamic(&mut self, tag: i32, new_tag: i32) {
        let off = self.dynamic_entry(tag).expect("tag not present");
        put_u32(&mut self.bytes, off, new_tag as u32);
    }

    fn dynamic_entry(&self, tag: i32) -> Option<usize> {
        (self.dynamic..self.dynamic + self.dynamic_len)
            .step_by(8)
            .find(|&off| i32::from_le_bytes(self.bytes[off..off + 4].try_into().unwrap()) == tag)
    }
}
