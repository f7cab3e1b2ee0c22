//! ELF32 structures and bounds-checked image access

use bitflags::bitflags;
use em_core::error::LoaderError;

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Size of `e_ident`
pub const EI_NIDENT: usize = 16;
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;

/// Encoded sizes of the ELF32 structures
pub const EHDR_SIZE: usize = 52;
pub const PHDR_SIZE: usize = 32;
pub const DYN_SIZE: usize = 8;
pub const SYM_SIZE: usize = 16;

/// Symbol index terminating a hash chain
pub const STN_UNDEF: u32 = 0;

/// `EI_CLASS` values
pub mod elfclass {
    pub const NONE: u8 = 0;
    pub const CLASS32: u8 = 1;
    pub const CLASS64: u8 = 2;
}

/// `EI_DATA` values
pub mod elfdata {
    pub const NONE: u8 = 0;
    pub const LSB: u8 = 1;
    pub const MSB: u8 = 2;
}

/// Object file versions
pub mod ev {
    pub const NONE: u32 = 0;
    pub const CURRENT: u32 = 1;
}

/// Object file types
pub mod et {
    pub const NONE: u16 = 0;
    pub const REL: u16 = 1;
    pub const EXEC: u16 = 2;
    pub const DYN: u16 = 3;
    pub const CORE: u16 = 4;
}

/// Machine identifiers
pub mod em {
    pub const NONE: u16 = 0;
    pub const I386: u16 = 3;
    pub const ARM: u16 = 40;
    pub const X86_64: u16 = 62;
    pub const RISCV: u16 = 243;
}

/// Program header types
pub mod pt {
    pub const NULL: u32 = 0;
    pub const LOAD: u32 = 1;
    pub const DYNAMIC: u32 = 2;
    pub const INTERP: u32 = 3;
    pub const NOTE: u32 = 4;
    pub const SHLIB: u32 = 5;
    pub const PHDR: u32 = 6;
    pub const TLS: u32 = 7;
    pub const GNU_STACK: u32 = 0x6474e551;
}

/// Dynamic entry tags
pub mod dt {
    pub const NULL: i32 = 0;
    pub const NEEDED: i32 = 1;
    pub const PLTRELSZ: i32 = 2;
    pub const PLTGOT: i32 = 3;
    pub const HASH: i32 = 4;
    pub const STRTAB: i32 = 5;
    pub const SYMTAB: i32 = 6;
    pub const RELA: i32 = 7;
    pub const RELASZ: i32 = 8;
    pub const RELAENT: i32 = 9;
    pub const STRSZ: i32 = 10;
    pub const SYMENT: i32 = 11;
    pub const INIT: i32 = 12;
    pub const FINI: i32 = 13;
    pub const SONAME: i32 = 14;
    pub const RPATH: i32 = 15;
    pub const SYMBOLIC: i32 = 16;
    pub const REL: i32 = 17;
    pub const RELSZ: i32 = 18;
    pub const RELENT: i32 = 19;
    pub const PLTREL: i32 = 20;
    pub const DEBUG: i32 = 21;
    pub const TEXTREL: i32 = 22;
    pub const JMPREL: i32 = 23;
    pub const GNU_HASH: i32 = 0x6ffffef5;
}

/// Symbol binding
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Symbol type
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;

bitflags! {
    /// Segment permission flags (`p_flags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 0x1;
        const WRITE   = 0x2;
        const READ    = 0x4;
    }
}

/// Byte order of an image, taken from `EI_DATA`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Little,
    Big,
}

impl Encoding {
    pub fn from_ident(data: u8) -> Option<Self> {
        match data {
            elfdata::LSB => Some(Self::Little),
            elfdata::MSB => Some(Self::Big),
            _ => None,
        }
    }

    /// Decode a `u16` at `offset`; the caller guarantees the bytes exist
    pub fn u16_at(self, bytes: &[u8], offset: usize) -> u16 {
        let raw = [bytes[offset], bytes[offset + 1]];
        match self {
            Self::Little => u16::from_le_bytes(raw),
            Self::Big => u16::from_be_bytes(raw),
        }
    }

    /// Decode a `u32` at `offset`; the caller guarantees the bytes exist
    pub fn u32_at(self, bytes: &[u8], offset: usize) -> u32 {
        let raw = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        match self {
            Self::Little => u32::from_le_bytes(raw),
            Self::Big => u32::from_be_bytes(raw),
        }
    }
}

/// ELF file header (32-bit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Header {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Decode from at least [`EHDR_SIZE`] bytes
    fn decode(buf: &[u8], enc: Encoding) -> Self {
        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&buf[..EI_NIDENT]);

        Self {
            e_ident,
            e_type: enc.u16_at(buf, 16),
            e_machine: enc.u16_at(buf, 18),
            e_version: enc.u32_at(buf, 20),
            e_entry: enc.u32_at(buf, 24),
            e_phoff: enc.u32_at(buf, 28),
            e_shoff: enc.u32_at(buf, 32),
            e_flags: enc.u32_at(buf, 36),
            e_ehsize: enc.u16_at(buf, 40),
            e_phentsize: enc.u16_at(buf, 42),
            e_phnum: enc.u16_at(buf, 44),
            e_shentsize: enc.u16_at(buf, 46),
            e_shnum: enc.u16_at(buf, 48),
            e_shstrndx: enc.u16_at(buf, 50),
        }
    }

    pub fn magic(&self) -> [u8; 4] {
        [self.e_ident[0], self.e_ident[1], self.e_ident[2], self.e_ident[3]]
    }
}

/// ELF program header (32-bit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

impl Elf32Phdr {
    fn decode(buf: &[u8], enc: Encoding) -> Self {
        Self {
            p_type: enc.u32_at(buf, 0),
            p_offset: enc.u32_at(buf, 4),
            p_vaddr: enc.u32_at(buf, 8),
            p_paddr: enc.u32_at(buf, 12),
            p_filesz: enc.u32_at(buf, 16),
            p_memsz: enc.u32_at(buf, 20),
            p_flags: enc.u32_at(buf, 24),
            p_align: enc.u32_at(buf, 28),
        }
    }

    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }

    pub fn is_load(&self) -> bool {
        self.p_type == pt::LOAD
    }
}

/// ELF dynamic entry (32-bit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Dyn {
    pub d_tag: i32,
    pub d_val: u32,
}

impl Elf32Dyn {
    pub(crate) fn decode(buf: &[u8], enc: Encoding) -> Self {
        Self {
            d_tag: enc.u32_at(buf, 0) as i32,
            d_val: enc.u32_at(buf, 4),
        }
    }
}

/// ELF symbol table entry (32-bit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Sym {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

impl Elf32Sym {
    pub(crate) fn decode(buf: &[u8], enc: Encoding) -> Self {
        Self {
            st_name: enc.u32_at(buf, 0),
            st_value: enc.u32_at(buf, 4),
            st_size: enc.u32_at(buf, 8),
            st_info: buf[12],
            st_other: buf[13],
            st_shndx: enc.u16_at(buf, 14),
        }
    }

    /// Symbol binding from st_info
    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    /// Symbol type from st_info
    pub fn sym_type(&self) -> u8 {
        self.st_info & 0xf
    }
}

/// Read-only view over an in-memory ELF32 image
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    encoding: Encoding,
    header: Elf32Header,
}

impl<'a> ElfImage<'a> {
    /// Decode the file header. Only the length is checked here; the
    /// header contents are judged by the validator.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, LoaderError> {
        if bytes.len() < EHDR_SIZE {
            return Err(LoaderError::Truncated {
                what: "ELF header",
                offset: 0,
                len: EHDR_SIZE,
                image_len: bytes.len(),
            });
        }

        // An unknown encoding is rejected by the validator before any
        // multi-byte field is consulted
        let encoding = Encoding::from_ident(bytes[EI_DATA]).unwrap_or_default();
        let header = Elf32Header::decode(bytes, encoding);

        Ok(Self {
            bytes,
            encoding,
            header,
        })
    }

    pub fn header(&self) -> &Elf32Header {
        &self.header
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow `[offset, offset + len)` of the file
    pub fn range(
        &self,
        what: &'static str,
        offset: usize,
        len: usize,
    ) -> Result<&'a [u8], LoaderError> {
        let truncated = || LoaderError::Truncated {
            what,
            offset,
            len,
            image_len: self.bytes.len(),
        };
        let end = offset.checked_add(len).ok_or_else(truncated)?;
        self.bytes.get(offset..end).ok_or_else(truncated)
    }

    /// Decode program header `index`
    pub fn program_header(&self, index: usize) -> Result<Elf32Phdr, LoaderError> {
        let entsize = self.header.e_phentsize as usize;
        if entsize < PHDR_SIZE {
            return Err(LoaderError::MalformedSegment(format!(
                "program header entry size {} is smaller than {}",
                entsize, PHDR_SIZE
            )));
        }

        let offset = (self.header.e_phoff as usize)
            .checked_add(index * entsize)
            .ok_or(LoaderError::Truncated {
                what: "program header",
                offset: usize::MAX,
                len: PHDR_SIZE,
                image_len: self.bytes.len(),
            })?;
        let buf = self.range("program header", offset, PHDR_SIZE)?;
        Ok(Elf32Phdr::decode(buf, self.encoding))
    }

    /// Decode the whole program header table
    pub fn program_headers(&self) -> Result<Vec<Elf32Phdr>, LoaderError> {
        (0..self.header.e_phnum as usize)
            .map(|i| self.program_header(i))
            .collect()
    }
}
