//! Module header validation

use crate::elf::{et, Elf32Header, ELF_MAGIC, EI_CLASS, EI_DATA, EI_VERSION};
use em_core::config::TargetSpec;
use em_core::error::LoaderError;
use tracing::debug;

/// Check that `header` describes a loadable module for `target`.
///
/// The checks run in a fixed order and the first failing one is reported.
pub fn validate_header(header: &Elf32Header, target: &TargetSpec) -> Result<(), LoaderError> {
    let ident = &header.e_ident;

    if header.magic() != ELF_MAGIC {
        return Err(LoaderError::BadMagic(header.magic()));
    }

    if ident[EI_CLASS] != target.class {
        return Err(LoaderError::UnsupportedClass(ident[EI_CLASS]));
    }

    if ident[EI_DATA] != target.data {
        return Err(LoaderError::UnsupportedEndianness(ident[EI_DATA]));
    }

    if ident[EI_VERSION] != target.version || header.e_version != target.version as u32 {
        return Err(LoaderError::UnsupportedVersion {
            ident: ident[EI_VERSION],
            header: header.e_version,
        });
    }

    if header.e_type != et::DYN {
        return Err(LoaderError::NotSharedObject(header.e_type));
    }

    if header.e_machine != target.machine {
        return Err(LoaderError::UnsupportedMachine(header.e_machine));
    }

    if header.e_phoff == 0 {
        return Err(LoaderError::MissingProgramHeaders);
    }

    Ok(())
}

/// Log every header field
pub fn dump_header(header: &Elf32Header) {
    debug!("Identification: {:?}", header.e_ident);
    debug!("Type:           {}", header.e_type);
    debug!("Machine:        {}", header.e_machine);
    debug!("Version:        {}", header.e_version);
    debug!("Entry:          0x{:08x}", header.e_entry);
    debug!("PHT offset:     0x{:08x}", header.e_phoff);
    debug!("SHT offset:     0x{:08x}", header.e_shoff);
    debug!("Flags:          {}", header.e_flags);
    debug!(
        "Header size:    {} (structure size: {})",
        header.e_ehsize,
        crate::elf::EHDR_SIZE
    );
    debug!(
        "Program headers: {} x {} bytes",
        header.e_phnum, header.e_phentsize
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{elfclass, elfdata, em};

    fn valid_header() -> Elf32Header {
        let mut e_ident = [0u8; 16];
        e_ident[..4].copy_from_slice(&ELF_MAGIC);
        e_ident[EI_CLASS] = elfclass::CLASS32;
        e_ident[EI_DATA] = elfdata::LSB;
        e_ident[EI_VERSION] = 1;

        Elf32Header {
            e_ident,
            e_type: et::DYN,
            e_machine: em::I386,
            e_version: 1,
            e_phoff: 52,
            e_phentsize: 32,
            e_phnum: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_header() {
        assert_eq!(
            validate_header(&valid_header(), &TargetSpec::default()),
            Ok(())
        );
    }

    #[test]
    fn test_bad_magic() {
        let mut header = valid_header();
        header.e_ident[3] = b'G';
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::BadMagic([0x7F, b'E', b'L', b'G']))
        );
    }

    #[test]
    fn test_class_and_data() {
        let mut header = valid_header();
        header.e_ident[EI_CLASS] = elfclass::CLASS64;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::UnsupportedClass(2))
        );

        let mut header = valid_header();
        header.e_ident[EI_DATA] = elfdata::MSB;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::UnsupportedEndianness(2))
        );
    }

    #[test]
    fn test_version_fields() {
        let mut header = valid_header();
        header.e_ident[EI_VERSION] = 0;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::UnsupportedVersion {
                ident: 0,
                header: 1,
            })
        );

        let mut header = valid_header();
        header.e_version = 2;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::UnsupportedVersion {
                ident: 1,
                header: 2,
            })
        );
    }

    #[test]
    fn test_object_type() {
        for e_type in [et::NONE, et::REL, et::EXEC, et::CORE] {
            let mut header = valid_header();
            header.e_type = e_type;
            assert_eq!(
                validate_header(&header, &TargetSpec::default()),
                Err(LoaderError::NotSharedObject(e_type))
            );
        }
    }

    #[test]
    fn test_machine_and_phoff() {
        let mut header = valid_header();
        header.e_machine = em::X86_64;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::UnsupportedMachine(em::X86_64))
        );

        let mut header = valid_header();
        header.e_phoff = 0;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::MissingProgramHeaders)
        );
    }

    #[test]
    fn test_check_order() {
        // Wrong class and wrong type: the class check comes first
        let mut header = valid_header();
        header.e_ident[EI_CLASS] = elfclass::CLASS64;
        header.e_type = et::EXEC;
        assert_eq!(
            validate_header(&header, &TargetSpec::default()),
            Err(LoaderError::UnsupportedClass(2))
        );
    }

    #[test]
    fn test_custom_target() {
        let target = TargetSpec {
            data: elfdata::MSB,
            machine: em::ARM,
            ..TargetSpec::default()
        };
        let mut header = valid_header();
        header.e_ident[EI_DATA] = elfdata::MSB;
        header.e_machine = em::ARM;
        assert_eq!(validate_header(&header, &target), Ok(()));
    }
}
