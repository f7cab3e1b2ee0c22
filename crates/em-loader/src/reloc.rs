//! Relocation scanning
//!
//! Relocation-related dynamic tags are recognized and reported, but no
//! relocation entry is read or applied and `DT_INIT`/`DT_FINI` are never
//! called. Modules that depend on fix-ups are therefore only usable for
//! position-independent data lookup.

use crate::elf::{dt, Elf32Dyn};
use serde::Serialize;
use tracing::{debug, warn};

/// Tags recognized by the scanner
pub const RELOCATION_TAGS: &[(i32, &str)] = &[
    (dt::RELA, "DT_RELA"),
    (dt::RELASZ, "DT_RELASZ"),
    (dt::RELAENT, "DT_RELAENT"),
    (dt::PLTRELSZ, "DT_PLTRELSZ"),
    (dt::PLTGOT, "DT_PLTGOT"),
    (dt::INIT, "DT_INIT"),
    (dt::FINI, "DT_FINI"),
    (dt::REL, "DT_REL"),
    (dt::RELSZ, "DT_RELSZ"),
    (dt::RELENT, "DT_RELENT"),
    (dt::PLTREL, "DT_PLTREL"),
    (dt::JMPREL, "DT_JMPREL"),
];

/// A recognized relocation-related entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecognizedTag {
    pub tag: i32,
    pub name: &'static str,
    pub value: u32,
}

/// What the scanner found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelocationSummary {
    pub tags: Vec<RecognizedTag>,
}

impl RelocationSummary {
    fn value(&self, tag: i32) -> Option<u32> {
        self.tags.iter().find(|t| t.tag == tag).map(|t| t.value)
    }

    /// True when the module carries relocation entries that were not applied
    pub fn has_pending_relocations(&self) -> bool {
        [dt::RELASZ, dt::RELSZ, dt::PLTRELSZ]
            .iter()
            .any(|&tag| self.value(tag).is_some_and(|size| size > 0))
    }

    /// Module-relative address of the initializer
    pub fn init(&self) -> Option<u32> {
        self.value(dt::INIT)
    }

    /// Module-relative address of the finalizer
    pub fn fini(&self) -> Option<u32> {
        self.value(dt::FINI)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Scan dynamic entries for relocation-related tags
pub fn scan(module: &str, entries: &[Elf32Dyn]) -> RelocationSummary {
    let tags: Vec<_> = entries
        .iter()
        .filter_map(|entry| {
            RELOCATION_TAGS
                .iter()
                .find(|(tag, _)| *tag == entry.d_tag)
                .map(|&(tag, name)| RecognizedTag {
                    tag,
                    name,
                    value: entry.d_val,
                })
        })
        .collect();

    for tag in &tags {
        debug!(
            "Recognized dynamic tag {} ({}) = 0x{:x}",
            tag.name,
            tag.tag,
            tag.value
        );
    }

    let summary = RelocationSummary { tags };
    if summary.has_pending_relocations() {
        warn!(
            "Module '{}' has relocations that will not be applied",
            module
        );
    }
    summary
}
