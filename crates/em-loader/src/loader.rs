//! Module loading pipeline

use crate::dynamic;
use crate::elf::ElfImage;
use crate::header::{dump_header, validate_header};
use crate::image::ImageProvider;
use crate::module::{Mapping, Module};
use crate::reloc;
use crate::segment::{map_segments, LoadLayout};
use em_core::config::{Config, TargetSpec};
use em_core::error::LoaderError;
use em_memory::{Allocator, HeapAllocator};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maps shared objects into memory obtained from an [`Allocator`]
pub struct ModuleLoader {
    allocator: Arc<dyn Allocator>,
    target: TargetSpec,
    dump_headers: bool,
}

impl ModuleLoader {
    pub fn new(allocator: Arc<dyn Allocator>, target: TargetSpec) -> Self {
        Self {
            allocator,
            target,
            dump_headers: false,
        }
    }

    /// Heap-backed loader for the configured target
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(HeapAllocator::new()), config.target)
            .with_dump_headers(config.debug.dump_headers)
    }

    /// Log every header field before validation
    pub fn with_dump_headers(mut self, enabled: bool) -> Self {
        self.dump_headers = enabled;
        self
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Run the full pipeline on `image` and commit the result to `module`.
    ///
    /// On error nothing is committed: any block allocated for the segments
    /// has been freed and the module is still unloaded.
    pub fn load(&self, module: &mut Module, image: &[u8]) -> Result<(), LoaderError> {
        if module.is_loaded() {
            return Err(LoaderError::AlreadyLoaded(module.name().to_string()));
        }

        let mapping = self.map(module.name(), image).inspect_err(|e| {
            warn!("Failed to load module '{}': {}", module.name(), e);
        })?;

        info!(
            "Loaded module '{}' at 0x{:x} (0x{:x} bytes)",
            module.name(),
            mapping.base_addr,
            mapping.region.size()
        );
        module.commit(mapping);
        Ok(())
    }

    /// Acquire the image named after `module` from `provider` and load it.
    /// The image is released once loading completes.
    pub fn load_from(
        &self,
        module: &mut Module,
        provider: &dyn ImageProvider,
    ) -> Result<(), LoaderError> {
        let image = provider.load_image(module.name())?;
        debug!(
            "Image for '{}': 0x{:x} bytes",
            image.name,
            image.bytes.len()
        );
        self.load(module, &image.bytes)
    }

    fn map(&self, name: &str, bytes: &[u8]) -> Result<Mapping, LoaderError> {
        let image = ElfImage::parse(bytes)?;
        if self.dump_headers {
            dump_header(image.header());
        }
        validate_header(image.header(), &self.target)?;

        let phdrs = image.program_headers()?;
        let layout = LoadLayout::compute(&phdrs)?;
        debug!(
            "Module '{}' spans 0x{:x}..0x{:x}, allocation 0x{:x}..0x{:x}",
            name, layout.min_addr, layout.max_addr, layout.min_alloc, layout.max_alloc
        );

        // From here on an error drops `mapped`, which frees the block
        let mapped = map_segments(&image, &phdrs, &layout, Arc::clone(&self.allocator))?;
        let section = dynamic::extract(&phdrs, &mapped, image.encoding())?;
        let relocations = reloc::scan(name, &section.entries);

        Ok(Mapping {
            region: mapped.region,
            base_addr: mapped.base_addr,
            encoding: image.encoding(),
            tables: section.tables,
            dependencies: section.dependencies,
            soname: section.soname,
            relocations,
        })
    }
}

/// Load `image` into `module` with a heap allocator and the default target
pub fn load_module(module: &mut Module, image: &[u8]) -> Result<(), LoaderError> {
    ModuleLoader::new(Arc::new(HeapAllocator::new()), TargetSpec::default()).load(module, image)
}
