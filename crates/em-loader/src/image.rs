//! Module image acquisition

use em_core::config::LoaderConfig;
use em_core::error::LoaderError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, trace};

/// Raw bytes of a module file. Dropping it releases the image.
#[derive(Debug, Clone)]
pub struct Image {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Source of module images
pub trait ImageProvider: Send + Sync {
    fn load_image(&self, name: &str) -> Result<Image, LoaderError>;
}

/// Reads `<name><suffix>` from the first search path that has it
#[derive(Debug, Clone)]
pub struct FileImageProvider {
    search_paths: Vec<PathBuf>,
    suffix: String,
}

impl FileImageProvider {
    pub fn new(search_paths: Vec<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            search_paths,
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.search_paths.clone(), config.module_suffix.clone())
    }

    /// Search `dir` before the configured paths
    pub fn add_search_path(&mut self, dir: PathBuf) {
        self.search_paths.insert(0, dir);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Path of the file for module `name`, if one exists
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let file_name = format!("{}{}", name, self.suffix);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .inspect(|path| trace!("Probing {}", path.display()))
            .find(|path| path.is_file())
    }
}

impl ImageProvider for FileImageProvider {
    fn load_image(&self, name: &str) -> Result<Image, LoaderError> {
        let path = self.resolve(name).ok_or_else(|| LoaderError::ImageUnavailable {
            name: name.to_string(),
            reason: format!("no {}{} in {:?}", name, self.suffix, self.search_paths),
        })?;

        let bytes = std::fs::read(&path).map_err(|e| LoaderError::ImageUnavailable {
            name: name.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        debug!("Read {} (0x{:x} bytes)", path.display(), bytes.len());
        Ok(Image {
            name: name.to_string(),
            bytes,
        })
    }
}

/// In-memory images keyed by module name
#[derive(Debug, Default)]
pub struct MemoryImageProvider {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.images.write().insert(name.into(), bytes);
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.images.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }
}

impl ImageProvider for MemoryImageProvider {
    fn load_image(&self, name: &str) -> Result<Image, LoaderError> {
        let images = self.images.read();
        let bytes = images.get(name).ok_or_else(|| LoaderError::ImageUnavailable {
            name: name.to_string(),
            reason: "no such image".to_string(),
        })?;

        Ok(Image {
            name: name.to_string(),
            bytes: bytes.clone(),
        })
    }
}
