//! Module registry
//!
//! Loaded modules are kept in insertion order behind `Arc`, so a module
//! handed out by a lookup stays mapped until the last handle is dropped.

use crate::image::ImageProvider;
use crate::loader::ModuleLoader;
use crate::module::Module;
use crate::symbol::SymbolDescriptor;
use em_core::config::LoaderConfig;
use em_core::error::RegistryError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// A module the registry refused, handed back with the reason
#[derive(Error)]
#[error("{reason}")]
pub struct InsertError {
    reason: RegistryError,
    module: Module,
}

impl InsertError {
    pub fn reason(&self) -> &RegistryError {
        &self.reason
    }

    /// Take the module back, still mapped
    pub fn into_module(self) -> Module {
        self.module
    }

    /// Keep only the reason; the module and its mapping are released
    pub fn into_reason(self) -> RegistryError {
        self.reason
    }
}

impl fmt::Debug for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertError")
            .field("reason", &self.reason)
            .field("module", &self.module.name())
            .finish()
    }
}

/// Ordered collection of loaded modules
pub struct ModuleRegistry {
    modules: RwLock<Vec<Arc<Module>>>,
    reject_duplicates: bool,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
            reject_duplicates: true,
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
            reject_duplicates: config.reject_duplicates,
        }
    }

    /// Allow several modules with the same name
    pub fn allow_duplicates(mut self) -> Self {
        self.reject_duplicates = false;
        self
    }

    /// Register a loaded module.
    ///
    /// A refused module comes back inside the error; dropping the error
    /// releases its mapping.
    pub fn insert(&self, module: Module) -> Result<Arc<Module>, InsertError> {
        if !module.is_loaded() {
            let reason = RegistryError::NotLoaded(module.name().to_string());
            return Err(InsertError { reason, module });
        }

        let mut modules = self.modules.write();
        if self.reject_duplicates && modules.iter().any(|m| m.name() == module.name()) {
            let reason = RegistryError::DuplicateName(module.name().to_string());
            return Err(InsertError { reason, module });
        }

        let module = Arc::new(module);
        modules.push(Arc::clone(&module));
        debug!(
            "Registered module '{}' ({} total)",
            module.name(),
            modules.len()
        );
        Ok(module)
    }

    /// Load `module` from `provider` and register it.
    ///
    /// A duplicate name is refused before the image is read.
    pub fn load(
        &self,
        loader: &ModuleLoader,
        provider: &dyn ImageProvider,
        mut module: Module,
    ) -> em_core::Result<Arc<Module>> {
        if self.reject_duplicates && self.contains(module.name()) {
            return Err(RegistryError::DuplicateName(module.name().to_string()).into());
        }

        loader.load_from(&mut module, provider)?;
        Ok(self.insert(module).map_err(InsertError::into_reason)?)
    }

    /// Remove the first module named `name`
    pub fn remove(&self, name: &str) -> Option<Arc<Module>> {
        let mut modules = self.modules.write();
        let index = modules.iter().position(|m| m.name() == name)?;
        Some(modules.remove(index))
    }

    /// Remove `name` and release its mapping once no other handle remains
    pub fn unload(&self, name: &str) -> Result<(), RegistryError> {
        let module = self
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        match Arc::try_unwrap(module) {
            Ok(module) => module.unload(),
            Err(shared) => info!(
                "Module '{}' unregistered; {} handle(s) still hold its mapping",
                name,
                Arc::strong_count(&shared) - 1
            ),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().iter().find(|m| m.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().iter().any(|m| m.name() == name)
    }

    /// Names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.modules.read().iter().map(|m| m.name().to_string()).collect()
    }

    /// Snapshot of the registered modules in insertion order
    pub fn iter(&self) -> std::vec::IntoIter<Arc<Module>> {
        self.modules.read().clone().into_iter()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// First definition of `name` across all modules, in insertion order
    pub fn find_symbol(&self, name: &str) -> Option<(Arc<Module>, SymbolDescriptor)> {
        self.modules
            .read()
            .iter()
            .find_map(|m| m.find_symbol(name).map(|sym| (Arc::clone(m), sym)))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
