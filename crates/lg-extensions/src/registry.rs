//! Manifest registry (§4.4.1): an in-memory mapping from extension name to
//! manifest plus an enabled flag, with builtin pinning.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use lg_types::{AppError, AppResult};

use crate::manifest::{ExtensionManifest, ExtensionType};

struct RegistryEntry {
    manifest: ExtensionManifest,
    enabled: AtomicBool,
    dir: PathBuf,
}

/// Process-wide singleton for the process lifetime (§9 "Global state").
#[derive(Clone)]
pub struct ManifestRegistry {
    entries: Arc<DashMap<String, Arc<RegistryEntry>>>,
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Fails if `manifest.name` already exists. Builtin extensions are
    /// always stored enabled, irrespective of the manifest's own flag.
    pub fn register(&self, manifest: ExtensionManifest, dir: PathBuf) -> AppResult<()> {
        manifest.validate()?;
        if self.entries.contains_key(&manifest.name) {
            return Err(AppError::ManifestInvalid(format!(
                "extension '{}' is already registered",
                manifest.name
            )));
        }
        self.insert(manifest, dir);
        Ok(())
    }

    /// Upsert variant used by discovery/refresh (§4.4.7). Same builtin rule
    /// applies.
    pub fn register_or_update(&self, manifest: ExtensionManifest, dir: PathBuf) -> AppResult<()> {
        manifest.validate()?;
        self.insert(manifest, dir);
        Ok(())
    }

    fn insert(&self, manifest: ExtensionManifest, dir: PathBuf) {
        let enabled = manifest.builtin || manifest.declared_enabled();
        let name = manifest.name.clone();
        self.entries.insert(
            name,
            Arc::new(RegistryEntry {
                manifest,
                enabled: AtomicBool::new(enabled),
                dir,
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<ExtensionManifest> {
        self.entries.get(name).map(|e| e.manifest.clone())
    }

    pub fn dir_of(&self, name: &str) -> Option<PathBuf> {
        self.entries.get(name).map(|e| e.dir.clone())
    }

    pub fn list(&self) -> Vec<ExtensionManifest> {
        self.entries.iter().map(|e| e.manifest.clone()).collect()
    }

    /// Enabled extensions of the given type only (§4.4.1 `GetByType`).
    pub fn get_by_type(&self, extension_type: ExtensionType) -> Vec<ExtensionManifest> {
        self.entries
            .iter()
            .filter(|e| e.manifest.extension_type == extension_type && e.enabled.load(Ordering::Acquire))
            .map(|e| e.manifest.clone())
            .collect()
    }

    pub fn is_enabled(&self, name: &str) -> AppResult<bool> {
        self.entries
            .get(name)
            .map(|e| e.enabled.load(Ordering::Acquire))
            .ok_or_else(|| AppError::ExtensionNotFound(name.to_string()))
    }

    /// Builtin extensions may not be disabled (§4.4.1).
    pub fn set_enabled(&self, name: &str, enabled: bool) -> AppResult<()> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| AppError::ExtensionNotFound(name.to_string()))?;
        if entry.manifest.builtin && !enabled {
            return Err(AppError::ManifestInvalid(format!(
                "builtin extension '{name}' cannot be disabled"
            )));
        }
        entry.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    /// Builtin extensions may not be unregistered (§4.4.1).
    pub fn unregister(&self, name: &str) -> AppResult<()> {
        let is_builtin = self
            .entries
            .get(name)
            .ok_or_else(|| AppError::ExtensionNotFound(name.to_string()))?
            .manifest
            .builtin;
        if is_builtin {
            return Err(AppError::ManifestInvalid(format!(
                "builtin extension '{name}' cannot be unregistered"
            )));
        }
        self.entries.remove(name);
        Ok(())
    }
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ExtensionManifest, OnError, WorkflowStep};
    use std::path::Path;

    fn workflow(name: &str, builtin: bool) -> ExtensionManifest {
        ExtensionManifest {
            name: name.to_string(),
            version: "1.0.0".into(),
            description: "test".into(),
            extension_type: ExtensionType::Workflow,
            enabled: None,
            config: Default::default(),
            inputs: vec![],
            outputs: vec![],
            steps: vec![WorkflowStep {
                uses: "llm.chat".into(),
                with: Default::default(),
                on_error: OnError::Stop,
            }],
            hooks: vec![],
            endpoints: vec![],
            builtin,
        }
    }

    #[test]
    fn register_then_unregister_round_trips_to_empty() {
        let registry = ManifestRegistry::new();
        registry
            .register(workflow("a", false), Path::new("/tmp/a").to_path_buf())
            .unwrap();
        assert!(registry.get("a").is_some());
        registry.unregister("a").unwrap();
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn duplicate_register_fails() {
        let registry = ManifestRegistry::new();
        registry
            .register(workflow("a", false), Path::new("/tmp/a").to_path_buf())
            .unwrap();
        assert!(registry
            .register(workflow("a", false), Path::new("/tmp/a").to_path_buf())
            .is_err());
    }

    #[test]
    fn builtin_extensions_cannot_be_disabled_or_unregistered() {
        let registry = ManifestRegistry::new();
        registry
            .register(workflow("builtin-docs", true), Path::new("/tmp/b").to_path_buf())
            .unwrap();
        assert!(registry.is_enabled("builtin-docs").unwrap());
        assert!(registry.set_enabled("builtin-docs", false).is_err());
        assert!(registry.unregister("builtin-docs").is_err());
    }

    #[test]
    fn get_by_type_excludes_disabled() {
        let registry = ManifestRegistry::new();
        registry
            .register(workflow("a", false), Path::new("/tmp/a").to_path_buf())
            .unwrap();
        registry.set_enabled("a", false).unwrap();
        assert!(registry.get_by_type(ExtensionType::Workflow).is_empty());
    }
}
