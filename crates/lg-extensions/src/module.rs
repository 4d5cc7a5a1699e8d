//! Registry for `agenticmodule.yaml` descriptors (§4.4.2, §4.4.3
//! `module.*` verbs): workflows-of-workflows with their own runtime+step
//! budget, executed through the same depth/budget guards as
//! `extension.call`.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::manifest::AgenticModule;

#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Arc<DashMap<String, (AgenticModule, PathBuf)>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, module: AgenticModule, dir: PathBuf) {
        self.modules.insert(module.name.clone(), (module, dir));
    }

    pub fn get(&self, name: &str) -> Option<(AgenticModule, PathBuf)> {
        self.modules.get(name).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<String> {
        self.modules.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry of a module run record (§4.4.3 `module.execute`/`module.record`).
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStepRecord {
    pub extension: String,
    pub status: &'static str,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleRunRecord {
    pub module: String,
    pub status: &'static str,
    pub steps: Vec<ModuleStepRecord>,
}
