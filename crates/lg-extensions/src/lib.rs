//! YAML-manifest-driven workflow/middleware/observer extension engine
//! (§4.4). The registry and discovery walk are process-wide; the workflow
//! executor and hook manager are constructed with an injected LLM handler so
//! extensions share the gateway's own upstream auth/rate-limit/shutdown
//! semantics (§4.4.5).

pub mod context;
pub mod discovery;
pub mod executor;
pub mod hooks;
pub mod manifest;
pub mod module;
pub mod registry;
pub mod route_table;
pub mod template;

pub use context::ExecutionContext;
pub use executor::{LlmHandler, WorkflowExecutor};
pub use hooks::HookManager;
pub use manifest::ExtensionManifest;
pub use module::ModuleRegistry;
pub use registry::ManifestRegistry;
pub use route_table::RouteTable;

/// Two manifests the verb set always has a working example of (§9 "Builtin
/// vs. user extensions", SPEC_FULL §4.4.8). Constructed in Rust rather than
/// loaded from YAML, but validated through the same `ExtensionManifest`
/// type, and registered with `builtin: true` so the registry pins them
/// always-enabled.
pub fn builtin_manifests() -> Vec<ExtensionManifest> {
    vec![builtin_audit_manifest(), builtin_docs_manifest()]
}

fn builtin_audit_manifest() -> ExtensionManifest {
    use manifest::{ExtensionType, HookDescriptor, HookEvent, MatchPredicate};
    ExtensionManifest {
        name: "builtin-audit".to_string(),
        version: "1.0.0".to_string(),
        description: "Writes a redacted audit line for every /v1 request.".to_string(),
        extension_type: ExtensionType::Middleware,
        enabled: Some(true),
        config: Default::default(),
        inputs: vec![],
        outputs: vec![],
        steps: vec![],
        hooks: vec![HookDescriptor {
            event: HookEvent::HttpRequest,
            match_predicate: Some(MatchPredicate {
                path_prefix: "/v1".to_string(),
            }),
            action: "audit.log".to_string(),
            redact: vec![],
        }],
        endpoints: vec![],
        builtin: true,
    }
}

fn builtin_docs_manifest() -> ExtensionManifest {
    use manifest::{ExtensionType, HookDescriptor, HookEvent};
    ExtensionManifest {
        name: "builtin-docs".to_string(),
        version: "1.0.0".to_string(),
        description: "Appends a usage record after every chat completion.".to_string(),
        extension_type: ExtensionType::Observer,
        enabled: Some(true),
        config: Default::default(),
        inputs: vec![],
        outputs: vec![],
        steps: vec![],
        hooks: vec![HookDescriptor {
            event: HookEvent::LlmResponse,
            match_predicate: None,
            action: "usage.track".to_string(),
            redact: vec![],
        }],
        endpoints: vec![],
        builtin: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_manifests_validate() {
        for manifest in builtin_manifests() {
            manifest.validate().unwrap();
            assert!(manifest.builtin);
        }
    }
}
