//! Extension manifest type and validation (§3 "Extension manifest").

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use lg_types::{AppError, AppResult};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

fn semver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+").expect("static regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionType {
    Workflow,
    Middleware,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Stop,
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Stop
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub uses: String,
    #[serde(default)]
    pub with: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub on_error: OnError,
}

/// Closed verb set (§9 "Declarative verbs vs. embedded code"). New verbs are
/// added here, not by extensions themselves.
pub const KNOWN_VERBS: &[&str] = &[
    "template.load",
    "template.render",
    "llm.chat",
    "file.write",
    "extension.call",
    "summary.parse",
    "rules.evaluate",
    "module.load",
    "module.validate",
    "module.execute",
    "module.record",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    #[serde(rename = "http.request")]
    HttpRequest,
    #[serde(rename = "llm.response")]
    LlmResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPredicate {
    pub path_prefix: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RedactionMode {
    Truncate { len: usize },
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionRule {
    pub selector: String,
    #[serde(flatten)]
    pub mode: RedactionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDescriptor {
    pub event: HookEvent,
    #[serde(rename = "match")]
    pub match_predicate: Option<MatchPredicate>,
    pub action: String,
    #[serde(default)]
    pub redact: Vec<RedactionRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub path: String,
    pub method: HttpMethod,
    #[serde(default = "default_true")]
    pub auth: bool,
    #[serde(default = "default_true")]
    pub rate_limit: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(rename = "type")]
    pub extension_type: ExtensionType,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub hooks: Vec<HookDescriptor>,
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
    #[serde(default)]
    pub builtin: bool,
}

impl ExtensionManifest {
    /// §3 "Extension manifest" invariants. Builtin-enable/disable rules are
    /// enforced at the registry boundary, not here (§9 "Builtin vs. user
    /// extensions").
    pub fn validate(&self) -> AppResult<()> {
        if !name_pattern().is_match(&self.name) {
            return Err(AppError::ManifestInvalid(format!(
                "extension name '{}' does not match ^[A-Za-z0-9_-]+$",
                self.name
            )));
        }
        if !semver_pattern().is_match(&self.version) {
            return Err(AppError::ManifestInvalid(format!(
                "extension '{}' has a non-semver version '{}'",
                self.name, self.version
            )));
        }

        match self.extension_type {
            ExtensionType::Workflow => {
                if self.steps.is_empty() {
                    return Err(AppError::ManifestInvalid(format!(
                        "workflow extension '{}' must declare at least one step",
                        self.name
                    )));
                }
            }
            ExtensionType::Middleware | ExtensionType::Observer => {
                if self.hooks.is_empty() {
                    return Err(AppError::ManifestInvalid(format!(
                        "{:?} extension '{}' must declare at least one hook",
                        self.extension_type, self.name
                    )));
                }
                if !self.endpoints.is_empty() {
                    return Err(AppError::ManifestInvalid(format!(
                        "only workflow extensions may declare endpoints ('{}')",
                        self.name
                    )));
                }
            }
        }

        for step in &self.steps {
            if !KNOWN_VERBS.contains(&step.uses.as_str()) {
                return Err(AppError::ManifestInvalid(format!(
                    "extension '{}' uses unrecognised verb '{}'",
                    self.name, step.uses
                )));
            }
        }

        for endpoint in &self.endpoints {
            if !endpoint.path.starts_with('/') {
                return Err(AppError::ManifestInvalid(format!(
                    "extension '{}' endpoint path '{}' must start with '/'",
                    self.name, endpoint.path
                )));
            }
        }

        Ok(())
    }

    /// Whether the manifest's own `enabled` field (before registry override)
    /// resolves true. Absent means enabled (§4.4.1).
    pub fn declared_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// One step of a parallel `agenticmodule.yaml` descriptor (§4.4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticModuleStep {
    pub extension: String,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub on_error: OnError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticModule {
    pub name: String,
    pub steps: Vec<AgenticModuleStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow_manifest() -> ExtensionManifest {
        ExtensionManifest {
            name: "sum".into(),
            version: "1.0.0".into(),
            description: "adds two numbers".into(),
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
            builtin: false,
        }
    }

    #[test]
    fn rejects_invalid_name() {
        let mut manifest = workflow_manifest();
        manifest.name = "bad name!".into();
        assert!(matches!(manifest.validate(), Err(AppError::ManifestInvalid(_))));
    }

    #[test]
    fn workflow_requires_at_least_one_step() {
        let mut manifest = workflow_manifest();
        manifest.steps.clear();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn middleware_requires_at_least_one_hook() {
        let mut manifest = workflow_manifest();
        manifest.extension_type = ExtensionType::Middleware;
        manifest.hooks.clear();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn only_workflows_may_declare_endpoints() {
        let mut manifest = workflow_manifest();
        manifest.extension_type = ExtensionType::Observer;
        manifest.hooks.push(HookDescriptor {
            event: HookEvent::LlmResponse,
            match_predicate: None,
            action: "usage.track".into(),
            redact: vec![],
        });
        manifest.endpoints.push(EndpointDescriptor {
            path: "/x".into(),
            method: HttpMethod::Get,
            auth: true,
            rate_limit: true,
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn endpoint_paths_must_start_with_slash() {
        let mut manifest = workflow_manifest();
        manifest.endpoints.push(EndpointDescriptor {
            path: "sum".into(),
            method: HttpMethod::Post,
            auth: true,
            rate_limit: true,
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn unknown_verb_fails_validation() {
        let mut manifest = workflow_manifest();
        manifest.steps.push(WorkflowStep {
            uses: "eval.arbitrary".into(),
            with: Default::default(),
            on_error: OnError::Stop,
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn parses_manifest_from_yaml() {
        let yaml = r#"
name: sum
version: 1.0.0
description: adds two numbers
type: workflow
steps:
  - uses: llm.chat
endpoints:
  - path: /sum
    method: POST
"#;
        let manifest: ExtensionManifest = serde_yaml::from_str(yaml).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.endpoints[0].method, HttpMethod::Post);
    }
}
