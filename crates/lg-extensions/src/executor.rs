//! Workflow step executor (§4.4.3).
//!
//! Executes a manifest's ordered steps against a shared state map seeded
//! from the caller's inputs, dispatching each step's `uses` verb from the
//! closed set in [`crate::manifest::KNOWN_VERBS`]. The executor takes an
//! [`LlmHandler`] as a construction-time dependency (§4.4.5) so `llm.chat`
//! steps invoke the same upstream the proxy uses, sharing its
//! auth/rate-limit/shutdown semantics rather than opening a second client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use lg_types::{AppError, AppResult};

use crate::context::ExecutionContext;
use crate::manifest::{AgenticModuleStep, ExtensionManifest, ExtensionType, OnError, WorkflowStep};
use crate::module::{ModuleRegistry, ModuleRunRecord, ModuleStepRecord};
use crate::registry::ManifestRegistry;
use crate::template;

/// Construction-time dependency letting workflows invoke the gateway's own
/// upstream chat-completion call (§4.4.5): `(model, messages, options) ->
/// response-map`.
#[async_trait]
pub trait LlmHandler: Send + Sync {
    async fn chat(&self, model: &str, messages: Vec<Value>, options: Value) -> AppResult<Value>;
}

#[derive(Clone)]
pub struct WorkflowExecutor {
    llm: Arc<dyn LlmHandler>,
    manifests: ManifestRegistry,
    modules: ModuleRegistry,
}

impl WorkflowExecutor {
    pub fn new(llm: Arc<dyn LlmHandler>, manifests: ManifestRegistry, modules: ModuleRegistry) -> Self {
        Self {
            llm,
            manifests,
            modules,
        }
    }

    /// Runs `manifest` (found at `dir`) to completion, returning the final
    /// state map. `ctx` carries the depth/budget/runtime guardrails (§3
    /// "Execution context").
    pub async fn execute(
        &self,
        manifest: &ExtensionManifest,
        dir: &Path,
        inputs: Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> AppResult<Value> {
        let mut state = inputs;
        for (index, step) in manifest.steps.iter().enumerate() {
            ctx.check_elapsed(&manifest.name, &step.uses)?;
            let resolved_with = resolve_params(&step.with, &state);
            let outcome = self
                .run_step(manifest, dir, step, index, &resolved_with, &state, ctx)
                .await;
            match outcome {
                Ok(updates) => merge_into(&mut state, updates),
                Err(e) => {
                    if step.on_error == OnError::Continue {
                        tracing::warn!(
                            extension = %manifest.name,
                            step = index,
                            verb = %step.uses,
                            error = %e,
                            "workflow step failed, continuing (on_error: continue)"
                        );
                    } else {
                        return Err(AppError::InternalError(format!(
                            "extension '{}' step {index} ('{}') failed: {e}",
                            manifest.name, step.uses
                        )));
                    }
                }
            }
        }
        Ok(Value::Object(state))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_step<'a>(
        &'a self,
        manifest: &'a ExtensionManifest,
        dir: &'a Path,
        step: &'a WorkflowStep,
        index: usize,
        with: &'a Map<String, Value>,
        state: &'a Map<String, Value>,
        ctx: &'a ExecutionContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<Map<String, Value>>> + Send + 'a>>
    {
        Box::pin(async move {
            match step.uses.as_str() {
                "template.load" => self.step_template_load(dir, with).await,
                "template.render" => step_template_render(with, state),
                "llm.chat" => self.step_llm_chat(with, state).await,
                "file.write" => self.step_file_write(dir, with, state).await,
                "extension.call" => self.step_extension_call(manifest, step, index, with, ctx).await,
                "summary.parse" => step_summary_parse(state),
                "rules.evaluate" => step_rules_evaluate(with, state),
                "module.load" => self.step_module_load(with),
                "module.validate" => self.step_module_validate(with),
                "module.execute" => self.step_module_execute(with, state, ctx).await,
                "module.record" => step_module_record(state),
                other => Err(AppError::ManifestInvalid(format!("unrecognised verb '{other}'"))),
            }
        })
    }

    async fn step_template_load(&self, dir: &Path, with: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let template_id = with
            .get("template_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("template.load requires 'template_id'".into()))?;
        let path = dir.join("templates").join(format!("{template_id}.txt"));
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::InternalError(format!("failed to read template '{template_id}': {e}")))?;
        let mut out = Map::new();
        out.insert("template_content".to_string(), Value::String(contents));
        Ok(out)
    }

    async fn step_llm_chat(&self, with: &Map<String, Value>, state: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let model = with
            .get("model")
            .or_else(|| state.get("model"))
            .and_then(Value::as_str)
            .unwrap_or("mistral")
            .to_string();
        let prompt = with
            .get("prompt")
            .or_else(|| state.get("prompt"))
            .or_else(|| state.get("rendered_prompt"))
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("llm.chat requires a 'prompt' in state".into()))?
            .to_string();

        let messages = vec![serde_json::json!({ "role": "user", "content": prompt })];
        let response = self.llm.chat(&model, messages, Value::Null).await?;
        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut out = Map::new();
        out.insert("llm_response".to_string(), Value::String(content));
        Ok(out)
    }

    async fn step_file_write(
        &self,
        dir: &Path,
        with: &Map<String, Value>,
        state: &Map<String, Value>,
    ) -> AppResult<Map<String, Value>> {
        let rel_path = with
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("file.write requires 'path'".into()))?;
        let content = state
            .get("llm_response")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let path = absolute_under(dir, rel_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::InternalError(format!("failed to create output directory: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AppError::InternalError(format!("failed to write '{}': {e}", path.display())))?;

        let mut out = Map::new();
        out.insert("written_path".to_string(), Value::String(path.display().to_string()));
        Ok(out)
    }

    async fn step_extension_call(
        &self,
        manifest: &ExtensionManifest,
        step: &WorkflowStep,
        index: usize,
        with: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> AppResult<Map<String, Value>> {
        let target_name = with
            .get("extension")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("extension.call requires 'extension'".into()))?;

        let target = self
            .manifests
            .get(target_name)
            .ok_or_else(|| AppError::ExtensionNotFound(target_name.to_string()))?;
        if !self
            .manifests
            .is_enabled(target_name)
            .unwrap_or(false)
        {
            return Err(AppError::ExtensionDisabled(target_name.to_string()));
        }
        if target.extension_type != ExtensionType::Workflow {
            return Err(AppError::InvalidRequest(format!(
                "extension.call target '{target_name}' is not a workflow"
            )));
        }
        let target_dir = self
            .manifests
            .dir_of(target_name)
            .ok_or_else(|| AppError::ExtensionNotFound(target_name.to_string()))?;

        let manifest_path = target_dir.join("manifest.yaml").display().to_string();
        let child_ctx = ctx.child(&manifest.name, &format!("step-{index}:{}", step.uses), manifest_path)?;

        let call_inputs = with
            .get("input")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let result = self.execute(&target, &target_dir, call_inputs, &child_ctx).await?;
        let mut out = Map::new();
        out.insert(format!("{target_name}_result"), result);
        Ok(out)
    }

    fn step_module_load(&self, with: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let name = with
            .get("module")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("module.load requires 'module'".into()))?;
        let (module, _dir) = self
            .modules
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("agentic module '{name}' not found")))?;
        let mut out = Map::new();
        out.insert(
            "module_steps".to_string(),
            serde_json::to_value(&module.steps).map_err(AppError::Serialization)?,
        );
        out.insert("module_name".to_string(), Value::String(name.to_string()));
        Ok(out)
    }

    fn step_module_validate(&self, with: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let name = with
            .get("module")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("module.validate requires 'module'".into()))?;
        let (module, _dir) = self
            .modules
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("agentic module '{name}' not found")))?;
        for step in &module.steps {
            if self.manifests.get(&step.extension).is_none() {
                return Err(AppError::ManifestInvalid(format!(
                    "module '{name}' references unknown extension '{}'",
                    step.extension
                )));
            }
        }
        let mut out = Map::new();
        out.insert("module_valid".to_string(), Value::Bool(true));
        Ok(out)
    }

    async fn step_module_execute(
        &self,
        with: &Map<String, Value>,
        state: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> AppResult<Map<String, Value>> {
        let name = with
            .get("module")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidRequest("module.execute requires 'module'".into()))?;
        let (module, dir) = self
            .modules
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("agentic module '{name}' not found")))?;

        let mut records = Vec::with_capacity(module.steps.len());
        for (index, step) in module.steps.iter().enumerate() {
            let record = self.run_module_step(&module.name, step, index, state, &dir, ctx).await;
            let stop = matches!(record.status, "error") && step.on_error == OnError::Stop;
            records.push(record);
            if stop {
                break;
            }
        }

        let run = ModuleRunRecord {
            module: name.to_string(),
            status: if records.iter().any(|r| r.status == "error") {
                "partial"
            } else {
                "ok"
            },
            steps: records,
        };

        let mut out = Map::new();
        out.insert(
            "module_run".to_string(),
            serde_json::to_value(&run).map_err(AppError::Serialization)?,
        );
        Ok(out)
    }

    async fn run_module_step(
        &self,
        module_name: &str,
        step: &AgenticModuleStep,
        index: usize,
        state: &Map<String, Value>,
        module_dir: &Path,
        ctx: &ExecutionContext,
    ) -> ModuleStepRecord {
        let start = std::time::Instant::now();
        let outcome: AppResult<Value> = async {
            let target = self
                .manifests
                .get(&step.extension)
                .ok_or_else(|| AppError::ExtensionNotFound(step.extension.clone()))?;
            if !self.manifests.is_enabled(&step.extension).unwrap_or(false) {
                return Err(AppError::ExtensionDisabled(step.extension.clone()));
            }
            let target_dir = self
                .manifests
                .dir_of(&step.extension)
                .ok_or_else(|| AppError::ExtensionNotFound(step.extension.clone()))?;
            let manifest_path = module_dir.join("agenticmodule.yaml").display().to_string();
            let child_ctx = ctx.child(module_name, &format!("module-step-{index}"), manifest_path)?;

            let mut call_inputs = step.input.clone();
            for (k, v) in state {
                call_inputs.entry(k.clone()).or_insert_with(|| v.clone());
            }
            self.execute(&target, &target_dir, call_inputs, &child_ctx).await
        }
        .await;

        match outcome {
            Ok(output) => ModuleStepRecord {
                extension: step.extension.clone(),
                status: "ok",
                duration_ms: start.elapsed().as_millis(),
                output: Some(output),
                error: None,
            },
            Err(e) => ModuleStepRecord {
                extension: step.extension.clone(),
                status: "error",
                duration_ms: start.elapsed().as_millis(),
                output: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn step_module_record(state: &Map<String, Value>) -> AppResult<Map<String, Value>> {
    let run = state
        .get("module_run")
        .cloned()
        .ok_or_else(|| AppError::InvalidRequest("module.record requires a prior 'module.execute'".into()))?;
    let mut out = Map::new();
    out.insert("module_record".to_string(), run);
    Ok(out)
}

fn step_template_render(with: &Map<String, Value>, state: &Map<String, Value>) -> AppResult<Map<String, Value>> {
    let template_content = state
        .get("template_content")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidRequest("template.render requires 'template_content' (run template.load first)".into()))?;

    let mut variables: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
    for (k, v) in state {
        variables.insert(k.clone(), v.clone());
    }
    if let Some(explicit) = with.get("variables").and_then(Value::as_object) {
        for (k, v) in explicit {
            variables.insert(k.clone(), v.clone());
        }
    }

    let rendered = template::render(template_content, &variables);
    let mut out = Map::new();
    out.insert("rendered_prompt".to_string(), Value::String(rendered.clone()));
    out.insert("prompt".to_string(), Value::String(rendered));
    Ok(out)
}

fn step_summary_parse(state: &Map<String, Value>) -> AppResult<Map<String, Value>> {
    let text = state
        .get("llm_response")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidRequest("summary.parse requires 'llm_response'".into()))?;

    let summary = serde_json::from_str::<Value>(text).unwrap_or_else(|_| {
        let (start, end) = (text.find('{'), text.rfind('}'));
        match (start, end) {
            (Some(s), Some(e)) if e >= s => {
                serde_json::from_str(&text[s..=e]).unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    });

    let mut out = Map::new();
    out.insert("summary".to_string(), summary);
    Ok(out)
}

fn step_rules_evaluate(with: &Map<String, Value>, state: &Map<String, Value>) -> AppResult<Map<String, Value>> {
    let default_then = || serde_json::json!({ "route": "queue", "priority": 3 });
    let summary = state.get("summary").and_then(Value::as_object);

    let mut then = default_then();
    if let (Some(rules), Some(summary)) = (with.get("rules").and_then(Value::as_array), summary) {
        for rule in rules {
            let when = rule.get("when").and_then(Value::as_object);
            let matches = when.is_some_and(|conditions| {
                conditions.iter().all(|(k, v)| summary.get(k) == Some(v))
            });
            if matches {
                if let Some(rule_then) = rule.get("then") {
                    then = rule_then.clone();
                }
                break;
            }
        }
    }

    let mut out = Map::new();
    out.insert("then".to_string(), then);
    Ok(out)
}

/// §4.4.3 step 1: "string values that match a state key are replaced by the
/// state value". Non-string values and unmatched strings pass through as
/// written in the manifest.
fn resolve_params(with: &Map<String, Value>, state: &Map<String, Value>) -> Map<String, Value> {
    with.iter()
        .map(|(k, v)| {
            let resolved = match v {
                Value::String(s) => state.get(s.as_str()).cloned().unwrap_or_else(|| v.clone()),
                other => other.clone(),
            };
            (k.clone(), resolved)
        })
        .collect()
}

fn merge_into(state: &mut Map<String, Value>, updates: Map<String, Value>) {
    for (k, v) in updates {
        state.insert(k, v);
    }
}

fn absolute_under(dir: &Path, rel_path: &str) -> PathBuf {
    let candidate = Path::new(rel_path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ExtensionType, WorkflowStep};
    use std::sync::Mutex;

    struct EchoLlm {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmHandler for EchoLlm {
        async fn chat(&self, _model: &str, messages: Vec<Value>, _options: Value) -> AppResult<Value> {
            let prompt = messages[0]["content"].as_str().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(prompt.clone());
            Ok(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": format!("echo: {prompt}")}}]
            }))
        }
    }

    fn executor() -> (WorkflowExecutor, Arc<EchoLlm>) {
        let llm = Arc::new(EchoLlm { calls: Mutex::new(vec![]) });
        let exec = WorkflowExecutor::new(llm.clone(), ManifestRegistry::new(), ModuleRegistry::new());
        (exec, llm)
    }

    fn manifest_with_steps(steps: Vec<WorkflowStep>) -> ExtensionManifest {
        ExtensionManifest {
            name: "test".into(),
            version: "1.0.0".into(),
            description: "test".into(),
            extension_type: ExtensionType::Workflow,
            enabled: None,
            config: Default::default(),
            inputs: vec![],
            outputs: vec![],
            steps,
            hooks: vec![],
            endpoints: vec![],
            builtin: false,
        }
    }

    fn step(uses: &str, with: Map<String, Value>) -> WorkflowStep {
        WorkflowStep {
            uses: uses.to_string(),
            with,
            on_error: OnError::Stop,
        }
    }

    #[tokio::test]
    async fn llm_chat_step_sets_llm_response_from_prompt_in_state() {
        let (exec, _llm) = executor();
        let manifest = manifest_with_steps(vec![step("llm.chat", Map::new())]);
        let mut inputs = Map::new();
        inputs.insert("prompt".to_string(), Value::String("hi".to_string()));
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec
            .execute(&manifest, Path::new("/tmp"), inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(result["llm_response"], "echo: hi");
    }

    #[tokio::test]
    async fn template_render_falls_back_to_literal_on_parse_failure() {
        let (exec, _llm) = executor();
        let manifest = manifest_with_steps(vec![step("template.render", Map::new())]);
        let mut inputs = Map::new();
        inputs.insert("template_content".to_string(), Value::String("hi {{name}}".to_string()));
        inputs.insert("name".to_string(), Value::String("world".to_string()));
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec
            .execute(&manifest, Path::new("/tmp"), inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(result["rendered_prompt"], "hi world");
    }

    #[tokio::test]
    async fn summary_parse_extracts_json_substring_when_not_pure_json() {
        let (exec, _llm) = executor();
        let manifest = manifest_with_steps(vec![step("summary.parse", Map::new())]);
        let mut inputs = Map::new();
        inputs.insert(
            "llm_response".to_string(),
            Value::String("here is the summary: {\"route\":\"fast\"} thanks".to_string()),
        );
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec
            .execute(&manifest, Path::new("/tmp"), inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(result["summary"]["route"], "fast");
    }

    #[tokio::test]
    async fn rules_evaluate_falls_back_to_default_when_nothing_matches() {
        let (exec, _llm) = executor();
        let mut with = Map::new();
        with.insert("rules".to_string(), serde_json::json!([]));
        let manifest = manifest_with_steps(vec![step("rules.evaluate", with)]);
        let mut inputs = Map::new();
        inputs.insert("summary".to_string(), serde_json::json!({"route": "x"}));
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec
            .execute(&manifest, Path::new("/tmp"), inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(result["then"]["route"], "queue");
        assert_eq!(result["then"]["priority"], 3);
    }

    #[tokio::test]
    async fn on_error_continue_keeps_executing_subsequent_steps() {
        let (exec, _llm) = executor();
        let manifest = manifest_with_steps(vec![
            WorkflowStep {
                uses: "summary.parse".to_string(),
                with: Map::new(),
                on_error: OnError::Continue,
            },
            step("rules.evaluate", Map::new()),
        ]);
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec.execute(&manifest, Path::new("/tmp"), Map::new(), &ctx).await.unwrap();
        assert_eq!(result["then"]["route"], "queue");
    }

    #[tokio::test]
    async fn on_error_stop_aborts_the_workflow() {
        let (exec, _llm) = executor();
        let manifest = manifest_with_steps(vec![step("summary.parse", Map::new())]);
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec.execute(&manifest, Path::new("/tmp"), Map::new(), &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn extension_call_rejects_unknown_target() {
        let (exec, _llm) = executor();
        let mut with = Map::new();
        with.insert("extension".to_string(), Value::String("missing".to_string()));
        let manifest = manifest_with_steps(vec![step("extension.call", with)]);
        let ctx = ExecutionContext::root("test.yaml");
        let result = exec.execute(&manifest, Path::new("/tmp"), Map::new(), &ctx).await;
        assert!(result.is_err());
    }
}
