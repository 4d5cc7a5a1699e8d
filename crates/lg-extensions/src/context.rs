//! Execution context threaded through workflow and module runs (§3
//! "Execution context").

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lg_types::{AppError, AppResult};

pub const MAX_DEPTH: u32 = 10;
pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BUDGET: i64 = 10;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub cancellation: CancellationToken,
    pub depth: u32,
    pub budget: i64,
    pub start: Instant,
    pub runtime_ceiling: Duration,
    pub trace_id: String,
    pub manifest_path: String,
}

impl ExecutionContext {
    pub fn root(manifest_path: impl Into<String>) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            depth: 0,
            budget: DEFAULT_BUDGET,
            start: Instant::now(),
            runtime_ceiling: DEFAULT_MAX_RUNTIME,
            trace_id: Uuid::new_v4().to_string(),
            manifest_path: manifest_path.into(),
        }
    }

    /// Derives a child context for a recursive `extension.call`/`module.execute`
    /// invocation. Decision on §9's open question: budget decrements on
    /// *every* child creation, including the first — there is no free call.
    pub fn child(&self, extension: &str, step: &str, manifest_path: impl Into<String>) -> AppResult<Self> {
        self.check_elapsed(extension, step)?;

        let depth = self.depth + 1;
        if depth > MAX_DEPTH {
            return Err(budget_error(
                extension,
                step,
                &self.manifest_path,
                format!("maximum call depth exceeded ({depth} > {MAX_DEPTH})"),
            ));
        }

        let budget = self.budget - 1;
        if budget < 0 {
            return Err(budget_error(
                extension,
                step,
                &self.manifest_path,
                "call budget exhausted".to_string(),
            ));
        }

        Ok(Self {
            cancellation: self.cancellation.clone(),
            depth,
            budget,
            start: self.start,
            runtime_ceiling: self.runtime_ceiling,
            trace_id: self.trace_id.clone(),
            manifest_path: manifest_path.into(),
        })
    }

    pub fn check_elapsed(&self, extension: &str, step: &str) -> AppResult<()> {
        if self.start.elapsed() > self.runtime_ceiling {
            return Err(budget_error(
                extension,
                step,
                &self.manifest_path,
                format!("runtime ceiling of {:?} exceeded", self.runtime_ceiling),
            ));
        }
        Ok(())
    }
}

fn budget_error(extension: &str, step: &str, manifest_path: &str, message: String) -> AppError {
    AppError::ExtensionBudgetExceeded {
        extension: extension.to_string(),
        step: step.to_string(),
        manifest_path: manifest_path.to_string(),
        message,
        details: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_increments_depth_and_decrements_budget() {
        let root = ExecutionContext::root("root.yaml");
        let child = root.child("a", "step-0", "a.yaml").unwrap();
        assert_eq!(child.depth, 1);
        assert_eq!(child.budget, DEFAULT_BUDGET - 1);
    }

    #[test]
    fn depth_guard_trips_past_ten_levels() {
        let mut ctx = ExecutionContext::root("a.yaml");
        ctx.budget = 1000;
        for i in 0..MAX_DEPTH {
            ctx = ctx.child("a", &format!("step-{i}"), "a.yaml").unwrap();
        }
        let result = ctx.child("a", "step-overflow", "a.yaml");
        assert!(matches!(result, Err(AppError::ExtensionBudgetExceeded { .. })));
    }

    #[test]
    fn budget_guard_trips_at_zero() {
        let mut ctx = ExecutionContext::root("a.yaml");
        ctx.budget = 1;
        ctx = ctx.child("a", "step-0", "a.yaml").unwrap();
        assert_eq!(ctx.budget, 0);
        let result = ctx.child("a", "step-1", "a.yaml");
        assert!(matches!(result, Err(AppError::ExtensionBudgetExceeded { .. })));
    }
}
