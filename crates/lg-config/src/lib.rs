//! Immutable process-wide configuration, built once from the environment at
//! startup (§3: "lifecycle init-only"). There is no on-disk configuration
//! file, no hot reload, and no external config-file-parsing dependency —
//! that concern is explicitly an external collaborator per spec §1.

pub mod types;

pub use types::{Config, ConfigError, McpGuardrailConfig};
