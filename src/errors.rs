//! Typed error hierarchy for the Loom orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `SandboxError` — sandbox provider failures
//! - `StoreError` — message/fragment persistence failures
//! - `WorkflowError` — orchestration and restart-workflow failures

use thiserror::Error;

/// Errors from the sandbox provider.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox provisioning failed: {0}")]
    CreateFailed(String),

    #[error("Sandbox {id} is unavailable (expired or unknown)")]
    Unavailable { id: String },

    #[error("Failed to write {path} into sandbox: {message}")]
    WriteFailed { path: String, message: String },

    #[error("Command execution failed in sandbox: {0}")]
    ExecFailed(String),

    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors from the message/fragment store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Fragment {id} not found")]
    FragmentNotFound { id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the generation and restart workflows.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Model call failed: {0}")]
    Model(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
