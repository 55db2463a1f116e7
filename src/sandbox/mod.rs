//! Sandbox control: provisioning, file writes, command execution, and
//! endpoint derivation against an isolated remote execution environment.
//!
//! The provider owns sandbox lifetimes (TTL-bounded); Loom never retries
//! provisioning — failures surface to the caller, which records them into
//! run state. `SandboxProvider` is the seam for test doubles.

pub mod remote;

use async_trait::async_trait;

use crate::errors::SandboxError;

/// Captured output of one shell command run inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Abstraction over the sandbox provider.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a new sandbox from a base template with the given TTL.
    /// Returns the opaque sandbox id. Called at most once per run.
    async fn create(&self, template: &str, ttl_secs: u64) -> Result<String, SandboxError>;

    /// Re-attach to an existing sandbox and refresh its TTL. Fails with
    /// `SandboxError::Unavailable` if the id is stale or expired.
    async fn connect(&self, sandbox_id: &str, ttl_secs: u64) -> Result<(), SandboxError>;

    /// Write a file into the sandbox filesystem, overwriting if present.
    async fn write_file(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError>;

    /// Execute a shell command, capturing stdout/stderr. Non-zero exit does
    /// not produce an `Err` — callers inspect the streams for failure.
    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> Result<CommandOutput, SandboxError>;

    /// Derive the externally reachable URL for a port inside the sandbox.
    fn host_for_port(&self, sandbox_id: &str, port: u16) -> String;
}
