//! The agent's sandbox tools.
//!
//! Four tools are exposed to the model: `terminal`, `createOrUpdateFiles`,
//! `readFiles`, and `listFiles`. A tool never propagates an error to the
//! caller; every failure is rendered as a string result so the model can
//! see it and react, while real failures are also latched into [`RunState`].

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::agent::classify;
use crate::agent::run_state::RunState;
use crate::llm::ToolDef;
use crate::sandbox::SandboxProvider;

pub const TOOL_TERMINAL: &str = "terminal";
pub const TOOL_WRITE_FILES: &str = "createOrUpdateFiles";
pub const TOOL_READ_FILES: &str = "readFiles";
pub const TOOL_LIST_FILES: &str = "listFiles";

/// Tool schemas advertised to the model on every chat turn.
pub fn tool_defs() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: TOOL_TERMINAL.to_string(),
            description: "Run a shell command inside the sandbox and return its output"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run" }
                },
                "required": ["command"]
            }),
        },
        ToolDef {
            name: TOOL_WRITE_FILES.to_string(),
            description: "Create or overwrite files in the sandbox".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "content": { "type": "string" }
                            },
                            "required": ["path", "content"]
                        }
                    }
                },
                "required": ["files"]
            }),
        },
        ToolDef {
            name: TOOL_READ_FILES.to_string(),
            description: "Read one or more files from the sandbox".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Paths to read"
                    }
                },
                "required": ["files"]
            }),
        },
        ToolDef {
            name: TOOL_LIST_FILES.to_string(),
            description: "List directory contents in the sandbox".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list (default .)" }
                }
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct TerminalInput {
    command: String,
}

#[derive(Debug, Deserialize)]
struct WriteFilesInput {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReadFilesInput {
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListFilesInput {
    #[serde(default)]
    path: Option<String>,
}

/// Result of one tool invocation. `output` becomes the tool_result content
/// fed back to the model; `errors_appended` counts how many error messages
/// the call latched into the run state.
#[derive(Debug)]
pub struct ToolOutcome {
    pub output: String,
    pub errors_appended: usize,
}

/// Dispatch one tool call. Tools report failures through the returned
/// outcome and the run state, never through a propagated error.
pub async fn execute_tool(
    sandbox: &dyn SandboxProvider,
    sandbox_id: &str,
    state: &mut RunState,
    name: &str,
    input: &Value,
) -> ToolOutcome {
    let errors_before = state.error_messages().len();
    let output = match name {
        TOOL_TERMINAL => run_terminal(sandbox, sandbox_id, state, input).await,
        TOOL_WRITE_FILES => write_files(sandbox, sandbox_id, state, input).await,
        TOOL_READ_FILES => read_files(sandbox, sandbox_id, state, input).await,
        TOOL_LIST_FILES => list_files(sandbox, sandbox_id, state, input).await,
        other => {
            warn!(tool = other, "Model requested unknown tool");
            format!("Error: unknown tool '{}'", other)
        }
    };
    ToolOutcome {
        output,
        errors_appended: state.error_messages().len() - errors_before,
    }
}

async fn run_terminal(
    sandbox: &dyn SandboxProvider,
    sandbox_id: &str,
    state: &mut RunState,
    input: &Value,
) -> String {
    let parsed: TerminalInput = match serde_json::from_value(input.clone()) {
        Ok(p) => p,
        Err(e) => return format!("Error: invalid terminal input: {}", e),
    };
    debug!(command = %parsed.command, "Running sandbox command");

    let mut output = match sandbox.run_command(sandbox_id, &parsed.command).await {
        Ok(out) => out,
        Err(e) => {
            let message = format!("Command `{}` could not be run: {}", parsed.command, e);
            state.record_error(message.clone());
            return format!("Error: {}", message);
        }
    };

    // A missing npm module gets one automatic install-and-retry before the
    // failure is surfaced to the model. The install's own output is appended
    // so the model sees what was run on its behalf.
    let mut install_log = String::new();
    if classify::command_failed(&output) {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if let Some(module) = classify::missing_module(&combined) {
            debug!(module = %module, "Installing missing module and retrying");
            let install = format!("npm install {}", module);
            match sandbox.run_command(sandbox_id, &install).await {
                Ok(install_out) => {
                    install_log = format!(
                        "\n--- {} ---\nstdout:\n{}\nstderr:\n{}\nexit code: {}",
                        install, install_out.stdout, install_out.stderr, install_out.exit_code
                    );
                    if !classify::command_failed(&install_out) {
                        match sandbox.run_command(sandbox_id, &parsed.command).await {
                            Ok(retry) => output = retry,
                            Err(e) => {
                                let message =
                                    format!("Retry of `{}` failed: {}", parsed.command, e);
                                state.record_error(message.clone());
                                return format!("Error: {}", message);
                            }
                        }
                    }
                }
                Err(e) => {
                    install_log = format!("\n--- {} ---\nError: {}", install, e);
                }
            }
        }
    }

    if classify::command_failed(&output) {
        let digest = classify::failure_digest(&parsed.command, &output);
        state.record_error(digest);
    }

    format!(
        "stdout:\n{}\nstderr:\n{}\nexit code: {}{}",
        output.stdout, output.stderr, output.exit_code, install_log
    )
}

async fn write_files(
    sandbox: &dyn SandboxProvider,
    sandbox_id: &str,
    state: &mut RunState,
    input: &Value,
) -> String {
    let parsed: WriteFilesInput = match serde_json::from_value(input.clone()) {
        Ok(p) => p,
        Err(e) => return format!("Error: invalid file input: {}", e),
    };

    let mut written = Vec::new();
    for entry in &parsed.files {
        match sandbox
            .write_file(sandbox_id, &entry.path, &entry.content)
            .await
        {
            Ok(()) => {
                state.upsert_file(&entry.path, entry.content.clone());
                written.push(entry.path.as_str());
            }
            Err(e) => {
                let message = format!("Failed to write {}: {}", entry.path, e);
                state.record_error(message.clone());
                return format!("Error: {}", message);
            }
        }
    }
    format!("Wrote {} file(s): {}", written.len(), written.join(", "))
}

async fn read_files(
    sandbox: &dyn SandboxProvider,
    sandbox_id: &str,
    state: &mut RunState,
    input: &Value,
) -> String {
    let parsed: ReadFilesInput = match serde_json::from_value(input.clone()) {
        Ok(p) => p,
        Err(e) => return format!("Error: invalid readFiles input: {}", e),
    };

    let mut sections = Vec::new();
    for path in &parsed.files {
        let command = format!("cat {}", shell_quote(path));
        match sandbox.run_command(sandbox_id, &command).await {
            Ok(out) if out.exit_code == 0 => {
                sections.push(format!("=== {} ===\n{}", path, out.stdout));
            }
            // A file the model guessed wrong about is routine, not a failure.
            Ok(out) if out.stderr.contains("No such file or directory") => {
                sections.push(format!("=== {} ===\n<file not found>", path));
            }
            // The file exists but cannot be read; that is a real failure.
            Ok(out) => {
                let stderr = out.stderr.trim().to_string();
                state.record_error(format!("Failed to read {}: {}", path, stderr));
                sections.push(format!("=== {} ===\nError reading file: {}", path, stderr));
            }
            Err(e) => {
                state.record_error(format!("Failed to read {}: {}", path, e));
                sections.push(format!("=== {} ===\nError reading file: {}", path, e));
            }
        }
    }
    sections.join("\n")
}

async fn list_files(
    sandbox: &dyn SandboxProvider,
    sandbox_id: &str,
    state: &mut RunState,
    input: &Value,
) -> String {
    let parsed: ListFilesInput = match serde_json::from_value(input.clone()) {
        Ok(p) => p,
        Err(e) => return format!("Error: invalid listFiles input: {}", e),
    };
    let path = parsed.path.as_deref().unwrap_or(".");
    let command = format!("ls -la {}", shell_quote(path));

    match sandbox.run_command(sandbox_id, &command).await {
        Ok(out) if out.exit_code == 0 => out.stdout,
        Ok(out) if out.stderr.contains("No such file or directory") => {
            format!("<directory {} not found>", path)
        }
        Ok(out) => {
            let stderr = out.stderr.trim().to_string();
            state.record_error(format!("Failed to list {}: {}", path, stderr));
            format!("Error listing {}: {}", path, stderr)
        }
        Err(e) => {
            state.record_error(format!("Failed to list {}: {}", path, e));
            format!("Error listing {}: {}", path, e)
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
