//! Turns a plan manifest into real files in the sandbox.
//!
//! Each planned file gets its own generation call constrained to raw
//! source output. A file whose generation or write fails is skipped and
//! the pass continues; the plan is scaffolding, not a contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::agent::prompts::FILE_GENERATOR_SYSTEM_PROMPT;
use crate::agent::run_state::RunState;
use crate::config::ModelSettings;
use crate::llm::{ModelClient, TextRequest};
use crate::sandbox::SandboxProvider;
use crate::workflow::planner::PlanEntry;

const GENERATOR_TEMPERATURE: f32 = 0.3;
const GENERATOR_MAX_TOKENS: u32 = 8192;

pub async fn materialize(
    model: &Arc<dyn ModelClient>,
    settings: &ModelSettings,
    sandbox: &Arc<dyn SandboxProvider>,
    sandbox_id: &str,
    plan: &[PlanEntry],
    user_prompt: &str,
    previous_files: &BTreeMap<String, String>,
    state: &mut RunState,
) {
    for entry in plan {
        let content = match generate_file(model, settings, entry, user_prompt, previous_files)
            .await
        {
            Some(content) => content,
            None => {
                warn!(path = %entry.path, "File generation produced no usable text, skipping");
                continue;
            }
        };

        match sandbox.write_file(sandbox_id, &entry.path, &content).await {
            Ok(()) => {
                debug!(path = %entry.path, bytes = content.len(), "Materialized planned file");
                state.upsert_file(&entry.path, content);
            }
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Write of planned file failed, skipping");
            }
        }
    }
}

async fn generate_file(
    model: &Arc<dyn ModelClient>,
    settings: &ModelSettings,
    entry: &PlanEntry,
    user_prompt: &str,
    previous_files: &BTreeMap<String, String>,
) -> Option<String> {
    let mut prompt = format!(
        "User request:\n{}\n\nGenerate the file `{}`.\nPurpose: {}\n",
        user_prompt, entry.path, entry.description
    );
    if !previous_files.is_empty() {
        let paths: Vec<&str> = previous_files.keys().map(String::as_str).collect();
        prompt.push_str(&format!(
            "\nExisting project files for context:\n{}\n",
            paths.join("\n")
        ));
    }

    match model
        .complete(TextRequest {
            model: settings.agent_model.clone(),
            system: FILE_GENERATOR_SYSTEM_PROMPT.to_string(),
            prompt,
            temperature: GENERATOR_TEMPERATURE,
            max_tokens: GENERATOR_MAX_TOKENS,
        })
        .await
    {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(e) => {
            warn!(path = %entry.path, error = %e, "Generation call failed");
            None
        }
    }
}
