//! First-turn scaffolding plan.
//!
//! Asks the planning model for a small manifest of files to seed the
//! project with. Every failure mode here is non-fatal: a model error or
//! unparseable reply yields an empty plan and generation proceeds without
//! pre-seeded files.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::agent::prompts::PLANNER_SYSTEM_PROMPT;
use crate::config::ModelSettings;
use crate::llm::{ModelClient, TextRequest};

const PLANNER_TEMPERATURE: f32 = 0.2;
const PLANNER_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlanEntry {
    pub path: String,
    pub description: String,
}

pub async fn plan(
    model: &Arc<dyn ModelClient>,
    settings: &ModelSettings,
    user_prompt: &str,
    previous_files: &BTreeMap<String, String>,
    max_files: usize,
) -> Vec<PlanEntry> {
    let mut prompt = format!("User request:\n{}\n", user_prompt);
    if !previous_files.is_empty() {
        let paths: Vec<&str> = previous_files.keys().map(String::as_str).collect();
        prompt.push_str(&format!(
            "\nThe project already contains these files:\n{}\n",
            paths.join("\n")
        ));
    }

    let raw = match model
        .complete(TextRequest {
            model: settings.planner_model.clone(),
            system: PLANNER_SYSTEM_PROMPT.to_string(),
            prompt,
            temperature: PLANNER_TEMPERATURE,
            max_tokens: PLANNER_MAX_TOKENS,
        })
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Planning call failed, continuing without a plan");
            return Vec::new();
        }
    };

    let mut entries = match serde_json::from_str::<Vec<PlanEntry>>(strip_fences(&raw)) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Plan output was not a JSON array, continuing without a plan");
            return Vec::new();
        }
    };

    // The prompt caps the manifest, but the model is not to be trusted
    // with its own limits.
    if entries.len() > max_files {
        warn!(
            returned = entries.len(),
            max_files, "Plan exceeded file cap, truncating"
        );
        entries.truncate(max_files);
    }
    debug!(files = entries.len(), "Plan ready");
    entries
}

/// Strip an optional markdown code fence (with or without a language tag)
/// wrapping the model's reply.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
