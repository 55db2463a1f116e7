//! Outcome determination and persistence.
//!
//! The finalizer is the only stage that judges a run. Failure is recomputed
//! here (verification may have added errors after the agent halted): a run
//! fails if it lacks a summary, latched any error, or produced no files.
//! Either way something is persisted — an ERROR message carrying a bounded
//! digest of what went wrong, or a RESULT message plus a fragment.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::prompts::{RESPONSE_SYSTEM_PROMPT, TITLE_SYSTEM_PROMPT};
use crate::agent::run_state::RunState;
use crate::config::ModelSettings;
use crate::errors::WorkflowError;
use crate::llm::{ModelClient, TextRequest};
use crate::sanitize::{sanitize_files, sanitize_text};
use crate::store::{DbHandle, MessageRole, MessageType, NewFragment, NewMessage};

const MAX_DIGEST_ERRORS: usize = 3;
const FALLBACK_TITLE: &str = "Generated App";
const FALLBACK_ERROR_CONTENT: &str = "Something went wrong. Please try again.";
const UTILITY_TEMPERATURE: f32 = 0.3;
const UTILITY_MAX_TOKENS: u32 = 512;

/// What a finished run exposes upward.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunOutcome {
    pub url: Option<String>,
    pub title: String,
    pub files: std::collections::BTreeMap<String, String>,
    pub summary: String,
    pub has_errors: bool,
    pub error_messages: Vec<String>,
}

pub fn is_failure(state: &RunState) -> bool {
    !state.has_summary()
        || state.has_errors()
        || !state.error_messages().is_empty()
        || state.files().is_empty()
}

/// Human-readable digest of up to three error messages, with an overflow
/// count for the rest. Never includes stack traces or internal ids.
pub fn error_digest(messages: &[String]) -> String {
    if messages.is_empty() {
        return FALLBACK_ERROR_CONTENT.to_string();
    }
    let shown: Vec<&str> = messages
        .iter()
        .take(MAX_DIGEST_ERRORS)
        .map(String::as_str)
        .collect();
    let mut digest = shown.join("\n");
    if messages.len() > MAX_DIGEST_ERRORS {
        digest.push_str(&format!(" (+{} more)", messages.len() - MAX_DIGEST_ERRORS));
    }
    digest
}

pub async fn finalize(
    model: &Arc<dyn ModelClient>,
    settings: &ModelSettings,
    db: &DbHandle,
    project_id: i64,
    url: Option<String>,
    state: &RunState,
) -> Result<RunOutcome, WorkflowError> {
    if is_failure(state) {
        let content = sanitize_text(&error_digest(state.error_messages()));
        info!(project_id, "Run failed, persisting error message");

        let persisted = content.clone();
        db.call(move |store| {
            store.create_message(&NewMessage {
                project_id,
                role: MessageRole::Assistant,
                msg_type: MessageType::Error,
                content: persisted,
                fragment: None,
            })
        })
        .await
        .map_err(WorkflowError::Other)?;

        return Ok(RunOutcome {
            url,
            title: String::new(),
            files: state.files().clone(),
            summary: state.summary().to_string(),
            has_errors: true,
            error_messages: state.error_messages().to_vec(),
        });
    }

    let title = sanitize_text(
        &utility_call(model, settings, TITLE_SYSTEM_PROMPT, state.summary())
            .await
            .unwrap_or_else(|| FALLBACK_TITLE.to_string()),
    );
    let response = sanitize_text(
        &utility_call(model, settings, RESPONSE_SYSTEM_PROMPT, state.summary())
            .await
            .unwrap_or_else(|| state.summary().to_string()),
    );
    let files = sanitize_files(state.files());
    let sandbox_url = url.clone().unwrap_or_default();

    info!(project_id, title = %title, files = files.len(), "Run succeeded, persisting fragment");

    let persisted_files = files.clone();
    let persisted_title = title.clone();
    let persisted_response = response.clone();
    db.call(move |store| {
        store.create_message(&NewMessage {
            project_id,
            role: MessageRole::Assistant,
            msg_type: MessageType::Result,
            content: persisted_response,
            fragment: Some(NewFragment {
                sandbox_url,
                title: persisted_title,
                files: persisted_files,
            }),
        })
    })
    .await
    .map_err(WorkflowError::Other)?;

    Ok(RunOutcome {
        url,
        title,
        files,
        summary: state.summary().to_string(),
        has_errors: false,
        error_messages: Vec::new(),
    })
}

async fn utility_call(
    model: &Arc<dyn ModelClient>,
    settings: &ModelSettings,
    system: &str,
    summary: &str,
) -> Option<String> {
    match model
        .complete(TextRequest {
            model: settings.utility_model.clone(),
            system: system.to_string(),
            prompt: summary.to_string(),
            temperature: UTILITY_TEMPERATURE,
            max_tokens: UTILITY_MAX_TOKENS,
        })
        .await
    {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Utility model call failed, using fallback");
            None
        }
    }
}
