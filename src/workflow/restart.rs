//! Sandbox restart.
//!
//! Recovers an expired sandbox for a persisted fragment without re-running
//! generation: provision a fresh sandbox on a short TTL, replay the
//! fragment's file set into it, and repoint the fragment's live URL.
//!
//! Unlike the generation pipeline this path is fail-fast. A restart that
//! silently dropped files would leave the fragment pointing at a broken
//! app, so every write error propagates.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::SandboxSettings;
use crate::errors::{StoreError, WorkflowError};
use crate::sandbox::SandboxProvider;
use crate::store::DbHandle;

/// Restart the sandbox behind `fragment_id` and return the new URL.
///
/// `files` comes from the trigger when the caller already holds the
/// fragment's file map; otherwise it is loaded from the store.
pub async fn restart_sandbox(
    sandbox: &Arc<dyn SandboxProvider>,
    db: &DbHandle,
    settings: &SandboxSettings,
    fragment_id: i64,
    files: Option<BTreeMap<String, String>>,
) -> Result<String, WorkflowError> {
    let files = match files {
        Some(files) => files,
        None => {
            db.call(move |store| store.get_fragment(fragment_id))
                .await
                .map_err(WorkflowError::Other)?
                .ok_or(StoreError::FragmentNotFound { id: fragment_id })?
                .files
        }
    };

    let sandbox_id = sandbox
        .create(&settings.template, settings.restart_ttl_secs)
        .await?;
    info!(fragment_id, sandbox_id = %sandbox_id, files = files.len(), "Restarting sandbox");

    for (path, content) in &files {
        sandbox.write_file(&sandbox_id, path, content).await?;
    }

    let url = sandbox.host_for_port(&sandbox_id, settings.app_port);
    let new_url = url.clone();
    db.call(move |store| store.update_fragment_url(fragment_id, &new_url))
        .await
        .map_err(WorkflowError::Other)?;

    info!(fragment_id, url = %url, "Fragment repointed");
    Ok(url)
}
