//! Generation pipeline orchestration.
//!
//! The pipeline is an explicit state machine: each stage does one unit of
//! work, appends a checkpoint, and the transition function decides what
//! runs next. No stage failure short-circuits the run — errors accumulate
//! in the run state and the finalizer always executes, so every run ends
//! with a persisted outcome. The one exception is the restart workflow,
//! which is fail-fast by design (see `restart`).

pub mod continuity;
pub mod finalizer;
pub mod materializer;
pub mod planner;
pub mod restart;
pub mod steps;
pub mod verifier;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::run_state::RunState;
use crate::agent::AgentNetwork;
use crate::config::Config;
use crate::errors::WorkflowError;
use crate::llm::{joined_text, ChatMessage, ModelClient, Role};
use crate::sandbox::SandboxProvider;
use crate::store::DbHandle;
pub use finalizer::RunOutcome;
use planner::PlanEntry;
use steps::{StepLog, STATUS_COMPLETED, STATUS_SKIPPED, STATUS_STARTED};

/// Pipeline stages, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Provisioning,
    Loading,
    Restoring,
    Planning,
    Materializing,
    Iterating,
    Verifying,
    Finalizing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "sandbox",
            Self::Loading => "load",
            Self::Restoring => "restore",
            Self::Planning => "plan",
            Self::Materializing => "materialize",
            Self::Iterating => "agent",
            Self::Verifying => "verify",
            Self::Finalizing => "finalize",
            Self::Done => "done",
        }
    }
}

/// Facts the transition function consults. Populated as stages complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageFacts {
    pub sandbox_ready: bool,
    pub first_turn: bool,
    pub url_available: bool,
}

/// The pipeline's transition function. Pure, so the control flow is
/// auditable without running anything.
pub fn next_stage(stage: Stage, facts: &StageFacts) -> Stage {
    match stage {
        // Without a sandbox nothing downstream can run; go straight to
        // persisting the failure.
        Stage::Provisioning if !facts.sandbox_ready => Stage::Finalizing,
        Stage::Provisioning => Stage::Loading,
        Stage::Loading => Stage::Restoring,
        // Planning only seeds a project's very first turn.
        Stage::Restoring if facts.first_turn => Stage::Planning,
        Stage::Restoring => Stage::Iterating,
        Stage::Planning => Stage::Materializing,
        Stage::Materializing => Stage::Iterating,
        Stage::Iterating if facts.url_available => Stage::Verifying,
        Stage::Iterating => Stage::Finalizing,
        Stage::Verifying => Stage::Finalizing,
        Stage::Finalizing => Stage::Done,
        Stage::Done => Stage::Done,
    }
}

pub struct Orchestrator {
    config: Config,
    model: Arc<dyn ModelClient>,
    sandbox: Arc<dyn SandboxProvider>,
    db: DbHandle,
    step_log: StepLog,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        model: Arc<dyn ModelClient>,
        sandbox: Arc<dyn SandboxProvider>,
        db: DbHandle,
    ) -> Self {
        let step_log = StepLog::new(config.state_dir.join("steps.log"));
        Self {
            config,
            model,
            sandbox,
            db,
            step_log,
            http: reqwest::Client::new(),
        }
    }

    /// Run the full generation pipeline for one user message.
    pub async fn run_generation(
        &self,
        project_id: i64,
        prompt: &str,
    ) -> Result<RunOutcome, WorkflowError> {
        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, project_id, "Starting generation run");

        let mut state = RunState::new();
        let mut facts = StageFacts::default();
        let mut stage = Stage::Provisioning;

        let mut sandbox_id = String::new();
        let mut context = continuity::Continuity::default();
        let mut plan: Vec<PlanEntry> = Vec::new();
        let mut url: Option<String> = None;
        let mut outcome: Option<RunOutcome> = None;

        while stage != Stage::Done {
            self.checkpoint(&run_id, stage.as_str(), STATUS_STARTED);
            match stage {
                Stage::Provisioning => {
                    match self
                        .sandbox
                        .create(
                            &self.config.sandbox.template,
                            self.config.sandbox.generation_ttl_secs,
                        )
                        .await
                    {
                        Ok(id) => {
                            info!(%run_id, sandbox_id = %id, "Sandbox ready");
                            sandbox_id = id;
                            facts.sandbox_ready = true;
                        }
                        Err(e) => {
                            warn!(%run_id, error = %e, "Sandbox provisioning failed");
                            state.record_error(format!("Sandbox provisioning failed: {}", e));
                        }
                    }
                }
                Stage::Loading => {
                    context = continuity::load(
                        &self.db,
                        project_id,
                        self.config.limits.history_window,
                    )
                    .await;
                    facts.first_turn = context.is_first_turn();
                }
                Stage::Restoring => {
                    self.restore_files(&sandbox_id, &context.previous_files).await;
                    state.seed_files(&context.previous_files);
                    if !facts.first_turn {
                        self.checkpoint(&run_id, Stage::Planning.as_str(), STATUS_SKIPPED);
                    }
                }
                Stage::Planning => {
                    plan = planner::plan(
                        &self.model,
                        &self.config.models,
                        prompt,
                        &context.previous_files,
                        self.config.limits.max_plan_files,
                    )
                    .await;
                }
                Stage::Materializing => {
                    materializer::materialize(
                        &self.model,
                        &self.config.models,
                        &self.sandbox,
                        &sandbox_id,
                        &plan,
                        prompt,
                        &context.previous_files,
                        &mut state,
                    )
                    .await;
                }
                Stage::Iterating => {
                    // Refresh the TTL before the longest-running stage; a
                    // stale or expired sandbox fails the run here instead of
                    // mid-conversation.
                    match self
                        .sandbox
                        .connect(&sandbox_id, self.config.sandbox.generation_ttl_secs)
                        .await
                    {
                        Ok(()) => {
                            let network = AgentNetwork::new(
                                self.model.clone(),
                                self.sandbox.clone(),
                                self.config.models.agent_model.clone(),
                                self.config.models.agent_temperature,
                                self.config.limits.max_iterations,
                            );
                            let messages = seed_messages(&context, prompt);
                            if let Err(e) = network.run(&sandbox_id, messages, &mut state).await {
                                warn!(%run_id, error = %e, "Agent network failed");
                                state.record_error(format!("Agent run failed: {}", e));
                            }
                            url = Some(
                                self.sandbox
                                    .host_for_port(&sandbox_id, self.config.sandbox.app_port),
                            );
                            facts.url_available = true;
                        }
                        Err(e) => {
                            warn!(%run_id, error = %e, "Sandbox refresh failed");
                            state.record_error(format!("Sandbox refresh failed: {}", e));
                        }
                    }
                }
                Stage::Verifying => {
                    if let Some(url) = url.as_deref() {
                        verifier::verify(
                            &self.http,
                            url,
                            Duration::from_secs(self.config.limits.probe_timeout_secs),
                            &mut state,
                        )
                        .await;
                    }
                }
                Stage::Finalizing => {
                    outcome = Some(
                        finalizer::finalize(
                            &self.model,
                            &self.config.models,
                            &self.db,
                            project_id,
                            url.clone(),
                            &state,
                        )
                        .await?,
                    );
                }
                Stage::Done => {}
            }
            self.checkpoint(&run_id, stage.as_str(), STATUS_COMPLETED);
            stage = next_stage(stage, &facts);
        }

        let outcome = outcome.ok_or_else(|| {
            WorkflowError::Other(anyhow::anyhow!("Pipeline finished without an outcome"))
        })?;
        info!(%run_id, has_errors = outcome.has_errors, "Generation run finished");
        Ok(outcome)
    }

    /// Restart the sandbox behind a fragment. Fail-fast; see `restart`.
    pub async fn run_restart(
        &self,
        fragment_id: i64,
        files: Option<BTreeMap<String, String>>,
    ) -> Result<String, WorkflowError> {
        restart::restart_sandbox(
            &self.sandbox,
            &self.db,
            &self.config.sandbox,
            fragment_id,
            files,
        )
        .await
    }

    /// Write a previous run's files into the fresh sandbox, concurrently.
    /// Per-file failures are logged and skipped.
    async fn restore_files(&self, sandbox_id: &str, files: &BTreeMap<String, String>) {
        let writes = files.iter().map(|(path, content)| {
            let sandbox = self.sandbox.clone();
            async move {
                let result = sandbox.write_file(sandbox_id, path, content).await;
                (path, result)
            }
        });
        for (path, result) in join_all(writes).await {
            if let Err(e) = result {
                warn!(path = %path, error = %e, "Restore write failed, skipping file");
            }
        }
    }

    fn checkpoint(&self, run_id: &str, step: &str, status: &str) {
        if let Err(e) = self.step_log.save(run_id, step, status) {
            warn!(%run_id, step, error = %e, "Checkpoint write failed");
        }
    }
}

/// Seed the agent conversation from continuity, making sure the triggering
/// prompt is the final user turn even when the history load came up empty.
fn seed_messages(context: &continuity::Continuity, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = context.messages.clone();
    let already_present = messages
        .last()
        .and_then(|m| joined_text(&m.content))
        .is_some_and(|text| text == prompt);
    if !already_present {
        messages.push(ChatMessage::text(Role::User, prompt));
    }
    messages
}
