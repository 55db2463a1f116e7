//! Tool-using coding agent.
//!
//! The network drives a conversation between the model and the sandbox:
//! each turn the model either calls tools (which run against the sandbox
//! and feed results back) or emits its terminal marker, which captures the
//! task summary and halts the loop. A hard iteration cap bounds runaway
//! conversations; exhausting it leaves the summary empty, which downstream
//! stages treat as failure.

pub mod classify;
pub mod prompts;
pub mod run_state;
pub mod tools;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::WorkflowError;
use crate::llm::{
    joined_text, tool_uses, ChatMessage, ChatRequest, ContentBlock, ModelClient, Role,
};
use crate::sandbox::SandboxProvider;
use run_state::RunState;

const AGENT_MAX_TOKENS: u32 = 8192;

pub struct AgentNetwork {
    model: Arc<dyn ModelClient>,
    sandbox: Arc<dyn SandboxProvider>,
    agent_model: String,
    temperature: f32,
    max_iterations: u32,
}

impl AgentNetwork {
    pub fn new(
        model: Arc<dyn ModelClient>,
        sandbox: Arc<dyn SandboxProvider>,
        agent_model: String,
        temperature: f32,
        max_iterations: u32,
    ) -> Self {
        Self {
            model,
            sandbox,
            agent_model,
            temperature,
            max_iterations,
        }
    }

    /// Run the agent conversation to completion or budget exhaustion.
    ///
    /// `messages` seeds the conversation (continuity context plus the user's
    /// prompt). Tool effects and errors accumulate in `state`; a captured
    /// summary means the agent declared the task done.
    pub async fn run(
        &self,
        sandbox_id: &str,
        mut messages: Vec<ChatMessage>,
        state: &mut RunState,
    ) -> Result<(), WorkflowError> {
        for iteration in 0..self.max_iterations {
            debug!(iteration, "Agent turn");
            let blocks = self
                .model
                .chat(ChatRequest {
                    model: self.agent_model.clone(),
                    system: prompts::AGENT_SYSTEM_PROMPT.to_string(),
                    messages: messages.clone(),
                    tools: tools::tool_defs(),
                    temperature: self.temperature,
                    max_tokens: AGENT_MAX_TOKENS,
                })
                .await?;

            // The summary is the entire text of the message that carries the
            // marker, so surrounding prose survives into the finalizer.
            if let Some(text) = joined_text(&blocks) {
                if text.contains(prompts::TERMINAL_MARKER) {
                    state.set_summary(&text);
                }
            }

            let calls: Vec<(String, String, serde_json::Value)> = tool_uses(&blocks)
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            messages.push(ChatMessage {
                role: Role::Assistant,
                content: blocks,
            });

            if state.has_summary() {
                info!(iteration, "Agent emitted task summary");
                return Ok(());
            }

            if calls.is_empty() {
                // No tools and no marker: nudge the model back on track
                // instead of silently burning the budget.
                messages.push(ChatMessage::text(
                    Role::User,
                    "Continue working on the task. Use your tools, and emit <task_summary> only when fully done.",
                ));
                continue;
            }

            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in &calls {
                let outcome = tools::execute_tool(
                    self.sandbox.as_ref(),
                    sandbox_id,
                    state,
                    name,
                    input,
                )
                .await;
                if outcome.errors_appended > 0 {
                    debug!(tool = %name, errors = outcome.errors_appended, "Tool latched errors");
                }
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content: outcome.output,
                });
            }
            messages.push(ChatMessage {
                role: Role::User,
                content: results,
            });
        }

        warn!(
            max_iterations = self.max_iterations,
            "Agent budget exhausted without task summary"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;
    use crate::llm::TextRequest;
    use crate::sandbox::CommandOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Model double that replays a scripted sequence of turns.
    struct ScriptedModel {
        turns: Mutex<Vec<Vec<ContentBlock>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        fn new(mut turns: Vec<Vec<ContentBlock>>) -> Self {
            turns.reverse();
            Self {
                turns: Mutex::new(turns),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, _request: TextRequest) -> Result<String, WorkflowError> {
            Ok(String::new())
        }

        async fn chat(&self, request: ChatRequest) -> Result<Vec<ContentBlock>, WorkflowError> {
            self.requests.lock().unwrap().push(request);
            Ok(self
                .turns
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| vec![ContentBlock::Text { text: "hm".into() }]))
        }
    }

    struct NullSandbox;

    #[async_trait]
    impl SandboxProvider for NullSandbox {
        async fn create(&self, _t: &str, _ttl: u64) -> Result<String, SandboxError> {
            Ok("sbx".into())
        }
        async fn connect(&self, _id: &str, _ttl: u64) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn write_file(&self, _id: &str, _p: &str, _c: &str) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn run_command(&self, _id: &str, _c: &str) -> Result<CommandOutput, SandboxError> {
            Ok(CommandOutput {
                stdout: "ok".into(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
        fn host_for_port(&self, id: &str, port: u16) -> String {
            format!("https://{}-{}.test.dev", port, id)
        }
    }

    fn network(model: Arc<dyn ModelClient>, max_iterations: u32) -> AgentNetwork {
        AgentNetwork::new(
            model,
            Arc::new(NullSandbox),
            "test-model".into(),
            0.9,
            max_iterations,
        )
    }

    fn user_prompt() -> Vec<ChatMessage> {
        vec![ChatMessage::text(Role::User, "build a todo app")]
    }

    #[tokio::test]
    async fn halts_when_marker_appears() {
        let model = Arc::new(ScriptedModel::new(vec![
            vec![ContentBlock::ToolUse {
                id: "t1".into(),
                name: "terminal".into(),
                input: json!({"command": "ls"}),
            }],
            vec![ContentBlock::Text {
                text: "All done. <task_summary>Built a todo app.</task_summary>".into(),
            }],
        ]));
        let net = network(model.clone(), 30);
        let mut state = RunState::new();
        net.run("sbx", user_prompt(), &mut state).await.unwrap();

        assert!(state.has_summary());
        assert!(state.summary().contains("Built a todo app"));
        // Only two turns were needed, not the full budget.
        assert_eq!(model.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn summary_captures_whole_message_text() {
        let model = Arc::new(ScriptedModel::new(vec![vec![ContentBlock::Text {
            text: "Prose before. <task_summary>Core.</task_summary> Prose after.".into(),
        }]]));
        let net = network(model, 30);
        let mut state = RunState::new();
        net.run("sbx", user_prompt(), &mut state).await.unwrap();
        assert!(state.summary().starts_with("Prose before."));
        assert!(state.summary().ends_with("Prose after."));
    }

    #[tokio::test]
    async fn budget_exhaustion_leaves_summary_empty() {
        let turns = (0..30)
            .map(|i| {
                vec![ContentBlock::ToolUse {
                    id: format!("t{}", i),
                    name: "terminal".into(),
                    input: json!({"command": "echo again"}),
                }]
            })
            .collect();
        let model = Arc::new(ScriptedModel::new(turns));
        let net = network(model.clone(), 30);
        let mut state = RunState::new();
        net.run("sbx", user_prompt(), &mut state).await.unwrap();

        assert!(!state.has_summary());
        assert_eq!(model.requests.lock().unwrap().len(), 30);
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_to_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![
            vec![ContentBlock::ToolUse {
                id: "call-1".into(),
                name: "terminal".into(),
                input: json!({"command": "ls"}),
            }],
            vec![ContentBlock::Text {
                text: "<task_summary>done</task_summary>".into(),
            }],
        ]));
        let net = network(model.clone(), 30);
        let mut state = RunState::new();
        net.run("sbx", user_prompt(), &mut state).await.unwrap();

        let requests = model.requests.lock().unwrap();
        let second = &requests[1];
        let last_message = second.messages.last().unwrap();
        assert!(matches!(last_message.role, Role::User));
        assert!(last_message.content.iter().any(|b| matches!(
            b,
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call-1"
        )));
    }

    #[tokio::test]
    async fn textless_turn_gets_a_nudge() {
        let model = Arc::new(ScriptedModel::new(vec![
            vec![ContentBlock::Text {
                text: "Thinking out loud with no tools.".into(),
            }],
            vec![ContentBlock::Text {
                text: "<task_summary>done</task_summary>".into(),
            }],
        ]));
        let net = network(model.clone(), 30);
        let mut state = RunState::new();
        net.run("sbx", user_prompt(), &mut state).await.unwrap();

        let requests = model.requests.lock().unwrap();
        let nudge = requests[1].messages.last().unwrap();
        assert!(matches!(nudge.role, Role::User));
        assert!(joined_text(&nudge.content).unwrap().contains("Continue working"));
    }
}
