use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

use crate::store::{DbHandle, MessageRole, MessageType, NewMessage};
use crate::workflow::Orchestrator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct RestartRequest {
    #[serde(default)]
    pub files: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", post(create_project))
        .route(
            "/api/projects/{id}/messages",
            get(list_messages).post(create_message),
        )
        .route("/api/fragments/{id}/restart", post(restart_fragment))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Project name is required".into()));
    }
    let project = state
        .db
        .call(move |store| store.create_project(&name))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_messages(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).min(200);
    state
        .db
        .call(move |store| {
            store
                .get_project(project_id)?
                .ok_or_else(|| anyhow::anyhow!("Project {} not found", project_id))?;
            store.find_recent_messages(project_id, limit)
        })
        .await
        .map(Json)
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") {
                ApiError::NotFound(msg)
            } else {
                ApiError::Internal(msg)
            }
        })
}

/// Persist the user's message and kick off a generation run in the
/// background. The response acknowledges the trigger; results arrive as
/// persisted assistant messages.
async fn create_message(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message content is required".into()));
    }

    let persisted = content.clone();
    let message = state
        .db
        .call(move |store| {
            store.create_message(&NewMessage {
                project_id,
                role: MessageRole::User,
                msg_type: MessageType::Result,
                content: persisted,
                fragment: None,
            })
        })
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") {
                ApiError::NotFound(msg)
            } else {
                ApiError::Internal(msg)
            }
        })?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_generation(project_id, &content).await {
            error!(project_id, error = %e, "Generation run failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(message)))
}

/// Restart the sandbox behind a fragment. Runs inline because the caller
/// needs the new URL, and fails loudly per the restart contract.
async fn restart_fragment(
    State(state): State<SharedState>,
    Path(fragment_id): Path<i64>,
    Json(req): Json<RestartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = state
        .orchestrator
        .run_restart(fragment_id, req.files)
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") {
                ApiError::NotFound(msg)
            } else {
                ApiError::Internal(msg)
            }
        })?;
    Ok(Json(serde_json::json!({ "url": url })))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::errors::{SandboxError, WorkflowError};
    use crate::llm::{ChatRequest, ContentBlock, ModelClient, TextRequest};
    use crate::sandbox::{CommandOutput, SandboxProvider};
    use crate::store::MessageStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Writes one file on its first turn, then declares the task done.
    struct DoneModel {
        turns: std::sync::Mutex<u32>,
    }

    impl DoneModel {
        fn new() -> Self {
            Self {
                turns: std::sync::Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for DoneModel {
        async fn complete(&self, _request: TextRequest) -> Result<String, WorkflowError> {
            Ok("[]".to_string())
        }

        async fn chat(&self, _request: ChatRequest) -> Result<Vec<ContentBlock>, WorkflowError> {
            let mut turns = self.turns.lock().unwrap();
            *turns += 1;
            if *turns == 1 {
                Ok(vec![ContentBlock::ToolUse {
                    id: "w1".into(),
                    name: "createOrUpdateFiles".into(),
                    input: serde_json::json!({
                        "files": [{"path": "src/App.tsx", "content": "export default () => null"}]
                    }),
                }])
            } else {
                Ok(vec![ContentBlock::Text {
                    text: "<task_summary>done</task_summary>".into(),
                }])
            }
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
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
        fn host_for_port(&self, id: &str, port: u16) -> String {
            format!("https://{}-{}.test.dev", port, id)
        }
    }

    fn test_app() -> Router {
        let store = MessageStore::new_in_memory().unwrap();
        let db = DbHandle::new(store);
        let mut config = Config::default();
        config.state_dir = std::env::temp_dir();
        // The probe URL never resolves in tests; keep its timeout tight.
        config.limits.probe_timeout_secs = 1;
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            Arc::new(DoneModel::new()),
            Arc::new(NullSandbox),
            db.clone(),
        ));
        let state = Arc::new(AppState { db, orchestrator });
        api_router().with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_project() {
        let app = test_app();
        let response = app
            .oneshot(post_json(
                "/api/projects",
                serde_json::json!({"name": "todo-app"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let project: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(project["name"], "todo-app");
        assert!(project["id"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_create_project_rejects_blank_name() {
        let app = test_app();
        let response = app
            .oneshot(post_json("/api/projects", serde_json::json!({"name": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_messages_empty() {
        let app = test_app();
        app.clone()
            .oneshot(post_json(
                "/api/projects",
                serde_json::json!({"name": "p"}),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/projects/1/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let messages: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_list_messages_unknown_project() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/projects/999/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_message_accepted_and_persisted() {
        let app = test_app();
        app.clone()
            .oneshot(post_json(
                "/api/projects",
                serde_json::json!({"name": "p"}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/projects/1/messages",
                serde_json::json!({"content": "build a todo list app"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let message: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(message["role"], "user");
        assert_eq!(message["content"], "build a todo list app");

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/projects/1/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let messages: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(!messages.is_empty());
    }

    #[tokio::test]
    async fn test_create_message_unknown_project() {
        let app = test_app();
        let response = app
            .oneshot(post_json(
                "/api/projects/42/messages",
                serde_json::json!({"content": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_restart_unknown_fragment() {
        let app = test_app();
        let response = app
            .oneshot(post_json(
                "/api/fragments/7/restart",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_restart_returns_new_url() {
        let app = test_app();
        app.clone()
            .oneshot(post_json(
                "/api/projects",
                serde_json::json!({"name": "p"}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/projects/1/messages",
                serde_json::json!({"content": "build it"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // Wait for the background run to persist its fragment.
        let mut fragment_id = None;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("GET")
                        .uri("/api/projects/1/messages")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let messages: Vec<serde_json::Value> = body_json(response.into_body()).await;
            if let Some(id) = messages.iter().find_map(|m| m["fragment"]["id"].as_i64()) {
                fragment_id = Some(id);
                break;
            }
        }
        let fragment_id = fragment_id.expect("background run never persisted a fragment");

        let response = app
            .oneshot(post_json(
                &format!("/api/fragments/{}/restart", fragment_id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["url"].as_str().unwrap().starts_with("https://"));
    }
}
