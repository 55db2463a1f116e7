//! Message/fragment persistence.
//!
//! The orchestration core owns only this slice of the product's schema:
//! projects, their conversation messages, and fragments (the persisted
//! artifact of a successful generation run — sandbox URL, title, file map).

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

// ── Models ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Result,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "result" => Ok(Self::Result),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid message type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: i64,
    pub message_id: i64,
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub project_id: i64,
    pub role: MessageRole,
    pub msg_type: MessageType,
    pub content: String,
    pub created_at: String,
    pub fragment: Option<Fragment>,
}

/// Payload for creating a message, optionally with an attached fragment.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub project_id: i64,
    pub role: MessageRole,
    pub msg_type: MessageType,
    pub content: String,
    pub fragment: Option<NewFragment>,
}

#[derive(Debug, Clone)]
pub struct NewFragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

// ── Async handle ──────────────────────────────────────────────────────

/// Async-safe handle to the message store.
///
/// Wraps `MessageStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<MessageStore>>,
}

impl DbHandle {
    pub fn new(store: MessageStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&MessageStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }
}

// ── Store ─────────────────────────────────────────────────────────────

pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    msg_type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS fragments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    message_id INTEGER NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
                    sandbox_url TEXT NOT NULL,
                    title TEXT NOT NULL,
                    files TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_id, id);
                "#,
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn create_project(&self, name: &str) -> Result<Project> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO projects (name, created_at) VALUES (?1, ?2)",
            params![name, now],
        )?;
        Ok(Project {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            created_at: now,
        })
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Persist a message and, when present, its attached fragment.
    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        if self.get_project(new.project_id)?.is_none() {
            return Err(StoreError::ProjectNotFound {
                id: new.project_id,
            }
            .into());
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO messages (project_id, role, msg_type, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.project_id,
                new.role.as_str(),
                new.msg_type.as_str(),
                new.content,
                now
            ],
        )?;
        let message_id = self.conn.last_insert_rowid();

        let fragment = match &new.fragment {
            Some(frag) => {
                let files_json =
                    serde_json::to_string(&frag.files).context("Failed to serialize file map")?;
                self.conn.execute(
                    "INSERT INTO fragments (message_id, sandbox_url, title, files, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![message_id, frag.sandbox_url, frag.title, files_json, now],
                )?;
                Some(Fragment {
                    id: self.conn.last_insert_rowid(),
                    message_id,
                    sandbox_url: frag.sandbox_url.clone(),
                    title: frag.title.clone(),
                    files: frag.files.clone(),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                })
            }
            None => None,
        };

        Ok(Message {
            id: message_id,
            project_id: new.project_id,
            role: new.role,
            msg_type: new.msg_type,
            content: new.content.clone(),
            created_at: now,
            fragment,
        })
    }

    /// Fetch the most recent `limit` messages for a project, newest first,
    /// each with its fragment attached when one exists.
    pub fn find_recent_messages(&self, project_id: i64, limit: usize) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.project_id, m.role, m.msg_type, m.content, m.created_at,
                    f.id, f.sandbox_url, f.title, f.files, f.created_at, f.updated_at
             FROM messages m
             LEFT JOIN fragments f ON f.message_id = m.id
             WHERE m.project_id = ?1
             ORDER BY m.id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![project_id, limit as i64], |row| {
            let fragment_id: Option<i64> = row.get(6)?;
            let fragment = match fragment_id {
                Some(fid) => {
                    let files_json: String = row.get(9)?;
                    Some((
                        fid,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        files_json,
                        row.get::<_, String>(10)?,
                        row.get::<_, String>(11)?,
                    ))
                }
                None => None,
            };
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                fragment,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, project_id, role, msg_type, content, created_at, fragment) = row?;
            let fragment = match fragment {
                Some((fid, sandbox_url, title, files_json, created, updated)) => {
                    let files: BTreeMap<String, String> = serde_json::from_str(&files_json)
                        .context("Failed to parse persisted file map")?;
                    Some(Fragment {
                        id: fid,
                        message_id: id,
                        sandbox_url,
                        title,
                        files,
                        created_at: created,
                        updated_at: updated,
                    })
                }
                None => None,
            };
            messages.push(Message {
                id,
                project_id,
                role: role.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                msg_type: msg_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                content,
                created_at,
                fragment,
            });
        }
        Ok(messages)
    }

    pub fn get_fragment(&self, id: i64) -> Result<Option<Fragment>> {
        let fragment = self
            .conn
            .query_row(
                "SELECT id, message_id, sandbox_url, title, files, created_at, updated_at
                 FROM fragments WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        match fragment {
            Some((id, message_id, sandbox_url, title, files_json, created_at, updated_at)) => {
                let files: BTreeMap<String, String> = serde_json::from_str(&files_json)
                    .context("Failed to parse persisted file map")?;
                Ok(Some(Fragment {
                    id,
                    message_id,
                    sandbox_url,
                    title,
                    files,
                    created_at,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Repoint a fragment's live URL. Used only by the restart workflow.
    pub fn update_fragment_url(&self, fragment_id: i64, sandbox_url: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE fragments SET sandbox_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![sandbox_url, now, fragment_id],
        )?;
        if updated == 0 {
            return Err(StoreError::FragmentNotFound { id: fragment_id }.into());
        }
        Ok(())
    }
}
