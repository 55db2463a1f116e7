//! Mutable state threaded through a single generation run.

use std::collections::BTreeMap;

/// Accumulated state of one agent run.
///
/// Every field moves in one direction only: `summary` is set once and never
/// cleared, `files` only ever gains or overwrites entries, `has_errors`
/// latches to `true`, and `error_messages` is append-only. Downstream
/// stages rely on this when deciding success or failure.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    summary: String,
    files: BTreeMap<String, String>,
    has_errors: bool,
    error_messages: Vec<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Record the task summary. Only the first non-empty value sticks.
    pub fn set_summary(&mut self, summary: &str) {
        if self.summary.is_empty() && !summary.is_empty() {
            self.summary = summary.to_string();
        }
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.is_empty()
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn upsert_file(&mut self, path: &str, content: String) {
        self.files.insert(path.to_string(), content);
    }

    /// Pre-load files from a previous run's fragment. Existing entries win,
    /// so calling this after the agent has started writing is safe.
    pub fn seed_files(&mut self, files: &BTreeMap<String, String>) {
        for (path, content) in files {
            self.files
                .entry(path.clone())
                .or_insert_with(|| content.clone());
        }
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn error_messages(&self) -> &[String] {
        &self.error_messages
    }

    /// Latch the error flag and append a message. The flag never resets,
    /// even if every later operation succeeds.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.has_errors = true;
        self.error_messages.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_set_once() {
        let mut state = RunState::new();
        assert!(!state.has_summary());

        state.set_summary("");
        assert!(!state.has_summary());

        state.set_summary("first");
        state.set_summary("second");
        assert_eq!(state.summary(), "first");
    }

    #[test]
    fn error_flag_latches() {
        let mut state = RunState::new();
        assert!(!state.has_errors());

        state.record_error("npm exploded");
        state.upsert_file("app/page.tsx", "ok".to_string());
        assert!(state.has_errors());
        assert_eq!(state.error_messages(), ["npm exploded"]);

        state.record_error("second failure");
        assert_eq!(state.error_messages().len(), 2);
    }

    #[test]
    fn files_grow_and_overwrite() {
        let mut state = RunState::new();
        state.upsert_file("a.ts", "v1".to_string());
        state.upsert_file("a.ts", "v2".to_string());
        state.upsert_file("b.ts", "x".to_string());
        assert_eq!(state.files().len(), 2);
        assert_eq!(state.files()["a.ts"], "v2");
    }

    #[test]
    fn seed_files_never_clobbers_agent_writes() {
        let mut state = RunState::new();
        state.upsert_file("a.ts", "agent".to_string());

        let mut previous = BTreeMap::new();
        previous.insert("a.ts".to_string(), "old".to_string());
        previous.insert("b.ts".to_string(), "old".to_string());
        state.seed_files(&previous);

        assert_eq!(state.files()["a.ts"], "agent");
        assert_eq!(state.files()["b.ts"], "old");
    }
}
