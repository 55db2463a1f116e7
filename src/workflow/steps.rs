//! Append-only step checkpoint log.
//!
//! Each pipeline stage appends a line as it starts and finishes, so an
//! operator can reconstruct where a run got to after a crash. Format:
//! `run_id|step|status|timestamp`, one entry per line.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

pub const STATUS_STARTED: &str = "started";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_SKIPPED: &str = "skipped";

#[derive(Debug, Clone)]
pub struct StepEntry {
    pub run_id: String,
    pub step: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

pub struct StepLog {
    log_file: PathBuf,
}

impl StepLog {
    pub fn new(log_file: PathBuf) -> Self {
        Self { log_file }
    }

    pub fn save(&self, run_id: &str, step: &str, status: &str) -> Result<()> {
        let entry = format!("{}|{}|{}|{}\n", run_id, step, status, Utc::now().to_rfc3339());

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .context("Failed to open step log")?
            .write_all(entry.as_bytes())
            .context("Failed to write step entry")?;

        Ok(())
    }

    pub fn get_entries(&self) -> Result<Vec<StepEntry>> {
        if !self.log_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_file).context("Failed to read step log")?;
        let entries = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split('|').collect();
                if parts.len() != 4 {
                    return None;
                }
                Some(StepEntry {
                    run_id: parts[0].to_string(),
                    step: parts[1].to_string(),
                    status: parts[2].to_string(),
                    timestamp: DateTime::parse_from_rfc3339(parts[3])
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect();
        Ok(entries)
    }

    pub fn entries_for_run(&self, run_id: &str) -> Result<Vec<StepEntry>> {
        let entries = self.get_entries()?;
        Ok(entries.into_iter().filter(|e| e.run_id == run_id).collect())
    }

    /// Most recent completed step of a run, if any.
    pub fn last_completed_step(&self, run_id: &str) -> Result<Option<String>> {
        let entries = self.entries_for_run(run_id)?;
        Ok(entries
            .into_iter()
            .rev()
            .find(|e| e.status == STATUS_COMPLETED)
            .map(|e| e.step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_log() -> (StepLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("steps.log");
        (StepLog::new(path), dir)
    }

    #[test]
    fn empty_log_returns_nothing() {
        let (log, _dir) = make_log();
        assert!(log.get_entries().unwrap().is_empty());
        assert!(log.last_completed_step("run-1").unwrap().is_none());
    }

    #[test]
    fn save_and_read_roundtrip() {
        let (log, _dir) = make_log();
        log.save("run-1", "sandbox", STATUS_STARTED).unwrap();
        log.save("run-1", "sandbox", STATUS_COMPLETED).unwrap();

        let entries = log.get_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run_id, "run-1");
        assert_eq!(entries[0].step, "sandbox");
        assert_eq!(entries[0].status, STATUS_STARTED);
        assert_eq!(entries[1].status, STATUS_COMPLETED);
    }

    #[test]
    fn entries_are_filtered_per_run() {
        let (log, _dir) = make_log();
        log.save("run-1", "sandbox", STATUS_COMPLETED).unwrap();
        log.save("run-2", "plan", STATUS_COMPLETED).unwrap();

        let run_two = log.entries_for_run("run-2").unwrap();
        assert_eq!(run_two.len(), 1);
        assert_eq!(run_two[0].step, "plan");
    }

    #[test]
    fn last_completed_step_picks_most_recent() {
        let (log, _dir) = make_log();
        log.save("run-1", "sandbox", STATUS_COMPLETED).unwrap();
        log.save("run-1", "plan", STATUS_COMPLETED).unwrap();
        log.save("run-1", "agent", STATUS_STARTED).unwrap();

        assert_eq!(
            log.last_completed_step("run-1").unwrap().as_deref(),
            Some("plan")
        );
    }

    #[test]
    fn log_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("steps.log");
        {
            let log = StepLog::new(path.clone());
            log.save("run-1", "verify", STATUS_FAILED).unwrap();
        }
        {
            let log = StepLog::new(path);
            let entries = log.get_entries().unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].status, STATUS_FAILED);
        }
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("steps.log");
        std::fs::write(&path, "garbage line\nrun-1|plan|completed|not-a-date\n").unwrap();
        let log = StepLog::new(path);
        assert!(log.get_entries().unwrap().is_empty());
    }
}
