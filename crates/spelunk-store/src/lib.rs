//! Session persistence under the workspace runtime directory.
//!
//! Checkpoints are pretty-printed JSON, one file per session; the
//! per-session activity log is NDJSON, one record per line. Both live
//! under `.spelunk/` so a session can be resumed or audited after the
//! process exits. Directories are created on first write, never at
//! construction time.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use spelunk_core::{Checkpoint, Session, runtime_dir};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Symbols used for session and memory-item ids. Excludes `i`, `l`, `o`,
/// `0` and `1`, which are easy to misread when a user types an id back in.
pub const ID_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// Random id of `len` symbols drawn from [`ID_ALPHABET`].
#[must_use]
pub fn new_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Eight-symbol id for a session.
#[must_use]
pub fn new_session_id() -> String {
    new_id(8)
}

/// Four-symbol id for a working-memory item.
#[must_use]
pub fn new_memory_id() -> String {
    new_id(4)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Failed to parse checkpoint")]
    CheckpointParse,
}

// ── Store ────────────────────────────────────────────────────────────────────

/// File-backed session store rooted at a workspace's `.spelunk/` directory.
pub struct Store {
    workspace: PathBuf,
    root: PathBuf,
    sessions_dir: PathBuf,
    logs_dir: PathBuf,
}

impl Store {
    #[must_use]
    pub fn new(workspace: &Path) -> Self {
        let root = runtime_dir(workspace);
        Self {
            workspace: workspace.to_path_buf(),
            sessions_dir: root.join("sessions"),
            logs_dir: root.join("logs"),
            root,
        }
    }

    #[must_use]
    pub fn checkpoint_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    #[must_use]
    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{session_id}.jsonl"))
    }

    /// Writes the session's checkpoint, replacing any previous one for the
    /// same id. Returns the path written.
    pub fn save_checkpoint(&self, session: &Session) -> Result<PathBuf> {
        fs::create_dir_all(&self.sessions_dir)?;
        let path = self.checkpoint_path(&session.id);
        let checkpoint = Checkpoint::of(session);
        fs::write(&path, serde_json::to_vec_pretty(&checkpoint)?)?;
        Ok(path)
    }

    /// Loads a checkpoint back into a live session. A missing file is
    /// reported as [`StoreError::SessionNotFound`]; a file that exists but
    /// does not parse (for example one truncated by a crash mid-write) is
    /// reported as [`StoreError::CheckpointParse`].
    pub fn load_checkpoint(&self, session_id: &str) -> Result<Session> {
        let path = self.checkpoint_path(session_id);
        if !path.exists() {
            return Err(StoreError::SessionNotFound(session_id.to_string()).into());
        }
        let raw = fs::read_to_string(&path)?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&raw).map_err(|_| StoreError::CheckpointParse)?;
        Ok(checkpoint.into_session())
    }

    /// Session ids with a saved checkpoint, newest first.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<String> {
        list_stems(&self.sessions_dir, "json")
    }

    /// Session ids with an activity log, newest first.
    #[must_use]
    pub fn list_logs(&self) -> Vec<String> {
        list_stems(&self.logs_dir, "jsonl")
    }

    /// Appends a timestamped bullet to the long-lived fact file. Facts
    /// survive across sessions, unlike working memory.
    pub fn memorize(&self, fact: &str) -> Result<()> {
        let dir = self.root.join("memory");
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("facts.md"))?;
        writeln!(file, "- [{}] {}", Utc::now().format("%Y-%m-%d %H:%M"), fact.trim())?;
        Ok(())
    }

    /// Opens the NDJSON activity log for a session and records the
    /// `session_start` event. Returns `None` when the log cannot be opened;
    /// a session must keep running even if its log is unavailable.
    pub fn start_log(&self, session_id: &str) -> Option<SessionLogger> {
        fs::create_dir_all(&self.logs_dir).ok()?;
        let path = self.log_path(session_id);
        let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
        let mut logger = SessionLogger {
            file,
            path,
            started_at: Utc::now(),
        };
        logger.log(
            "session_start",
            serde_json::json!({
                "session_id": session_id,
                "root": self.workspace.display().to_string(),
            }),
        );
        Some(logger)
    }
}

/// File stems in `dir` with the given extension, newest mtime first.
fn list_stems(dir: &Path, extension: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<(std::time::SystemTime, String)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        found.push((modified, stem.to_string()));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    found.into_iter().map(|(_, stem)| stem).collect()
}

// ── Session logger ───────────────────────────────────────────────────────────

/// Append-only NDJSON writer for one session. Every record carries the
/// event name and a timestamp; each line is flushed as it is written so the
/// log survives an abrupt exit.
pub struct SessionLogger {
    file: File,
    path: PathBuf,
    started_at: DateTime<Utc>,
}

impl SessionLogger {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one event record. Logging is best effort: a failed write is
    /// dropped rather than surfaced to the turn loop.
    pub fn log(&mut self, event: &str, data: Value) {
        let mut record = match data {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        record.insert("event".to_string(), Value::String(event.to_string()));
        record.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        if let Ok(line) = serde_json::to_string(&Value::Object(record)) {
            let _ = writeln!(self.file, "{line}");
            let _ = self.file.flush();
        }
    }

    /// Records `session_end` with the wall-clock duration and consumes the
    /// logger.
    pub fn close(mut self, total_turns: u32) {
        let duration = (Utc::now() - self.started_at).num_seconds().max(0);
        self.log(
            "session_end",
            serde_json::json!({
                "duration_seconds": duration,
                "total_turns": total_turns,
            }),
        );
    }
}
