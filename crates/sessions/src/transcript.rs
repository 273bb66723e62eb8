//! Append-only chat message logs.
//!
//! Each session gets a `<session_id>.jsonl` file under `sessions/messages/`.
//! Messages are never rewritten; a log disappears only when its session is
//! swept or cleared.  Reads are served from a write-through cache after the
//! first load.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ad_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn new(
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role,
            content: content.to_owned(),
            timestamp: at,
            metadata,
        }
    }
}

/// JSONL message logs with an in-memory write-through cache.
pub struct MessageLog {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MessageLog {
    /// Open (and create) the log directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Append one message.  The cache is updated only after the disk write
    /// succeeds.
    pub fn append(&self, message: &ChatMessage) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        // Held across the disk write so a concurrent first load cannot
        // install a snapshot that misses this line.
        let mut cache = self.cache.write();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&message.session_id))?;
        file.write_all(line.as_bytes())?;

        // Only extend an already-loaded entry; otherwise the next read loads
        // the full file including this line.
        if let Some(lines) = cache.get_mut(&message.session_id) {
            lines.push(message.clone());
        }
        Ok(())
    }

    /// All messages of a session, oldest first.
    pub fn read(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        if let Some(lines) = self.cache.read().get(session_id) {
            return Ok(lines.clone());
        }

        let mut cache = self.cache.write();
        if let Some(lines) = cache.get(session_id) {
            return Ok(lines.clone());
        }
        let lines = read_jsonl_file(&self.path_for(session_id), session_id)?;
        cache.insert(session_id.to_owned(), lines.clone());
        Ok(lines)
    }

    /// Number of stored messages for a session.
    pub fn count(&self, session_id: &str) -> Result<usize> {
        Ok(self.read(session_id)?.len())
    }

    /// Delete a session's log.  Returns how many messages it held.
    pub fn remove(&self, session_id: &str) -> Result<usize> {
        let mut cache = self.cache.write();
        let count = match cache.remove(session_id) {
            Some(lines) => lines.len(),
            None => read_jsonl_file(&self.path_for(session_id), session_id)?.len(),
        };
        match std::fs::remove_file(self.path_for(session_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        Ok(count)
    }

    /// Session ids that have a log file on disk.
    pub fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_owned());
            }
        }
        Ok(ids)
    }

    /// Delete every log in the directory, including orphans left by a crash.
    /// Returns how many messages were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut cache = self.cache.write();
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let session_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_owned();
            removed += read_jsonl_file(&path, &session_id)?.len();
            std::fs::remove_file(&path)?;
        }
        cache.clear();
        Ok(removed)
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }
}

/// Read and parse a JSONL message file.  Malformed lines are skipped.
fn read_jsonl_file(path: &Path, session_id: &str) -> Result<Vec<ChatMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let mut lines = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChatMessage>(line) {
            Ok(msg) => lines.push(msg),
            Err(e) => {
                tracing::warn!(
                    session_id = session_id,
                    error = %e,
                    "skipping malformed message line"
                );
            }
        }
    }
    Ok(lines)
}
