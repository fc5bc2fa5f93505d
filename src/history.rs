//! Transcript persistence.
//!
//! Each conversation is one append-only JSON-lines file under the history
//! directory. Records are written in exchange order and read back in file
//! order, so history listing needs no index. The residency manager never
//! touches this; the request handler appends after every completed exchange.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One persisted exchange line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub chat_id: String,
    pub sender: Sender,
    pub text: String,
    pub model: String,
    pub device: String,
    pub timestamp: DateTime<Utc>,
    /// Generation stats; only present on assistant records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<f64>,
}

/// Conversation summary for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMeta {
    pub chat_id: String,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt transcript line: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Append-only transcript store, one JSONL file per conversation.
pub struct TranscriptStore {
    dir: PathBuf,
    /// Serializes appends so interleaved exchanges keep line integrity.
    write_lock: Mutex<()>,
}

impl TranscriptStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, write_lock: Mutex::new(()) }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn file_for(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{chat_id}.jsonl"))
    }

    /// Append one record to its conversation file, creating the store
    /// directory on first use.
    pub fn append(&self, record: &TranscriptRecord) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(&record.chat_id))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// All records of one conversation, in append order. An unknown chat id
    /// yields an empty history rather than an error.
    pub fn history(&self, chat_id: &str) -> Result<Vec<TranscriptRecord>, HistoryError> {
        let raw = match fs::read_to_string(self.file_for(chat_id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    /// Known conversations with display titles: the first user line,
    /// truncated to 30 characters with an ellipsis when longer.
    pub fn list_chats(&self) -> Result<Vec<ChatMeta>, HistoryError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut chats = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(chat_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let records = self.history(chat_id)?;
            let first = records.iter().find(|r| r.sender == Sender::User);
            let title = match first {
                Some(r) => truncate_title(&r.text),
                None => chat_id.to_string(),
            };
            chats.push(ChatMeta { chat_id: chat_id.to_string(), title });
        }
        Ok(chats)
    }

    /// Delete every persisted conversation.
    pub fn clear_all(&self) -> Result<usize, HistoryError> {
        let _guard = self.write_lock.lock();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn truncate_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(30).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
