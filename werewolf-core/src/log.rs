//! The append-only game log.
//!
//! Entries are immutable once appended. Who may read an entry is decided on
//! read by [`crate::visibility`], never stored per viewer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::calls::CallId;
use crate::character::{Character, CharacterId};
use crate::game::Phase;

/// Who produced a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    System,
    Character { id: CharacterId, name: String },
}

impl Source {
    pub fn of(character: &Character) -> Self {
        Source::Character {
            id: character.id,
            name: character.name.clone(),
        }
    }

    pub fn character_id(&self) -> Option<CharacterId> {
        match self {
            Source::System => None,
            Source::Character { id, .. } => Some(*id),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::System => f.write_str("System"),
            Source::Character { name, .. } => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    System,
    Action,
    PublicStatement,
    InnerThought,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub day: u32,
    pub phase: Phase,
    pub source: Source,
    pub message: String,
    pub is_public: bool,
    pub message_type: MessageType,
    pub linked_decision_ids: Vec<CallId>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[day {} {}] {}: {}",
            self.day, self.phase, self.source, self.message
        )
    }
}

/// An ordered, append-only sequence of entries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct GameLog {
    entries: Vec<LogEntry>,
}

impl GameLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, entry: LogEntry) -> &LogEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }
}
