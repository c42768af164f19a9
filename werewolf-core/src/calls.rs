//! Per-game record of decision-provider calls.
//!
//! Owned by the game state and bounded per character, so nothing here is
//! process-global and a reset drops it together with the game.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use uuid::Uuid;

use crate::character::CharacterId;
use crate::decision::DecisionKind;

/// Identifier of one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub id: CallId,
    pub timestamp: DateTime<Utc>,
    pub character: CharacterId,
    pub kind: DecisionKind,
    pub context: String,
    pub output: String,
    /// The provider failed or answered illegally and the engine chose instead.
    pub fell_back: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallLog {
    retention: usize,
    records: BTreeMap<CharacterId, VecDeque<CallRecord>>,
}

impl CallLog {
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            records: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, record: CallRecord) -> CallId {
        let id = record.id;
        let queue = self.records.entry(record.character).or_default();
        queue.push_back(record);
        while queue.len() > self.retention {
            queue.pop_front();
        }
        id
    }

    /// All retained calls for one character, oldest first.
    pub fn for_character(&self, character: CharacterId) -> impl Iterator<Item = &CallRecord> {
        self.records.get(&character).into_iter().flatten()
    }

    pub fn find(&self, character: CharacterId, ids: &[CallId]) -> Vec<&CallRecord> {
        self.for_character(character)
            .filter(|r| ids.contains(&r.id))
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(character: u32, output: &str) -> CallRecord {
        CallRecord {
            id: CallId::new(),
            timestamp: Utc::now(),
            character: CharacterId(character),
            kind: DecisionKind::Vote,
            context: String::new(),
            output: output.to_string(),
            fell_back: false,
        }
    }

    #[test]
    fn test_retention_is_per_character() {
        let mut log = CallLog::new(3);
        for i in 0..5 {
            log.push(record(1, &format!("a{i}")));
        }
        log.push(record(2, "b0"));

        let outputs: Vec<_> = log
            .for_character(CharacterId(1))
            .map(|r| r.output.as_str())
            .collect();
        assert_eq!(outputs, ["a2", "a3", "a4"]);
        assert_eq!(log.for_character(CharacterId(2)).count(), 1);
    }

    #[test]
    fn test_find_by_ids() {
        let mut log = CallLog::new(30);
        let kept = log.push(record(1, "x"));
        log.push(record(1, "y"));
        let found = log.find(CharacterId(1), &[kept]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].output, "x");
    }
}
