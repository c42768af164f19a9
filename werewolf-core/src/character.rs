//! Characters and their private memory.
//!
//! A character's role is dealt once and never changes; `alive` only ever goes
//! from true to false. Memory is append-only and owned by the character. The one
//! exception is [`Memory::attach_reason`], which fills in the reason of an
//! already-recorded decision when it arrives late.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::calls::CallId;
use crate::decision::DecisionKind;
use crate::error::{GameError, GameResult};
use crate::game::Phase;
use crate::role::Role;

/// Confidence of a belief derived from a seer check. Checks are ground truth.
pub const SEER_CHECK_CONFIDENCE: f32 = 1.0;

/// Confidence of a belief inferred from someone's public statement.
pub const SPEECH_CONFIDENCE: f32 = 0.6;

const RECENT_OBSERVATIONS: usize = 5;
const RECENT_STATEMENTS: usize = 3;

/// Stable identifier from the roster configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u32);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn default_voice() -> String {
    "longxiang".to_string()
}

/// One roster entry as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub gender: String,
    /// Free-text personality descriptor.
    #[serde(default)]
    pub style: String,
    /// Opaque binding handed to the decision provider (usually a model name).
    #[serde(default, alias = "model")]
    pub model_ref: String,
    /// Voice id for the speech synthesizer.
    #[serde(default = "default_voice")]
    pub voice: String,
}

impl CharacterProfile {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: CharacterId(id),
            name: name.into(),
            gender: String::new(),
            style: String::new(),
            model_ref: String::new(),
            voice: default_voice(),
        }
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = gender.into();
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_model(mut self, model_ref: impl Into<String>) -> Self {
        self.model_ref = model_ref.into();
        self
    }
}

/// A player at the table.
#[derive(Debug, Clone, Serialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub gender: String,
    pub style: String,
    pub model_ref: String,
    pub voice: String,
    role: Option<Role>,
    alive: bool,
    #[serde(skip)]
    memory: Memory,
}

impl Character {
    pub fn new(profile: CharacterProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            gender: profile.gender,
            style: profile.style,
            model_ref: profile.model_ref,
            voice: profile.voice,
            role: None,
            alive: true,
            memory: Memory::default(),
        }
    }

    /// The dealt role, or `None` before roles are assigned.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == Some(role)
    }

    pub fn is_werewolf(&self) -> bool {
        self.is(Role::Werewolf)
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub(crate) fn assign_role(&mut self, role: Role) -> GameResult<()> {
        if let Some(existing) = self.role {
            return Err(GameError::invariant(format!(
                "{} already holds role {existing}",
                self.name
            )));
        }
        self.role = Some(role);
        Ok(())
    }

    pub(crate) fn mark_dead(&mut self) -> GameResult<()> {
        if !self.alive {
            return Err(GameError::invariant(format!("{} died twice", self.name)));
        }
        self.alive = false;
        Ok(())
    }
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(role) => write!(f, "{} ({role})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Something a character saw or heard.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub event: String,
    pub day: u32,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

/// Where a belief came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefSource {
    SeerCheck,
    Speech,
}

/// An opinion about another character.
#[derive(Debug, Clone, Serialize)]
pub struct Belief {
    pub belief: String,
    pub confidence: f32,
    pub source: BeliefSource,
    pub at: DateTime<Utc>,
}

/// A recorded choice: who was targeted, when, and why.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub kind: DecisionKind,
    pub target: Option<String>,
    pub target_id: Option<CharacterId>,
    pub reason: Option<String>,
    pub day: u32,
    pub phase: Phase,
    pub call_id: Option<CallId>,
    pub at: DateTime<Utc>,
}

/// A public statement this character made.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub content: String,
    pub day: u32,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

/// Private reasoning that is never logged publicly.
#[derive(Debug, Clone, Serialize)]
pub struct InnerThought {
    pub content: String,
    pub day: u32,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

/// A character's private, append-only memory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Memory {
    observations: Vec<Observation>,
    beliefs: BTreeMap<String, Vec<Belief>>,
    decisions: Vec<DecisionRecord>,
    statements: Vec<Statement>,
    inner_thoughts: Vec<InnerThought>,
}

impl Memory {
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Beliefs about one target, oldest first.
    pub fn beliefs_about(&self, target: &str) -> &[Belief] {
        self.beliefs.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn beliefs(&self) -> &BTreeMap<String, Vec<Belief>> {
        &self.beliefs
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn inner_thoughts(&self) -> &[InnerThought] {
        &self.inner_thoughts
    }

    /// Decisions of one kind, oldest first.
    pub fn decisions_of(&self, kind: DecisionKind) -> impl Iterator<Item = &DecisionRecord> {
        self.decisions.iter().filter(move |d| d.kind == kind)
    }

    pub(crate) fn observe(&mut self, event: impl Into<String>, day: u32, phase: Phase) {
        self.observations.push(Observation {
            event: event.into(),
            day,
            phase,
            at: Utc::now(),
        });
    }

    pub(crate) fn update_belief(
        &mut self,
        target: &str,
        belief: impl Into<String>,
        confidence: f32,
        source: BeliefSource,
    ) {
        let list = self.beliefs.entry(target.to_string()).or_default();
        // Hearsay never overrides a seer check.
        let checked = list.iter().any(|b| b.source == BeliefSource::SeerCheck);
        if source == BeliefSource::Speech && checked {
            return;
        }
        list.push(Belief {
            belief: belief.into(),
            confidence,
            source,
            at: Utc::now(),
        });
    }

    pub(crate) fn record_decision(&mut self, record: DecisionRecord) {
        self.decisions.push(record);
    }

    pub(crate) fn record_statement(&mut self, content: impl Into<String>, day: u32, phase: Phase) {
        self.statements.push(Statement {
            content: content.into(),
            day,
            phase,
            at: Utc::now(),
        });
    }

    pub(crate) fn record_inner_thought(
        &mut self,
        content: impl Into<String>,
        day: u32,
        phase: Phase,
    ) {
        self.inner_thoughts.push(InnerThought {
            content: content.into(),
            day,
            phase,
            at: Utc::now(),
        });
    }

    /// Fill in the reason of the decision keyed by (kind, target, day).
    ///
    /// Returns `false` if there is no such decision or it already has a reason.
    pub(crate) fn attach_reason(
        &mut self,
        kind: DecisionKind,
        target: Option<CharacterId>,
        day: u32,
        reason: impl Into<String>,
    ) -> bool {
        let Some(record) = self
            .decisions
            .iter_mut()
            .rev()
            .find(|d| d.kind == kind && d.target_id == target && d.day == day)
        else {
            return false;
        };
        if record.reason.is_some() {
            return false;
        }
        record.reason = Some(reason.into());
        true
    }

    /// Latest belief per target. A seer check outranks anything heard later.
    pub fn latest_beliefs(&self) -> impl Iterator<Item = (&str, &Belief)> {
        self.beliefs.iter().filter_map(|(target, list)| {
            list.iter()
                .rev()
                .find(|b| b.source == BeliefSource::SeerCheck)
                .or_else(|| list.last())
                .map(|b| (target.as_str(), b))
        })
    }

    /// A compact digest of recent memory for decision prompts.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let recent = self
            .observations
            .len()
            .saturating_sub(RECENT_OBSERVATIONS);
        if recent < self.observations.len() {
            lines.push("Recent observations:".to_string());
            for obs in &self.observations[recent..] {
                lines.push(format!("- Day {} {}: {}", obs.day, obs.phase, obs.event));
            }
        }

        let beliefs: Vec<_> = self.latest_beliefs().collect();
        if !beliefs.is_empty() {
            lines.push("Beliefs about others:".to_string());
            for (target, belief) in beliefs {
                let label = if belief.confidence > 0.8 {
                    "certain"
                } else if belief.confidence > 0.5 {
                    "fairly sure"
                } else {
                    "unsure"
                };
                lines.push(format!("- {target}: {} ({label})", belief.belief));
            }
        }

        let recent = self.statements.len().saturating_sub(RECENT_STATEMENTS);
        if recent < self.statements.len() {
            lines.push("My recent statements:".to_string());
            for stmt in &self.statements[recent..] {
                lines.push(format!("- Day {}: \"{}\"", stmt.day, stmt.content));
            }
        }

        lines.join("\n")
    }
}
