//! The decision provider contract.
//!
//! A provider receives a role-aware context and a typed set of legal choices and
//! returns a [`Selection`] out of that set. The engine never trusts the answer:
//! [`resolve`] checks legality and substitutes a fallback whenever the provider
//! fails or answers outside the legal set, so one bad call never stalls a game.

mod llm;
mod random;

pub use llm::LlmDecisionProvider;
pub use random::RandomProvider;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;
use tracing::warn;

use crate::calls::{CallId, CallLog, CallRecord};
use crate::character::{Character, CharacterId};
use crate::role::Role;

/// What a decision is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Werewolf night kill.
    Kill,
    /// Seer identity check.
    Check,
    /// Witch antidote.
    Save,
    /// Witch poison.
    Poison,
    /// Guard protection.
    Protect,
    Vote,
    Revote,
    /// Hunter's parting shot.
    Shoot,
    /// Private reasoning before a statement.
    InnerThought,
    /// Public discussion statement.
    Statement,
    /// PK defense statement.
    Defense,
}

impl DecisionKind {
    pub fn name(self) -> &'static str {
        match self {
            DecisionKind::Kill => "kill",
            DecisionKind::Check => "check",
            DecisionKind::Save => "save",
            DecisionKind::Poison => "poison",
            DecisionKind::Protect => "protect",
            DecisionKind::Vote => "vote",
            DecisionKind::Revote => "revote",
            DecisionKind::Shoot => "shoot",
            DecisionKind::InnerThought => "inner_thought",
            DecisionKind::Statement => "statement",
            DecisionKind::Defense => "defense",
        }
    }

    /// Free-text requests answered with [`Selection::Text`].
    pub fn is_speech(self) -> bool {
        matches!(
            self,
            DecisionKind::InnerThought | DecisionKind::Statement | DecisionKind::Defense
        )
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One legal target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: CharacterId,
    pub name: String,
}

impl Choice {
    pub fn of(character: &Character) -> Self {
        Self {
            id: character.id,
            name: character.name.clone(),
        }
    }
}

/// Who is deciding. A copy of the profile, so requests outlive borrows of the game.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub id: CharacterId,
    pub name: String,
    pub gender: String,
    pub style: String,
    pub role: Option<Role>,
    pub model_ref: String,
}

impl Actor {
    pub fn of(character: &Character) -> Self {
        Self {
            id: character.id,
            name: character.name.clone(),
            gender: character.gender.clone(),
            style: character.style.clone(),
            role: character.role(),
            model_ref: character.model_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub kind: DecisionKind,
    pub actor: Actor,
    /// The role-aware, visibility-filtered context.
    pub context: String,
    /// Legal targets. Empty for speech requests.
    pub choices: Vec<Choice>,
    /// Whether declining is legal.
    pub allow_pass: bool,
}

impl DecisionRequest {
    /// A mandatory choice among `choices`.
    pub fn target(kind: DecisionKind, actor: Actor, context: String, choices: Vec<Choice>) -> Self {
        Self {
            kind,
            actor,
            context,
            choices,
            allow_pass: false,
        }
    }

    /// A choice that may be declined.
    pub fn optional(
        kind: DecisionKind,
        actor: Actor,
        context: String,
        choices: Vec<Choice>,
    ) -> Self {
        Self {
            allow_pass: true,
            ..Self::target(kind, actor, context, choices)
        }
    }

    /// A free-text request.
    pub fn speech(kind: DecisionKind, actor: Actor, context: String) -> Self {
        Self::target(kind, actor, context, Vec::new())
    }

    pub fn choice_named(&self, name: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.name == name)
    }

    /// Whether `selection` is an acceptable answer to this request.
    pub fn is_legal(&self, selection: &Selection) -> bool {
        match selection {
            Selection::Target(id) => {
                !self.kind.is_speech() && self.choices.iter().any(|c| c.id == *id)
            }
            Selection::Pass => self.allow_pass,
            Selection::Text(text) => self.kind.is_speech() && !text.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Selection {
    Target(CharacterId),
    Pass,
    Text(String),
}

impl Selection {
    pub fn target(&self) -> Option<CharacterId> {
        match self {
            Selection::Target(id) => Some(*id),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Selection::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A provider's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub selection: Selection,
    pub rationale: Option<String>,
}

impl Verdict {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("provider failed: {0}")]
    Provider(String),

    #[error("could not read a selection from: {0}")]
    Unparseable(String),

    #[error("operation not supported by this provider")]
    Unsupported,
}

impl From<llm_client::Error> for DecisionError {
    fn from(err: llm_client::Error) -> Self {
        DecisionError::Provider(err.to_string())
    }
}

/// Source of character decisions.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Choose from the request's legal set.
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, DecisionError>;

    /// Give a short reason for a choice already made.
    async fn explain(
        &self,
        _request: &DecisionRequest,
        _selection: &Selection,
    ) -> Result<String, DecisionError> {
        Err(DecisionError::Unsupported)
    }

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// A checked decision, after any fallback.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub selection: Selection,
    pub rationale: Option<String>,
    pub call_id: CallId,
    pub fell_back: bool,
}

/// Check a provider result against its request and record the call.
///
/// Failures and illegal selections fall back: a uniform random legal target for
/// mandatory choices, `Pass` for optional ones, a generic line for speech.
pub fn resolve<R: Rng + ?Sized>(
    request: &DecisionRequest,
    outcome: Result<Verdict, DecisionError>,
    rng: &mut R,
    calls: &mut CallLog,
) -> Resolved {
    let (selection, rationale, fell_back, output) = match outcome {
        Ok(verdict) if request.is_legal(&verdict.selection) => {
            let output = describe(request, &verdict.selection);
            (verdict.selection, verdict.rationale, false, output)
        }
        Ok(verdict) => {
            warn!(
                character = %request.actor.name,
                kind = %request.kind,
                selection = ?verdict.selection,
                "Illegal selection, falling back"
            );
            let selection = fallback(request, rng);
            let output = format!("[illegal {:?}] {}", verdict.selection, describe(request, &selection));
            (selection, None, true, output)
        }
        Err(err) => {
            warn!(
                character = %request.actor.name,
                kind = %request.kind,
                error = %err,
                "Decision failed, falling back"
            );
            let selection = fallback(request, rng);
            let output = format!("[failed: {err}] {}", describe(request, &selection));
            (selection, None, true, output)
        }
    };

    let call_id = calls.push(CallRecord {
        id: CallId::new(),
        timestamp: Utc::now(),
        character: request.actor.id,
        kind: request.kind,
        context: request.context.clone(),
        output,
        fell_back,
    });

    Resolved {
        selection,
        rationale,
        call_id,
        fell_back,
    }
}

fn fallback<R: Rng + ?Sized>(request: &DecisionRequest, rng: &mut R) -> Selection {
    if request.kind.is_speech() {
        return Selection::Text(fallback_line(&request.actor.name));
    }
    if request.allow_pass {
        return Selection::Pass;
    }
    match request.choices.choose(rng) {
        Some(choice) => Selection::Target(choice.id),
        None => Selection::Pass,
    }
}

/// Names mentioned in `text`, each with the byte offset of its first match.
///
/// A match must not sit inside a longer ASCII word, so `P1` is not found in
/// `P10`. Longer names claim their span first, so `Ann` is not found inside
/// `Anna`. Results are ordered by position.
pub fn find_mentions<'a>(
    text: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> Vec<(usize, &'a str)> {
    let mut names: Vec<&str> = names.into_iter().filter(|n| !n.is_empty()).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut claimed: Vec<Range<usize>> = Vec::new();
    let mut found = Vec::new();
    for name in names {
        let mut first = None;
        for (pos, _) in text.match_indices(name) {
            let span = pos..pos + name.len();
            let overlaps = claimed.iter().any(|c| c.start < span.end && span.start < c.end);
            if overlaps || !whole_word(text, &span) {
                continue;
            }
            if first.is_none() {
                first = Some(pos);
            }
            claimed.push(span);
        }
        if let Some(pos) = first {
            found.push((pos, name));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found
}

fn whole_word(text: &str, span: &Range<usize>) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let before = text[..span.start].chars().next_back();
    let after = text[span.end..].chars().next();
    !before.is_some_and(is_word) && !after.is_some_and(is_word)
}

/// The in-character line used when a speech request fails.
pub fn fallback_line(name: &str) -> String {
    format!("This is {name}. Given what we know so far, I think we should all think carefully before we vote.")
}

fn describe(request: &DecisionRequest, selection: &Selection) -> String {
    match selection {
        Selection::Target(id) => request
            .choices
            .iter()
            .find(|c| c.id == *id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string()),
        Selection::Pass => "pass".to_string(),
        Selection::Text(text) => text.clone(),
    }
}
