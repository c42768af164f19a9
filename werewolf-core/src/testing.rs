//! Testing utilities for the werewolf engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedProvider` for deterministic decisions without API calls
//! - `TestHarness` for scripted game scenarios with a fixed deal
//! - Assertion helpers for verifying game state

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::character::{CharacterId, CharacterProfile};
use crate::config::{GameConfig, PacingConfig, PolicyConfig};
use crate::decision::{
    DecisionError, DecisionKind, DecisionProvider, DecisionRequest, Selection, Verdict,
};
use crate::error::GameResult;
use crate::game::{Game, Phase};
use crate::moderator::Moderator;
use crate::role::{Faction, Role, RoleDeck};

/// A scripted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    /// Pick the character with this name. Fails if it is not a legal choice.
    Target(String),
    /// Decline.
    Pass,
    /// Say this.
    Say(String),
    /// Return a provider error.
    Fail,
}

impl Scripted {
    pub fn target(name: impl Into<String>) -> Self {
        Scripted::Target(name.into())
    }

    pub fn say(text: impl Into<String>) -> Self {
        Scripted::Say(text.into())
    }
}

#[derive(Default)]
struct Script {
    /// One-shot answers per (kind, actor), consumed in order.
    queued: HashMap<(DecisionKind, String), VecDeque<Scripted>>,
    /// Standing answers per (kind, actor).
    by_actor: HashMap<(DecisionKind, String), Scripted>,
    /// Standing answers per kind.
    by_kind: HashMap<DecisionKind, Scripted>,
    requests: Vec<DecisionRequest>,
    explanations: usize,
}

/// A decision provider that answers from a script.
///
/// Lookup order: queued one-shot answers for the actor, the actor's standing
/// answer, the kind's standing answer. Unscripted requests get the first legal
/// choice, `Pass` when declining is allowed, or a stock line for speech.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    explain_with: Option<String>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every `kind` request with `answer`.
    pub fn always(self, kind: DecisionKind, answer: Scripted) -> Self {
        self.script().by_kind.insert(kind, answer);
        self
    }

    /// Answer `actor`'s `kind` requests with `answer`.
    pub fn actor(self, actor: &str, kind: DecisionKind, answer: Scripted) -> Self {
        self.script()
            .by_actor
            .insert((kind, actor.to_string()), answer);
        self
    }

    /// Answer `actor`'s next `kind` request with `answer`, once.
    pub fn once(self, actor: &str, kind: DecisionKind, answer: Scripted) -> Self {
        self.script()
            .queued
            .entry((kind, actor.to_string()))
            .or_default()
            .push_back(answer);
        self
    }

    /// Answer explanation requests with `reason`.
    pub fn explaining(mut self, reason: impl Into<String>) -> Self {
        self.explain_with = Some(reason.into());
        self
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.script().requests.clone()
    }

    /// Requests of one kind, in order.
    pub fn requests_of(&self, kind: DecisionKind) -> Vec<DecisionRequest> {
        self.script()
            .requests
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn explanations(&self) -> usize {
        self.script().explanations
    }

    fn answer_for(script: &mut Script, request: &DecisionRequest) -> Option<Scripted> {
        let key = (request.kind, request.actor.name.clone());
        if let Some(answer) = script.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            return Some(answer);
        }
        script
            .by_actor
            .get(&key)
            .or_else(|| script.by_kind.get(&request.kind))
            .cloned()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, DecisionError> {
        let mut script = self.script();
        script.requests.push(request.clone());

        let selection = match Self::answer_for(&mut script, request) {
            Some(Scripted::Target(name)) => request
                .choice_named(&name)
                .map(|c| Selection::Target(c.id))
                .ok_or(DecisionError::Unparseable(name))?,
            Some(Scripted::Pass) => Selection::Pass,
            Some(Scripted::Say(text)) => Selection::Text(text),
            Some(Scripted::Fail) => {
                return Err(DecisionError::Provider("scripted failure".into()))
            }
            None if request.kind.is_speech() => {
                Selection::Text(format!("{} has nothing to add.", request.actor.name))
            }
            None if request.allow_pass => Selection::Pass,
            None => request
                .choices
                .first()
                .map(|c| Selection::Target(c.id))
                .ok_or_else(|| DecisionError::Unparseable("no legal choices".into()))?,
        };
        Ok(Verdict::new(selection))
    }

    async fn explain(
        &self,
        _request: &DecisionRequest,
        _selection: &Selection,
    ) -> Result<String, DecisionError> {
        let reason = self.explain_with.clone().ok_or(DecisionError::Unsupported)?;
        self.script().explanations += 1;
        Ok(reason)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Test harness for running game scenarios.
///
/// Characters are named `P1`, `P2`, ... with ids 1, 2, ... and receive the
/// given roles in order. Pacing is instant, guard-rail policies are off and the
/// RNG is seeded, so a scenario plays out the same way every time.
pub struct TestHarness {
    pub moderator: Moderator,
    pub provider: Arc<ScriptedProvider>,
}

impl TestHarness {
    pub fn new(roles: &[Role], provider: ScriptedProvider) -> Self {
        Self::with_config(roles, provider, |config| config)
    }

    /// Like `new`, with a hook to adjust the configuration.
    pub fn with_config(
        roles: &[Role],
        provider: ScriptedProvider,
        configure: impl FnOnce(GameConfig) -> GameConfig,
    ) -> Self {
        Self::try_with_config(roles, provider, configure)
            .unwrap_or_else(|e| panic!("invalid test setup: {e}"))
    }

    pub fn try_with_config(
        roles: &[Role],
        provider: ScriptedProvider,
        configure: impl FnOnce(GameConfig) -> GameConfig,
    ) -> GameResult<Self> {
        let deck = roles
            .iter()
            .fold(RoleDeck::empty(), |deck, role| {
                let count = deck.count(*role);
                deck.with(*role, count + 1)
            });
        let config = configure(
            GameConfig::new()
                .with_deck(deck)
                .with_policy(PolicyConfig::permissive())
                .with_pacing(PacingConfig::instant())
                .with_seed(7)
                .with_explanations(false),
        );
        let roster: Vec<CharacterProfile> = (1..=roles.len() as u32)
            .map(|i| CharacterProfile::new(i, format!("P{i}")))
            .collect();

        let game = Game::setup_fixed(&config, &roster, roles.to_vec())?;
        let rng = StdRng::seed_from_u64(config.seed.unwrap_or_default());
        let provider = Arc::new(provider);
        let moderator = Moderator::new(game, config, provider.clone(), rng);
        Ok(Self {
            moderator,
            provider,
        })
    }

    pub fn game(&self) -> &Game {
        self.moderator.game()
    }

    /// Id of the character called `name`.
    #[track_caller]
    pub fn id(&self, name: &str) -> CharacterId {
        match self.game().by_name(name) {
            Some(c) => c.id,
            None => panic!("no character named {name}"),
        }
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.game().by_name(name).is_some_and(|c| c.is_alive())
    }

    /// Kill a character outside the normal flow, for setting up a scenario.
    #[track_caller]
    pub fn kill(&mut self, name: &str) {
        let id = self.id(name);
        if let Err(e) = self.moderator.game.eliminate(id) {
            panic!("could not kill {name}: {e}");
        }
    }

    /// Jump to `phase` and run its handler only.
    pub async fn run_phase(&mut self, phase: Phase) -> GameResult<()> {
        self.moderator.game.set_phase(phase);
        self.moderator.run_phase(phase).await
    }

    /// Run the full night cycle from the current NIGHT phase through DAWN.
    pub async fn run_night(&mut self) -> GameResult<()> {
        for phase in [
            Phase::Night,
            Phase::Werewolf,
            Phase::Seer,
            Phase::Witch,
            Phase::Guard,
            Phase::Dawn,
        ] {
            self.run_phase(phase).await?;
        }
        Ok(())
    }

    /// Run the orchestrated step for the current phase.
    pub async fn step(&mut self) -> GameResult<()> {
        self.moderator.step().await
    }

    /// Messages of every log entry so far.
    pub fn messages(&self) -> Vec<String> {
        self.game()
            .log()
            .entries()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn has_message(&self, needle: &str) -> bool {
        self.game()
            .log()
            .entries()
            .iter()
            .any(|e| e.message.contains(needle))
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that the named character is alive.
#[track_caller]
pub fn assert_alive(harness: &TestHarness, name: &str) {
    assert!(harness.is_alive(name), "Expected {name} to be alive");
}

/// Assert that the named character is dead.
#[track_caller]
pub fn assert_dead(harness: &TestHarness, name: &str) {
    assert!(!harness.is_alive(name), "Expected {name} to be dead");
}

/// Assert the number of alive characters.
#[track_caller]
pub fn assert_alive_count(harness: &TestHarness, expected: usize) {
    let actual = harness.game().alive_count();
    assert_eq!(actual, expected, "Expected {expected} alive, got {actual}");
}

/// Assert the current phase.
#[track_caller]
pub fn assert_phase(harness: &TestHarness, expected: Phase) {
    let actual = harness.game().phase();
    assert_eq!(actual, expected, "Expected phase {expected}, got {actual}");
}

/// Assert the latched winner.
#[track_caller]
pub fn assert_winner(harness: &TestHarness, expected: Option<Faction>) {
    let actual = harness.game().winner();
    assert_eq!(actual, expected, "Expected winner {expected:?}, got {actual:?}");
}
