//! The moderator: sole owner of a running game.
//!
//! The moderator holds the [`Game`], the decision provider, the game RNG and
//! configuration. It runs phase handlers, checks the win condition after each
//! one and advances the phase. The stored phase is always the next one to run,
//! so stopping between steps and starting again never skips or repeats a phase.
//!
//! Night handlers live in [`crate::night`], day handlers in [`crate::day`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::character::{Character, CharacterId, DecisionRecord};
use crate::config::GameConfig;
use crate::context;
use crate::decision::{self, DecisionError, DecisionProvider, DecisionRequest, Resolved, Selection};
use crate::error::{GameError, GameResult};
use crate::events::{EventHub, GameEvent};
use crate::game::{Game, GameStatus, Phase};
use crate::playback::PlaybackGate;

pub struct Moderator {
    pub(crate) game: Game,
    pub(crate) config: GameConfig,
    pub(crate) provider: Arc<dyn DecisionProvider>,
    pub(crate) rng: StdRng,
    hub: Arc<EventHub>,
    pub(crate) playback: Arc<PlaybackGate>,
    generation: u64,
}

impl Moderator {
    /// A moderator with its own event hub and playback gate.
    pub fn new(
        game: Game,
        config: GameConfig,
        provider: Arc<dyn DecisionProvider>,
        rng: StdRng,
    ) -> Self {
        let hub = Arc::new(EventHub::new());
        let generation = hub.generation();
        Self {
            game,
            config,
            provider,
            rng,
            hub,
            playback: Arc::new(PlaybackGate::new()),
            generation,
        }
    }

    /// Bind to shared channels at the given generation.
    pub(crate) fn attach(
        mut self,
        hub: Arc<EventHub>,
        playback: Arc<PlaybackGate>,
        generation: u64,
    ) -> Self {
        self.hub = hub;
        self.playback = playback;
        self.generation = generation;
        self
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.hub.subscribe()
    }

    pub fn playback(&self) -> &Arc<PlaybackGate> {
        &self.playback
    }

    pub(crate) fn set_status(&mut self, status: GameStatus) {
        self.game.set_status(status);
    }

    // ------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------

    /// Drive the game until it ends, halts, is cancelled, or is superseded.
    ///
    /// Cancellation is observed between phases only. A cancelled loop that
    /// leaves the game unfinished marks it paused.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Self {
        info!(day = self.game.current_day(), phase = %self.game.phase(), "Game loop started");

        while self.game.status() == GameStatus::Running {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self.step().await {
                self.halt(err);
                break;
            }
            if !self.is_current() {
                debug!("Loop superseded by a reset");
                return self;
            }
            if self.game.status() != GameStatus::Running {
                break;
            }

            let delay = self.transition_delay(self.game.phase());
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if self.game.status() == GameStatus::Running {
            self.game.set_status(GameStatus::Paused);
            self.publish(format!("Game paused before the {} phase", self.game.phase()));
        }
        info!(status = %self.game.status(), phase = %self.game.phase(), "Game loop stopped");
        self
    }

    /// Run the current phase, check for a winner, and move to the next phase.
    pub async fn step(&mut self) -> GameResult<()> {
        let phase = self.game.phase();
        debug!(day = self.game.current_day(), %phase, "Running phase");
        self.run_phase(phase).await?;

        if self.game.check_game_over() {
            self.finish();
            return Ok(());
        }

        let next = self.next_phase(phase);
        if next == Phase::Night {
            self.game.advance_day()?;
        }
        self.game.set_phase(next);
        self.publish(format!("Day {}: {} phase", self.game.current_day(), next));
        Ok(())
    }

    /// Run steps until the game is over. Used offline and in tests.
    pub async fn play_to_end(&mut self, max_steps: usize) -> GameResult<()> {
        for _ in 0..max_steps {
            if self.game.status() != GameStatus::Running {
                return Ok(());
            }
            self.step().await?;
        }
        Err(GameError::invariant(format!(
            "game did not finish within {max_steps} steps"
        )))
    }

    pub async fn run_phase(&mut self, phase: Phase) -> GameResult<()> {
        match phase {
            Phase::Setup => Ok(()),
            Phase::Night => {
                self.begin_night();
                Ok(())
            }
            Phase::Werewolf => self.werewolf_phase().await,
            Phase::Seer => self.seer_phase().await,
            Phase::Witch => self.witch_phase().await,
            Phase::Guard => self.guard_phase().await,
            Phase::Dawn => self.dawn_phase(),
            Phase::Discussion => self.discussion_phase().await,
            Phase::Vote => self.vote_phase().await,
            Phase::Pk => self.pk_phase().await,
            Phase::Revote => self.revote_phase().await,
            Phase::End => {
                self.finish();
                Ok(())
            }
        }
    }

    fn next_phase(&self, phase: Phase) -> Phase {
        match phase {
            Phase::Setup => Phase::Night,
            Phase::Night => Phase::Werewolf,
            Phase::Werewolf => Phase::Seer,
            Phase::Seer => Phase::Witch,
            Phase::Witch => Phase::Guard,
            Phase::Guard => Phase::Dawn,
            Phase::Dawn => Phase::Discussion,
            Phase::Discussion => Phase::Vote,
            Phase::Vote if !self.game.pk_candidates.is_empty() => Phase::Pk,
            Phase::Vote => Phase::Night,
            Phase::Pk => Phase::Revote,
            Phase::Revote => Phase::Night,
            Phase::End => Phase::End,
        }
    }

    fn transition_delay(&self, next: Phase) -> Duration {
        let pacing = &self.config.pacing;
        match next {
            Phase::Night | Phase::Dawn => pacing.night_transition,
            Phase::Discussion => pacing.discussion_transition,
            _ => pacing.default_transition,
        }
    }

    fn begin_night(&mut self) {
        self.game.reset_night();
        let day = self.game.current_day();
        self.game
            .announce(format!("Night {day} falls. Everyone closes their eyes."));
        self.publish(format!("Night {day} falls"));
    }

    fn finish(&mut self) {
        self.game.set_phase(Phase::End);
        self.game.set_status(GameStatus::Finished);
        let message = match self.game.winner() {
            Some(faction) => format!("Game over: the {faction} win"),
            None => "Game over".to_string(),
        };
        info!(day = self.game.current_day(), %message, "Game finished");
        self.publish(message);
    }

    fn halt(&mut self, err: GameError) {
        error!(error = %err, phase = %self.game.phase(), "Game halted");
        self.game.set_status(GameStatus::Finished);
        self.publish(format!("Game halted: {err}"));
        self.hub.emit(
            self.generation,
            GameEvent::Halted {
                reason: err.to_string(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Shared helpers for the phase handlers
    // ------------------------------------------------------------------

    pub(crate) fn is_current(&self) -> bool {
        self.hub.generation() == self.generation
    }

    pub(crate) fn publish(&self, message: impl Into<String>) -> bool {
        self.hub.publish(self.generation, &self.game, message.into())
    }

    pub(crate) fn emit(&self, event: GameEvent) -> bool {
        self.hub.emit(self.generation, event)
    }

    pub(crate) fn character(&self, id: CharacterId) -> GameResult<&Character> {
        self.game
            .get(id)
            .ok_or_else(|| GameError::invariant(format!("unknown character {id}")))
    }

    pub(crate) fn context_for(&self, id: CharacterId) -> GameResult<String> {
        let viewer = self.character(id)?;
        Ok(context::build(&self.game, viewer, self.config.history_window))
    }

    /// Ask the provider and settle the answer against the request.
    pub(crate) async fn ask(&mut self, request: &DecisionRequest) -> Resolved {
        let provider = self.provider.clone();
        let outcome = provider.decide(request).await;
        self.settle(request, outcome)
    }

    pub(crate) fn settle(
        &mut self,
        request: &DecisionRequest,
        outcome: Result<decision::Verdict, DecisionError>,
    ) -> Resolved {
        decision::resolve(request, outcome, &mut self.rng, &mut self.game.calls)
    }

    /// Record a non-speech decision in the actor's memory.
    pub(crate) fn remember(
        &mut self,
        request: &DecisionRequest,
        selection: &Selection,
        reason: Option<String>,
        resolved: &Resolved,
    ) -> GameResult<()> {
        let target_id = selection.target();
        let target = target_id.map(|id| self.game.name_of(id));
        let record = DecisionRecord {
            kind: request.kind,
            target,
            target_id,
            reason,
            day: self.game.current_day(),
            phase: self.game.phase(),
            call_id: Some(resolved.call_id),
            at: chrono::Utc::now(),
        };
        self.game
            .get_mut(request.actor.id)
            .ok_or_else(|| GameError::invariant(format!("unknown actor {}", request.actor.id)))?
            .memory_mut()
            .record_decision(record);
        Ok(())
    }

    /// Ask for a missing reason and attach it to the recorded decision.
    pub(crate) async fn explain(
        &mut self,
        request: &DecisionRequest,
        selection: &Selection,
        resolved: &Resolved,
    ) {
        if !self.config.request_explanations || resolved.rationale.is_some() || resolved.fell_back
        {
            return;
        }
        let provider = self.provider.clone();
        match provider.explain(request, selection).await {
            Ok(reason) if !reason.trim().is_empty() => {
                let day = self.game.current_day();
                if let Some(actor) = self.game.get_mut(request.actor.id) {
                    actor
                        .memory_mut()
                        .attach_reason(request.kind, selection.target(), day, reason);
                }
            }
            Ok(_) | Err(DecisionError::Unsupported) => {}
            Err(err) => {
                debug!(character = %request.actor.name, error = %err, "No explanation");
            }
        }
    }

    /// Fan an observation out to every alive character.
    pub(crate) fn observe_all(&mut self, event: &str) {
        let day = self.game.current_day();
        let phase = self.game.phase();
        let alive: Vec<CharacterId> = self.game.get_alive().map(|c| c.id).collect();
        for id in alive {
            if let Some(c) = self.game.get_mut(id) {
                c.memory_mut().observe(event, day, phase);
            }
        }
    }

    pub(crate) fn observe(&mut self, id: CharacterId, event: &str) {
        let day = self.game.current_day();
        let phase = self.game.phase();
        if let Some(c) = self.game.get_mut(id) {
            c.memory_mut().observe(event, day, phase);
        }
    }

    /// Pick the plurality winner of a tally, breaking ties uniformly at random.
    pub(crate) fn plurality(&mut self, tally: &BTreeMap<CharacterId, usize>) -> Option<CharacterId> {
        leaders(tally).choose(&mut self.rng).copied()
    }
}

/// Every id tied for the highest count, in id order.
pub(crate) fn leaders(tally: &BTreeMap<CharacterId, usize>) -> Vec<CharacterId> {
    let Some(max) = tally.values().copied().max() else {
        return Vec::new();
    };
    tally
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(id, _)| *id)
        .collect()
}
