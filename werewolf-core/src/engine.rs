//! The control surface for one game.
//!
//! `GameEngine` runs the moderator on a background task and exposes the
//! caller-facing operations: load a roster, start, pause, resume, reset, read
//! the latest snapshot, subscribe to events, and acknowledge speech playback.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use werewolf_core::{GameConfig, GameEngine, RandomProvider, RosterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roster = RosterConfig::load("config/characters.json").await?;
//!     let mut engine = GameEngine::new(GameConfig::default(), Arc::new(RandomProvider::new()));
//!     engine.load_roster(roster.characters)?;
//!
//!     let mut events = engine.subscribe();
//!     engine.start()?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", event.message());
//!     }
//!     Ok(())
//! }
//! ```

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::character::CharacterProfile;
use crate::config::{GameConfig, RosterConfig};
use crate::decision::DecisionProvider;
use crate::error::{GameError, GameResult};
use crate::events::{CharacterView, EventHub, GameEvent, GameSnapshot};
use crate::game::{Game, GameStatus};
use crate::moderator::Moderator;
use crate::playback::PlaybackGate;

/// How long `reset` waits for a running loop to stop before aborting it.
const RESET_GRACE: Duration = Duration::from_secs(1);

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<Moderator>,
}

pub struct GameEngine {
    config: GameConfig,
    provider: Arc<dyn DecisionProvider>,
    roster: Vec<CharacterProfile>,
    hub: Arc<EventHub>,
    playback: Arc<PlaybackGate>,
    running: Option<Running>,
    parked: Option<Moderator>,
}

impl GameEngine {
    pub fn new(config: GameConfig, provider: Arc<dyn DecisionProvider>) -> Self {
        Self {
            config,
            provider,
            roster: Vec::new(),
            hub: Arc::new(EventHub::new()),
            playback: Arc::new(PlaybackGate::new()),
            running: None,
            parked: None,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn status(&self) -> GameStatus {
        self.hub.snapshot().status
    }

    /// The latest published snapshot. May lag the game loop slightly.
    pub fn get_state(&self) -> GameSnapshot {
        self.hub.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.hub.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<GameSnapshot> {
        self.hub.watch()
    }

    /// The reason the last game halted, if it did.
    pub fn last_error(&self) -> Option<String> {
        self.hub.last_error()
    }

    /// Report that `speaker`'s playback finished. Returns `false` if it was not awaited.
    pub fn acknowledge_playback(&self, speaker: &str) -> bool {
        self.playback.ack(speaker)
    }

    fn require(&self, action: &'static str, expected: GameStatus) -> GameResult<()> {
        let status = self.status();
        if status != expected {
            return Err(GameError::InvalidStatus { action, status });
        }
        Ok(())
    }

    /// Set the roster used by the next `start`.
    pub fn load_roster(&mut self, roster: Vec<CharacterProfile>) -> GameResult<()> {
        self.require("load a roster", GameStatus::Waiting)?;
        let mut ids = HashSet::new();
        for profile in &roster {
            if !ids.insert(profile.id) {
                return Err(GameError::DuplicateCharacter(profile.id));
            }
        }
        if roster.len() != self.config.player_count {
            return Err(GameError::RosterSize {
                expected: self.config.player_count,
                found: roster.len(),
            });
        }
        self.roster = roster;
        self.hub.replace(self.waiting_snapshot());
        info!(players = self.roster.len(), "Roster loaded");
        Ok(())
    }

    pub async fn load_roster_file(&mut self, path: impl AsRef<Path>) -> GameResult<()> {
        let roster = RosterConfig::load(path).await?;
        self.load_roster(roster.characters)
    }

    fn waiting_snapshot(&self) -> GameSnapshot {
        let views = self
            .roster
            .iter()
            .cloned()
            .map(|p| CharacterView::from(&crate::character::Character::new(p)))
            .collect();
        GameSnapshot::waiting(views)
    }

    /// Deal roles and start the game loop. Nothing starts if setup fails.
    pub fn start(&mut self) -> GameResult<()> {
        self.require("start", GameStatus::Waiting)?;
        if self.roster.is_empty() {
            return Err(GameError::Config("no roster loaded".into()));
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let game = Game::setup(&self.config, &self.roster, &mut rng)?;
        let moderator = Moderator::new(game, self.config.clone(), self.provider.clone(), rng)
            .attach(
                self.hub.clone(),
                self.playback.clone(),
                self.hub.generation(),
            );
        moderator.publish("The game has started");
        info!(players = self.roster.len(), seed = ?self.config.seed, "Game started");
        self.spawn(moderator);
        Ok(())
    }

    fn spawn(&mut self, moderator: Moderator) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(moderator.run(cancel.clone()));
        self.running = Some(Running { cancel, handle });
    }

    /// Stop the loop once the in-flight phase handler finishes.
    ///
    /// Returns after the loop has stopped. The game resumes from the exact
    /// phase it stopped before.
    pub async fn pause(&mut self) -> GameResult<()> {
        self.require("pause", GameStatus::Running)?;
        let Some(running) = self.running.take() else {
            return Err(GameError::invariant("running game without a loop"));
        };
        running.cancel.cancel();
        let moderator = running
            .handle
            .await
            .map_err(|e| GameError::invariant(format!("game loop failed: {e}")))?;
        let status = moderator.game().status();
        if status != GameStatus::Paused {
            // The loop ended on its own before the cancel landed.
            self.hub.replace(GameSnapshot::from(moderator.game()));
            self.parked = Some(moderator);
            return Err(GameError::InvalidStatus { action: "pause", status });
        }
        info!(phase = %moderator.game().phase(), "Game paused");
        self.parked = Some(moderator);
        Ok(())
    }

    pub fn resume(&mut self) -> GameResult<()> {
        self.require("resume", GameStatus::Paused)?;
        let Some(mut moderator) = self.parked.take() else {
            return Err(GameError::invariant("paused game without saved state"));
        };
        moderator.set_status(GameStatus::Running);
        moderator.publish(format!("Game resumed at the {} phase", moderator.game().phase()));
        info!(phase = %moderator.game().phase(), "Game resumed");
        self.spawn(moderator);
        Ok(())
    }

    /// Discard the game and return to waiting. The loaded roster is kept.
    pub async fn reset(&mut self) -> GameResult<()> {
        let generation = self.hub.reset(self.waiting_snapshot());
        self.playback.disarm();
        self.parked = None;

        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            let mut handle = running.handle;
            if tokio::time::timeout(RESET_GRACE, &mut handle).await.is_err() {
                warn!("Game loop did not stop in time, aborting it");
                handle.abort();
            }
        }
        info!(generation, "Game reset");
        Ok(())
    }

    /// Wait for a running game to end on its own, then keep its final state.
    pub async fn wait_finished(&mut self) -> GameResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let moderator = running
            .handle
            .await
            .map_err(|e| GameError::invariant(format!("game loop failed: {e}")))?;
        self.parked = Some(moderator);
        Ok(())
    }

    /// The final or paused game state, when the loop is not running.
    pub fn game(&self) -> Option<&Game> {
        self.parked.as_ref().map(Moderator::game)
    }
}

impl Drop for GameEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}
