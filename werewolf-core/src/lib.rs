//! Werewolf game engine with AI-driven characters.
//!
//! This crate provides:
//! - The full night and day protocol for seer, witch, guard, hunter, werewolves and villagers
//! - Pluggable decision providers: an LLM-backed one and an offline random one
//! - Per-character memory, visibility-filtered context and a provider call log
//! - A game engine with start, pause, resume and reset, streaming events to subscribers
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use werewolf_core::{GameConfig, GameEngine, GameEvent, LlmDecisionProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(LlmDecisionProvider::from_env()?);
//!     let mut engine = GameEngine::new(GameConfig::default(), provider);
//!     engine.load_roster_file("config/characters.json").await?;
//!
//!     let mut events = engine.subscribe();
//!     engine.start()?;
//!     while let Ok(event) = events.recv().await {
//!         if let GameEvent::Speak { speaker, .. } = &event {
//!             engine.acknowledge_playback(speaker);
//!         }
//!         println!("{}", event.message());
//!     }
//!     Ok(())
//! }
//! ```

pub mod calls;
pub mod character;
pub mod config;
pub mod context;
mod day;
pub mod decision;
pub mod engine;
pub mod error;
pub mod events;
pub mod game;
pub mod log;
pub mod moderator;
mod night;
pub mod playback;
pub mod role;
pub mod testing;
pub mod visibility;

// Primary public API
pub use calls::{CallId, CallLog, CallRecord};
pub use character::{Character, CharacterId, CharacterProfile, Memory};
pub use config::{GameConfig, PacingConfig, PolicyConfig, RosterConfig};
pub use decision::{
    DecisionError, DecisionKind, DecisionProvider, DecisionRequest, LlmDecisionProvider,
    RandomProvider, Selection, Verdict,
};
pub use engine::GameEngine;
pub use error::{GameError, GameResult};
pub use events::{EventHub, GameEvent, GameSnapshot};
pub use game::{Game, GameStatus, Phase};
pub use log::{GameLog, LogEntry, MessageType, Source};
pub use moderator::Moderator;
pub use role::{Faction, Role, RoleDeck};
pub use testing::{ScriptedProvider, TestHarness};
