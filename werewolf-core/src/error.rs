//! Error taxonomy for the engine.

use thiserror::Error;

use crate::character::CharacterId;
use crate::game::GameStatus;

/// Errors surfaced by game setup, the control surface, and invariant checks.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("roster must contain exactly {expected} characters, found {found}")]
    RosterSize { expected: usize, found: usize },

    #[error("duplicate character id {0}")]
    DuplicateCharacter(CharacterId),

    #[error("role deck holds {deck} cards for {players} players")]
    DeckMismatch { deck: usize, players: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot {action} while the game is {status}")]
    InvalidStatus {
        action: &'static str,
        status: GameStatus,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GameError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        GameError::Invariant(message.into())
    }

    /// Whether this error comes from a bad roster or configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            GameError::RosterSize { .. }
                | GameError::DuplicateCharacter(_)
                | GameError::DeckMismatch { .. }
                | GameError::Config(_)
        )
    }
}

/// Result alias for engine operations.
pub type GameResult<T> = Result<T, GameError>;
