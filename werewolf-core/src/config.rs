//! Game configuration: table size, role deck, guard-rail policies and pacing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::character::CharacterProfile;
use crate::error::{GameError, GameResult};
use crate::role::RoleDeck;

/// Guard-rails layered over provider decisions.
///
/// These are not game rules. They keep a weak decision provider from wrecking
/// its own side, and tests pin them to 0 or 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Refuse a witch poison aimed at the seer.
    pub protect_seer_from_poison: bool,
    /// Chance that a witch poison aimed at a non-werewolf is withheld.
    pub good_poison_block_probability: f64,
    /// Chance that a werewolf's vote for a teammate is moved to a non-werewolf.
    pub werewolf_teammate_vote_redirect_probability: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            protect_seer_from_poison: true,
            good_poison_block_probability: 0.8,
            werewolf_teammate_vote_redirect_probability: 0.8,
        }
    }
}

impl PolicyConfig {
    /// No guard-rails at all: provider decisions stand as made.
    pub fn permissive() -> Self {
        Self {
            protect_seer_from_poison: false,
            good_poison_block_probability: 0.0,
            werewolf_teammate_vote_redirect_probability: 0.0,
        }
    }

    fn validate(&self) -> GameResult<()> {
        for (name, p) in [
            ("good_poison_block_probability", self.good_poison_block_probability),
            (
                "werewolf_teammate_vote_redirect_probability",
                self.werewolf_teammate_vote_redirect_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(GameError::Config(format!("{name} must be within [0, 1], got {p}")));
            }
        }
        Ok(())
    }
}

/// Presentation pacing between phases and the playback rendezvous timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Pause before NIGHT and DAWN.
    pub night_transition: Duration,
    /// Pause before DISCUSSION.
    pub discussion_transition: Duration,
    /// Pause before every other phase.
    pub default_transition: Duration,
    /// How long to wait for a speaker's playback acknowledgment.
    pub playback_timeout: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            night_transition: Duration::from_secs(2),
            discussion_transition: Duration::from_secs(5),
            default_transition: Duration::from_secs(3),
            playback_timeout: Duration::from_secs(10),
        }
    }
}

impl PacingConfig {
    /// No delays and no playback wait.
    pub fn instant() -> Self {
        Self {
            night_transition: Duration::ZERO,
            discussion_transition: Duration::ZERO,
            default_transition: Duration::ZERO,
            playback_timeout: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub player_count: usize,
    pub deck: RoleDeck,
    pub policy: PolicyConfig,
    pub pacing: PacingConfig,
    /// How many trailing log entries a decision context may draw from.
    pub history_window: usize,
    /// Provider calls retained per character.
    pub call_retention: usize,
    /// Longest inner-thought excerpt passed into the public statement request.
    pub inner_thought_summary_chars: usize,
    /// Ask the provider for a short reason when a decision arrives without one.
    pub request_explanations: bool,
    /// Seed for the game RNG; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            player_count: 8,
            deck: RoleDeck::default(),
            policy: PolicyConfig::default(),
            pacing: PacingConfig::default(),
            history_window: 12,
            call_retention: 30,
            inner_thought_summary_chars: 500,
            request_explanations: true,
            seed: None,
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the table size and deck together.
    pub fn with_deck(mut self, deck: RoleDeck) -> Self {
        self.player_count = deck.size();
        self.deck = deck;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_explanations(mut self, enabled: bool) -> Self {
        self.request_explanations = enabled;
        self
    }

    /// Check everything that does not depend on the roster itself.
    pub fn validate(&self) -> GameResult<()> {
        self.deck.validate(self.player_count)?;
        self.policy.validate()?;
        if self.call_retention == 0 {
            return Err(GameError::Config("call_retention must be positive".into()));
        }
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> GameResult<Self> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// The character roster, as stored in `characters.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterConfig {
    pub characters: Vec<CharacterProfile>,
}

impl RosterConfig {
    pub fn new(characters: Vec<CharacterProfile>) -> Self {
        Self { characters }
    }

    pub async fn load(path: impl AsRef<Path>) -> GameResult<Self> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> GameResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn test_defaults() {
        let config = GameConfig::default();
        assert_eq!(config.player_count, 8);
        assert_eq!(config.history_window, 12);
        assert_eq!(config.pacing.playback_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_deck_resizes_table() {
        let deck = RoleDeck::default().with(Role::Guard, 1).with(Role::Hunter, 1);
        let config = GameConfig::new().with_deck(deck);
        assert_eq!(config.player_count, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_probability() {
        let config = GameConfig::new().with_policy(PolicyConfig {
            good_poison_block_probability: 1.5,
            ..PolicyConfig::default()
        });
        assert!(matches!(config.validate(), Err(GameError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{"seed": 9, "policy": {"protect_seer_from_poison": false}}"#)
                .unwrap();
        assert_eq!(config.seed, Some(9));
        assert!(!config.policy.protect_seer_from_poison);
        assert_eq!(config.policy.good_poison_block_probability, 0.8);
        assert_eq!(config.player_count, 8);
    }

    #[tokio::test]
    async fn test_roster_roundtrip_through_file() {
        let path = std::env::temp_dir().join(format!("roster-{}.json", uuid::Uuid::new_v4()));
        let roster = RosterConfig::new(vec![
            CharacterProfile::new(1, "Alice").with_style("calm"),
            CharacterProfile::new(2, "Bob").with_model("qwen"),
        ]);
        roster.save(&path).await.unwrap();
        let loaded = RosterConfig::load(&path).await.unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, roster);
    }

    #[tokio::test]
    async fn test_missing_roster_file_is_io_error() {
        let err = RosterConfig::load("/definitely/not/here.json").await.unwrap_err();
        assert!(matches!(err, GameError::Io(_)));
    }
}
