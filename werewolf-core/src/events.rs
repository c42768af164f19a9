//! Outbound events and state snapshots for presentation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{broadcast, watch};

use crate::character::{Character, CharacterId};
use crate::game::{Game, GameStatus, Phase};
use crate::log::LogEntry;
use crate::role::{Faction, Role};

/// A character as shown to viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterView {
    pub id: CharacterId,
    pub name: String,
    pub gender: String,
    pub style: String,
    pub model_ref: String,
    pub voice: String,
    pub role: Option<Role>,
    pub alive: bool,
}

impl From<&Character> for CharacterView {
    fn from(c: &Character) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            gender: c.gender.clone(),
            style: c.style.clone(),
            model_ref: c.model_ref.clone(),
            voice: c.voice.clone(),
            role: c.role(),
            alive: c.is_alive(),
        }
    }
}

/// A serializable copy of the game state.
#[derive(Debug, Clone, Serialize)]
pub struct GameSnapshot {
    pub characters: Vec<CharacterView>,
    pub phase: Phase,
    pub status: GameStatus,
    pub current_day: u32,
    pub logs: Vec<LogEntry>,
    pub votes: BTreeMap<CharacterId, usize>,
    pub revotes: BTreeMap<CharacterId, usize>,
    pub pk_candidates: Vec<CharacterId>,
    pub witch_used_save: bool,
    pub witch_used_poison: bool,
    pub winner: Option<Faction>,
}

impl GameSnapshot {
    /// The snapshot of a game that has not been set up.
    pub fn waiting(characters: Vec<CharacterView>) -> Self {
        Self {
            characters,
            phase: Phase::Setup,
            status: GameStatus::Waiting,
            current_day: 0,
            logs: Vec::new(),
            votes: BTreeMap::new(),
            revotes: BTreeMap::new(),
            pk_candidates: Vec::new(),
            witch_used_save: false,
            witch_used_poison: false,
            winner: None,
        }
    }

    pub fn character(&self, id: CharacterId) -> Option<&CharacterView> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn alive_count(&self) -> usize {
        self.characters.iter().filter(|c| c.alive).count()
    }
}

impl From<&Game> for GameSnapshot {
    fn from(game: &Game) -> Self {
        Self {
            characters: game.characters().iter().map(CharacterView::from).collect(),
            phase: game.phase(),
            status: game.status(),
            current_day: game.current_day(),
            logs: game.log().entries().to_vec(),
            votes: game.votes().clone(),
            revotes: game.revotes().clone(),
            pk_candidates: game.pk_candidates().iter().copied().collect(),
            witch_used_save: game.potions().save_used(),
            witch_used_poison: game.potions().poison_used(),
            winner: game.winner(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// A phase transition or an action, with the state after it.
    Update {
        snapshot: Box<GameSnapshot>,
        message: String,
    },
    /// A statement to be voiced. The engine waits for playback of `speaker`.
    Speak {
        speaker: String,
        character_id: CharacterId,
        voice: String,
        text: String,
    },
    /// The game loop stopped on an invariant violation.
    Halted { reason: String },
}

impl GameEvent {
    pub fn message(&self) -> &str {
        match self {
            GameEvent::Update { message, .. } => message,
            GameEvent::Speak { text, .. } => text,
            GameEvent::Halted { reason } => reason,
        }
    }
}

const EVENT_CAPACITY: usize = 256;

/// Channels shared between the control surface and the game loop.
///
/// Every publish carries the generation of the loop that produced it and is
/// dropped unless that generation is still current. The check and the send
/// happen under the snapshot channel's lock, and [`EventHub::reset`] bumps the
/// generation under the same lock, so a loop left over from before a reset
/// can never write into the fresh game.
#[derive(Debug)]
pub struct EventHub {
    events: broadcast::Sender<GameEvent>,
    state: watch::Sender<GameSnapshot>,
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(GameSnapshot::waiting(Vec::new()));
        Self {
            events,
            state,
            generation: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<GameSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.state.borrow().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a snapshot and an update message. Returns `false` if `generation` is stale.
    pub(crate) fn publish(&self, generation: u64, game: &Game, message: String) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation() != generation {
                return false;
            }
            let snapshot = GameSnapshot::from(game);
            *state = snapshot.clone();
            let _ = self.events.send(GameEvent::Update {
                snapshot: Box::new(snapshot),
                message,
            });
            true
        })
    }

    /// Emit a non-state event. Returns `false` if `generation` is stale.
    pub(crate) fn emit(&self, generation: u64, event: GameEvent) -> bool {
        self.state.send_if_modified(|_| {
            if self.generation() == generation {
                if let GameEvent::Halted { reason } = &event {
                    *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(reason.clone());
                }
                let _ = self.events.send(event.clone());
            }
            false
        });
        self.generation() == generation
    }

    /// Replace the snapshot without bumping the generation.
    pub(crate) fn replace(&self, snapshot: GameSnapshot) {
        self.state.send_replace(snapshot);
    }

    /// Invalidate every running loop and install `snapshot`. Returns the new generation.
    pub(crate) fn reset(&self, snapshot: GameSnapshot) -> u64 {
        let mut next = 0;
        self.state.send_modify(|state| {
            next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
            *state = snapshot;
        });
        next
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterProfile;
    use crate::config::GameConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_snapshot_serializes() {
        let roster: Vec<_> = (1..=8)
            .map(|i| CharacterProfile::new(i, format!("P{i}")))
            .collect();
        let mut rng = StdRng::seed_from_u64(1);
        let game = Game::setup(&GameConfig::default(), &roster, &mut rng).unwrap();
        let snapshot = GameSnapshot::from(&game);
        assert_eq!(snapshot.alive_count(), 8);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["phase"], "night");
        assert_eq!(json["characters"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_stale_generation_cannot_publish() {
        let roster: Vec<_> = (1..=8)
            .map(|i| CharacterProfile::new(i, format!("P{i}")))
            .collect();
        let mut rng = StdRng::seed_from_u64(2);
        let game = Game::setup(&GameConfig::default(), &roster, &mut rng).unwrap();

        let hub = EventHub::new();
        let mut events = hub.subscribe();
        let stale = hub.generation();
        assert!(hub.publish(stale, &game, "started".into()));
        assert_eq!(hub.snapshot().status, GameStatus::Running);

        let fresh = hub.reset(GameSnapshot::waiting(Vec::new()));
        assert_ne!(fresh, stale);
        assert!(!hub.publish(stale, &game, "zombie".into()));
        assert!(!hub.emit(stale, GameEvent::Halted { reason: "zombie".into() }));
        assert_eq!(hub.snapshot().status, GameStatus::Waiting);
        assert_eq!(hub.last_error(), None);

        assert_eq!(events.try_recv().unwrap().message(), "started");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_event_tagging() {
        let event = GameEvent::Speak {
            speaker: "Alice".into(),
            character_id: CharacterId(1),
            voice: "longxiang".into(),
            text: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "speak");
        assert_eq!(json["character_id"], 1);
        assert_eq!(event.message(), "hello");
    }
}
