//! Game state: the roster, phase, status, night scratch state and the log.
//!
//! `Game` is plain data with mutation entry points. Only the moderator that
//! owns it mutates it; everyone else reads snapshots.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::calls::{CallId, CallLog};
use crate::character::{Character, CharacterId, CharacterProfile};
use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::log::{GameLog, LogEntry, MessageType, Source};
use crate::role::{Faction, Role};

/// A named stage of the day/night cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Night,
    Werewolf,
    Seer,
    Witch,
    Guard,
    Dawn,
    Discussion,
    Vote,
    Pk,
    Revote,
    End,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Night => "night",
            Phase::Werewolf => "werewolf",
            Phase::Seer => "seer",
            Phase::Witch => "witch",
            Phase::Guard => "guard",
            Phase::Dawn => "dawn",
            Phase::Discussion => "discussion",
            Phase::Vote => "vote",
            Phase::Pk => "pk",
            Phase::Revote => "revote",
            Phase::End => "end",
        }
    }

    /// The night sub-phase in which a role acts, if any.
    pub fn of_role(role: Role) -> Option<Phase> {
        match role {
            Role::Werewolf => Some(Phase::Werewolf),
            Role::Seer => Some(Phase::Seer),
            Role::Witch => Some(Phase::Witch),
            Role::Guard => Some(Phase::Guard),
            Role::Villager | Role::Hunter => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Running,
    Paused,
    Finished,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Running => "running",
            GameStatus::Paused => "paused",
            GameStatus::Finished => "finished",
        })
    }
}

/// Scratch state for one night. Cleared when the next night begins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NightState {
    pub killed_at_night: Option<CharacterId>,
    pub saved_by_witch: bool,
    pub poisoned_by_witch: Option<CharacterId>,
    pub protected_by_guard: Option<CharacterId>,
}

/// The witch's one-shot potions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Potions {
    save_used: bool,
    poison_used: bool,
}

impl Potions {
    pub fn save_used(&self) -> bool {
        self.save_used
    }

    pub fn poison_used(&self) -> bool {
        self.poison_used
    }

    pub(crate) fn use_save(&mut self) -> GameResult<()> {
        if self.save_used {
            return Err(GameError::invariant("witch save potion used twice"));
        }
        self.save_used = true;
        Ok(())
    }

    pub(crate) fn use_poison(&mut self) -> GameResult<()> {
        if self.poison_used {
            return Err(GameError::invariant("witch poison potion used twice"));
        }
        self.poison_used = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Game {
    characters: Vec<Character>,
    phase: Phase,
    status: GameStatus,
    current_day: u32,
    log: GameLog,
    pub(crate) votes: BTreeMap<CharacterId, usize>,
    pub(crate) revotes: BTreeMap<CharacterId, usize>,
    pub(crate) pk_candidates: BTreeSet<CharacterId>,
    pub(crate) night: NightState,
    potions: Potions,
    /// The guard's most recent protection as (day, target).
    pub(crate) last_protected: Option<(u32, CharacterId)>,
    last_eliminated: Option<CharacterId>,
    winner: Option<Faction>,
    pub(crate) calls: CallLog,
}

impl Game {
    pub fn new(call_retention: usize) -> Self {
        Self {
            characters: Vec::new(),
            phase: Phase::Setup,
            status: GameStatus::Waiting,
            current_day: 0,
            log: GameLog::new(),
            votes: BTreeMap::new(),
            revotes: BTreeMap::new(),
            pk_candidates: BTreeSet::new(),
            night: NightState::default(),
            potions: Potions::default(),
            last_protected: None,
            last_eliminated: None,
            winner: None,
            calls: CallLog::new(call_retention),
        }
    }

    /// Build a game from a roster and start it: validate, deal roles, enter the first night.
    pub fn setup<R: Rng + ?Sized>(
        config: &GameConfig,
        roster: &[CharacterProfile],
        rng: &mut R,
    ) -> GameResult<Self> {
        config.validate()?;
        if roster.len() != config.player_count {
            return Err(GameError::RosterSize {
                expected: config.player_count,
                found: roster.len(),
            });
        }

        let mut game = Game::new(config.call_retention);
        for profile in roster {
            game.add_character(profile.clone())?;
        }
        game.assign_roles(config, rng)?;
        game.begin()?;
        Ok(game)
    }

    pub fn add_character(&mut self, profile: CharacterProfile) -> GameResult<()> {
        if self.phase != Phase::Setup {
            return Err(GameError::invariant("roster is fixed once the game starts"));
        }
        if profile.name.trim().is_empty() {
            return Err(GameError::Config(format!("character {} has no name", profile.id)));
        }
        if self.characters.iter().any(|c| c.id == profile.id) {
            return Err(GameError::DuplicateCharacter(profile.id));
        }
        if self.characters.iter().any(|c| c.name == profile.name) {
            return Err(GameError::Config(format!(
                "character name {} is used twice",
                profile.name
            )));
        }
        self.characters.push(Character::new(profile));
        Ok(())
    }

    /// Deal a shuffled deck sized to the roster.
    pub fn assign_roles<R: Rng + ?Sized>(
        &mut self,
        config: &GameConfig,
        rng: &mut R,
    ) -> GameResult<()> {
        if self.characters.len() != config.player_count {
            return Err(GameError::RosterSize {
                expected: config.player_count,
                found: self.characters.len(),
            });
        }
        config.deck.validate(self.characters.len())?;
        self.deal(config.deck.shuffled(rng))
    }

    /// Deal `cards` in roster order. The cards must match the configured deck.
    pub(crate) fn deal_fixed(&mut self, config: &GameConfig, cards: Vec<Role>) -> GameResult<()> {
        config.deck.validate(self.characters.len())?;
        for role in Role::ALL {
            let dealt = cards.iter().filter(|r| **r == role).count();
            if dealt != config.deck.count(role) {
                return Err(GameError::Config(format!(
                    "fixed deal has {dealt} {role} cards, deck has {}",
                    config.deck.count(role)
                )));
            }
        }
        self.deal(cards)
    }

    fn deal(&mut self, cards: Vec<Role>) -> GameResult<()> {
        if cards.len() != self.characters.len() {
            return Err(GameError::DeckMismatch {
                deck: cards.len(),
                players: self.characters.len(),
            });
        }
        for (character, role) in self.characters.iter_mut().zip(cards) {
            character.assign_role(role)?;
        }
        self.announce("Roles have been dealt");
        Ok(())
    }

    /// Like [`Game::setup`] but with a predetermined deal, for scripted games.
    pub(crate) fn setup_fixed(
        config: &GameConfig,
        roster: &[CharacterProfile],
        cards: Vec<Role>,
    ) -> GameResult<Self> {
        config.validate()?;
        if roster.len() != config.player_count {
            return Err(GameError::RosterSize {
                expected: config.player_count,
                found: roster.len(),
            });
        }
        let mut game = Game::new(config.call_retention);
        for profile in roster {
            game.add_character(profile.clone())?;
        }
        game.deal_fixed(config, cards)?;
        game.begin()?;
        Ok(game)
    }

    fn begin(&mut self) -> GameResult<()> {
        if self.characters.iter().any(|c| c.role().is_none()) {
            return Err(GameError::invariant("cannot begin before roles are dealt"));
        }
        self.status = GameStatus::Running;
        self.current_day = 1;
        self.phase = Phase::Night;
        self.announce("The game begins on night 1");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn current_day(&self) -> u32 {
        self.current_day
    }

    pub fn log(&self) -> &GameLog {
        &self.log
    }

    pub fn votes(&self) -> &BTreeMap<CharacterId, usize> {
        &self.votes
    }

    pub fn revotes(&self) -> &BTreeMap<CharacterId, usize> {
        &self.revotes
    }

    pub fn pk_candidates(&self) -> &BTreeSet<CharacterId> {
        &self.pk_candidates
    }

    pub fn night(&self) -> &NightState {
        &self.night
    }

    pub fn potions(&self) -> Potions {
        self.potions
    }

    pub fn winner(&self) -> Option<Faction> {
        self.winner
    }

    pub fn last_eliminated(&self) -> Option<CharacterId> {
        self.last_eliminated
    }

    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn get(&self, id: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: CharacterId) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| c.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    pub fn name_of(&self, id: CharacterId) -> String {
        self.get(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn get_alive(&self) -> impl Iterator<Item = &Character> {
        self.characters.iter().filter(|c| c.is_alive())
    }

    pub fn alive_count(&self) -> usize {
        self.get_alive().count()
    }

    pub fn is_alive(&self, id: CharacterId) -> bool {
        self.get(id).is_some_and(Character::is_alive)
    }

    /// The alive holder of a role. Each non-werewolf special role is unique.
    pub fn get_by_role(&self, role: Role) -> Option<&Character> {
        self.get_alive().find(|c| c.is(role))
    }

    pub fn alive_werewolves(&self) -> impl Iterator<Item = &Character> {
        self.get_alive().filter(|c| c.is_werewolf())
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn set_status(&mut self, status: GameStatus) {
        self.status = status;
    }

    pub(crate) fn potions_mut(&mut self) -> &mut Potions {
        &mut self.potions
    }

    /// Move to the next day. Only called on re-entering NIGHT.
    pub(crate) fn advance_day(&mut self) -> GameResult<()> {
        self.current_day = self
            .current_day
            .checked_add(1)
            .ok_or_else(|| GameError::invariant("day counter overflow"))?;
        Ok(())
    }

    pub(crate) fn reset_night(&mut self) {
        self.night = NightState::default();
    }

    /// Append a log entry stamped with the current day and phase.
    pub fn record(
        &mut self,
        source: Source,
        message: impl Into<String>,
        is_public: bool,
        message_type: MessageType,
        linked_decision_ids: Vec<CallId>,
    ) -> &LogEntry {
        self.log.append(LogEntry {
            timestamp: Utc::now(),
            day: self.current_day,
            phase: self.phase,
            source,
            message: message.into(),
            is_public,
            message_type,
            linked_decision_ids,
        })
    }

    /// Public system message.
    pub fn announce(&mut self, message: impl Into<String>) -> &LogEntry {
        self.record(Source::System, message, true, MessageType::System, Vec::new())
    }

    /// Private action by a character, readable only per the visibility rules.
    pub(crate) fn record_action(
        &mut self,
        actor: CharacterId,
        message: impl Into<String>,
        links: Vec<CallId>,
    ) -> GameResult<&LogEntry> {
        let source = self
            .get(actor)
            .map(Source::of)
            .ok_or_else(|| GameError::invariant(format!("unknown actor {actor}")))?;
        Ok(self.record(source, message, false, MessageType::Action, links))
    }

    /// Remove a character from play and re-evaluate the win condition.
    pub(crate) fn eliminate(&mut self, id: CharacterId) -> GameResult<()> {
        let character = self
            .get_mut(id)
            .ok_or_else(|| GameError::invariant(format!("cannot eliminate unknown {id}")))?;
        character.mark_dead()?;
        self.last_eliminated = Some(id);
        self.check_game_over();
        Ok(())
    }

    /// Evaluate the win condition. Once a winner is found it stays.
    pub fn check_game_over(&mut self) -> bool {
        if self.winner.is_some() {
            return true;
        }
        if self.phase == Phase::Setup {
            return false;
        }
        let werewolves = self.alive_werewolves().count();
        let others = self.alive_count() - werewolves;

        let winner = if werewolves == 0 {
            Some(Faction::Villagers)
        } else if werewolves >= others {
            Some(Faction::Werewolves)
        } else {
            None
        };

        if let Some(faction) = winner {
            self.winner = Some(faction);
            self.announce(format!("Game over: the {faction} win"));
            true
        } else {
            false
        }
    }

    /// The alive roster in circular speaking order.
    ///
    /// Starts right after the most recently eliminated character, or at the top
    /// of the roster when nobody has died yet.
    pub fn speaking_order(&self) -> Vec<CharacterId> {
        let len = self.characters.len();
        let start = self
            .last_eliminated
            .and_then(|id| self.characters.iter().position(|c| c.id == id))
            .map(|pos| (pos + 1) % len.max(1))
            .unwrap_or(0);

        (0..len)
            .map(|offset| &self.characters[(start + offset) % len])
            .filter(|c| c.is_alive())
            .map(|c| c.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleDeck;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster(n: u32) -> Vec<CharacterProfile> {
        (1..=n).map(|i| CharacterProfile::new(i, format!("P{i}"))).collect()
    }

    fn started(seed: u64) -> Game {
        let mut rng = StdRng::seed_from_u64(seed);
        Game::setup(&GameConfig::default(), &roster(8), &mut rng).unwrap()
    }

    #[test]
    fn test_setup_enters_first_night() {
        let game = started(1);
        assert_eq!(game.status(), GameStatus::Running);
        assert_eq!(game.phase(), Phase::Night);
        assert_eq!(game.current_day(), 1);
        assert_eq!(game.alive_werewolves().count(), 2);
        assert!(game.get_by_role(Role::Seer).is_some());
        assert!(game.get_by_role(Role::Guard).is_none());
    }

    #[test]
    fn test_setup_rejects_wrong_roster_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = Game::setup(&GameConfig::default(), &roster(7), &mut rng).unwrap_err();
        assert!(matches!(err, GameError::RosterSize { expected: 8, found: 7 }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut game = Game::new(30);
        game.add_character(CharacterProfile::new(1, "A")).unwrap();
        let err = game.add_character(CharacterProfile::new(1, "B")).unwrap_err();
        assert!(matches!(err, GameError::DuplicateCharacter(CharacterId(1))));
        assert_eq!(game.characters().len(), 1);
    }

    #[test]
    fn test_double_assignment_is_invariant_violation() {
        let mut game = started(2);
        let mut rng = StdRng::seed_from_u64(3);
        let err = game.assign_roles(&GameConfig::default(), &mut rng).unwrap_err();
        assert!(matches!(err, GameError::Invariant(_)));
    }

    #[test]
    fn test_win_condition_is_latched() {
        let mut game = started(4);
        let wolves: Vec<_> = game.alive_werewolves().map(|c| c.id).collect();
        game.eliminate(wolves[0]).unwrap();
        assert!(!game.check_game_over());
        game.eliminate(wolves[1]).unwrap();
        assert!(game.check_game_over());
        assert_eq!(game.winner(), Some(Faction::Villagers));

        let villager = game.get_alive().next().map(|c| c.id).unwrap();
        game.eliminate(villager).unwrap();
        assert!(game.check_game_over());
        assert_eq!(game.winner(), Some(Faction::Villagers));
    }

    #[test]
    fn test_werewolves_win_at_parity() {
        let mut game = started(5);
        let villagers: Vec<_> = game
            .get_alive()
            .filter(|c| !c.is_werewolf())
            .map(|c| c.id)
            .collect();
        for id in &villagers[..3] {
            game.eliminate(*id).unwrap();
            assert!(game.winner().is_none());
        }
        game.eliminate(villagers[3]).unwrap();
        assert_eq!(game.winner(), Some(Faction::Werewolves));
    }

    #[test]
    fn test_speaking_order_wraps_after_last_death() {
        let mut game = started(6);
        assert_eq!(
            game.speaking_order(),
            (1..=8).map(CharacterId).collect::<Vec<_>>()
        );

        game.eliminate(CharacterId(3)).unwrap();
        game.eliminate(CharacterId(7)).unwrap();
        let order: Vec<u32> = game.speaking_order().iter().map(|id| id.0).collect();
        assert_eq!(order, [8, 1, 2, 4, 5, 6]);
    }

    #[test]
    fn test_eliminating_twice_is_invariant_violation() {
        let mut game = started(7);
        game.eliminate(CharacterId(1)).unwrap();
        assert!(matches!(
            game.eliminate(CharacterId(1)),
            Err(GameError::Invariant(_))
        ));
    }

    #[test]
    fn test_potions_are_one_shot() {
        let mut potions = Potions::default();
        potions.use_save().unwrap();
        assert!(potions.use_save().is_err());
        assert!(potions.save_used());
        assert!(!potions.poison_used());
    }

    #[test]
    fn test_deck_guard_variant() {
        let deck = RoleDeck::default().with(Role::Guard, 1).with(Role::Villager, 3);
        let config = GameConfig::new().with_deck(deck);
        let mut rng = StdRng::seed_from_u64(8);
        let game = Game::setup(&config, &roster(8), &mut rng).unwrap();
        assert!(game.get_by_role(Role::Guard).is_some());
    }
}
