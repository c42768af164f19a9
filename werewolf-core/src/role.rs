//! Roles, factions and the role deck dealt at game start.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GameError;

/// A character's secret role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Werewolf,
    Villager,
    Seer,
    Witch,
    Guard,
    Hunter,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Werewolf,
        Role::Villager,
        Role::Seer,
        Role::Witch,
        Role::Guard,
        Role::Hunter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Werewolf => "werewolf",
            Role::Villager => "villager",
            Role::Seer => "seer",
            Role::Witch => "witch",
            Role::Guard => "guard",
            Role::Hunter => "hunter",
        }
    }

    pub fn faction(self) -> Faction {
        match self {
            Role::Werewolf => Faction::Werewolves,
            _ => Faction::Villagers,
        }
    }

    pub fn is_werewolf(self) -> bool {
        self == Role::Werewolf
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The two winning sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Werewolves,
    Villagers,
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Faction::Werewolves => f.write_str("werewolves"),
            Faction::Villagers => f.write_str("villagers"),
        }
    }
}

/// How many of each role go into the deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleDeck {
    pub werewolf: usize,
    pub villager: usize,
    pub seer: usize,
    pub witch: usize,
    pub guard: usize,
    pub hunter: usize,
}

impl Default for RoleDeck {
    /// The classic eight-player table: two wolves, seer, witch, four villagers.
    fn default() -> Self {
        Self {
            werewolf: 2,
            villager: 4,
            seer: 1,
            witch: 1,
            guard: 0,
            hunter: 0,
        }
    }
}

impl RoleDeck {
    /// A deck with no cards, for building up with [`RoleDeck::with`].
    pub fn empty() -> Self {
        Self {
            werewolf: 0,
            villager: 0,
            seer: 0,
            witch: 0,
            guard: 0,
            hunter: 0,
        }
    }

    /// Set the count for one role.
    pub fn with(mut self, role: Role, count: usize) -> Self {
        *self.slot_mut(role) = count;
        self
    }

    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::Werewolf => self.werewolf,
            Role::Villager => self.villager,
            Role::Seer => self.seer,
            Role::Witch => self.witch,
            Role::Guard => self.guard,
            Role::Hunter => self.hunter,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut usize {
        match role {
            Role::Werewolf => &mut self.werewolf,
            Role::Villager => &mut self.villager,
            Role::Seer => &mut self.seer,
            Role::Witch => &mut self.witch,
            Role::Guard => &mut self.guard,
            Role::Hunter => &mut self.hunter,
        }
    }

    /// Total number of cards.
    pub fn size(&self) -> usize {
        Role::ALL.iter().map(|r| self.count(*r)).sum()
    }

    /// Check that the deck can seat `players` and forms a playable game.
    pub fn validate(&self, players: usize) -> Result<(), GameError> {
        if self.size() != players {
            return Err(GameError::DeckMismatch {
                deck: self.size(),
                players,
            });
        }
        if self.werewolf == 0 {
            return Err(GameError::Config("deck needs at least one werewolf".into()));
        }
        if self.werewolf >= players - self.werewolf {
            return Err(GameError::Config(
                "werewolves would win before the first night".into(),
            ));
        }
        for role in [Role::Seer, Role::Witch, Role::Guard, Role::Hunter] {
            if self.count(role) > 1 {
                return Err(GameError::Config(format!(
                    "at most one {role} is supported, deck has {}",
                    self.count(role)
                )));
            }
        }
        Ok(())
    }

    /// Lay out every card and Fisher-Yates shuffle them.
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Role> {
        let mut cards: Vec<Role> = Role::ALL
            .iter()
            .flat_map(|role| std::iter::repeat(*role).take(self.count(*role)))
            .collect();
        cards.shuffle(rng);
        cards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_deck_seats_eight() {
        let deck = RoleDeck::default();
        assert_eq!(deck.size(), 8);
        assert!(deck.validate(8).is_ok());
    }

    #[test]
    fn test_deck_size_mismatch() {
        let err = RoleDeck::default().validate(9).unwrap_err();
        assert!(matches!(err, GameError::DeckMismatch { deck: 8, players: 9 }));
    }

    #[test]
    fn test_deck_rejects_duplicate_specials() {
        let deck = RoleDeck::default().with(Role::Seer, 2).with(Role::Villager, 3);
        assert!(matches!(deck.validate(8), Err(GameError::Config(_))));
    }

    #[test]
    fn test_deck_rejects_wolf_majority() {
        let deck = RoleDeck::empty()
            .with(Role::Werewolf, 2)
            .with(Role::Villager, 2);
        assert!(deck.validate(4).is_err());
    }

    #[test]
    fn test_shuffle_keeps_counts() {
        let deck = RoleDeck::default().with(Role::Guard, 1).with(Role::Villager, 3);
        let mut rng = StdRng::seed_from_u64(7);
        let cards = deck.shuffled(&mut rng);
        assert_eq!(cards.len(), 8);
        for role in Role::ALL {
            assert_eq!(cards.iter().filter(|r| **r == role).count(), deck.count(role));
        }
    }

    #[test]
    fn test_faction() {
        assert_eq!(Role::Werewolf.faction(), Faction::Werewolves);
        assert_eq!(Role::Hunter.faction(), Faction::Villagers);
        assert_eq!(Role::Seer.to_string(), "seer");
    }
}
