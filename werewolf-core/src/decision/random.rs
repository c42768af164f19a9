//! Offline provider: uniform legal choices and canned lines.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::{DecisionError, DecisionKind, DecisionProvider, DecisionRequest, Selection, Verdict};
use crate::role::Role;

const DISCUSSION_LINES: &[&str] = &[
    "I think whoever died last night was the seer, and the wolves knew it.",
    "Going by everyone's speeches, I suspect one of us is lying about their role.",
    "I am on the good side, trust me. We need to find the werewolves together.",
    "Yesterday's vote was strange. Someone is muddying the waters on purpose.",
    "Watch the quiet ones. Werewolves like to stay out of sight.",
];

const DEFENSE_LINES: &[&str] = &[
    "I am not a werewolf. Look at how I voted yesterday before you decide.",
    "Voting me out helps nobody but the wolves. Think about who pushed this tie.",
    "I have been honest from the start, and I trust the others to see that.",
];

const WEREWOLF_THOUGHTS: &[&str] = &[
    "This one acts like an important villager. Best to remove them.",
    "They keep doubting my teammate. They have to go.",
    "Too quiet. I should keep suspicion off myself and my partner.",
];

const SEER_THOUGHTS: &[&str] = &[
    "Their speech was odd, so I want to check them.",
    "I found a werewolf. I need to tell everyone tomorrow.",
    "A good person. I have to keep looking.",
];

const WITCH_THOUGHTS: &[&str] = &[
    "This player matters enough to spend my antidote.",
    "I should hold my potions for a more critical moment.",
    "That behaviour is suspicious. The poison might be worth it.",
];

const GUARD_THOUGHTS: &[&str] = &[
    "This one might be a key role. They need protecting.",
    "I will protect someone different so the wolves cannot read me.",
];

const VILLAGER_THOUGHTS: &[&str] = &[
    "After last night I suspect that one is a werewolf.",
    "I am just a villager, but I noticed some suspicious behaviour.",
    "We should stick together and find the real wolves.",
];

/// Decides uniformly at random and speaks from a fixed phrasebook.
pub struct RandomProvider {
    rng: Mutex<StdRng>,
    /// Chance of accepting an optional choice instead of passing.
    accept_probability: f64,
}

impl RandomProvider {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            accept_probability: 0.3,
        }
    }

    pub fn with_accept_probability(mut self, probability: f64) -> Self {
        self.accept_probability = probability.clamp(0.0, 1.0);
        self
    }

    fn line(rng: &mut StdRng, request: &DecisionRequest) -> String {
        let pool = match request.kind {
            DecisionKind::Statement => DISCUSSION_LINES,
            DecisionKind::Defense => DEFENSE_LINES,
            _ => match request.actor.role {
                Some(Role::Werewolf) => WEREWOLF_THOUGHTS,
                Some(Role::Seer) => SEER_THOUGHTS,
                Some(Role::Witch) => WITCH_THOUGHTS,
                Some(Role::Guard) => GUARD_THOUGHTS,
                _ => VILLAGER_THOUGHTS,
            },
        };
        pool.choose(rng)
            .map(|line| line.to_string())
            .unwrap_or_else(|| super::fallback_line(&request.actor.name))
    }
}

impl Default for RandomProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionProvider for RandomProvider {
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, DecisionError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| DecisionError::Provider("random provider lock poisoned".into()))?;

        if request.kind.is_speech() {
            return Ok(Verdict::new(Selection::Text(Self::line(&mut rng, request))));
        }
        if request.allow_pass && !rng.gen_bool(self.accept_probability) {
            return Ok(Verdict::new(Selection::Pass));
        }
        let choice = request
            .choices
            .choose(&mut *rng)
            .ok_or_else(|| DecisionError::Unparseable("no legal choices".into()))?;
        let reason = Self::line(&mut rng, request);
        Ok(Verdict::new(Selection::Target(choice.id)).with_rationale(reason))
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{Character, CharacterId, CharacterProfile};
    use crate::decision::{Actor, Choice};

    fn request(kind: DecisionKind, allow_pass: bool) -> DecisionRequest {
        let mut c = Character::new(CharacterProfile::new(1, "Alice"));
        c.assign_role(Role::Witch).unwrap();
        DecisionRequest {
            kind,
            actor: Actor::of(&c),
            context: String::new(),
            choices: vec![Choice {
                id: CharacterId(2),
                name: "Bob".into(),
            }],
            allow_pass,
        }
    }

    #[tokio::test]
    async fn test_always_legal() {
        let provider = RandomProvider::seeded(5);
        for kind in [DecisionKind::Vote, DecisionKind::Kill, DecisionKind::Statement] {
            let req = if kind.is_speech() {
                DecisionRequest::speech(kind, request(kind, false).actor, String::new())
            } else {
                request(kind, false)
            };
            let verdict = provider.decide(&req).await.unwrap();
            assert!(req.is_legal(&verdict.selection), "{kind}: {:?}", verdict.selection);
        }
    }

    #[tokio::test]
    async fn test_never_accepts_when_probability_zero() {
        let provider = RandomProvider::seeded(6).with_accept_probability(0.0);
        let verdict = provider.decide(&request(DecisionKind::Poison, true)).await.unwrap();
        assert_eq!(verdict.selection, Selection::Pass);
    }
}
