//! Day protocol: discussion, vote, PK defense, revote and the hunter's shot.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::character::{BeliefSource, CharacterId, SPEECH_CONFIDENCE};
use crate::decision::{fallback_line, find_mentions, Actor, Choice, DecisionKind, DecisionRequest, Selection};
use crate::error::{GameError, GameResult};
use crate::events::GameEvent;
use crate::log::{MessageType, Source};
use crate::moderator::{leaders, Moderator};
use crate::role::Role;

const SUSPICION_WORDS: &[&str] = &[
    "suspect",
    "suspicious",
    "werewolf",
    "wolf",
    "don't trust",
    "distrust",
    "怀疑",
    "可疑",
    "狼人",
    "不信任",
];

const TRUST_WORDS: &[&str] = &[
    "trust", "believe", "good person", "innocent", "信任", "好人", "相信",
];

/// Read a stance out of a public statement. Suspicion wins over trust.
pub(crate) fn stance(statement: &str) -> Option<&'static str> {
    let lower = statement.to_lowercase();
    if SUSPICION_WORDS.iter().any(|w| lower.contains(w)) {
        Some("might be a werewolf")
    } else if TRUST_WORDS.iter().any(|w| lower.contains(w)) {
        Some("might be good")
    } else {
        None
    }
}

/// Cut `text` to at most `max` characters.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl Moderator {
    pub(crate) async fn discussion_phase(&mut self) -> GameResult<()> {
        let day = self.game.current_day();
        self.game.announce(format!("Day {day} discussion begins."));
        self.publish(format!("Day {day} discussion begins"));

        for speaker in self.game.speaking_order() {
            if self.game.is_alive(speaker) {
                self.speak(speaker, DecisionKind::Statement).await?;
            }
        }
        Ok(())
    }

    /// Two-stage speech: private reasoning, then a public statement built on it.
    pub(crate) async fn speak(&mut self, speaker: CharacterId, kind: DecisionKind) -> GameResult<()> {
        let actor = Actor::of(self.character(speaker)?);
        let context = self.context_for(speaker)?;
        let day = self.game.current_day();
        let phase = self.game.phase();

        let thought_request =
            DecisionRequest::speech(DecisionKind::InnerThought, actor.clone(), context.clone());
        let thought = self.ask(&thought_request).await;
        let thought_text = thought.selection.text().unwrap_or_default().to_string();
        if let Some(c) = self.game.get_mut(speaker) {
            c.memory_mut().record_inner_thought(&thought_text, day, phase);
        }

        let summary = truncate_chars(&thought_text, self.config.inner_thought_summary_chars);
        let statement_request = DecisionRequest::speech(
            kind,
            actor.clone(),
            format!("{context}\nYour private reasoning: {summary}"),
        );
        let statement = self.ask(&statement_request).await;
        let text = match statement.selection {
            Selection::Text(text) => text,
            _ => fallback_line(&actor.name),
        };

        self.game.record(
            Source::Character {
                id: actor.id,
                name: actor.name.clone(),
            },
            &text,
            true,
            MessageType::PublicStatement,
            vec![thought.call_id, statement.call_id],
        );
        if let Some(c) = self.game.get_mut(speaker) {
            c.memory_mut().record_statement(&text, day, phase);
        }
        self.hear(speaker, &text);
        self.publish(format!("{}: {text}", actor.name));

        let voice = self.character(speaker)?.voice.clone();
        self.await_playback(&actor.name, actor.id, voice, text).await;
        Ok(())
    }

    /// Listeners observe a statement and update beliefs about whoever it names.
    fn hear(&mut self, speaker: CharacterId, statement: &str) {
        let speaker_name = self.game.name_of(speaker);
        let observation = format!("{speaker_name} said: {statement}");
        let belief = stance(statement);
        let others = self.game.characters().iter().filter(|c| c.id != speaker);
        let mentioned: Vec<(CharacterId, String)> =
            find_mentions(statement, others.clone().map(|c| c.name.as_str()))
                .into_iter()
                .filter_map(|(_, name)| others.clone().find(|c| c.name == name))
                .map(|c| (c.id, c.name.clone()))
                .collect();
        let listeners: Vec<CharacterId> = self
            .game
            .get_alive()
            .filter(|c| c.id != speaker)
            .map(|c| c.id)
            .collect();

        let day = self.game.current_day();
        let phase = self.game.phase();
        for listener in listeners {
            let Some(c) = self.game.get_mut(listener) else {
                continue;
            };
            let memory = c.memory_mut();
            memory.observe(&observation, day, phase);
            if let Some(belief) = belief {
                for (id, name) in &mentioned {
                    if *id != listener {
                        memory.update_belief(name, belief, SPEECH_CONFIDENCE, BeliefSource::Speech);
                    }
                }
            }
        }
    }

    /// Broadcast a statement and wait for its playback acknowledgment.
    async fn await_playback(
        &mut self,
        speaker: &str,
        character_id: CharacterId,
        voice: String,
        text: String,
    ) {
        let timeout = self.config.pacing.playback_timeout;
        if !self.is_current() {
            return;
        }
        if !timeout.is_zero() {
            self.playback.arm(speaker);
        }
        let delivered = self.emit(GameEvent::Speak {
            speaker: speaker.to_string(),
            character_id,
            voice,
            text,
        });
        if delivered && !timeout.is_zero() {
            let gate = self.playback.clone();
            gate.wait_for(speaker, timeout).await;
        }
    }

    pub(crate) async fn vote_phase(&mut self) -> GameResult<()> {
        self.game.votes.clear();
        self.game.revotes.clear();
        self.game.pk_candidates.clear();

        let voters: Vec<CharacterId> = self.game.get_alive().map(|c| c.id).collect();
        if voters.len() <= 2 {
            self.game
                .announce("Too few players remain. The vote is skipped.");
            self.publish("Vote skipped");
            return Ok(());
        }
        self.game.announce("Voting begins.");
        self.publish("Voting begins");

        for voter in &voters {
            let choices: Vec<Choice> = voters
                .iter()
                .filter(|id| *id != voter)
                .map(|id| self.character(*id).map(Choice::of))
                .collect::<GameResult<_>>()?;
            let target = self.cast_vote(*voter, DecisionKind::Vote, choices).await?;
            *self.game.votes.entry(target).or_default() += 1;
        }

        let tally = self.game.votes.clone();
        self.announce_tally("Vote results", &tally);

        match leaders(&tally).as_slice() {
            [] => Ok(()),
            [executed] => self.execute(*executed).await,
            tied => {
                self.game.pk_candidates = tied.iter().copied().collect();
                let names: Vec<String> = tied.iter().map(|id| self.game.name_of(*id)).collect();
                let message = format!("The vote is tied between {}. PK round.", names.join(", "));
                self.game.announce(&message);
                self.publish(message);
                Ok(())
            }
        }
    }

    /// Ask one voter, apply the teammate-vote policy, and record the vote publicly.
    async fn cast_vote(
        &mut self,
        voter: CharacterId,
        kind: DecisionKind,
        choices: Vec<Choice>,
    ) -> GameResult<CharacterId> {
        let request = DecisionRequest::target(
            kind,
            Actor::of(self.character(voter)?),
            self.context_for(voter)?,
            choices,
        );
        let resolved = self.ask(&request).await;
        let chosen = resolved
            .selection
            .target()
            .ok_or_else(|| GameError::invariant(format!("{kind} without a target")))?;
        let target = self.redirect_teammate_vote(&request, chosen)?;

        let message = format!("{} votes for {}", request.actor.name, self.game.name_of(target));
        self.game.record(
            Source::Character {
                id: voter,
                name: request.actor.name.clone(),
            },
            &message,
            true,
            MessageType::Action,
            vec![resolved.call_id],
        );

        let applied = Selection::Target(target);
        if target == chosen {
            self.remember(&request, &applied, resolved.rationale.clone(), &resolved)?;
            self.explain(&request, &applied, &resolved).await;
        } else {
            self.remember(&request, &applied, None, &resolved)?;
        }
        Ok(target)
    }

    /// Werewolves voting for a teammate may be moved onto a non-werewolf.
    fn redirect_teammate_vote(
        &mut self,
        request: &DecisionRequest,
        chosen: CharacterId,
    ) -> GameResult<CharacterId> {
        let voter_is_wolf = request.actor.role == Some(Role::Werewolf);
        if !voter_is_wolf || !self.character(chosen)?.is_werewolf() {
            return Ok(chosen);
        }
        let p = self.config.policy.werewolf_teammate_vote_redirect_probability;
        if !self.rng.gen_bool(p) {
            return Ok(chosen);
        }

        let good: Vec<CharacterId> = request
            .choices
            .iter()
            .filter(|c| self.game.get(c.id).is_some_and(|c| !c.is_werewolf()))
            .map(|c| c.id)
            .collect();
        match good.choose(&mut self.rng) {
            Some(target) => {
                info!(
                    voter = %request.actor.name,
                    from = %self.game.name_of(chosen),
                    to = %self.game.name_of(*target),
                    "Werewolf vote redirected away from a teammate"
                );
                Ok(*target)
            }
            None => Ok(chosen),
        }
    }

    pub(crate) async fn pk_phase(&mut self) -> GameResult<()> {
        let candidates = self.pk_order();
        let names: Vec<String> = candidates.iter().map(|id| self.game.name_of(*id)).collect();
        self.game
            .announce(format!("PK defense: {}", names.join(", ")));
        self.publish("PK defense begins");

        for candidate in candidates {
            if self.game.is_alive(candidate) {
                self.speak(candidate, DecisionKind::Defense).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn revote_phase(&mut self) -> GameResult<()> {
        self.game.revotes.clear();
        let candidates: Vec<CharacterId> = self
            .pk_order()
            .into_iter()
            .filter(|id| self.game.is_alive(*id))
            .collect();
        if candidates.is_empty() {
            self.game.pk_candidates.clear();
            return Ok(());
        }
        let voters: Vec<CharacterId> = self
            .game
            .get_alive()
            .filter(|c| !candidates.contains(&c.id))
            .map(|c| c.id)
            .collect();

        let executed = if voters.is_empty() {
            let chosen = candidates
                .choose(&mut self.rng)
                .copied()
                .ok_or_else(|| GameError::invariant("no PK candidate to execute"))?;
            self.game.announce(format!(
                "Nobody is left to revote. {} is chosen by lot.",
                self.game.name_of(chosen)
            ));
            chosen
        } else {
            self.game.announce("Revote begins among the PK candidates.");
            self.publish("Revote begins");
            let choices: Vec<Choice> = candidates
                .iter()
                .map(|id| self.character(*id).map(Choice::of))
                .collect::<GameResult<_>>()?;
            for voter in &voters {
                let target = self
                    .cast_vote(*voter, DecisionKind::Revote, choices.clone())
                    .await?;
                *self.game.revotes.entry(target).or_default() += 1;
            }

            let tally = self.game.revotes.clone();
            self.announce_tally("Revote results", &tally);
            let tied = leaders(&tally);
            if tied.len() > 1 {
                warn!(tied = tied.len(), "Revote tied again, drawing lots");
            }
            let chosen = self
                .plurality(&tally)
                .ok_or_else(|| GameError::invariant("revote produced no result"))?;
            if tied.len() > 1 {
                self.game.announce(format!(
                    "The revote is tied again. {} is chosen by lot.",
                    self.game.name_of(chosen)
                ));
            }
            chosen
        };

        self.execute(executed).await?;
        self.game.pk_candidates.clear();
        self.game.revotes.clear();
        Ok(())
    }

    /// PK candidates in roster order.
    fn pk_order(&self) -> Vec<CharacterId> {
        self.game
            .characters()
            .iter()
            .map(|c| c.id)
            .filter(|id| self.game.pk_candidates.contains(id))
            .collect()
    }

    fn announce_tally(&mut self, title: &str, tally: &BTreeMap<CharacterId, usize>) {
        let parts: Vec<String> = tally
            .iter()
            .map(|(id, count)| format!("{} {count}", self.game.name_of(*id)))
            .collect();
        let message = format!("{title}: {}", parts.join(", "));
        self.game.announce(&message);
        self.observe_all(&message);
        self.publish(message);
    }

    /// Execute a character. An executed hunter shoots if the game goes on.
    async fn execute(&mut self, id: CharacterId) -> GameResult<()> {
        let name = self.game.name_of(id);
        self.game.eliminate(id)?;
        let message = format!("{name} was executed");
        info!(day = self.game.current_day(), executed = %name, "Execution");
        self.game.announce(&message);
        self.observe_all(&message);
        self.publish(message);

        if self.character(id)?.is(Role::Hunter) && self.game.winner().is_none() {
            self.hunter_shot(id).await?;
        }
        Ok(())
    }

    async fn hunter_shot(&mut self, hunter: CharacterId) -> GameResult<()> {
        let choices: Vec<Choice> = self.game.get_alive().map(Choice::of).collect();
        if choices.is_empty() {
            return Ok(());
        }
        let request = DecisionRequest::target(
            DecisionKind::Shoot,
            Actor::of(self.character(hunter)?),
            self.context_for(hunter)?,
            choices,
        );
        let resolved = self.ask(&request).await;
        let target = resolved
            .selection
            .target()
            .ok_or_else(|| GameError::invariant("hunter shot without a target"))?;

        let message = format!(
            "{} the hunter shot {}",
            request.actor.name,
            self.game.name_of(target)
        );
        self.game.eliminate(target)?;
        self.game.record(
            Source::Character {
                id: hunter,
                name: request.actor.name.clone(),
            },
            &message,
            true,
            MessageType::Action,
            vec![resolved.call_id],
        );
        info!(day = self.game.current_day(), %message, "Hunter shot");
        self.observe_all(&message);
        self.remember(
            &request,
            &resolved.selection,
            resolved.rationale.clone(),
            &resolved,
        )?;
        self.publish(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stance_suspicion_first() {
        assert_eq!(stance("I don't trust Bob at all"), Some("might be a werewolf"));
        assert_eq!(stance("I trust Carol"), Some("might be good"));
        assert_eq!(stance("我怀疑张三"), Some("might be a werewolf"));
        assert_eq!(stance("我相信李四是好人"), Some("might be good"));
        assert_eq!(stance("Nice weather"), None);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("狼人杀游戏", 2), "狼人");
    }
}
