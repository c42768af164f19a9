//! Night resolution: werewolf kill, seer check, witch potions, guard, dawn.
//!
//! Sub-phases run in a fixed order and each is a no-op when its role is dead
//! or absent. Results accumulate in the game's night scratch state and are
//! only applied at dawn. The scratch state is cleared when the next night
//! begins, so every sub-phase of one night sees the same values.

use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::character::{BeliefSource, CharacterId, SEER_CHECK_CONFIDENCE};
use crate::decision::{Actor, Choice, DecisionKind, DecisionRequest, Selection};
use crate::error::{GameError, GameResult};
use crate::log::{MessageType, Source};
use crate::moderator::Moderator;
use crate::role::Role;

impl Moderator {
    pub(crate) async fn werewolf_phase(&mut self) -> GameResult<()> {
        let wolves: Vec<CharacterId> = self.game.alive_werewolves().map(|c| c.id).collect();
        let targets: Vec<Choice> = self
            .game
            .get_alive()
            .filter(|c| !c.is_werewolf())
            .map(Choice::of)
            .collect();
        if wolves.is_empty() || targets.is_empty() {
            return Ok(());
        }

        let mut requests = Vec::with_capacity(wolves.len());
        for id in &wolves {
            let actor = Actor::of(self.character(*id)?);
            let context = self.context_for(*id)?;
            requests.push(DecisionRequest::target(
                DecisionKind::Kill,
                actor,
                context,
                targets.clone(),
            ));
        }

        // Every wolf is asked before anything is tallied.
        let provider = self.provider.clone();
        let outcomes = join_all(requests.iter().map(|r| provider.decide(r))).await;

        let mut tally: BTreeMap<CharacterId, usize> = BTreeMap::new();
        let mut call_ids = Vec::new();
        for (request, outcome) in requests.iter().zip(outcomes) {
            let resolved = self.settle(request, outcome);
            let Some(target) = resolved.selection.target() else {
                continue;
            };
            *tally.entry(target).or_default() += 1;
            call_ids.push(resolved.call_id);

            let intent = format!(
                "{} wants to kill {}",
                request.actor.name,
                self.game.name_of(target)
            );
            self.game
                .record_action(request.actor.id, &intent, vec![resolved.call_id])?;
            for mate in &wolves {
                if *mate != request.actor.id {
                    self.observe(*mate, &intent);
                }
            }
            self.remember(
                request,
                &resolved.selection,
                resolved.rationale.clone(),
                &resolved,
            )?;
            self.explain(request, &resolved.selection, &resolved).await;
        }

        let Some(victim) = self.plurality(&tally) else {
            return Ok(());
        };
        self.game.night.killed_at_night = Some(victim);
        let message = format!("The werewolves chose to kill {}", self.game.name_of(victim));
        info!(day = self.game.current_day(), victim = %self.game.name_of(victim), "Werewolf kill");
        self.game
            .record(Source::System, &message, false, MessageType::Action, call_ids);
        self.publish("The werewolves have chosen their victim");
        Ok(())
    }

    pub(crate) async fn seer_phase(&mut self) -> GameResult<()> {
        let Some(seer) = self.game.get_by_role(Role::Seer) else {
            return Ok(());
        };
        let seer_id = seer.id;
        let checked: HashSet<CharacterId> = seer
            .memory()
            .decisions_of(DecisionKind::Check)
            .filter_map(|d| d.target_id)
            .collect();

        let others: Vec<Choice> = self
            .game
            .get_alive()
            .filter(|c| c.id != seer_id)
            .map(Choice::of)
            .collect();
        let unchecked: Vec<Choice> = others
            .iter()
            .filter(|c| !checked.contains(&c.id))
            .cloned()
            .collect();
        let choices = if unchecked.is_empty() { others } else { unchecked };
        if choices.is_empty() {
            return Ok(());
        }

        let request = DecisionRequest::target(
            DecisionKind::Check,
            Actor::of(self.character(seer_id)?),
            self.context_for(seer_id)?,
            choices,
        );
        let resolved = self.ask(&request).await;
        let Some(target) = resolved.selection.target() else {
            return Ok(());
        };

        let target_name = self.game.name_of(target);
        let is_werewolf = self.character(target)?.is_werewolf();
        let verdict = if is_werewolf {
            "is a werewolf"
        } else {
            "is a good person"
        };
        self.game.record_action(
            seer_id,
            format!("{} checked {target_name}: {verdict}", request.actor.name),
            vec![resolved.call_id],
        )?;

        let day = self.game.current_day();
        let phase = self.game.phase();
        if let Some(seer) = self.game.get_mut(seer_id) {
            let memory = seer.memory_mut();
            memory.update_belief(
                &target_name,
                verdict,
                SEER_CHECK_CONFIDENCE,
                BeliefSource::SeerCheck,
            );
            memory.observe(format!("I checked {target_name}: {verdict}"), day, phase);
        }
        self.remember(
            &request,
            &resolved.selection,
            resolved.rationale.clone(),
            &resolved,
        )?;
        self.explain(&request, &resolved.selection, &resolved).await;
        self.publish("The seer has made a check");
        Ok(())
    }

    pub(crate) async fn witch_phase(&mut self) -> GameResult<()> {
        let Some(witch) = self.game.get_by_role(Role::Witch) else {
            return Ok(());
        };
        let witch_id = witch.id;

        if let Some(victim) = self.game.night.killed_at_night {
            if !self.game.potions().save_used() {
                self.offer_save(witch_id, victim).await?;
            }
        }
        if !self.game.potions().poison_used() {
            self.offer_poison(witch_id).await?;
        }
        self.publish("The witch has acted");
        Ok(())
    }

    async fn offer_save(&mut self, witch_id: CharacterId, victim: CharacterId) -> GameResult<()> {
        let victim_name = self.game.name_of(victim);
        self.observe(witch_id, &format!("{victim_name} was attacked tonight"));

        let request = DecisionRequest::optional(
            DecisionKind::Save,
            Actor::of(self.character(witch_id)?),
            self.context_for(witch_id)?,
            vec![Choice::of(self.character(victim)?)],
        );
        let resolved = self.ask(&request).await;

        let message = if resolved.selection == Selection::Target(victim) {
            self.game.potions_mut().use_save()?;
            self.game.night.saved_by_witch = true;
            format!("{} used the antidote on {victim_name}", request.actor.name)
        } else {
            format!("{} kept the antidote", request.actor.name)
        };
        self.game
            .record_action(witch_id, message, vec![resolved.call_id])?;
        self.remember(
            &request,
            &resolved.selection,
            resolved.rationale.clone(),
            &resolved,
        )?;
        self.explain(&request, &resolved.selection, &resolved).await;
        Ok(())
    }

    async fn offer_poison(&mut self, witch_id: CharacterId) -> GameResult<()> {
        let choices: Vec<Choice> = self
            .game
            .get_alive()
            .filter(|c| c.id != witch_id)
            .map(Choice::of)
            .collect();
        if choices.is_empty() {
            return Ok(());
        }

        let request = DecisionRequest::optional(
            DecisionKind::Poison,
            Actor::of(self.character(witch_id)?),
            self.context_for(witch_id)?,
            choices,
        );
        let resolved = self.ask(&request).await;

        let applied = match resolved.selection.target() {
            Some(target) => {
                if self.poison_allowed(target)? {
                    Some(target)
                } else {
                    info!(target = %self.game.name_of(target), "Poison withheld by policy");
                    None
                }
            }
            None => None,
        };

        let message = match applied {
            Some(target) => {
                self.game.potions_mut().use_poison()?;
                self.game.night.poisoned_by_witch = Some(target);
                format!("{} poisoned {}", request.actor.name, self.game.name_of(target))
            }
            None => format!("{} kept the poison", request.actor.name),
        };
        self.game
            .record_action(witch_id, message, vec![resolved.call_id])?;

        let applied_selection = applied.map_or(Selection::Pass, Selection::Target);
        let reason = if applied_selection == resolved.selection {
            resolved.rationale.clone()
        } else {
            None
        };
        self.remember(&request, &applied_selection, reason, &resolved)?;
        if applied_selection == resolved.selection {
            self.explain(&request, &applied_selection, &resolved).await;
        }
        Ok(())
    }

    /// Guard-rails against a provider poisoning its own side.
    fn poison_allowed(&mut self, target: CharacterId) -> GameResult<bool> {
        let policy = &self.config.policy;
        let target = self.character(target)?;
        if target.is(Role::Seer) && policy.protect_seer_from_poison {
            return Ok(false);
        }
        if !target.is_werewolf() {
            let p = policy.good_poison_block_probability;
            return Ok(!self.rng.gen_bool(p));
        }
        Ok(true)
    }

    pub(crate) async fn guard_phase(&mut self) -> GameResult<()> {
        let Some(guard) = self.game.get_by_role(Role::Guard) else {
            return Ok(());
        };
        let guard_id = guard.id;
        let choices: Vec<Choice> = self.game.get_alive().map(Choice::of).collect();

        let request = DecisionRequest::target(
            DecisionKind::Protect,
            Actor::of(self.character(guard_id)?),
            self.context_for(guard_id)?,
            choices,
        );
        let resolved = self.ask(&request).await;
        let Some(chosen) = resolved.selection.target() else {
            return Ok(());
        };

        let day = self.game.current_day();
        let repeat = matches!(
            self.game.last_protected,
            Some((last_day, last)) if last == chosen && last_day + 1 == day
        );
        let target = if repeat {
            let others: Vec<CharacterId> = request
                .choices
                .iter()
                .map(|c| c.id)
                .filter(|id| *id != chosen)
                .collect();
            let Some(alternative) = others.choose(&mut self.rng).copied() else {
                warn!(guard = %request.actor.name, "Nobody else to protect");
                return Ok(());
            };
            warn!(
                guard = %request.actor.name,
                repeated = %self.game.name_of(chosen),
                forced = %self.game.name_of(alternative),
                "Guard may not protect the same player twice in a row"
            );
            alternative
        } else {
            chosen
        };

        if let Some((last_day, last)) = self.game.last_protected {
            if last_day + 1 == day && last == target {
                return Err(GameError::invariant("guard protected the same target twice"));
            }
        }
        self.game.night.protected_by_guard = Some(target);
        self.game.last_protected = Some((day, target));
        self.game.record_action(
            guard_id,
            format!("{} protected {}", request.actor.name, self.game.name_of(target)),
            vec![resolved.call_id],
        )?;

        let applied = Selection::Target(target);
        if repeat {
            self.remember(
                &request,
                &applied,
                Some("Could not protect the same player twice in a row".into()),
                &resolved,
            )?;
        } else {
            self.remember(&request, &applied, resolved.rationale.clone(), &resolved)?;
            self.explain(&request, &applied, &resolved).await;
        }
        self.publish("The guard has chosen whom to protect");
        Ok(())
    }

    /// Apply the night's results.
    ///
    /// The wolf victim dies unless saved or protected. The poison target dies
    /// regardless. The wolf victim is processed first.
    pub(crate) fn dawn_phase(&mut self) -> GameResult<()> {
        let night = self.game.night.clone();
        let mut deaths: Vec<(CharacterId, &str)> = Vec::new();

        if let Some(victim) = night.killed_at_night {
            let protected = night.protected_by_guard == Some(victim);
            if !night.saved_by_witch && !protected {
                deaths.push((victim, "was killed during the night"));
            }
        }
        if let Some(poisoned) = night.poisoned_by_witch {
            if !deaths.iter().any(|(id, _)| *id == poisoned) {
                deaths.push((poisoned, "was poisoned"));
            }
        }

        self.game.announce("Dawn breaks.");
        if deaths.is_empty() {
            self.game.announce("It was a peaceful night. Nobody died.");
            self.observe_all("Nobody died last night");
            self.publish("It was a peaceful night");
            return Ok(());
        }

        for (id, cause) in deaths {
            if !self.game.is_alive(id) {
                continue;
            }
            let message = format!("{} {cause}", self.game.name_of(id));
            self.game.eliminate(id)?;
            info!(day = self.game.current_day(), %message, "Night death");
            self.game.announce(&message);
            self.observe_all(&message);
            self.publish(message);
        }
        Ok(())
    }
}
