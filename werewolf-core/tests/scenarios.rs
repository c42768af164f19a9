//! Scripted game scenarios.
//!
//! Every scenario uses a fixed deal and a scripted provider, so the outcome
//! depends only on the rules. No network access is needed.
//!
//! Run with: `cargo test -p werewolf-core --test scenarios`

use werewolf_core::character::{BeliefSource, CharacterId};
use werewolf_core::config::PolicyConfig;
use werewolf_core::context;
use werewolf_core::decision::DecisionKind;
use werewolf_core::game::{GameStatus, Phase};
use werewolf_core::log::MessageType;
use werewolf_core::role::{Faction, Role};
use werewolf_core::testing::{
    assert_alive, assert_alive_count, assert_dead, assert_phase, assert_winner, Scripted,
    ScriptedProvider, TestHarness,
};
use werewolf_core::visibility::is_visible;

use Role::{Guard, Hunter, Seer, Villager, Werewolf, Witch};

const CLASSIC: [Role; 8] = [
    Werewolf, Werewolf, Seer, Witch, Villager, Villager, Villager, Villager,
];

const WITH_GUARD: [Role; 9] = [
    Werewolf, Werewolf, Seer, Witch, Guard, Villager, Villager, Villager, Villager,
];

fn names(harness: &TestHarness, ids: impl IntoIterator<Item = CharacterId>) -> Vec<String> {
    ids.into_iter().map(|id| harness.game().name_of(id)).collect()
}

// =============================================================================
// NIGHT
// =============================================================================

#[tokio::test]
async fn test_unsaved_wolf_victim_dies_at_dawn() {
    let provider = ScriptedProvider::new().always(DecisionKind::Kill, Scripted::target("P7"));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_night().await.unwrap();

    assert_dead(&harness, "P7");
    assert_alive_count(&harness, 7);
    assert!(harness.has_message("P7 was killed during the night"));
    assert_eq!(harness.game().night().killed_at_night, Some(harness.id("P7")));
    assert_winner(&harness, None);
}

#[tokio::test]
async fn test_wolves_decide_concurrently_and_plurality_wins() {
    let provider = ScriptedProvider::new()
        .actor("P1", DecisionKind::Kill, Scripted::target("P5"))
        .actor("P2", DecisionKind::Kill, Scripted::target("P5"));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_phase(Phase::Werewolf).await.unwrap();

    let kills = harness.provider.requests_of(DecisionKind::Kill);
    assert_eq!(kills.len(), 2);
    for request in &kills {
        // Wolves never target their own pack.
        assert!(request.choice_named("P1").is_none());
        assert!(request.choice_named("P2").is_none());
    }
    assert_eq!(harness.game().night().killed_at_night, Some(harness.id("P5")));
}

#[tokio::test]
async fn test_witch_save_prevents_death() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Kill, Scripted::target("P6"))
        .always(DecisionKind::Save, Scripted::target("P6"));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_night().await.unwrap();

    assert_alive(&harness, "P6");
    assert_alive_count(&harness, 8);
    assert!(harness.game().potions().save_used());
    assert!(harness.has_message("peaceful night"));
}

#[tokio::test]
async fn test_poison_kills_through_guard_protection() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Kill, Scripted::target("P6"))
        .always(DecisionKind::Save, Scripted::target("P6"))
        .always(DecisionKind::Protect, Scripted::target("P7"))
        .always(DecisionKind::Poison, Scripted::target("P7"));
    let mut harness = TestHarness::new(&WITH_GUARD, provider);

    harness.run_night().await.unwrap();

    let night = harness.game().night();
    assert_eq!(night.protected_by_guard, Some(harness.id("P7")));
    assert_eq!(night.poisoned_by_witch, Some(harness.id("P7")));
    assert_alive(&harness, "P6");
    assert_dead(&harness, "P7");
    assert!(harness.has_message("P7 was poisoned"));
}

#[tokio::test]
async fn test_guarded_victim_survives() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Kill, Scripted::target("P8"))
        .always(DecisionKind::Protect, Scripted::target("P8"));
    let mut harness = TestHarness::new(&WITH_GUARD, provider);

    harness.run_night().await.unwrap();

    assert_alive(&harness, "P8");
    assert_alive_count(&harness, 9);
}

#[tokio::test]
async fn test_witch_potions_are_one_shot() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Kill, Scripted::target("P5"))
        .always(DecisionKind::Save, Scripted::target("P5"))
        .once("P4", DecisionKind::Poison, Scripted::target("P1"));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_night().await.unwrap();
    assert!(harness.game().potions().save_used());
    assert!(harness.game().potions().poison_used());
    assert_dead(&harness, "P1");

    harness.run_night().await.unwrap();

    // Neither potion is offered again.
    assert_eq!(harness.provider.requests_of(DecisionKind::Save).len(), 1);
    assert_eq!(harness.provider.requests_of(DecisionKind::Poison).len(), 1);
    assert_dead(&harness, "P5");
}

#[tokio::test]
async fn test_guard_never_protects_same_target_on_consecutive_nights() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Kill, Scripted::target("P6"))
        .always(DecisionKind::Protect, Scripted::target("P6"))
        .always(DecisionKind::Vote, Scripted::target("P7"));
    let mut harness = TestHarness::new(&WITH_GUARD, provider);

    // Night 1 through the day 1 vote.
    for _ in 0..8 {
        harness.step().await.unwrap();
    }
    assert_alive(&harness, "P6");
    assert_dead(&harness, "P7");
    assert_phase(&harness, Phase::Night);
    assert_eq!(harness.game().current_day(), 2);

    // Night 2 up to and including the guard.
    for _ in 0..5 {
        harness.step().await.unwrap();
    }
    assert_phase(&harness, Phase::Dawn);
    let protected = harness.game().night().protected_by_guard;
    assert!(protected.is_some());
    assert_ne!(protected, Some(harness.id("P6")));

    harness.step().await.unwrap();
    assert_dead(&harness, "P6");
}

#[tokio::test]
async fn test_seer_check_is_private_to_the_seer() {
    let provider = ScriptedProvider::new().always(DecisionKind::Check, Scripted::target("P1"));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_phase(Phase::Seer).await.unwrap();

    let game = harness.game();
    let entry = game
        .log()
        .entries()
        .iter()
        .find(|e| e.message.contains("checked P1"))
        .expect("seer check recorded");
    assert!(!entry.is_public);
    assert_eq!(entry.message_type, MessageType::Action);
    assert!(entry.message.contains("is a werewolf"));

    let seer = game.by_name("P3").unwrap();
    assert!(is_visible(entry, seer));
    for other in ["P1", "P2", "P4", "P5"] {
        assert!(!is_visible(entry, game.by_name(other).unwrap()), "{other} saw the check");
    }

    let beliefs = seer.memory().beliefs_about("P1");
    assert!(beliefs.iter().any(|b| b.belief.contains("werewolf")));
}

#[tokio::test]
async fn test_public_trust_does_not_override_seer_check() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Check, Scripted::target("P1"))
        .always(DecisionKind::Statement, Scripted::say("I trust P1, he is innocent."));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_phase(Phase::Seer).await.unwrap();
    harness.run_phase(Phase::Discussion).await.unwrap();

    let game = harness.game();
    let seer = game.by_name("P3").unwrap();
    let (_, latest) = seer
        .memory()
        .latest_beliefs()
        .find(|(target, _)| *target == "P1")
        .expect("belief about P1");
    assert_eq!(latest.source, BeliefSource::SeerCheck);
    assert_eq!(latest.belief, "is a werewolf");
    assert!(seer
        .memory()
        .beliefs_about("P1")
        .iter()
        .all(|b| b.source == BeliefSource::SeerCheck));

    let text = context::build(game, seer, 12);
    assert!(text.contains("P1 is a werewolf"), "{text}");
    assert!(!text.contains("P1: might be good"), "{text}");

    // Everyone else takes the speeches at face value.
    let listener = game.by_name("P7").unwrap();
    assert_eq!(listener.memory().beliefs_about("P1")[0].belief, "might be good");
}

// =============================================================================
// DAY
// =============================================================================

#[tokio::test]
async fn test_tied_vote_goes_to_pk_and_revote() {
    let roles = [Werewolf, Villager, Seer, Villager, Witch, Villager];
    let provider = ScriptedProvider::new()
        .actor("P2", DecisionKind::Vote, Scripted::target("P4"))
        .actor("P4", DecisionKind::Vote, Scripted::target("P6"))
        .actor("P6", DecisionKind::Vote, Scripted::target("P2"))
        .actor("P1", DecisionKind::Vote, Scripted::target("P2"))
        .actor("P3", DecisionKind::Vote, Scripted::target("P4"))
        .actor("P5", DecisionKind::Vote, Scripted::target("P6"))
        .actor("P1", DecisionKind::Revote, Scripted::target("P2"))
        .actor("P3", DecisionKind::Revote, Scripted::target("P2"))
        .actor("P5", DecisionKind::Revote, Scripted::target("P4"));
    let mut harness = TestHarness::new(&roles, provider);

    harness.run_phase(Phase::Vote).await.unwrap();
    assert_alive_count(&harness, 6);
    let candidates = names(&harness, harness.game().pk_candidates().iter().copied());
    assert_eq!(candidates, ["P2", "P4", "P6"]);

    harness.run_phase(Phase::Pk).await.unwrap();
    let defenders: Vec<String> = harness
        .provider
        .requests_of(DecisionKind::Defense)
        .iter()
        .map(|r| r.actor.name.clone())
        .collect();
    assert_eq!(defenders, ["P2", "P4", "P6"]);

    harness.run_phase(Phase::Revote).await.unwrap();
    let revotes = harness.provider.requests_of(DecisionKind::Revote);
    let voters: Vec<&str> = revotes.iter().map(|r| r.actor.name.as_str()).collect();
    assert_eq!(voters, ["P1", "P3", "P5"]);
    for request in &revotes {
        let choices: Vec<&str> = request.choices.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(choices, ["P2", "P4", "P6"]);
    }

    assert_dead(&harness, "P2");
    assert!(harness.game().pk_candidates().is_empty());
    assert!(harness.has_message("P2 was executed"));
}

#[tokio::test]
async fn test_revote_tied_again_is_settled_by_lot() {
    let roles = [Werewolf, Villager, Seer, Villager, Witch, Villager];
    let provider = ScriptedProvider::new()
        .actor("P1", DecisionKind::Vote, Scripted::target("P2"))
        .actor("P3", DecisionKind::Vote, Scripted::target("P2"))
        .actor("P5", DecisionKind::Vote, Scripted::target("P4"))
        .actor("P6", DecisionKind::Vote, Scripted::target("P4"))
        .actor("P2", DecisionKind::Vote, Scripted::target("P1"))
        .actor("P4", DecisionKind::Vote, Scripted::target("P3"))
        .actor("P1", DecisionKind::Revote, Scripted::target("P2"))
        .actor("P3", DecisionKind::Revote, Scripted::target("P2"))
        .actor("P5", DecisionKind::Revote, Scripted::target("P4"))
        .actor("P6", DecisionKind::Revote, Scripted::target("P4"));
    let mut harness = TestHarness::new(&roles, provider);

    harness.run_phase(Phase::Vote).await.unwrap();
    let candidates = names(&harness, harness.game().pk_candidates().iter().copied());
    assert_eq!(candidates, ["P2", "P4"]);

    harness.run_phase(Phase::Pk).await.unwrap();
    harness.run_phase(Phase::Revote).await.unwrap();

    assert_eq!(harness.provider.requests_of(DecisionKind::Revote).len(), 4);
    assert_alive_count(&harness, 5);
    let executed: Vec<&str> = ["P2", "P4"]
        .into_iter()
        .filter(|name| !harness.is_alive(name))
        .collect();
    assert_eq!(executed.len(), 1, "exactly one PK candidate is executed");
    assert!(harness.has_message("The revote is tied again"));
    assert!(harness.has_message(&format!("{} was executed", executed[0])));
    assert!(harness.game().pk_candidates().is_empty());
}

#[tokio::test]
async fn test_revote_without_voters_executes_a_candidate_by_lot() {
    let roles = [Werewolf, Villager, Villager, Seer, Villager];
    let provider = ScriptedProvider::new()
        .actor("P1", DecisionKind::Vote, Scripted::target("P2"))
        .actor("P2", DecisionKind::Vote, Scripted::target("P3"))
        .actor("P3", DecisionKind::Vote, Scripted::target("P1"));
    let mut harness = TestHarness::new(&roles, provider);
    harness.kill("P4");
    harness.kill("P5");

    harness.run_phase(Phase::Vote).await.unwrap();
    let candidates = names(&harness, harness.game().pk_candidates().iter().copied());
    assert_eq!(candidates, ["P1", "P2", "P3"]);
    assert_alive_count(&harness, 3);

    harness.run_phase(Phase::Pk).await.unwrap();
    harness.run_phase(Phase::Revote).await.unwrap();

    assert!(harness.provider.requests_of(DecisionKind::Revote).is_empty());
    assert!(harness.has_message("Nobody is left to revote"));
    assert_alive_count(&harness, 2);
    let executed: Vec<&str> = ["P1", "P2", "P3"]
        .into_iter()
        .filter(|name| !harness.is_alive(name))
        .collect();
    assert_eq!(executed.len(), 1);
    assert!(harness.has_message(&format!("{} was executed", executed[0])));
    assert!(harness.game().pk_candidates().is_empty());
}

#[tokio::test]
async fn test_statement_names_match_whole_words() {
    let roles = [
        Werewolf, Werewolf, Seer, Witch, Villager, Villager, Villager, Villager, Villager, Villager,
    ];
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Statement, Scripted::say("I suspect P10 is lying."));
    let mut harness = TestHarness::new(&roles, provider);

    harness.run_phase(Phase::Discussion).await.unwrap();

    let listener = harness.game().by_name("P7").unwrap();
    assert!(!listener.memory().beliefs_about("P10").is_empty());
    assert!(listener.memory().beliefs_about("P1").is_empty());
}

#[tokio::test]
async fn test_vote_skipped_with_two_alive() {
    let roles = [Werewolf, Villager, Villager, Villager];
    let mut harness = TestHarness::new(&roles, ScriptedProvider::new());
    harness.kill("P2");
    harness.kill("P3");
    // One wolf against one villager ends the game on the spot.
    assert_winner(&harness, Some(Faction::Werewolves));

    harness.run_phase(Phase::Vote).await.unwrap();
    assert!(harness.provider.requests_of(DecisionKind::Vote).is_empty());
    assert!(harness.has_message("vote is skipped"));
}

#[tokio::test]
async fn test_executed_hunter_shoots_and_win_is_reevaluated() {
    let roles = [Werewolf, Villager, Villager, Hunter, Villager, Seer];
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Vote, Scripted::target("P4"))
        .actor("P4", DecisionKind::Vote, Scripted::target("P2"))
        .always(DecisionKind::Shoot, Scripted::target("P1"));
    let mut harness = TestHarness::new(&roles, provider);

    harness.run_phase(Phase::Vote).await.unwrap();

    assert_dead(&harness, "P4");
    assert_dead(&harness, "P1");
    assert_alive_count(&harness, 4);
    assert_eq!(harness.provider.requests_of(DecisionKind::Shoot).len(), 1);
    assert_winner(&harness, Some(Faction::Villagers));
}

#[tokio::test]
async fn test_discussion_records_public_statements() {
    let provider = ScriptedProvider::new()
        .actor("P5", DecisionKind::Statement, Scripted::say("I suspect P1 is a wolf."))
        .actor("P6", DecisionKind::Statement, Scripted::Fail);
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.run_phase(Phase::Discussion).await.unwrap();

    let statements: Vec<_> = harness
        .game()
        .log()
        .entries()
        .iter()
        .filter(|e| e.message_type == MessageType::PublicStatement)
        .collect();
    assert_eq!(statements.len(), 8);
    assert!(statements.iter().all(|e| e.is_public));
    // Every statement links the inner thought and the statement call.
    assert!(statements.iter().all(|e| e.linked_decision_ids.len() == 2));

    // A failed provider still yields a line.
    let p6 = harness.id("P6");
    assert!(statements
        .iter()
        .any(|e| e.source.character_id() == Some(p6) && !e.message.is_empty()));

    let listener = harness.game().by_name("P7").unwrap();
    assert!(!listener.memory().beliefs_about("P1").is_empty());
    assert_eq!(harness.provider.requests_of(DecisionKind::InnerThought).len(), 8);
}

// =============================================================================
// GUARD-RAILS
// =============================================================================

fn strict_policy() -> PolicyConfig {
    PolicyConfig {
        protect_seer_from_poison: true,
        good_poison_block_probability: 1.0,
        werewolf_teammate_vote_redirect_probability: 1.0,
    }
}

#[tokio::test]
async fn test_poison_on_own_side_is_withheld() {
    let provider = ScriptedProvider::new()
        .once("P4", DecisionKind::Poison, Scripted::target("P3"))
        .once("P4", DecisionKind::Poison, Scripted::target("P5"))
        .once("P4", DecisionKind::Poison, Scripted::target("P1"));
    let mut harness =
        TestHarness::with_config(&CLASSIC, provider, |c| c.with_policy(strict_policy()));

    // The seer is always protected.
    harness.run_phase(Phase::Witch).await.unwrap();
    assert!(!harness.game().potions().poison_used());
    assert_eq!(harness.game().night().poisoned_by_witch, None);
    assert!(harness.has_message("P4 kept the poison"));

    // So is any other good player at probability 1.
    harness.run_phase(Phase::Witch).await.unwrap();
    assert!(!harness.game().potions().poison_used());
    assert_eq!(harness.game().night().poisoned_by_witch, None);
    assert!(harness.provider.requests_of(DecisionKind::Save).is_empty());

    // A werewolf can still be poisoned.
    harness.run_phase(Phase::Witch).await.unwrap();
    assert!(harness.game().potions().poison_used());
    assert_eq!(harness.game().night().poisoned_by_witch, Some(harness.id("P1")));
    assert_eq!(harness.provider.requests_of(DecisionKind::Poison).len(), 3);

    harness.run_phase(Phase::Dawn).await.unwrap();
    assert_dead(&harness, "P1");
    assert_alive(&harness, "P3");
    assert_alive(&harness, "P5");
}

#[tokio::test]
async fn test_werewolf_vote_moves_off_teammate() {
    let provider = ScriptedProvider::new()
        .always(DecisionKind::Vote, Scripted::target("P8"))
        .actor("P1", DecisionKind::Vote, Scripted::target("P2"));
    let mut harness =
        TestHarness::with_config(&CLASSIC, provider, |c| c.with_policy(strict_policy()));

    harness.run_phase(Phase::Vote).await.unwrap();

    assert!(!harness.has_message("P1 votes for P2"));
    let vote = harness
        .messages()
        .into_iter()
        .find(|m| m.starts_with("P1 votes for "))
        .expect("P1 voted");
    let target = vote.trim_start_matches("P1 votes for ");
    let target = harness.game().by_name(target).expect("a player");
    assert!(!target.is_werewolf(), "P1 voted for a teammate: {vote}");
}

// =============================================================================
// GAME OVER
// =============================================================================

#[tokio::test]
async fn test_winner_is_latched() {
    let roles = [Werewolf, Villager, Villager, Villager, Seer, Villager];
    let mut harness = TestHarness::new(&roles, ScriptedProvider::new());

    for name in ["P2", "P3", "P4"] {
        harness.kill(name);
        assert_winner(&harness, None);
    }
    harness.kill("P5");
    assert_winner(&harness, Some(Faction::Werewolves));

    // Killing the last wolf afterwards does not flip the result.
    harness.kill("P1");
    assert_winner(&harness, Some(Faction::Werewolves));
}

#[tokio::test]
async fn test_full_game_finishes() {
    let provider = ScriptedProvider::new().always(DecisionKind::Kill, Scripted::target("P8"));
    let mut harness = TestHarness::new(&CLASSIC, provider);

    harness.moderator.play_to_end(200).await.unwrap();

    assert_eq!(harness.game().status(), GameStatus::Finished);
    assert_phase(&harness, Phase::End);
    assert!(harness.game().winner().is_some());
}
