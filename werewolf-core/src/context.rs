//! Builds the text context handed to a decision provider.

use std::fmt::Write;

use crate::character::Character;
use crate::decision::DecisionKind;
use crate::game::Game;
use crate::role::Role;
use crate::visibility::visible_history;

/// Everything `viewer` may legitimately know right now.
pub fn build(game: &Game, viewer: &Character, window: usize) -> String {
    let mut out = String::new();
    let role = viewer.role().map(Role::name).unwrap_or("unassigned");

    let _ = writeln!(
        out,
        "Day {}, {} phase. You are {} and your role is {role}.",
        game.current_day(),
        game.phase(),
        viewer.name
    );

    let alive: Vec<&str> = game.get_alive().map(|c| c.name.as_str()).collect();
    let dead: Vec<&str> = game
        .characters()
        .iter()
        .filter(|c| !c.is_alive())
        .map(|c| c.name.as_str())
        .collect();
    let _ = writeln!(out, "Alive players: {}", alive.join(", "));
    if !dead.is_empty() {
        let _ = writeln!(out, "Dead players: {}", dead.join(", "));
    }

    let role_section = role_context(game, viewer);
    if !role_section.is_empty() {
        let _ = write!(out, "\n{role_section}");
    }

    let summary = viewer.memory().summary();
    if !summary.is_empty() {
        let _ = write!(out, "\n{summary}\n");
    }

    let history: Vec<_> = visible_history(game.log(), viewer, window).collect();
    if !history.is_empty() {
        out.push_str("\nRecent events:\n");
        for entry in history {
            let _ = writeln!(out, "- {entry}");
        }
    }

    out
}

/// What only this character's role knows.
fn role_context(game: &Game, viewer: &Character) -> String {
    let mut out = String::new();
    let memory = viewer.memory();

    match viewer.role() {
        Some(Role::Werewolf) => {
            let mates: Vec<&str> = game
                .alive_werewolves()
                .filter(|c| c.id != viewer.id)
                .map(|c| c.name.as_str())
                .collect();
            if mates.is_empty() {
                out.push_str("You are the last werewolf standing.\n");
            } else {
                let _ = writeln!(out, "Your werewolf teammates: {}", mates.join(", "));
            }
            for kill in memory.decisions_of(DecisionKind::Kill) {
                if let Some(target) = &kill.target {
                    let _ = writeln!(out, "- Night {}: you chose to kill {target}", kill.day);
                }
            }
        }
        Some(Role::Seer) => {
            let checks: Vec<(u32, &Character)> = memory
                .decisions_of(DecisionKind::Check)
                .filter_map(|d| Some((d.day, game.get(d.target_id?)?)))
                .collect();
            if checks.is_empty() {
                out.push_str("You have not checked anyone yet.\n");
            } else {
                out.push_str("Your checks:\n");
                for (day, target) in checks {
                    let verdict = if target.is_werewolf() {
                        "is a werewolf"
                    } else {
                        "is a good person"
                    };
                    let _ = writeln!(out, "- Night {day}: {} {verdict}", target.name);
                }
            }
        }
        Some(Role::Witch) => {
            let potions = game.potions();
            let _ = writeln!(
                out,
                "Antidote: {}. Poison: {}.",
                if potions.save_used() { "used" } else { "available" },
                if potions.poison_used() { "used" } else { "available" },
            );
            for kind in [DecisionKind::Save, DecisionKind::Poison] {
                for d in memory.decisions_of(kind) {
                    if let Some(target) = &d.target {
                        let _ = writeln!(out, "- Night {}: you used {kind} on {target}", d.day);
                    }
                }
            }
        }
        Some(Role::Guard) => {
            for d in memory.decisions_of(DecisionKind::Protect) {
                if let Some(target) = &d.target {
                    let _ = writeln!(out, "- Night {}: you protected {target}", d.day);
                }
            }
        }
        Some(Role::Villager | Role::Hunter) | None => {}
    }
    out
}
