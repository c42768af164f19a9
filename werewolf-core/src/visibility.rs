//! Who may read which log entry.
//!
//! This is the only place that decides what history a character sees. Every
//! decision context is built from [`visible_history`], never from the raw log.

use crate::character::Character;
use crate::game::Phase;
use crate::log::{GameLog, LogEntry};
use crate::role::Role;

/// Whether `viewer` may read `entry`.
///
/// Public entries are visible to everyone. Private werewolf-phase entries are
/// shared by the whole pack. A seer, witch or guard sees only the private
/// entries it wrote itself during its own phase.
pub fn is_visible(entry: &LogEntry, viewer: &Character) -> bool {
    if entry.is_public {
        return true;
    }
    match viewer.role() {
        Some(Role::Werewolf) => entry.phase == Phase::Werewolf,
        Some(role @ (Role::Seer | Role::Witch | Role::Guard)) => {
            Phase::of_role(role) == Some(entry.phase)
                && entry.source.character_id() == Some(viewer.id)
        }
        Some(Role::Villager | Role::Hunter) | None => false,
    }
}

/// The visible subset of the last `window` log entries, oldest first.
pub fn visible_history<'a>(
    log: &'a GameLog,
    viewer: &'a Character,
    window: usize,
) -> impl Iterator<Item = &'a LogEntry> + 'a {
    log.tail(window)
        .iter()
        .filter(move |entry| is_visible(entry, viewer))
}
