//! Battle Events
//!
//! Events generated while applying actions. They feed the snapshot's
//! `last_action` text, the server logs, and the per-battle action log.

use serde::{Serialize, Deserialize};

use crate::game::rules::AttackTarget;
use crate::game::state::UserId;

/// Why a battle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A player reached 0 health
    Defeat,
    /// A player left, surrendered or disconnected
    Forfeit,
    /// Both players ran out of cards
    Exhaustion,
    /// Terminated after an internal error
    Aborted,
}

/// Battle event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleEventData {
    /// Both players bound, turn 1 begins
    BattleStarted {
        first: UserId,
    },

    /// Creature moved to the board
    CreaturePlayed {
        user_id: UserId,
        card_name: String,
    },

    /// Spell resolved
    SpellCast {
        user_id: UserId,
        card_name: String,
    },

    /// Creature attacked
    Attacked {
        user_id: UserId,
        attacker_name: String,
        target: AttackTarget,
    },

    /// Creature destroyed and moved to the graveyard
    CreatureDestroyed {
        owner: UserId,
        card_name: String,
    },

    /// Drawn card discarded because the hand was full
    CardBurned {
        user_id: UserId,
        card_name: String,
    },

    /// Turn passed
    TurnEnded {
        next: UserId,
        turn_number: u32,
    },

    /// Battle reached its terminal phase
    BattleEnded {
        winner: Option<UserId>,
        reason: EndReason,
    },
}

/// A battle event stamped with the version it produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleEvent {
    /// Battle version after the action that generated this event
    pub version: u64,

    /// Event data
    pub data: BattleEventData,
}

impl BattleEvent {
    /// Create a new event.
    pub fn new(version: u64, data: BattleEventData) -> Self {
        Self { version, data }
    }

    /// Does this event end the battle.
    pub fn is_terminal(&self) -> bool {
        matches!(self.data, BattleEventData::BattleEnded { .. })
    }

    /// Human-readable one-liner.
    pub fn describe(&self) -> String {
        match &self.data {
            BattleEventData::BattleStarted { first } => {
                format!("Battle started, {} goes first", first)
            }
            BattleEventData::CreaturePlayed { user_id, card_name } => {
                format!("{} played {}", user_id, card_name)
            }
            BattleEventData::SpellCast { user_id, card_name } => {
                format!("{} cast {}", user_id, card_name)
            }
            BattleEventData::Attacked { user_id, attacker_name, target } => match target {
                AttackTarget::Player => format!("{}'s {} attacked the opponent directly", user_id, attacker_name),
                AttackTarget::Creature(index) => {
                    format!("{}'s {} attacked creature {}", user_id, attacker_name, index)
                }
            },
            BattleEventData::CreatureDestroyed { owner, card_name } => {
                format!("{}'s {} was destroyed", owner, card_name)
            }
            BattleEventData::CardBurned { user_id, card_name } => {
                format!("{}'s hand was full, {} was burned", user_id, card_name)
            }
            BattleEventData::TurnEnded { next, turn_number } => {
                format!("Turn {}: {} to act", turn_number, next)
            }
            BattleEventData::BattleEnded { winner, reason } => match (winner, reason) {
                (Some(winner), EndReason::Forfeit) => format!("{} wins by forfeit", winner),
                (Some(winner), _) => format!("{} wins", winner),
                (None, EndReason::Aborted) => "Battle aborted".to_string(),
                (None, _) => "Battle ended in a draw".to_string(),
            },
        }
    }
}

/// Append-only record of every event in one battle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BattleLog {
    events: Vec<BattleEvent>,
}

impl BattleLog {
    /// Append events.
    pub fn extend(&mut self, events: impl IntoIterator<Item = BattleEvent>) {
        self.events.extend(events);
    }

    /// All events in order.
    pub fn events(&self) -> &[BattleEvent] {
        &self.events
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Nothing recorded yet.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let played = BattleEvent::new(1, BattleEventData::CreaturePlayed {
            user_id: UserId::from("alice"),
            card_name: "Goblin".into(),
        });
        assert_eq!(played.describe(), "alice played Goblin");

        let ended = BattleEvent::new(9, BattleEventData::BattleEnded {
            winner: Some(UserId::from("bob")),
            reason: EndReason::Forfeit,
        });
        assert!(ended.is_terminal());
        assert_eq!(ended.describe(), "bob wins by forfeit");

        let draw = BattleEvent::new(9, BattleEventData::BattleEnded {
            winner: None,
            reason: EndReason::Exhaustion,
        });
        assert_eq!(draw.describe(), "Battle ended in a draw");
    }

    #[test]
    fn test_log_appends_in_order() {
        let mut log = BattleLog::default();
        assert!(log.is_empty());

        log.extend(vec![
            BattleEvent::new(1, BattleEventData::BattleStarted { first: UserId::from("a") }),
            BattleEvent::new(2, BattleEventData::TurnEnded { next: UserId::from("b"), turn_number: 2 }),
        ]);

        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[1].version, 2);
    }
}
