//! Battle State Definitions
//!
//! All state types for one battle, plus the immutable snapshot view
//! that is broadcast to clients.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::card::Card;

// =============================================================================
// USER ID
// =============================================================================

/// Opaque authenticated user identifier.
///
/// Issued by the identity collaborator; this crate never interprets it.
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// SEAT
// =============================================================================

/// Position of a player in the battle. The host always sits first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    /// Session creator, acts first.
    Host = 0,
    /// Second member.
    Guest = 1,
}

impl Seat {
    /// The opposing seat.
    #[inline]
    pub fn other(self) -> Seat {
        match self {
            Seat::Host => Seat::Guest,
            Seat::Guest => Seat::Host,
        }
    }

    /// Index into the players array.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// State of a single player in the battle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Owning user
    pub user_id: UserId,

    /// Current health, never below 0
    pub health: i32,

    /// Health cap for healing
    pub max_health: i32,

    /// Mana available this turn
    pub mana: i32,

    /// Mana refilled at the start of this player's turn
    pub max_mana: i32,

    /// Cards in hand (ordered, indexed by `play_card`)
    pub hand: Vec<Card>,

    /// Remaining draw pile; the last card is drawn next
    pub deck: Vec<Card>,

    /// Creatures in play (ordered, indexed by `attack`)
    pub board: Vec<Card>,

    /// Spent spells and destroyed creatures
    pub graveyard: Vec<Card>,
}

impl PlayerState {
    /// Create a player with an empty deck.
    pub fn new(user_id: UserId, health: i32, mana: i32) -> Self {
        Self {
            user_id,
            health,
            max_health: health,
            mana,
            max_mana: mana,
            hand: Vec::new(),
            deck: Vec::new(),
            board: Vec::new(),
            graveyard: Vec::new(),
        }
    }

    /// Is the player out of health.
    #[inline]
    pub fn is_defeated(&self) -> bool {
        self.health <= 0
    }

    /// Has nothing left to draw or play.
    #[inline]
    pub fn is_out_of_cards(&self) -> bool {
        self.deck.is_empty() && self.hand.is_empty()
    }
}

// =============================================================================
// BATTLE PHASE
// =============================================================================

/// Battle phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattlePhase {
    /// Created, waiting for both realtime connections.
    AwaitingPlayers,
    /// Turns are being played.
    Active,
    /// Terminal. `winner` is `None` for a draw or an aborted battle.
    Complete {
        /// Winning user, if any.
        winner: Option<UserId>,
    },
}

impl BattlePhase {
    /// Wire-level phase tag.
    pub fn kind(&self) -> PhaseKind {
        match self {
            BattlePhase::AwaitingPlayers => PhaseKind::AwaitingPlayers,
            BattlePhase::Active => PhaseKind::Active,
            BattlePhase::Complete { .. } => PhaseKind::Complete,
        }
    }

    /// Winner, once complete.
    pub fn winner(&self) -> Option<&UserId> {
        match self {
            BattlePhase::Complete { winner } => winner.as_ref(),
            _ => None,
        }
    }

    /// Is this the terminal phase.
    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self, BattlePhase::Complete { .. })
    }
}

/// Flat phase tag used in snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Waiting for connections.
    AwaitingPlayers,
    /// In play.
    Active,
    /// Finished.
    Complete,
}

// =============================================================================
// BATTLE STATE
// =============================================================================

/// Complete mutable state of one battle.
///
/// Hashed with bincode for `state_hash`, so field order matters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleState {
    /// Owning session
    pub session_id: String,

    /// Host and guest, indexed by [`Seat::index`]
    pub players: [PlayerState; 2],

    /// Who may act
    pub turn_owner: Seat,

    /// Starts at 1, +1 per `end_turn`
    pub turn_number: u32,

    /// Lifecycle phase
    pub phase: BattlePhase,

    /// Accepted mutations so far
    pub version: u64,

    /// Human-readable description of the last accepted action
    pub last_action: String,
}

impl BattleState {
    /// Player in a seat.
    #[inline]
    pub fn player(&self, seat: Seat) -> &PlayerState {
        &self.players[seat.index()]
    }

    /// Mutable player in a seat.
    #[inline]
    pub fn player_mut(&mut self, seat: Seat) -> &mut PlayerState {
        &mut self.players[seat.index()]
    }

    /// Seat of a user, if they are in this battle.
    pub fn seat_of(&self, user_id: &UserId) -> Option<Seat> {
        if &self.players[0].user_id == user_id {
            Some(Seat::Host)
        } else if &self.players[1].user_id == user_id {
            Some(Seat::Guest)
        } else {
            None
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Per-player portion of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Owning user.
    pub user_id: UserId,
    /// Current health.
    pub health: i32,
    /// Health cap.
    pub max_health: i32,
    /// Mana available.
    pub mana: i32,
    /// Mana per turn.
    pub max_mana: i32,
    /// Is it this player's turn.
    pub is_turn_owner: bool,
    /// Hand contents.
    pub hand: Vec<Card>,
    /// Creatures in play.
    pub board: Vec<Card>,
    /// Graveyard contents.
    pub graveyard: Vec<Card>,
    /// Cards left to draw.
    pub deck_count: usize,
}

/// Immutable point-in-time view of a battle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    /// Owning session.
    pub session_id: String,
    /// Phase tag.
    pub phase: PhaseKind,
    /// Winner once complete (absent for a draw).
    pub winner: Option<UserId>,
    /// Who may act.
    pub turn_owner: UserId,
    /// Turn counter.
    pub turn_number: u32,
    /// Host first, then guest.
    pub players: Vec<PlayerView>,
    /// Description of the last accepted action.
    pub last_action: String,
    /// Accepted mutations so far; strictly increases between broadcasts.
    pub version: u64,
    /// Hex SHA-256 of the battle state at `version`.
    pub state_hash: String,
}

impl BattleSnapshot {
    /// Find a player's view.
    pub fn player(&self, user_id: &UserId) -> Option<&PlayerView> {
        self.players.iter().find(|p| &p.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_other() {
        assert_eq!(Seat::Host.other(), Seat::Guest);
        assert_eq!(Seat::Guest.other(), Seat::Host);
        assert_eq!(Seat::Host.index(), 0);
        assert_eq!(Seat::Guest.index(), 1);
    }

    #[test]
    fn test_user_id_serializes_as_string() {
        let id = UserId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert_eq!(id.to_string(), "alice");
    }

    #[test]
    fn test_phase_helpers() {
        let done = BattlePhase::Complete { winner: Some(UserId::from("bob")) };
        assert!(done.is_complete());
        assert_eq!(done.kind(), PhaseKind::Complete);
        assert_eq!(done.winner(), Some(&UserId::from("bob")));

        assert!(!BattlePhase::Active.is_complete());
        assert_eq!(BattlePhase::AwaitingPlayers.winner(), None);
        assert_eq!(serde_json::to_string(&PhaseKind::AwaitingPlayers).unwrap(), "\"awaiting_players\"");
    }

    #[test]
    fn test_player_out_of_cards() {
        let mut player = PlayerState::new(UserId::from("a"), 30, 1);
        assert!(player.is_out_of_cards());
        player.deck.push(crate::game::card::starter_catalog().remove(0));
        assert!(!player.is_out_of_cards());
    }
}
