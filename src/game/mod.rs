//! Game Logic Module
//!
//! All battle code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `card`: Card model and starter catalog
//! - `rules`: Pure rules engine (action → effects)
//! - `state`: Battle state, player state, snapshots
//! - `battle`: Battle state machine (phases, turn order, win detection)
//! - `events`: Battle events and action log

pub mod card;
pub mod rules;
pub mod state;
pub mod battle;
pub mod events;

// Re-export key types
pub use card::{Card, CardKind, SpellEffect};
pub use rules::{AttackTarget, BattleAction, BattleConfig};
pub use state::{BattlePhase, BattleSnapshot, BattleState, PhaseKind, PlayerState, PlayerView, Seat, UserId};
pub use battle::{Battle, BattleError};
pub use events::{BattleEvent, BattleEventData, EndReason};
