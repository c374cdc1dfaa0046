//! Rules Engine
//!
//! Pure resolution of a single battle action against a battle state.
//! Nothing here mutates: `resolve` returns the list of [`Effect`]s the
//! battle state machine must apply, in order, or the reason the action
//! is illegal.
//!
//! # Determinism
//!
//! Same state + same action = same effects. No clocks, no randomness.

use serde::{Serialize, Deserialize};

use crate::game::battle::BattleError;
use crate::game::card::{CardKind, SpellEffect};
use crate::game::state::{BattleState, PlayerState, Seat};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tunable battle constants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleConfig {
    /// Health (and max health) at battle start
    pub starting_health: i32,
    /// Mana (and max mana) on turn 1
    pub starting_mana: i32,
    /// Upper bound for max mana
    pub mana_cap: i32,
    /// Cards drawn before the first turn
    pub initial_hand_size: usize,
    /// Draws beyond this hand size are burned
    pub hand_limit: usize,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            starting_health: 30,
            starting_mana: 1,
            mana_cap: 10,
            initial_hand_size: 4,
            hand_limit: 10,
        }
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// What an attack is aimed at. Always on the opposing side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackTarget {
    /// The opposing player's health.
    Player,
    /// An opposing creature by board index.
    Creature(usize),
}

/// A turn action submitted by the turn owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleAction {
    /// Play a card from hand.
    PlayCard {
        /// Index into the actor's hand.
        hand_index: usize,
    },
    /// Attack with a creature on the board.
    Attack {
        /// Index into the actor's board.
        attacker_index: usize,
        /// Player or opposing creature.
        target: AttackTarget,
    },
    /// Pass the turn to the opponent.
    EndTurn,
}

// =============================================================================
// EFFECTS
// =============================================================================

/// One atomic state change produced by the rules engine.
///
/// Hand and board indices refer to the state as it is when the effect
/// is applied, so effects must be applied in the order returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Deduct mana.
    SpendMana { seat: Seat, amount: i32 },
    /// Move a creature from hand to board.
    Summon { seat: Seat, hand_index: usize },
    /// Move a spell from hand to graveyard.
    CastSpell { seat: Seat, hand_index: usize },
    /// Reduce a player's health (floored at 0).
    DamagePlayer { seat: Seat, amount: i32 },
    /// Restore a player's health (capped at max health).
    HealPlayer { seat: Seat, amount: i32 },
    /// Reduce a creature's defense.
    DamageCreature { seat: Seat, board_index: usize, amount: i32 },
    /// Mark a creature as having attacked.
    Exhaust { seat: Seat, board_index: usize },
    /// Hand the turn over and bump the turn counter.
    PassTurn { to: Seat },
    /// Clear exhaustion on every creature of a player.
    RefreshBoard { seat: Seat },
    /// Set max mana and refill.
    RefillMana { seat: Seat, max_mana: i32 },
    /// Move the top deck card into the hand.
    Draw { seat: Seat },
    /// Move the top deck card straight to the graveyard (hand full).
    Burn { seat: Seat },
}

/// How a battle ended, from the rules' point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// One seat won.
    Winner(Seat),
    /// Nobody won.
    Draw,
}

// =============================================================================
// ARITHMETIC
// =============================================================================

/// Health after taking damage. Never negative.
#[inline]
pub fn apply_damage(health: i32, amount: i32) -> i32 {
    health.saturating_sub(amount.max(0)).max(0)
}

/// Health after healing. Never above `max_health`.
#[inline]
pub fn apply_heal(health: i32, amount: i32, max_health: i32) -> i32 {
    health.saturating_add(amount.max(0)).min(max_health)
}

/// Max mana granted on a given turn.
#[inline]
pub fn mana_for_turn(turn_number: u32, config: &BattleConfig) -> i32 {
    i32::try_from(turn_number).unwrap_or(i32::MAX).min(config.mana_cap)
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Resolve `action` taken by `actor` against `state`.
///
/// Assumes the caller already checked phase, membership and turn order.
pub fn resolve(
    state: &BattleState,
    actor: Seat,
    action: &BattleAction,
    config: &BattleConfig,
) -> Result<Vec<Effect>, BattleError> {
    match *action {
        BattleAction::PlayCard { hand_index } => resolve_play_card(state, actor, hand_index),
        BattleAction::Attack { attacker_index, target } => {
            resolve_attack(state, actor, attacker_index, target)
        }
        BattleAction::EndTurn => Ok(resolve_end_turn(state, actor, config)),
    }
}

fn resolve_play_card(state: &BattleState, actor: Seat, hand_index: usize) -> Result<Vec<Effect>, BattleError> {
    let player = state.player(actor);
    let card = player.hand.get(hand_index).ok_or(BattleError::InvalidIndex {
        index: hand_index,
        len: player.hand.len(),
    })?;

    if card.mana_cost > player.mana {
        return Err(BattleError::NotEnoughMana {
            required: card.mana_cost,
            available: player.mana,
        });
    }

    let mut effects = vec![Effect::SpendMana { seat: actor, amount: card.mana_cost }];

    match card.kind {
        CardKind::Creature => {
            effects.push(Effect::Summon { seat: actor, hand_index });
        }
        CardKind::Spell => {
            effects.push(Effect::CastSpell { seat: actor, hand_index });
            match card.effect {
                Some(SpellEffect::DamageOpponent(amount)) => {
                    effects.push(Effect::DamagePlayer { seat: actor.other(), amount });
                }
                Some(SpellEffect::HealSelf(amount)) => {
                    effects.push(Effect::HealPlayer { seat: actor, amount });
                }
                None => {}
            }
        }
    }

    Ok(effects)
}

fn resolve_attack(
    state: &BattleState,
    actor: Seat,
    attacker_index: usize,
    target: AttackTarget,
) -> Result<Vec<Effect>, BattleError> {
    let player = state.player(actor);
    let attacker = player.board.get(attacker_index).ok_or(BattleError::InvalidIndex {
        index: attacker_index,
        len: player.board.len(),
    })?;

    if attacker.exhausted {
        return Err(BattleError::CardExhausted { index: attacker_index });
    }

    let defender_seat = actor.other();
    let mut effects = vec![Effect::Exhaust { seat: actor, board_index: attacker_index }];

    match target {
        AttackTarget::Player => {
            effects.push(Effect::DamagePlayer { seat: defender_seat, amount: attacker.attack });
        }
        AttackTarget::Creature(index) => {
            let defender = state
                .player(defender_seat)
                .board
                .get(index)
                .ok_or(BattleError::InvalidTarget { index })?;

            // Both creatures strike simultaneously.
            effects.push(Effect::DamageCreature {
                seat: defender_seat,
                board_index: index,
                amount: attacker.attack,
            });
            effects.push(Effect::DamageCreature {
                seat: actor,
                board_index: attacker_index,
                amount: defender.attack,
            });
        }
    }

    Ok(effects)
}

fn resolve_end_turn(state: &BattleState, actor: Seat, config: &BattleConfig) -> Vec<Effect> {
    let next = actor.other();
    let next_turn = state.turn_number.saturating_add(1);

    let mut effects = vec![
        Effect::PassTurn { to: next },
        Effect::RefreshBoard { seat: actor },
        Effect::RefreshBoard { seat: next },
        Effect::RefillMana { seat: next, max_mana: mana_for_turn(next_turn, config) },
    ];

    let incoming = state.player(next);
    if !incoming.deck.is_empty() {
        if incoming.hand.len() >= config.hand_limit {
            effects.push(Effect::Burn { seat: next });
        } else {
            effects.push(Effect::Draw { seat: next });
        }
    }

    effects
}

// =============================================================================
// WIN DETECTION
// =============================================================================

/// A player reached 0 health. The actor is checked last so an attacker
/// never loses to damage it dealt.
pub fn defeat_outcome(state: &BattleState, actor: Seat) -> Option<Outcome> {
    if state.player(actor.other()).is_defeated() {
        Some(Outcome::Winner(actor))
    } else if state.player(actor).is_defeated() {
        Some(Outcome::Winner(actor.other()))
    } else {
        None
    }
}

/// Both players have nothing left to draw or play: higher health wins.
pub fn exhaustion_outcome(state: &BattleState) -> Option<Outcome> {
    let host = state.player(Seat::Host);
    let guest = state.player(Seat::Guest);

    if !(host.is_out_of_cards() && guest.is_out_of_cards()) {
        return None;
    }

    Some(match host.health.cmp(&guest.health) {
        std::cmp::Ordering::Greater => Outcome::Winner(Seat::Host),
        std::cmp::Ordering::Less => Outcome::Winner(Seat::Guest),
        std::cmp::Ordering::Equal => Outcome::Draw,
    })
}

/// Board indices of destroyed creatures, in ascending order.
pub fn destroyed_creatures(player: &PlayerState) -> Vec<usize> {
    player
        .board
        .iter()
        .enumerate()
        .filter(|(_, card)| card.is_destroyed())
        .map(|(i, _)| i)
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::catalog_card;
    use crate::game::state::{BattlePhase, UserId};
    use proptest::prelude::*;

    fn empty_state() -> BattleState {
        BattleState {
            session_id: "s".into(),
            players: [
                PlayerState::new(UserId::from("host"), 30, 1),
                PlayerState::new(UserId::from("guest"), 30, 1),
            ],
            turn_owner: Seat::Host,
            turn_number: 1,
            phase: BattlePhase::Active,
            version: 0,
            last_action: String::new(),
        }
    }

    #[test]
    fn test_play_creature() {
        let mut state = empty_state();
        state.player_mut(Seat::Host).hand.push(catalog_card("card_008").unwrap()); // Goblin, cost 1

        let effects = resolve(&state, Seat::Host, &BattleAction::PlayCard { hand_index: 0 }, &BattleConfig::default()).unwrap();
        assert_eq!(effects, vec![
            Effect::SpendMana { seat: Seat::Host, amount: 1 },
            Effect::Summon { seat: Seat::Host, hand_index: 0 },
        ]);
    }

    #[test]
    fn test_play_spell_targets_opponent() {
        let mut state = empty_state();
        let host = state.player_mut(Seat::Host);
        host.mana = 2;
        host.hand.push(catalog_card("card_003").unwrap()); // Lightning Bolt

        let effects = resolve(&state, Seat::Host, &BattleAction::PlayCard { hand_index: 0 }, &BattleConfig::default()).unwrap();
        assert!(effects.contains(&Effect::CastSpell { seat: Seat::Host, hand_index: 0 }));
        assert!(effects.contains(&Effect::DamagePlayer { seat: Seat::Guest, amount: 3 }));
    }

    #[test]
    fn test_play_card_errors() {
        let mut state = empty_state();
        state.player_mut(Seat::Host).hand.push(catalog_card("card_004").unwrap()); // Dragon, cost 7
        let config = BattleConfig::default();

        assert_eq!(
            resolve(&state, Seat::Host, &BattleAction::PlayCard { hand_index: 5 }, &config),
            Err(BattleError::InvalidIndex { index: 5, len: 1 })
        );
        assert_eq!(
            resolve(&state, Seat::Host, &BattleAction::PlayCard { hand_index: 0 }, &config),
            Err(BattleError::NotEnoughMana { required: 7, available: 1 })
        );
    }

    #[test]
    fn test_attack_resolution() {
        let mut state = empty_state();
        state.player_mut(Seat::Host).board.push(catalog_card("card_006").unwrap()); // Knight 4/4
        state.player_mut(Seat::Guest).board.push(catalog_card("card_002").unwrap()); // Water Spirit 3/5
        let config = BattleConfig::default();

        let direct = resolve(
            &state,
            Seat::Host,
            &BattleAction::Attack { attacker_index: 0, target: AttackTarget::Player },
            &config,
        ).unwrap();
        assert_eq!(direct, vec![
            Effect::Exhaust { seat: Seat::Host, board_index: 0 },
            Effect::DamagePlayer { seat: Seat::Guest, amount: 4 },
        ]);

        let combat = resolve(
            &state,
            Seat::Host,
            &BattleAction::Attack { attacker_index: 0, target: AttackTarget::Creature(0) },
            &config,
        ).unwrap();
        assert!(combat.contains(&Effect::DamageCreature { seat: Seat::Guest, board_index: 0, amount: 4 }));
        assert!(combat.contains(&Effect::DamageCreature { seat: Seat::Host, board_index: 0, amount: 3 }));
    }

    #[test]
    fn test_attack_errors() {
        let mut state = empty_state();
        let mut knight = catalog_card("card_006").unwrap();
        state.player_mut(Seat::Host).board.push(knight.clone());
        knight.exhausted = true;
        state.player_mut(Seat::Host).board.push(knight);
        let config = BattleConfig::default();

        let attack = |attacker_index, target| BattleAction::Attack { attacker_index, target };

        assert_eq!(
            resolve(&state, Seat::Host, &attack(2, AttackTarget::Player), &config),
            Err(BattleError::InvalidIndex { index: 2, len: 2 })
        );
        assert_eq!(
            resolve(&state, Seat::Host, &attack(1, AttackTarget::Player), &config),
            Err(BattleError::CardExhausted { index: 1 })
        );
        assert_eq!(
            resolve(&state, Seat::Host, &attack(0, AttackTarget::Creature(0)), &config),
            Err(BattleError::InvalidTarget { index: 0 })
        );
    }

    #[test]
    fn test_end_turn_effects() {
        let mut state = empty_state();
        state.player_mut(Seat::Guest).deck.push(catalog_card("card_001").unwrap());
        let config = BattleConfig::default();

        let effects = resolve(&state, Seat::Host, &BattleAction::EndTurn, &config).unwrap();
        assert_eq!(effects[0], Effect::PassTurn { to: Seat::Guest });
        assert!(effects.contains(&Effect::RefillMana { seat: Seat::Guest, max_mana: 2 }));
        assert_eq!(effects.last(), Some(&Effect::Draw { seat: Seat::Guest }));

        // Full hand burns the draw
        let goblin = catalog_card("card_008").unwrap();
        state.player_mut(Seat::Guest).hand = vec![goblin; config.hand_limit];
        let effects = resolve(&state, Seat::Host, &BattleAction::EndTurn, &config).unwrap();
        assert_eq!(effects.last(), Some(&Effect::Burn { seat: Seat::Guest }));

        // Empty deck draws nothing
        state.player_mut(Seat::Guest).deck.clear();
        let effects = resolve(&state, Seat::Host, &BattleAction::EndTurn, &config).unwrap();
        assert!(!effects.iter().any(|e| matches!(e, Effect::Draw { .. } | Effect::Burn { .. })));
    }

    #[test]
    fn test_mana_cap() {
        let config = BattleConfig::default();
        assert_eq!(mana_for_turn(1, &config), 1);
        assert_eq!(mana_for_turn(7, &config), 7);
        assert_eq!(mana_for_turn(25, &config), 10);
        assert_eq!(mana_for_turn(u32::MAX, &config), 10);
    }

    #[test]
    fn test_outcomes() {
        let mut state = empty_state();
        assert_eq!(defeat_outcome(&state, Seat::Host), None);

        state.player_mut(Seat::Guest).health = 0;
        assert_eq!(defeat_outcome(&state, Seat::Host), Some(Outcome::Winner(Seat::Host)));

        // Everyone is out of cards in the empty state
        let mut state = empty_state();
        assert_eq!(exhaustion_outcome(&state), Some(Outcome::Draw));
        state.player_mut(Seat::Host).health = 12;
        assert_eq!(exhaustion_outcome(&state), Some(Outcome::Winner(Seat::Guest)));

        state.player_mut(Seat::Host).deck.push(catalog_card("card_001").unwrap());
        assert_eq!(exhaustion_outcome(&state), None);
    }

    #[test]
    fn test_destroyed_creatures() {
        let mut state = empty_state();
        let board = &mut state.player_mut(Seat::Guest).board;
        for id in ["card_008", "card_006", "card_002"] {
            board.push(catalog_card(id).unwrap());
        }
        board[0].defense = 0;
        board[2].defense = -3;
        assert_eq!(destroyed_creatures(state.player(Seat::Guest)), vec![0, 2]);
    }

    proptest! {
        #[test]
        fn prop_damage_never_negative(health in 0i32..=30, amount in -50i32..200) {
            let after = apply_damage(health, amount);
            prop_assert!(after >= 0);
            prop_assert!(after <= health);
        }

        #[test]
        fn prop_heal_respects_cap(health in 0i32..=30, amount in -50i32..200) {
            let after = apply_heal(health, amount, 30);
            prop_assert!(after <= 30);
            prop_assert!(after >= health);
        }

        #[test]
        fn prop_resolve_is_pure(hand_index in 0usize..6, mana in 0i32..10) {
            let mut state = empty_state();
            let host = state.player_mut(Seat::Host);
            host.mana = mana;
            for id in ["card_001", "card_003", "card_005", "card_008"] {
                host.hand.push(catalog_card(id).unwrap());
            }
            let before = state.clone();
            let action = BattleAction::PlayCard { hand_index };
            let config = BattleConfig::default();

            let first = resolve(&state, Seat::Host, &action, &config);
            let second = resolve(&state, Seat::Host, &action, &config);
            prop_assert_eq!(first, second);
            prop_assert_eq!(state, before);
        }
    }
}
