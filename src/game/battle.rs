//! Battle State Machine
//!
//! Owns one battle's mutable state. Validates phase, membership and turn
//! order, asks the rules engine for effects, applies them, sweeps
//! destroyed creatures and detects the end of the battle.
//!
//! ```text
//! awaiting_players ──start()──► active ──defeat / exhaustion / forfeit──► complete
//!        │                                                                   ▲
//!        └───────────────────────── forfeit / abort ─────────────────────────┘
//! ```
//!
//! `complete` is terminal: every mutating call fails with
//! [`BattleError::BattleComplete`].

use thiserror::Error;
use tracing::error;

use crate::core::hash::compute_state_hash;
use crate::core::rng::DeterministicRng;
use crate::game::card::starter_deck;
use crate::game::events::{BattleEvent, BattleEventData, BattleLog, EndReason};
use crate::game::rules::{
    self, AttackTarget, BattleAction, BattleConfig, Effect, Outcome,
};
use crate::game::state::{
    BattlePhase, BattleSnapshot, BattleState, PlayerState, PlayerView, Seat, UserId,
};

// =============================================================================
// ERRORS
// =============================================================================

/// Battle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    /// Battle already finished
    #[error("Battle is already complete")]
    BattleComplete,

    /// Battle has not started yet
    #[error("Battle has not started")]
    NotActive,

    /// `start` called twice
    #[error("Battle already started")]
    AlreadyStarted,

    /// Caller is not one of the two players
    #[error("User is not a member of this battle")]
    NotAMember,

    /// Caller is not the turn owner
    #[error("Not your turn")]
    NotYourTurn,

    /// Hand or board index out of range
    #[error("Invalid index {index} (have {len})")]
    InvalidIndex {
        /// Index requested
        index: usize,
        /// Length of the indexed collection
        len: usize,
    },

    /// Attack target is not in play
    #[error("Invalid target {index}")]
    InvalidTarget {
        /// Opposing board index requested
        index: usize,
    },

    /// Card costs more than the available mana
    #[error("Not enough mana: need {required}, have {available}")]
    NotEnoughMana {
        /// Card cost
        required: i32,
        /// Player's mana
        available: i32,
    },

    /// Creature already attacked this turn
    #[error("Creature {index} already attacked this turn")]
    CardExhausted {
        /// Board index of the creature
        index: usize,
    },
}

// =============================================================================
// BATTLE
// =============================================================================

/// One battle between a host and a guest.
#[derive(Debug)]
pub struct Battle {
    state: BattleState,
    config: BattleConfig,
    log: BattleLog,
}

impl Battle {
    /// Create a battle in `awaiting_players`.
    ///
    /// Both players get the starter deck shuffled with an RNG seeded from
    /// the session id and both user ids, then draw their opening hands.
    pub fn new(session_id: &str, host: UserId, guest: UserId, config: BattleConfig) -> Self {
        let mut rng = DeterministicRng::from_battle_params(session_id, &[host.as_str(), guest.as_str()]);

        let mut deal = |user_id: UserId| {
            let mut player = PlayerState::new(user_id, config.starting_health, config.starting_mana);
            player.deck = starter_deck();
            rng.shuffle(&mut player.deck);
            for _ in 0..config.initial_hand_size {
                match player.deck.pop() {
                    Some(card) => player.hand.push(card),
                    None => break,
                }
            }
            player
        };

        let players = [deal(host), deal(guest)];

        Self {
            state: BattleState {
                session_id: session_id.to_string(),
                players,
                turn_owner: Seat::Host,
                turn_number: 1,
                phase: BattlePhase::AwaitingPlayers,
                version: 0,
                last_action: "Waiting for players".to_string(),
            },
            config,
            log: BattleLog::default(),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Owning session.
    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Current phase.
    pub fn phase(&self) -> &BattlePhase {
        &self.state.phase
    }

    /// Is the battle over.
    pub fn is_complete(&self) -> bool {
        self.state.phase.is_complete()
    }

    /// Is the battle being played.
    pub fn is_active(&self) -> bool {
        self.state.phase == BattlePhase::Active
    }

    /// Accepted mutations so far.
    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Seat of a user.
    pub fn seat_of(&self, user_id: &UserId) -> Option<Seat> {
        self.state.seat_of(user_id)
    }

    /// User in a seat.
    pub fn user_in(&self, seat: Seat) -> &UserId {
        &self.state.player(seat).user_id
    }

    /// Raw state.
    pub fn state(&self) -> &BattleState {
        &self.state
    }

    /// Every event since creation.
    pub fn log(&self) -> &BattleLog {
        &self.log
    }

    /// Immutable point-in-time view.
    pub fn snapshot(&self) -> BattleSnapshot {
        let state_hash = match compute_state_hash(self.state.version, &self.state) {
            Ok(hash) => hex::encode(hash),
            Err(e) => {
                error!(session_id = %self.state.session_id, "Failed to hash battle state: {}", e);
                String::new()
            }
        };

        let turn_owner = self.state.turn_owner;
        let players = [Seat::Host, Seat::Guest]
            .into_iter()
            .map(|seat| {
                let p = self.state.player(seat);
                PlayerView {
                    user_id: p.user_id.clone(),
                    health: p.health,
                    max_health: p.max_health,
                    mana: p.mana,
                    max_mana: p.max_mana,
                    is_turn_owner: seat == turn_owner,
                    hand: p.hand.clone(),
                    board: p.board.clone(),
                    graveyard: p.graveyard.clone(),
                    deck_count: p.deck.len(),
                }
            })
            .collect();

        BattleSnapshot {
            session_id: self.state.session_id.clone(),
            phase: self.state.phase.kind(),
            winner: self.state.phase.winner().cloned(),
            turn_owner: self.user_in(turn_owner).clone(),
            turn_number: self.state.turn_number,
            players,
            last_action: self.state.last_action.clone(),
            version: self.state.version,
            state_hash,
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// `awaiting_players → active`. The host acts first.
    pub fn start(&mut self) -> Result<Vec<BattleEvent>, BattleError> {
        match self.state.phase {
            BattlePhase::AwaitingPlayers => {}
            BattlePhase::Active => return Err(BattleError::AlreadyStarted),
            BattlePhase::Complete { .. } => return Err(BattleError::BattleComplete),
        }

        self.state.phase = BattlePhase::Active;
        self.state.turn_owner = Seat::Host;
        let first = self.user_in(Seat::Host).clone();
        Ok(self.commit(vec![BattleEventData::BattleStarted { first }]))
    }

    /// End the battle in favour of the other player.
    ///
    /// Allowed from `awaiting_players` and `active`, and regardless of
    /// whose turn it is.
    pub fn forfeit(&mut self, user_id: &UserId) -> Result<Vec<BattleEvent>, BattleError> {
        if self.is_complete() {
            return Err(BattleError::BattleComplete);
        }
        let seat = self.seat_of(user_id).ok_or(BattleError::NotAMember)?;

        let winner = self.user_in(seat.other()).clone();
        self.state.phase = BattlePhase::Complete { winner: Some(winner.clone()) };
        Ok(self.commit(vec![BattleEventData::BattleEnded {
            winner: Some(winner),
            reason: EndReason::Forfeit,
        }]))
    }

    /// Force-terminate with no winner. No-op on a complete battle.
    pub fn abort(&mut self) -> Vec<BattleEvent> {
        if self.is_complete() {
            return Vec::new();
        }
        self.state.phase = BattlePhase::Complete { winner: None };
        self.commit(vec![BattleEventData::BattleEnded {
            winner: None,
            reason: EndReason::Aborted,
        }])
    }

    // =========================================================================
    // TURN ACTIONS
    // =========================================================================

    /// Play a card from hand.
    pub fn play_card(&mut self, user_id: &UserId, hand_index: usize) -> Result<Vec<BattleEvent>, BattleError> {
        self.apply(user_id, BattleAction::PlayCard { hand_index })
    }

    /// Attack with a board creature.
    pub fn attack(
        &mut self,
        user_id: &UserId,
        attacker_index: usize,
        target: AttackTarget,
    ) -> Result<Vec<BattleEvent>, BattleError> {
        self.apply(user_id, BattleAction::Attack { attacker_index, target })
    }

    /// Pass the turn.
    pub fn end_turn(&mut self, user_id: &UserId) -> Result<Vec<BattleEvent>, BattleError> {
        self.apply(user_id, BattleAction::EndTurn)
    }

    /// Validate and apply one turn action.
    ///
    /// On error the state is untouched and the version does not move.
    pub fn apply(&mut self, user_id: &UserId, action: BattleAction) -> Result<Vec<BattleEvent>, BattleError> {
        match self.state.phase {
            BattlePhase::Active => {}
            BattlePhase::AwaitingPlayers => return Err(BattleError::NotActive),
            BattlePhase::Complete { .. } => return Err(BattleError::BattleComplete),
        }

        let actor = self.seat_of(user_id).ok_or(BattleError::NotAMember)?;
        if actor != self.state.turn_owner {
            return Err(BattleError::NotYourTurn);
        }

        let effects = rules::resolve(&self.state, actor, &action, &self.config)?;

        let mut events = vec![self.describe_action(actor, &action)];
        for effect in effects {
            self.apply_effect(effect, &mut events);
        }
        self.sweep_destroyed(&mut events);

        let outcome = rules::defeat_outcome(&self.state, actor)
            .map(|o| (o, EndReason::Defeat))
            .or_else(|| match action {
                BattleAction::EndTurn => rules::exhaustion_outcome(&self.state).map(|o| (o, EndReason::Exhaustion)),
                _ => None,
            });

        if let Some((outcome, reason)) = outcome {
            let winner = match outcome {
                Outcome::Winner(seat) => Some(self.user_in(seat).clone()),
                Outcome::Draw => None,
            };
            self.state.phase = BattlePhase::Complete { winner: winner.clone() };
            events.push(BattleEventData::BattleEnded { winner, reason });
        }

        Ok(self.commit(events))
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Primary event for an action that `resolve` already accepted.
    fn describe_action(&self, actor: Seat, action: &BattleAction) -> BattleEventData {
        let player = self.state.player(actor);
        let user_id = player.user_id.clone();
        match *action {
            BattleAction::PlayCard { hand_index } => {
                let card = &player.hand[hand_index];
                if card.is_creature() {
                    BattleEventData::CreaturePlayed { user_id, card_name: card.name.clone() }
                } else {
                    BattleEventData::SpellCast { user_id, card_name: card.name.clone() }
                }
            }
            BattleAction::Attack { attacker_index, target } => BattleEventData::Attacked {
                user_id,
                attacker_name: player.board[attacker_index].name.clone(),
                target,
            },
            BattleAction::EndTurn => BattleEventData::TurnEnded {
                next: self.user_in(actor.other()).clone(),
                turn_number: self.state.turn_number.saturating_add(1),
            },
        }
    }

    fn apply_effect(&mut self, effect: Effect, events: &mut Vec<BattleEventData>) {
        match effect {
            Effect::SpendMana { seat, amount } => {
                let p = self.state.player_mut(seat);
                p.mana = (p.mana - amount).max(0);
            }
            Effect::Summon { seat, hand_index } => {
                let p = self.state.player_mut(seat);
                if hand_index < p.hand.len() {
                    let card = p.hand.remove(hand_index);
                    p.board.push(card);
                }
            }
            Effect::CastSpell { seat, hand_index } => {
                let p = self.state.player_mut(seat);
                if hand_index < p.hand.len() {
                    let card = p.hand.remove(hand_index);
                    p.graveyard.push(card);
                }
            }
            Effect::DamagePlayer { seat, amount } => {
                let p = self.state.player_mut(seat);
                p.health = rules::apply_damage(p.health, amount);
            }
            Effect::HealPlayer { seat, amount } => {
                let p = self.state.player_mut(seat);
                p.health = rules::apply_heal(p.health, amount, p.max_health);
            }
            Effect::DamageCreature { seat, board_index, amount } => {
                if let Some(card) = self.state.player_mut(seat).board.get_mut(board_index) {
                    card.defense -= amount;
                }
            }
            Effect::Exhaust { seat, board_index } => {
                if let Some(card) = self.state.player_mut(seat).board.get_mut(board_index) {
                    card.exhausted = true;
                }
            }
            Effect::PassTurn { to } => {
                self.state.turn_owner = to;
                self.state.turn_number = self.state.turn_number.saturating_add(1);
            }
            Effect::RefreshBoard { seat } => {
                for card in &mut self.state.player_mut(seat).board {
                    card.exhausted = false;
                }
            }
            Effect::RefillMana { seat, max_mana } => {
                let p = self.state.player_mut(seat);
                p.max_mana = max_mana;
                p.mana = max_mana;
            }
            Effect::Draw { seat } => {
                let p = self.state.player_mut(seat);
                if let Some(card) = p.deck.pop() {
                    p.hand.push(card);
                }
            }
            Effect::Burn { seat } => {
                let p = self.state.player_mut(seat);
                if let Some(card) = p.deck.pop() {
                    events.push(BattleEventData::CardBurned {
                        user_id: p.user_id.clone(),
                        card_name: card.name.clone(),
                    });
                    p.graveyard.push(card);
                }
            }
        }
    }

    /// Move creatures at defense ≤ 0 to their owner's graveyard.
    fn sweep_destroyed(&mut self, events: &mut Vec<BattleEventData>) {
        for seat in [Seat::Host, Seat::Guest] {
            let destroyed = rules::destroyed_creatures(self.state.player(seat));
            if destroyed.is_empty() {
                continue;
            }

            let p = self.state.player_mut(seat);
            let mut removed: Vec<_> = destroyed.iter().rev().map(|&i| p.board.remove(i)).collect();
            removed.reverse();

            for card in removed {
                events.push(BattleEventData::CreatureDestroyed {
                    owner: p.user_id.clone(),
                    card_name: card.name.clone(),
                });
                p.graveyard.push(card);
            }
        }
    }

    /// Bump the version, record events and refresh `last_action`.
    fn commit(&mut self, data: Vec<BattleEventData>) -> Vec<BattleEvent> {
        self.state.version += 1;
        let version = self.state.version;

        let events: Vec<BattleEvent> = data.into_iter().map(|d| BattleEvent::new(version, d)).collect();

        let mut description = events.first().map(|e| e.describe()).unwrap_or_default();
        if let Some(last) = events.last().filter(|e| e.is_terminal() && events.len() > 1) {
            description = format!("{}. {}", description, last.describe());
        }
        self.state.last_action = description;

        self.log.extend(events.iter().cloned());
        events
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut BattleState {
        &mut self.state
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::catalog_card;
    use crate::game::state::PhaseKind;
    use proptest::prelude::*;

    fn host() -> UserId {
        UserId::from("host")
    }

    fn guest() -> UserId {
        UserId::from("guest")
    }

    fn new_battle() -> Battle {
        Battle::new("session-1", host(), guest(), BattleConfig::default())
    }

    fn started_battle() -> Battle {
        let mut battle = new_battle();
        battle.start().unwrap();
        battle
    }

    #[test]
    fn test_new_battle_deals_hands() {
        let battle = new_battle();
        let config = BattleConfig::default();

        assert_eq!(battle.phase(), &BattlePhase::AwaitingPlayers);
        assert_eq!(battle.version(), 0);
        for seat in [Seat::Host, Seat::Guest] {
            let p = battle.state().player(seat);
            assert_eq!(p.hand.len(), config.initial_hand_size);
            assert_eq!(p.deck.len(), 10 - config.initial_hand_size);
            assert_eq!(p.health, 30);
            assert_eq!(p.mana, 1);
        }
    }

    #[test]
    fn test_shuffle_is_deterministic_per_session() {
        let a = new_battle();
        let b = new_battle();
        assert_eq!(a.state(), b.state());
        assert_eq!(a.snapshot().state_hash, b.snapshot().state_hash);

        let other = Battle::new("session-2", host(), guest(), BattleConfig::default());
        assert_ne!(a.snapshot().state_hash, other.snapshot().state_hash);
    }

    #[test]
    fn test_actions_rejected_before_start() {
        let mut battle = new_battle();
        let before = battle.state().clone();

        assert_eq!(battle.end_turn(&host()), Err(BattleError::NotActive));
        assert_eq!(battle.play_card(&host(), 0), Err(BattleError::NotActive));
        assert_eq!(battle.state(), &before);
    }

    #[test]
    fn test_start() {
        let mut battle = new_battle();
        let events = battle.start().unwrap();

        assert_eq!(events.len(), 1);
        assert!(battle.is_active());
        assert_eq!(battle.version(), 1);
        assert_eq!(battle.snapshot().turn_owner, host());
        assert_eq!(battle.start(), Err(BattleError::AlreadyStarted));
    }

    #[test]
    fn test_turn_order_and_membership() {
        let mut battle = started_battle();
        let version = battle.version();

        assert_eq!(battle.end_turn(&guest()), Err(BattleError::NotYourTurn));
        assert_eq!(battle.end_turn(&UserId::from("mallory")), Err(BattleError::NotAMember));
        assert_eq!(battle.version(), version);
    }

    #[test]
    fn test_play_card_then_end_turn() {
        let mut battle = started_battle();
        battle.state_mut().player_mut(Seat::Host).hand.insert(0, catalog_card("card_008").unwrap());
        let hand_before = battle.state().player(Seat::Host).hand.len();

        battle.play_card(&host(), 0).unwrap();
        let snap = battle.snapshot();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.turn_owner, host());
        let me = snap.player(&host()).unwrap();
        assert_eq!(me.board.len(), 1);
        assert_eq!(me.board[0].name, "Goblin");
        assert_eq!(me.hand.len(), hand_before - 1);
        assert_eq!(me.mana, 0);
        assert_eq!(snap.last_action, "host played Goblin");

        let guest_hand = battle.state().player(Seat::Guest).hand.len();
        battle.end_turn(&host()).unwrap();
        let snap = battle.snapshot();
        assert_eq!(snap.version, 3);
        assert_eq!(snap.turn_owner, guest());
        assert_eq!(snap.turn_number, 2);

        let them = snap.player(&guest()).unwrap();
        assert_eq!(them.max_mana, 2);
        assert_eq!(them.mana, 2);
        assert_eq!(them.hand.len(), guest_hand + 1);
        assert!(them.is_turn_owner);
    }

    #[test]
    fn test_spell_resolution() {
        let mut battle = started_battle();
        {
            let p = battle.state_mut().player_mut(Seat::Host);
            p.mana = 5;
            p.health = 28;
            p.hand = vec![catalog_card("card_003").unwrap(), catalog_card("card_005").unwrap()];
        }

        battle.play_card(&host(), 0).unwrap(); // Lightning Bolt
        assert_eq!(battle.state().player(Seat::Guest).health, 27);

        battle.play_card(&host(), 0).unwrap(); // Healing Potion, capped
        let p = battle.state().player(Seat::Host);
        assert_eq!(p.health, 30);
        assert_eq!(p.graveyard.len(), 2);
        assert!(p.board.is_empty());
        assert_eq!(p.mana, 0);
    }

    #[test]
    fn test_creature_combat_sweeps_graveyard() {
        let mut battle = started_battle();
        battle.state_mut().player_mut(Seat::Host).board.push(catalog_card("card_006").unwrap()); // Knight 4/4
        battle.state_mut().player_mut(Seat::Guest).board.push(catalog_card("card_008").unwrap()); // Goblin 2/1

        let events = battle.attack(&host(), 0, AttackTarget::Creature(0)).unwrap();
        assert!(events.iter().any(|e| matches!(&e.data, BattleEventData::CreatureDestroyed { card_name, .. } if card_name == "Goblin")));

        let state = battle.state();
        assert!(state.player(Seat::Guest).board.is_empty());
        assert_eq!(state.player(Seat::Guest).graveyard.len(), 1);
        assert_eq!(state.player(Seat::Host).board[0].defense, 2);
        assert!(state.player(Seat::Host).board[0].exhausted);

        assert_eq!(
            battle.attack(&host(), 0, AttackTarget::Player),
            Err(BattleError::CardExhausted { index: 0 })
        );
    }

    #[test]
    fn test_lethal_attack_completes_battle() {
        let mut battle = started_battle();
        battle.state_mut().player_mut(Seat::Host).board.push(catalog_card("card_001").unwrap()); // Fire Elemental 5/3
        battle.state_mut().player_mut(Seat::Guest).health = 4;

        let events = battle.attack(&host(), 0, AttackTarget::Player).unwrap();
        assert!(events.last().unwrap().is_terminal());

        let snap = battle.snapshot();
        assert_eq!(snap.phase, PhaseKind::Complete);
        assert_eq!(snap.winner, Some(host()));
        assert_eq!(snap.player(&guest()).unwrap().health, 0);

        let version = battle.version();
        assert_eq!(battle.end_turn(&host()), Err(BattleError::BattleComplete));
        assert_eq!(battle.forfeit(&guest()), Err(BattleError::BattleComplete));
        assert!(battle.abort().is_empty());
        assert_eq!(battle.version(), version);
    }

    #[test]
    fn test_exhaustion_draw_and_win() {
        let mut battle = started_battle();
        for seat in [Seat::Host, Seat::Guest] {
            let p = battle.state_mut().player_mut(seat);
            p.deck.clear();
            p.hand.clear();
        }

        battle.end_turn(&host()).unwrap();
        assert_eq!(battle.phase(), &BattlePhase::Complete { winner: None });

        let mut battle = started_battle();
        for seat in [Seat::Host, Seat::Guest] {
            let p = battle.state_mut().player_mut(seat);
            p.deck.clear();
            p.hand.clear();
        }
        battle.state_mut().player_mut(Seat::Host).health = 10;

        battle.end_turn(&host()).unwrap();
        assert_eq!(battle.phase().winner(), Some(&guest()));
    }

    #[test]
    fn test_hand_limit_burns_draw() {
        let mut battle = started_battle();
        let goblin = catalog_card("card_008").unwrap();
        battle.state_mut().player_mut(Seat::Guest).hand = vec![goblin; 10];

        let events = battle.end_turn(&host()).unwrap();
        assert!(events.iter().any(|e| matches!(e.data, BattleEventData::CardBurned { .. })));

        let p = battle.state().player(Seat::Guest);
        assert_eq!(p.hand.len(), 10);
        assert_eq!(p.graveyard.len(), 1);
    }

    #[test]
    fn test_forfeit_and_abort() {
        let mut battle = new_battle();
        battle.forfeit(&host()).unwrap();
        assert_eq!(battle.phase().winner(), Some(&guest()));

        let mut battle = started_battle();
        assert_eq!(battle.forfeit(&UserId::from("x")), Err(BattleError::NotAMember));
        // Forfeit ignores turn order
        battle.forfeit(&guest()).unwrap();
        assert_eq!(battle.phase().winner(), Some(&host()));
        assert_eq!(battle.snapshot().last_action, "host wins by forfeit");

        let mut battle = started_battle();
        assert_eq!(battle.abort().len(), 1);
        assert_eq!(battle.phase(), &BattlePhase::Complete { winner: None });
    }

    #[test]
    fn test_log_records_every_commit() {
        let mut battle = started_battle();
        battle.end_turn(&host()).unwrap();
        battle.end_turn(&guest()).unwrap();

        let versions: Vec<u64> = battle.log().events().iter().map(|e| e.version).collect();
        assert_eq!(versions.first(), Some(&1));
        assert_eq!(versions.last(), Some(&3));
        assert!(versions.windows(2).all(|w| w[0] <= w[1]));
    }

    fn action_strategy() -> impl Strategy<Value = BattleAction> {
        prop_oneof![
            (0usize..6).prop_map(|hand_index| BattleAction::PlayCard { hand_index }),
            (0usize..4, prop::option::of(0usize..4)).prop_map(|(attacker_index, target)| {
                BattleAction::Attack {
                    attacker_index,
                    target: target.map_or(AttackTarget::Player, AttackTarget::Creature),
                }
            }),
            Just(BattleAction::EndTurn),
        ]
    }

    fn play_out(actions: &[BattleAction]) -> Battle {
        let mut battle = started_battle();
        for action in actions {
            let actor = battle.user_in(battle.state().turn_owner).clone();
            let _ = battle.apply(&actor, *action);
        }
        battle
    }

    proptest! {
        #[test]
        fn prop_health_never_negative(actions in prop::collection::vec(action_strategy(), 0..200)) {
            let mut battle = started_battle();
            for action in &actions {
                let actor = battle.user_in(battle.state().turn_owner).clone();
                let before = battle.version();
                match battle.apply(&actor, *action) {
                    Ok(_) => prop_assert_eq!(battle.version(), before + 1),
                    Err(_) => prop_assert_eq!(battle.version(), before),
                }
                for seat in [Seat::Host, Seat::Guest] {
                    prop_assert!(battle.state().player(seat).health >= 0);
                    prop_assert!(battle.state().player(seat).board.iter().all(|c| c.defense > 0));
                }
            }
        }

        #[test]
        fn prop_replay_is_deterministic(actions in prop::collection::vec(action_strategy(), 0..100)) {
            let a = play_out(&actions);
            let b = play_out(&actions);
            prop_assert_eq!(a.snapshot(), b.snapshot());
        }
    }
}
