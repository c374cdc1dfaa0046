//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Text frames carrying JSON. Inbound messages are tagged by `action`,
//! outbound messages by `type`.

use serde::{Serialize, Deserialize};

use crate::game::battle::BattleError;
use crate::game::rules::{AttackTarget, BattleAction};
use crate::game::state::{BattleSnapshot, UserId};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a session.
    JoinSession {
        /// Session to bind to.
        session_id: String,
        /// Member claiming the seat.
        user_id: UserId,
    },

    /// Play a card from hand.
    PlayCard {
        /// Index into the sender's hand.
        hand_index: usize,
    },

    /// Attack with a board creature.
    Attack(AttackRequest),

    /// Pass the turn.
    EndTurn,

    /// Request the current snapshot (sent to the requester only).
    GetBattleState,

    /// Forfeit the battle.
    Surrender,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Attack request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRequest {
    /// Attacking creature's board index.
    #[serde(alias = "attacker_hand_index")]
    pub attacker_index: usize,
    /// Opposing board index; absent or negative targets the player.
    #[serde(default, alias = "target_hand_index")]
    pub target_index: Option<i64>,
}

impl AttackRequest {
    /// Resolved attack target.
    pub fn target(&self) -> AttackTarget {
        match self.target_index {
            Some(index) if index >= 0 => usize::try_from(index)
                .map(AttackTarget::Creature)
                .unwrap_or(AttackTarget::Creature(usize::MAX)),
            _ => AttackTarget::Player,
        }
    }
}

impl ClientMessage {
    /// The turn action carried by this message, if any.
    pub fn battle_action(&self) -> Option<BattleAction> {
        match self {
            ClientMessage::PlayCard { hand_index } => Some(BattleAction::PlayCard { hand_index: *hand_index }),
            ClientMessage::Attack(req) => Some(BattleAction::Attack {
                attacker_index: req.attacker_index,
                target: req.target(),
            }),
            ClientMessage::EndTurn => Some(BattleAction::EndTurn),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn action_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinSession { .. } => "join_session",
            ClientMessage::PlayCard { .. } => "play_card",
            ClientMessage::Attack(_) => "attack",
            ClientMessage::EndTurn => "end_turn",
            ClientMessage::GetBattleState => "get_battle_state",
            ClientMessage::Surrender => "surrender",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full battle snapshot.
    BattleState(BattleSnapshot),

    /// Error message (sender only).
    Error(ServerError),

    /// First connection bound; waiting for the other member.
    AwaitingOpponent {
        /// Bound session.
        session_id: String,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (Unix millis).
        server_time: u64,
    },

    /// Server is closing this connection.
    Shutdown {
        /// Why.
        reason: String,
    },
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }

    /// Error code, if this is an error.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ServerMessage::Error(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unparseable or unknown inbound message.
    InvalidMessage,
    /// Hand or board index out of range.
    InvalidIndex,
    /// Attack target not in play.
    InvalidTarget,
    /// Card costs more than available mana.
    NotEnoughMana,
    /// Creature already attacked this turn.
    CardExhausted,
    /// Sender is not the turn owner.
    NotYourTurn,
    /// Session already has two members.
    AlreadyFull,
    /// Host tried to join their own session.
    SelfJoin,
    /// User already occupies another active session.
    AlreadyInSession,
    /// Session is not ready or in progress.
    SessionNotReady,
    /// User is not a member of the session.
    NotAMember,
    /// Connection is not bound to a session.
    NotInSession,
    /// User already has a bound connection.
    AlreadyConnected,
    /// Battle has not started.
    BattleNotActive,
    /// Battle is over.
    BattleComplete,
    /// No such session.
    SessionNotFound,
    /// No battle for the session.
    BattleNotFound,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Connection limit reached.
    ServerOverloaded,
    /// Invariant violation.
    InternalError,
}

/// Taxonomy category of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input; no state change.
    Validation,
    /// Operation not allowed in the current state.
    StateConflict,
    /// Referenced entity does not exist.
    NotFound,
    /// Rejected before reaching core logic.
    Auth,
    /// Invariant violation; affected connections are closed.
    Fatal,
}

impl ErrorCode {
    /// Taxonomy category.
    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            InvalidMessage | InvalidIndex | InvalidTarget | NotEnoughMana | CardExhausted => {
                ErrorCategory::Validation
            }
            NotYourTurn | AlreadyFull | SelfJoin | AlreadyInSession | SessionNotReady | NotAMember
            | NotInSession | AlreadyConnected | BattleNotActive | BattleComplete => ErrorCategory::StateConflict,
            SessionNotFound | BattleNotFound => ErrorCategory::NotFound,
            Unauthorized => ErrorCategory::Auth,
            ServerOverloaded | InternalError => ErrorCategory::Fatal,
        }
    }
}

impl From<&BattleError> for ErrorCode {
    fn from(err: &BattleError) -> Self {
        match err {
            BattleError::BattleComplete => ErrorCode::BattleComplete,
            BattleError::NotActive | BattleError::AlreadyStarted => ErrorCode::BattleNotActive,
            BattleError::NotAMember => ErrorCode::NotAMember,
            BattleError::NotYourTurn => ErrorCode::NotYourTurn,
            BattleError::InvalidIndex { .. } => ErrorCode::InvalidIndex,
            BattleError::InvalidTarget { .. } => ErrorCode::InvalidTarget,
            BattleError::NotEnoughMana { .. } => ErrorCode::NotEnoughMana,
            BattleError::CardExhausted { .. } => ErrorCode::CardExhausted,
        }
    }
}

impl From<&BattleError> for ServerMessage {
    fn from(err: &BattleError) -> Self {
        ServerMessage::error(ErrorCode::from(err), err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::battle::Battle;
    use crate::game::rules::BattleConfig;

    #[test]
    fn test_parse_inbound_actions() {
        let join = ClientMessage::from_json(r#"{"action":"join_session","session_id":"s1","user_id":"alice"}"#).unwrap();
        assert_eq!(join, ClientMessage::JoinSession {
            session_id: "s1".into(),
            user_id: UserId::from("alice"),
        });

        let play = ClientMessage::from_json(r#"{"action":"play_card","hand_index":2}"#).unwrap();
        assert_eq!(play.battle_action(), Some(BattleAction::PlayCard { hand_index: 2 }));

        assert_eq!(ClientMessage::from_json(r#"{"action":"end_turn"}"#).unwrap(), ClientMessage::EndTurn);
        assert_eq!(ClientMessage::from_json(r#"{"action":"get_battle_state"}"#).unwrap(), ClientMessage::GetBattleState);
        assert_eq!(ClientMessage::from_json(r#"{"action":"surrender"}"#).unwrap().battle_action(), None);
    }

    #[test]
    fn test_attack_targets_and_aliases() {
        let direct = ClientMessage::from_json(r#"{"action":"attack","attacker_index":0}"#).unwrap();
        assert_eq!(direct.battle_action(), Some(BattleAction::Attack {
            attacker_index: 0,
            target: AttackTarget::Player,
        }));

        let negative = ClientMessage::from_json(r#"{"action":"attack","attacker_index":1,"target_index":-1}"#).unwrap();
        assert_eq!(negative.battle_action(), Some(BattleAction::Attack {
            attacker_index: 1,
            target: AttackTarget::Player,
        }));

        let legacy = ClientMessage::from_json(r#"{"action":"attack","attacker_hand_index":1,"target_hand_index":2}"#).unwrap();
        assert_eq!(legacy.battle_action(), Some(BattleAction::Attack {
            attacker_index: 1,
            target: AttackTarget::Creature(2),
        }));
    }

    #[test]
    fn test_malformed_inbound_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"action":"fly"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"action":"play_card"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"hand_index":0}"#).is_err());
    }

    #[test]
    fn test_battle_state_message_shape() {
        let battle = Battle::new("s1", UserId::from("a"), UserId::from("b"), BattleConfig::default());
        let msg = ServerMessage::BattleState(battle.snapshot());

        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "battle_state");
        assert_eq!(json["phase"], "awaiting_players");
        assert_eq!(json["turn_owner"], "a");
        assert_eq!(json["players"].as_array().unwrap().len(), 2);
        assert_eq!(json["state_hash"].as_str().unwrap().len(), 64);

        assert_eq!(ServerMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_outbound_control_messages() {
        let waiting = ServerMessage::AwaitingOpponent { session_id: "s1".into() }.to_json().unwrap();
        assert_eq!(waiting, r#"{"type":"awaiting_opponent","session_id":"s1"}"#);

        let err = ServerMessage::from(&BattleError::NotYourTurn);
        assert_eq!(err.error_code(), Some(ErrorCode::NotYourTurn));
        assert!(err.to_json().unwrap().contains(r#""code":"not_your_turn""#));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::InvalidIndex.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::NotYourTurn.category(), ErrorCategory::StateConflict);
        assert_eq!(ErrorCode::SelfJoin.category(), ErrorCategory::StateConflict);
        assert_eq!(ErrorCode::SessionNotFound.category(), ErrorCategory::NotFound);
        assert_eq!(ErrorCode::Unauthorized.category(), ErrorCategory::Auth);
        assert_eq!(ErrorCode::InternalError.category(), ErrorCategory::Fatal);
    }
}
