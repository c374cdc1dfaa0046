//! Battle Room
//!
//! One battle plus the (at most two) connections bound to it. The room is
//! the per-battle single writer: every action for a battle runs while
//! holding the room's lock, including the broadcast that follows it, so
//! both connections observe snapshots in acceptance order. Sends never
//! wait, so a client that stops reading cannot hold the lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::game::battle::Battle;
use crate::game::state::UserId;
use crate::network::protocol::ServerMessage;

/// Unique connection identifier (per process).
pub type ConnectionId = u64;

/// Shared handle to a room.
pub type RoomHandle = Arc<Mutex<BattleRoom>>;

/// A connection bound to a seat.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Bound connection.
    pub connection_id: ConnectionId,
    /// Outbound channel of that connection.
    pub sender: mpsc::Sender<ServerMessage>,
}

/// Result of a successful bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// New binding; `bound` connections now in the room.
    Bound {
        /// Number of bound connections after this bind.
        bound: usize,
    },
    /// This connection was already bound to this seat.
    AlreadyBound,
}

/// Result of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the writer.
    Sent,
    /// Queue full: the client has stopped reading.
    Stalled,
    /// Writer gone; the transport is already closing.
    Closed,
}

/// Queue a message on a connection's outbound channel without waiting.
pub fn deliver(connection_id: ConnectionId, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> Delivery {
    match sender.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => {
            warn!(connection_id, "Outbound queue full");
            Delivery::Stalled
        }
        Err(TrySendError::Closed(_)) => {
            debug!(connection_id, "Send to closed connection");
            Delivery::Closed
        }
    }
}

/// Bind failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// User is not one of the two players.
    #[error("User is not a member of this battle")]
    NotAMember,

    /// Another connection already holds this user's seat.
    #[error("User already has a bound connection")]
    AlreadyConnected,
}

/// A battle and its bound connections.
#[derive(Debug)]
pub struct BattleRoom {
    battle: Battle,
    bindings: BTreeMap<UserId, Binding>,
}

impl BattleRoom {
    /// Wrap a battle.
    pub fn new(battle: Battle) -> Self {
        Self {
            battle,
            bindings: BTreeMap::new(),
        }
    }

    /// Wrap a battle in a shared handle.
    pub fn into_handle(self) -> RoomHandle {
        Arc::new(Mutex::new(self))
    }

    /// The battle.
    pub fn battle(&self) -> &Battle {
        &self.battle
    }

    /// The battle, mutably.
    pub fn battle_mut(&mut self) -> &mut Battle {
        &mut self.battle
    }

    /// Bind a connection to a member's seat.
    pub fn bind(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<BindOutcome, RoomError> {
        if self.battle.seat_of(user_id).is_none() {
            return Err(RoomError::NotAMember);
        }

        if let Some(existing) = self.bindings.get(user_id) {
            if existing.connection_id == connection_id {
                return Ok(BindOutcome::AlreadyBound);
            }
            return Err(RoomError::AlreadyConnected);
        }

        self.bindings.insert(user_id.clone(), Binding { connection_id, sender });
        debug!(
            session_id = %self.battle.session_id(),
            user_id = %user_id,
            connection_id,
            "Connection bound"
        );

        Ok(BindOutcome::Bound { bound: self.bindings.len() })
    }

    /// Remove a binding, only if it belongs to `connection_id`.
    pub fn unbind(&mut self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        match self.bindings.get(user_id) {
            Some(binding) if binding.connection_id == connection_id => {
                self.bindings.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Connection bound to a member.
    pub fn binding_of(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.bindings.get(user_id).map(|b| b.connection_id)
    }

    /// Number of bound connections.
    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }

    /// Bound connection ids.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.bindings.values().map(|b| b.connection_id).collect()
    }

    /// Send the current snapshot to every bound connection. Returns the
    /// connections whose outbound queue is full.
    pub fn broadcast_snapshot(&self) -> Vec<ConnectionId> {
        let message = ServerMessage::BattleState(self.battle.snapshot());

        #[cfg(feature = "debug-tracing")]
        if let Ok(json) = message.to_json() {
            debug!(session_id = %self.battle.session_id(), "Broadcast: {}", json);
        }

        self.broadcast(message)
    }

    /// Send a message to every bound connection without waiting on any
    /// of them. Returns the connections whose outbound queue is full.
    pub fn broadcast(&self, message: ServerMessage) -> Vec<ConnectionId> {
        self.bindings
            .values()
            .filter(|b| deliver(b.connection_id, &b.sender, message.clone()) == Delivery::Stalled)
            .map(|b| b.connection_id)
            .collect()
    }

    /// Send the current snapshot to one member. Returns the connection if
    /// its outbound queue is full.
    pub fn send_snapshot_to(&self, user_id: &UserId) -> Option<ConnectionId> {
        let binding = self.bindings.get(user_id)?;
        let message = ServerMessage::BattleState(self.battle.snapshot());
        match deliver(binding.connection_id, &binding.sender, message) {
            Delivery::Stalled => Some(binding.connection_id),
            _ => None,
        }
    }

    /// Tell every bound connection to close, then drop all bindings.
    /// Returns the closed connection ids.
    pub fn close_all(&mut self, reason: &str) -> Vec<ConnectionId> {
        self.broadcast(ServerMessage::Shutdown { reason: reason.to_string() });
        let closed = self.connection_ids();
        self.bindings.clear();
        closed
    }

    #[cfg(test)]
    pub(crate) fn force_binding(&mut self, user_id: UserId, binding: Binding) {
        self.bindings.insert(user_id, binding);
    }
}
