//! Connection Gateway
//!
//! Bridges persistent client connections to session and battle state.
//! Transport-agnostic: the WebSocket server feeds it decoded messages and
//! drains each connection's outbound `mpsc` channel.
//!
//! ## Locking
//!
//! Lock order is room → registry → connection table. The connection
//! table lock is never held across an `.await` on a room.
//! Every battle mutation and the broadcast that follows it happen under
//! the room lock, so all bound connections observe snapshots in the order
//! actions were accepted.
//!
//! ## Slow consumers
//!
//! Outbound sends never wait. A connection whose queue is full has
//! stopped reading; it is collected as stalled and, once the room lock is
//! released, dropped with disconnect semantics and its transport told to
//! close through [`Gateway::close_signal`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::game::battle::BattleError;
use crate::game::events::BattleEvent;
use crate::game::rules::BattleAction;
use crate::game::state::{BattlePhase, UserId};
use crate::network::protocol::{ClientMessage, ErrorCategory, ErrorCode, ServerMessage};
use crate::network::room::{deliver, BattleRoom, BindOutcome, ConnectionId, Delivery, RoomError};
use crate::network::session::{SessionError, SessionId, SessionRegistry};

// =============================================================================
// ERRORS
// =============================================================================

/// Gateway errors. All but `BindingMismatch` are reported to the sender
/// only and leave state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Connection id is not registered.
    #[error("Unknown connection")]
    UnknownConnection,

    /// Game action before `join_session`.
    #[error("Connection is not bound to a session")]
    NotInSession,

    /// Connection already bound elsewhere.
    #[error("Connection is already bound to another session")]
    AlreadyBound,

    /// `join_session` for a user other than the authenticated one.
    #[error("Authenticated as a different user")]
    IdentityMismatch,

    /// Another connection holds this user's seat.
    #[error("User already has a bound connection")]
    AlreadyConnected,

    /// Session was purged.
    #[error("Battle not found")]
    BattleNotFound,

    /// Registry rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Battle rejected the action.
    #[error(transparent)]
    Battle(#[from] BattleError),

    /// Gateway and room disagree about who holds a seat.
    #[error("Binding mismatch for {user_id} in session {session_id}")]
    BindingMismatch {
        /// Affected session.
        session_id: SessionId,
        /// Affected seat.
        user_id: UserId,
    },
}

impl GatewayError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::UnknownConnection | GatewayError::NotInSession => ErrorCode::NotInSession,
            GatewayError::AlreadyBound | GatewayError::AlreadyConnected => ErrorCode::AlreadyConnected,
            GatewayError::IdentityMismatch => ErrorCode::Unauthorized,
            GatewayError::BattleNotFound => ErrorCode::BattleNotFound,
            GatewayError::Session(e) => e.code(),
            GatewayError::Battle(e) => ErrorCode::from(e),
            GatewayError::BindingMismatch { .. } => ErrorCode::InternalError,
        }
    }
}

impl From<RoomError> for GatewayError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotAMember => GatewayError::Session(SessionError::NotAMember),
            RoomError::AlreadyConnected => GatewayError::AlreadyConnected,
        }
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// A live connection.
#[derive(Debug)]
struct Connection {
    /// User proven by the transport handshake, if any.
    identity: Option<UserId>,
    /// (session, user) after `join_session`.
    binding: Option<(SessionId, UserId)>,
    /// Outbound channel.
    sender: mpsc::Sender<ServerMessage>,
    /// Fired when the gateway drops the connection on its own.
    closer: Arc<Notify>,
    /// Connection time.
    connected_at: Instant,
    /// Last inbound message.
    last_activity: Instant,
}

/// The connection gateway.
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    connections: RwLock<BTreeMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
}

impl Gateway {
    /// Create a gateway over a registry.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Notified when the gateway drops this connection (stalled, idle or
    /// terminated). The transport should close on it.
    pub async fn close_signal(&self, connection_id: ConnectionId) -> Option<Arc<Notify>> {
        self.connections.read().await.get(&connection_id).map(|c| c.closer.clone())
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    /// Register a new, unbound connection.
    pub async fn on_connect(&self, sender: mpsc::Sender<ServerMessage>, identity: Option<UserId>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        self.connections.write().await.insert(id, Connection {
            identity: identity.clone(),
            binding: None,
            sender,
            closer: Arc::new(Notify::new()),
            connected_at: now,
            last_activity: now,
        });

        info!(connection_id = id, user_id = ?identity.as_ref().map(UserId::as_str), "Connection opened");
        id
    }

    /// Decode and handle a text frame.
    pub async fn on_text(&self, connection_id: ConnectionId, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.on_message(connection_id, message).await,
            Err(e) => {
                debug!(connection_id, "Invalid message: {}", e);
                self.touch(connection_id).await;
                self.send_to(
                    connection_id,
                    ServerMessage::error(ErrorCode::InvalidMessage, format!("Invalid message: {}", e)),
                )
                .await;
            }
        }
    }

    /// Handle a decoded message. Errors go to the sender only.
    #[instrument(skip(self, message), fields(action = message.action_name()))]
    pub async fn on_message(&self, connection_id: ConnectionId, message: ClientMessage) {
        if !self.touch(connection_id).await {
            warn!(connection_id, "Message for unknown connection");
            return;
        }

        let result = match message {
            ClientMessage::JoinSession { session_id, user_id } => {
                self.join_session(connection_id, session_id, user_id).await
            }
            ClientMessage::GetBattleState => self.send_state(connection_id).await,
            ClientMessage::Surrender => self.surrender(connection_id).await,
            ClientMessage::Ping { timestamp } => {
                let server_time = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default();
                let pong = ServerMessage::Pong { timestamp, server_time };
                Ok(self.try_send_to(connection_id, pong).await.into_iter().collect())
            }
            other => match other.battle_action() {
                Some(action) => self.battle_action(connection_id, action).await,
                None => Ok(Vec::new()),
            },
        };

        match result {
            Ok(stalled) => self.evict(stalled).await,
            Err(err) => {
                let code = err.code();
                if code.category() == ErrorCategory::Fatal {
                    error!(connection_id, "Invariant violation: {}", err);
                } else {
                    debug!(connection_id, code = ?code, "Rejected: {}", err);
                }

                self.send_to(connection_id, ServerMessage::error(code, err.to_string())).await;

                if let GatewayError::BindingMismatch { session_id, .. } = &err {
                    self.terminate_session(session_id, connection_id).await;
                }
            }
        }
    }

    /// Transport closed. Forfeits an active battle for the bound user.
    /// Idempotent.
    pub async fn on_disconnect(&self, connection_id: ConnectionId) {
        let stalled = self.disconnect(connection_id).await;
        self.evict(stalled).await;
    }

    /// Close connections silent for longer than `timeout`, with
    /// disconnect semantics. Returns how many were closed.
    pub async fn reap_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, c)| now.duration_since(c.last_activity) >= timeout)
                .map(|(id, _)| *id)
                .collect()
        };

        for &id in &idle {
            self.try_send_to(id, ServerMessage::Shutdown { reason: "Idle timeout".to_string() })
                .await;
            self.signal_close(id).await;
            self.on_disconnect(id).await;
            info!(connection_id = id, "Removed idle connection");
        }

        idle.len()
    }

    /// Tell every connection the server is going away.
    pub async fn shutdown_all(&self, reason: &str) {
        let senders: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, c)| (*id, c.sender.clone()))
            .collect();

        for (id, sender) in senders {
            deliver(id, &sender, ServerMessage::Shutdown { reason: reason.to_string() });
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    async fn join_session(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<Vec<ConnectionId>, GatewayError> {
        let (identity, binding, sender) = {
            let connections = self.connections.read().await;
            let c = connections.get(&connection_id).ok_or(GatewayError::UnknownConnection)?;
            (c.identity.clone(), c.binding.clone(), c.sender.clone())
        };

        if identity.as_ref().is_some_and(|id| id != &user_id) {
            return Err(GatewayError::IdentityMismatch);
        }
        if let Some((bound_session, bound_user)) = &binding {
            if bound_session != &session_id || bound_user != &user_id {
                if self.session_is_live(bound_session).await {
                    return Err(GatewayError::AlreadyBound);
                }
                self.release_binding(connection_id, bound_session, bound_user).await;
            }
        }

        let room = self.registry.room_for_member(&session_id, &user_id).await?;
        let mut room = room.lock().await;

        let outcome = room.bind(&user_id, connection_id, sender)?;

        if !self.set_binding(connection_id, &session_id, &user_id).await {
            // Disconnected while binding.
            room.unbind(&user_id, connection_id);
            return Err(GatewayError::UnknownConnection);
        }

        let starting = matches!(outcome, BindOutcome::Bound { bound: 2 })
            && room.battle().phase() == &BattlePhase::AwaitingPlayers;

        let stalled = if starting {
            let events = room.battle_mut().start()?;
            self.registry.mark_in_progress(&session_id).await;
            info!(session_id = %session_id, "Both players bound, battle started");
            self.after_commit(&session_id, &room, &events).await
        } else if room.battle().phase() == &BattlePhase::AwaitingPlayers {
            let ack = ServerMessage::AwaitingOpponent { session_id: session_id.clone() };
            self.try_send_to(connection_id, ack).await.into_iter().collect()
        } else {
            room.send_snapshot_to(&user_id).into_iter().collect()
        };

        Ok(stalled)
    }

    async fn battle_action(
        &self,
        connection_id: ConnectionId,
        action: BattleAction,
    ) -> Result<Vec<ConnectionId>, GatewayError> {
        let (session_id, user_id) = self.binding_of(connection_id).await?;
        let room = self.registry.room(&session_id).await.ok_or(GatewayError::BattleNotFound)?;
        let mut room = room.lock().await;

        Self::check_binding(&room, &session_id, &user_id, connection_id)?;

        let events = room.battle_mut().apply(&user_id, action)?;
        Ok(self.after_commit(&session_id, &room, &events).await)
    }

    async fn surrender(&self, connection_id: ConnectionId) -> Result<Vec<ConnectionId>, GatewayError> {
        let (session_id, user_id) = self.binding_of(connection_id).await?;
        let room = self.registry.room(&session_id).await.ok_or(GatewayError::BattleNotFound)?;
        let mut room = room.lock().await;

        Self::check_binding(&room, &session_id, &user_id, connection_id)?;

        let events = room.battle_mut().forfeit(&user_id)?;
        info!(session_id = %session_id, user_id = %user_id, "Surrendered");
        Ok(self.after_commit(&session_id, &room, &events).await)
    }

    async fn send_state(&self, connection_id: ConnectionId) -> Result<Vec<ConnectionId>, GatewayError> {
        let (session_id, user_id) = self.binding_of(connection_id).await?;
        let room = self.registry.room(&session_id).await.ok_or(GatewayError::BattleNotFound)?;
        let room = room.lock().await;

        Self::check_binding(&room, &session_id, &user_id, connection_id)?;

        Ok(room.send_snapshot_to(&user_id).into_iter().collect())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Log events, broadcast the new snapshot and finish the session if
    /// the battle is over. Caller holds the room lock. Returns stalled
    /// connections.
    async fn after_commit(&self, session_id: &str, room: &BattleRoom, events: &[BattleEvent]) -> Vec<ConnectionId> {
        for event in events {
            if event.is_terminal() {
                info!(session_id = %session_id, version = event.version, "{}", event.describe());
            } else {
                debug!(session_id = %session_id, version = event.version, "{}", event.describe());
            }
        }

        let stalled = room.broadcast_snapshot();

        if room.battle().is_complete() {
            self.registry.mark_finished(session_id).await;
        }

        stalled
    }

    /// Remove a connection record; forfeit its seat if the battle is
    /// active. Returns connections that stalled on the resulting broadcast.
    async fn disconnect(&self, connection_id: ConnectionId) -> Vec<ConnectionId> {
        let Some(connection) = self.connections.write().await.remove(&connection_id) else {
            return Vec::new();
        };

        info!(
            connection_id,
            duration_secs = connection.connected_at.elapsed().as_secs(),
            "Connection closed"
        );

        let Some((session_id, user_id)) = connection.binding else {
            return Vec::new();
        };
        let Some(room) = self.registry.room(&session_id).await else {
            return Vec::new();
        };

        let mut room = room.lock().await;
        if !room.unbind(&user_id, connection_id) || !room.battle().is_active() {
            return Vec::new();
        }

        match room.battle_mut().forfeit(&user_id) {
            Ok(events) => {
                info!(session_id = %session_id, user_id = %user_id, "Disconnected during battle, forfeit");
                self.after_commit(&session_id, &room, &events).await
            }
            Err(e) => {
                warn!(session_id = %session_id, "Forfeit on disconnect failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Drop connections that stopped reading, with disconnect semantics.
    /// Called with no room lock held.
    async fn evict(&self, mut stalled: Vec<ConnectionId>) {
        while let Some(id) = stalled.pop() {
            if self.signal_close(id).await {
                warn!(connection_id = id, "Client stopped reading, dropping connection");
            }
            stalled.extend(self.disconnect(id).await);
        }
    }

    /// Force-terminate a session after an invariant violation: abort the
    /// battle and close every affected connection.
    async fn terminate_session(&self, session_id: &str, offender: ConnectionId) {
        error!(session_id = %session_id, "Terminating session after internal error");

        let mut closed = vec![offender];
        if let Some(room) = self.registry.room(session_id).await {
            let mut room = room.lock().await;
            if !room.battle_mut().abort().is_empty() {
                room.broadcast_snapshot();
            }
            closed.extend(room.close_all("Internal error"));
        }
        self.registry.mark_finished(session_id).await;

        self.try_send_to(offender, ServerMessage::Shutdown { reason: "Internal error".to_string() })
            .await;

        {
            let mut connections = self.connections.write().await;
            for id in &closed {
                if let Some(c) = connections.get_mut(id) {
                    c.binding = None;
                }
            }
        }
        for id in closed {
            self.signal_close(id).await;
        }
    }

    /// A bound session that is gone or finished no longer holds the
    /// connection.
    async fn session_is_live(&self, session_id: &str) -> bool {
        self.registry
            .get(session_id)
            .await
            .is_some_and(|s| s.status.is_active())
    }

    async fn release_binding(&self, connection_id: ConnectionId, session_id: &str, user_id: &UserId) {
        if let Some(room) = self.registry.room(session_id).await {
            room.lock().await.unbind(user_id, connection_id);
        }
        if let Some(c) = self.connections.write().await.get_mut(&connection_id) {
            c.binding = None;
        }
        debug!(connection_id, session_id = %session_id, "Released binding to ended session");
    }

    fn check_binding(
        room: &BattleRoom,
        session_id: &str,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Result<(), GatewayError> {
        if room.binding_of(user_id) == Some(connection_id) {
            Ok(())
        } else {
            Err(GatewayError::BindingMismatch {
                session_id: session_id.to_string(),
                user_id: user_id.clone(),
            })
        }
    }

    async fn binding_of(&self, connection_id: ConnectionId) -> Result<(SessionId, UserId), GatewayError> {
        let connections = self.connections.read().await;
        let c = connections.get(&connection_id).ok_or(GatewayError::UnknownConnection)?;
        c.binding.clone().ok_or(GatewayError::NotInSession)
    }

    async fn set_binding(&self, connection_id: ConnectionId, session_id: &str, user_id: &UserId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&connection_id) {
            Some(c) => {
                c.binding = Some((session_id.to_string(), user_id.clone()));
                true
            }
            None => false,
        }
    }

    /// Refresh activity; false if the connection is unknown.
    async fn touch(&self, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&connection_id) {
            Some(c) => {
                c.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Queue a message without waiting. Returns the connection if its
    /// queue is full.
    async fn try_send_to(&self, connection_id: ConnectionId, message: ServerMessage) -> Option<ConnectionId> {
        let sender = self.connections.read().await.get(&connection_id).map(|c| c.sender.clone())?;
        match deliver(connection_id, &sender, message) {
            Delivery::Stalled => Some(connection_id),
            _ => None,
        }
    }

    /// Queue a message, evicting the connection if it has stopped reading.
    /// Not for use under a room lock.
    async fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) {
        if let Some(stalled) = self.try_send_to(connection_id, message).await {
            self.evict(vec![stalled]).await;
        }
    }

    /// Fire a connection's close signal; false if it is unknown.
    async fn signal_close(&self, connection_id: ConnectionId) -> bool {
        match self.close_signal(connection_id).await {
            Some(closer) => {
                closer.notify_one();
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
