//! Session Registry
//!
//! Owns every matchmaking session and enforces its lifecycle:
//!
//! ```text
//! waiting ──join──► ready ──both bound──► in_progress ──battle over──► finished ──grace──► (removed)
//!    │                │                        │
//!    └─host leaves──► (removed)                └──member leaves / disconnects──► finished
//! ```
//!
//! All create/join/leave calls take one write lock over the session map
//! and the membership index together, so they are linearizable. The
//! registry never holds its lock while acquiring a room lock; callers
//! holding a room lock may call into the registry.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::game::battle::Battle;
use crate::game::rules::BattleConfig;
use crate::game::state::UserId;
use crate::network::protocol::ErrorCode;
use crate::network::room::{BattleRoom, RoomHandle};

/// Unique session identifier (UUID v4 string).
pub type SessionId = String;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Host only, open for a guest.
    Waiting,
    /// Both members present, realtime connections pending.
    Ready,
    /// Battle active.
    InProgress,
    /// Over; removed after a grace period.
    Finished,
}

impl SessionStatus {
    /// Counts toward a user's single active session.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionStatus::Finished)
    }
}

/// A matchmaking session.
#[derive(Debug)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Creator; acts first.
    pub host: UserId,
    /// Second member, once joined.
    pub guest: Option<UserId>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Wall-clock creation time (for listings).
    pub created_at: DateTime<Utc>,
    /// Monotonic creation time (for TTL).
    created: Instant,
    /// When the session became ready.
    ready_at: Option<Instant>,
    /// When the session became finished.
    finished_at: Option<Instant>,
    /// Battle room, from join onwards.
    room: Option<RoomHandle>,
}

impl Session {
    fn new(host: UserId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            host,
            guest: None,
            status: SessionStatus::Waiting,
            created_at: Utc::now(),
            created: Instant::now(),
            ready_at: None,
            finished_at: None,
            room: None,
        }
    }

    /// Is `user_id` the host or guest.
    pub fn is_member(&self, user_id: &UserId) -> bool {
        &self.host == user_id || self.guest.as_ref() == Some(user_id)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            status: self.status,
            host_user_id: self.host.clone(),
            guest_user_id: self.guest.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creator.
    pub host_user_id: UserId,
    /// Second member.
    pub guest_user_id: Option<UserId>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// What `leave` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Waiting session deleted.
    Removed,
    /// Two-member session terminated.
    Finished,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No such session.
    #[error("Session not found")]
    NotFound,

    /// Session already has two members.
    #[error("Session is full")]
    AlreadyFull,

    /// Host tried to join their own session.
    #[error("Cannot join your own session")]
    SelfJoin,

    /// User already occupies another active session.
    #[error("Already in an active session")]
    AlreadyInSession,

    /// User is not a member of the session.
    #[error("Not a member of this session")]
    NotAMember,

    /// Session is not ready or in progress.
    #[error("Session is not ready")]
    NotReady,
}

impl SessionError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotFound => ErrorCode::SessionNotFound,
            SessionError::AlreadyFull => ErrorCode::AlreadyFull,
            SessionError::SelfJoin => ErrorCode::SelfJoin,
            SessionError::AlreadyInSession => ErrorCode::AlreadyInSession,
            SessionError::NotAMember => ErrorCode::NotAMember,
            SessionError::NotReady => ErrorCode::SessionNotReady,
        }
    }
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Session expiry windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Waiting sessions older than this are removed.
    pub waiting_ttl: Duration,
    /// Ready sessions not started within this are ended.
    pub ready_ttl: Duration,
    /// Finished sessions are removed after this long.
    pub finished_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            waiting_ttl: Duration::from_secs(600),
            ready_ttl: Duration::from_secs(600),
            finished_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    /// All sessions, including finished ones awaiting purge.
    sessions: BTreeMap<SessionId, Session>,
    /// User to active session mapping.
    memberships: BTreeMap<UserId, SessionId>,
}

impl RegistryInner {
    fn release_members(&mut self, session_id: &str) {
        self.memberships.retain(|_, sid| sid.as_str() != session_id);
    }
}

/// Manages all sessions.
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    battle_config: BattleConfig,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(battle_config: BattleConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            battle_config,
        }
    }

    /// Create a `waiting` session hosted by `host`.
    pub async fn create(&self, host: UserId) -> Result<SessionId, SessionError> {
        let mut inner = self.inner.write().await;

        if inner.memberships.contains_key(&host) {
            return Err(SessionError::AlreadyInSession);
        }

        let session = Session::new(host.clone());
        let id = session.id.clone();
        inner.memberships.insert(host.clone(), id.clone());
        inner.sessions.insert(id.clone(), session);

        info!(session_id = %id, host = %host, "Session created");
        Ok(id)
    }

    /// Fill the guest slot; `waiting → ready`. The battle is created here
    /// in `awaiting_players`.
    pub async fn join(&self, session_id: &str, user_id: UserId) -> Result<SessionStatus, SessionError> {
        let mut inner = self.inner.write().await;

        let occupied = inner.memberships.get(&user_id).cloned();
        let session = inner.sessions.get_mut(session_id).ok_or(SessionError::NotFound)?;

        if session.host == user_id {
            return Err(SessionError::SelfJoin);
        }
        if session.guest.is_some() || session.status != SessionStatus::Waiting {
            return Err(SessionError::AlreadyFull);
        }
        if occupied.is_some() {
            return Err(SessionError::AlreadyInSession);
        }

        let battle = Battle::new(session_id, session.host.clone(), user_id.clone(), self.battle_config.clone());
        session.guest = Some(user_id.clone());
        session.status = SessionStatus::Ready;
        session.ready_at = Some(Instant::now());
        session.room = Some(BattleRoom::new(battle).into_handle());

        inner.memberships.insert(user_id.clone(), session_id.to_string());

        info!(session_id = %session_id, guest = %user_id, "Session ready");
        Ok(SessionStatus::Ready)
    }

    /// Leave a session.
    ///
    /// A waiting session is removed. A ready or in-progress session is
    /// finished, and the remaining member wins by forfeit.
    pub async fn leave(&self, session_id: &str, user_id: &UserId) -> Result<LeaveOutcome, SessionError> {
        let room = {
            let mut inner = self.inner.write().await;
            let session = inner.sessions.get_mut(session_id).ok_or(SessionError::NotFound)?;

            if !session.is_member(user_id) {
                return Err(SessionError::NotAMember);
            }

            match session.status {
                SessionStatus::Waiting => {
                    inner.sessions.remove(session_id);
                    inner.release_members(session_id);
                    info!(session_id = %session_id, "Waiting session removed by host");
                    return Ok(LeaveOutcome::Removed);
                }
                SessionStatus::Finished => return Ok(LeaveOutcome::Finished),
                SessionStatus::Ready | SessionStatus::InProgress => {
                    session.status = SessionStatus::Finished;
                    session.finished_at = Some(Instant::now());
                    let room = session.room.clone();
                    inner.release_members(session_id);
                    room
                }
            }
        };

        // Registry lock released before touching the room.
        if let Some(room) = room {
            let mut room = room.lock().await;
            if room.battle_mut().forfeit(user_id).is_ok() {
                room.broadcast_snapshot();
            }
        }

        info!(session_id = %session_id, user_id = %user_id, "Member left, session finished");
        Ok(LeaveOutcome::Finished)
    }

    /// Visible sessions (finished ones are hidden), oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<&Session> = inner
            .sessions
            .values()
            .filter(|s| s.status.is_active())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions.into_iter().map(Session::info).collect()
    }

    /// One session's listing entry.
    pub async fn get(&self, session_id: &str) -> Option<SessionInfo> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id).map(Session::info)
    }

    /// Active session of a user.
    pub async fn session_of(&self, user_id: &UserId) -> Option<SessionId> {
        let inner = self.inner.read().await;
        inner.memberships.get(user_id).cloned()
    }

    /// Room for a member binding a realtime connection.
    ///
    /// Fails with `NotReady` unless the session is ready or in progress,
    /// then with `NotAMember`.
    pub async fn room_for_member(&self, session_id: &str, user_id: &UserId) -> Result<RoomHandle, SessionError> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(session_id).ok_or(SessionError::NotFound)?;

        if !matches!(session.status, SessionStatus::Ready | SessionStatus::InProgress) {
            return Err(SessionError::NotReady);
        }
        if !session.is_member(user_id) {
            return Err(SessionError::NotAMember);
        }
        session.room.clone().ok_or(SessionError::NotReady)
    }

    /// Room of a session in any status.
    pub async fn room(&self, session_id: &str) -> Option<RoomHandle> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id).and_then(|s| s.room.clone())
    }

    /// `ready → in_progress`.
    pub async fn mark_in_progress(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if session.status == SessionStatus::Ready {
                session.status = SessionStatus::InProgress;
                info!(session_id = %session_id, "Session in progress");
            }
        }
    }

    /// Mark finished and release both members. Idempotent.
    pub async fn mark_finished(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return;
        };
        if session.status == SessionStatus::Finished {
            return;
        }
        session.status = SessionStatus::Finished;
        session.finished_at = Some(Instant::now());
        inner.release_members(session_id);
        info!(session_id = %session_id, "Session finished");
    }

    /// Expire stale sessions. Returns how many were removed or ended.
    ///
    /// Waiting sessions past `waiting_ttl` are removed. Ready sessions
    /// whose players never both connected within `ready_ttl` are finished
    /// and their battle aborted. Finished sessions are removed after
    /// `finished_grace`, dropping their battle.
    pub async fn purge_expired(&self, timeouts: &SessionTimeouts) -> usize {
        let now = Instant::now();
        let mut stale_rooms = Vec::new();

        let removed = {
            let mut inner = self.inner.write().await;

            let expired: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| match s.status {
                    SessionStatus::Waiting => now.duration_since(s.created) >= timeouts.waiting_ttl,
                    SessionStatus::Finished => s
                        .finished_at
                        .map_or(true, |at| now.duration_since(at) >= timeouts.finished_grace),
                    _ => false,
                })
                .map(|s| s.id.clone())
                .collect();

            for id in &expired {
                if let Some(session) = inner.sessions.remove(id) {
                    debug!(session_id = %id, status = ?session.status, "Session purged");
                    if session.status == SessionStatus::Waiting {
                        inner.release_members(id);
                    }
                }
            }

            let unstarted: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| {
                    s.status == SessionStatus::Ready
                        && s.ready_at.map_or(true, |at| now.duration_since(at) >= timeouts.ready_ttl)
                })
                .map(|s| s.id.clone())
                .collect();

            for id in &unstarted {
                if let Some(session) = inner.sessions.get_mut(id) {
                    session.status = SessionStatus::Finished;
                    session.finished_at = Some(now);
                    stale_rooms.extend(session.room.clone());
                }
                inner.release_members(id);
                info!(session_id = %id, "Ready session expired before both players connected");
            }

            expired.len() + unstarted.len()
        };

        // Registry lock released before touching rooms.
        for room in stale_rooms {
            let mut room = room.lock().await;
            if !room.battle_mut().abort().is_empty() {
                room.broadcast_snapshot();
            }
        }

        removed
    }

    /// Number of sessions held, finished included.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(BattleConfig::default())
    }
}
