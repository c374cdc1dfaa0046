//! Network Layer
//!
//! Sessions, connections and the wire protocol.
//! This layer is **non-deterministic** - all battle logic runs through `game/`.

pub mod auth;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;

pub use auth::{authenticator_from_config, AuthConfig, AuthError, Authenticator, TokenClaims};
pub use config::{ConfigError, ServerConfig};
pub use directory::{router, DirectoryApi, DirectoryResponse};
pub use gateway::{Gateway, GatewayError};
pub use protocol::{ClientMessage, ErrorCategory, ErrorCode, ServerMessage};
pub use room::{BattleRoom, ConnectionId, Delivery, RoomHandle};
pub use server::{GameServer, GameServerError};
pub use session::{SessionError, SessionId, SessionInfo, SessionRegistry, SessionStatus, SessionTimeouts};
