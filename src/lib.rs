//! # Card Battle Server
//!
//! Real-time orchestration core for a two-player card battle service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CARD BATTLE SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Battle logic (deterministic)              │
//! │  ├── card.rs     - Card model and starter catalog            │
//! │  ├── rules.rs    - Rules engine                              │
//! │  ├── state.rs    - Battle and player state, snapshots        │
//! │  ├── battle.rs   - Battle state machine                      │
//! │  └── events.rs   - Battle events and action log              │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── auth.rs     - Token verification                        │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Session registry                          │
//! │  ├── room.rs     - Battle plus bound connections             │
//! │  ├── gateway.rs  - Connection gateway                        │
//! │  ├── directory.rs- Session directory HTTP API                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── config.rs   - Server configuration                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+
//!
//! Given the same session id, players and actions, a battle produces
//! identical snapshots and state hashes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::battle::{Battle, BattleError};
pub use game::state::{BattleSnapshot, PlayerState, UserId};
pub use network::{Gateway, GameServer, ServerConfig, SessionRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
