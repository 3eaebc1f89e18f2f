//! Connection Module
//!
//! This module adapts one accepted socket to the chat protocol's lifecycle.
//! The multiplexer owns every `Connection` through the registry; the chat
//! handler drives its `on_accept`, `on_readable` and `on_close` hooks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Connection                           │
//! │                                                             │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌──────────────┐   │
//! │  │ BufferedStream   │  │ username     │  │ closing flag │   │
//! │  │ (owned socket)   │  │ (peer creds) │  │              │   │
//! │  └──────────────────┘  └──────────────┘  └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `handler`: the `Connection` type, its statistics and errors
//! - `identity`: resolving the peer's username from socket credentials

pub mod handler;
pub mod identity;

// Re-export commonly used types
pub use handler::{Connection, ConnectionError, ConnectionId, ConnectionStats};
pub use identity::{IdentityResolver, PeerCredentials};
