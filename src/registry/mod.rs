//! Registry Module
//!
//! The multiplexer's table of live connections and the presence view the
//! chat protocol derives from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Registry                            │
//! │                                                             │
//! │   fd:5 ─> Connection { alice }                              │
//! │   fd:6 ─> Connection { bob }       usernames() = {alice,    │
//! │   fd:8 ─> Connection { alice }                     bob}     │
//! │                                    connection_count(alice)  │
//! │                                                   = 2       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the multiplexer thread touches the registry, so it needs no locks.

pub mod connections;

pub use connections::Registry;
