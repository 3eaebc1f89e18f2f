//! Chat Command Module
//!
//! The session protocol layer. It receives complete lines from the
//! multiplexer, interprets them, and routes replies through the registry.
//!
//! ## Architecture
//!
//! ```text
//! Readable descriptor
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ BufferedStream  │  (stream module)
//! └────────┬────────┘
//!          │ complete line
//!          ▼
//! ┌─────────────────┐
//! │  ChatHandler    │  (this module)
//! │                 │
//! │  - Parse        │
//! │  - Dispatch     │
//! │  - Presence     │
//! └────────┬────────┘
//!          │ replies
//!          ▼
//! ┌─────────────────┐
//! │    Registry     │  (registry module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `/quit`, `/exit`
//! - `/who`
//! - `/help`
//! - `/version`, `/about`
//! - `/msg`, `/priv`, `/query`

pub mod handler;

pub use handler::{ChatHandler, HELP_HINT};
