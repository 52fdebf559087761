//! Proxy module
//!
//! The session layer of the proxy:
//! - Handshake classification of fresh sockets
//! - The connection task owning mirror, walk state, and attached clients
//! - The walk state machine
//! - Attach replay synthesis
//! - The registry routing reconnecting sockets to their sessions

pub mod attached;
pub mod connection;
pub mod handshake;
pub mod registry;
pub mod replay;
pub mod upstream;
pub mod walk;

pub use connection::{Connection, ConnectionEvent};
pub use registry::ConnectionRegistry;
pub use walk::{ClientId, WalkState, MAX_WALK_QUEUE};
