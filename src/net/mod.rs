//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, cancellation token, activity tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Closing a connection cancels every request it carries

pub mod connection;
pub mod listener;

pub use connection::{
    Activity, ActivityIo, ConnectionContext, ConnectionGuard, ConnectionId, ConnectionTracker,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
