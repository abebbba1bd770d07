//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Logging → Listener → Server → serve until shutdown
//!
//! Shutdown (shutdown.rs):
//!     Signal received → root token cancelled → connections cancelled
//!     → request contexts cancelled → transcoders killed → drain → exit
//!
//! Requests (context.rs):
//!     connection token → RequestContext (optional deadline)
//! ```
//!
//! # Design Decisions
//! - One cancellation tree: shutdown → connection → request → feed
//! - Fail fast: any startup error is fatal
//! - Shutdown has a grace period, then the process exits anyway

pub mod context;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use context::RequestContext;
pub use shutdown::Shutdown;
