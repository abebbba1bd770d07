//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, timeouts, middleware)
//!     → request.rs (request ID)
//!     → handler.rs (fetch upstream, start transcoder, relay output)
//!     → response.rs (error mapping, streaming body)
//!     → Send to client
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{copy_to_client, transcode_handler, CopyEnd, CopyReport};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::{ProxyError, TRANSPORT_STREAM_CONTENT_TYPE};
pub use server::{AppState, HttpServer, ServerError, StreamSettings};
