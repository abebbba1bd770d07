//! Transcoding streaming proxy.
//!
//! Fetches media from an upstream origin, pipes it through one external
//! transcoder process per request and streams the transcoded MPEG-TS output
//! to the client.
//!
//! ```text
//!   client ──▶ net ──▶ http::server ──▶ http::handler ──▶ upstream ──▶ origin
//!                                          │                 │ body
//!                                          │                 ▼
//!                                          │        transcode (stdin)
//!                                          │           [ process ]
//!   client ◀── chunked body ◀── relay ◀────┴──────── transcode (stdout)
//! ```
//!
//! A client disconnect, a server shutdown or a stream deadline cancels the
//! request context, which aborts the upstream fetch, kills the process and
//! unblocks both copies.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod transcode;
pub mod upstream;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{RequestContext, Shutdown};
