//! Upstream origin access.
//!
//! # Data Flow
//! ```text
//! inbound path + query
//!     → client.rs (GET <base><path>, cancellable, header timeout)
//!     → UpstreamResponse (200 only)
//!     → into_body() → AsyncRead handed to the transcoder feed
//! ```
//!
//! # Design Decisions
//! - Single attempt, no retries: re-fetching a live stream has no meaning
//! - Non-200 answers are errors carrying the status for pass-through
//! - Certificate validation is configurable and off by default

pub mod client;

pub use client::{FetchError, UpstreamBody, UpstreamFetcher, UpstreamResponse};
