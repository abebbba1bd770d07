//! Transcoding subsystem.
//!
//! # Data Flow
//! ```text
//! upstream body ──▶ feed task ──▶ stdin ┐
//!                                       │ transcoder process
//! caller ◀────────────────────── stdout ┘ stderr ──▶ diagnostics buffer ──▶ log
//! ```
//!
//! # Design Decisions
//! - One process per request, started only after the upstream answered 200
//! - The process is reached only through the `Launcher` / `ChildProcess` seam
//! - Exit status is always collected; cancellation kills before reaping

pub mod pipeline;
pub mod process;

pub use pipeline::{StreamOutcome, TranscodeError, TranscodeSession, Transcoder};
pub use process::{
    ChildProcess, CommandLauncher, Launcher, ProcessHandle, ProcessInput, ProcessOutput,
    ProcessSpec, TRANSCODER_ARGS,
};
