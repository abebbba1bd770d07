//! Transcoder session lifecycle.
//!
//! ```text
//! Transcoder::start ── launch ──▶ TranscodeSession
//!                                   │ feed(source)      spawn: source → stdin, then close stdin
//!                                   │ take_output()     stdout handed to the caller
//!                                   └ finish()          wait (kill on cancel), join feed,
//!                                                       join + log stderr, classify exit
//! ```

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::RequestContext;
use crate::transcode::process::{ChildProcess, Launcher, ProcessInput, ProcessOutput};

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to start transcoder: {0}")]
    Start(#[source] io::Error),
}

/// How a transcoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Exited successfully.
    Completed,
    /// Killed (or failed) because the request context was cancelled.
    TerminatedByCancellation,
    /// Exited abnormally without cancellation.
    ProcessFailed { exit: String },
}

/// Starts transcoder sessions. One process per request, never shared.
#[derive(Clone)]
pub struct Transcoder {
    launcher: Arc<dyn Launcher>,
}

impl Transcoder {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Launch a process bound to `ctx`.
    pub fn start(&self, ctx: &RequestContext) -> Result<TranscodeSession, TranscodeError> {
        let handle = self.launcher.launch().map_err(TranscodeError::Start)?;
        let pid = handle.child.id();
        tracing::info!(pid = ?pid, "Transcoder process started");

        let diagnostics = tokio::spawn(collect_diagnostics(handle.diagnostics));

        Ok(TranscodeSession {
            pid,
            ctx: ctx.clone(),
            feed_token: ctx.token().child_token(),
            input: Some(handle.input),
            output: Some(handle.output),
            child: handle.child,
            feeder: None,
            diagnostics: Some(diagnostics),
        })
    }
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder").finish_non_exhaustive()
    }
}

/// A running transcoder process and the tasks attached to it.
///
/// Call [`finish`](Self::finish) exactly once; it is the only place the
/// process is reaped. Dropping an unfinished session kills the process.
pub struct TranscodeSession {
    pid: Option<u32>,
    ctx: RequestContext,
    /// Child of the request token; stops the feed once the process is gone.
    feed_token: CancellationToken,
    input: Option<ProcessInput>,
    output: Option<ProcessOutput>,
    child: Box<dyn ChildProcess>,
    feeder: Option<JoinHandle<io::Result<u64>>>,
    diagnostics: Option<JoinHandle<Vec<u8>>>,
}

impl TranscodeSession {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Copy `source` into the process input on a background task, then
    /// close the input so the process sees end-of-input.
    ///
    /// Only the first call has an effect; the input exists once.
    pub fn feed<R>(&mut self, source: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let Some(input) = self.input.take() else {
            tracing::warn!(pid = ?self.pid, "Transcoder input already being fed");
            return;
        };
        let token = self.feed_token.clone();
        self.feeder = Some(tokio::spawn(feed_input(source, input, token)));
    }

    /// Hand the process output to the caller.
    pub fn take_output(&mut self) -> Option<ProcessOutput> {
        self.output.take()
    }

    /// Collect the process exit and everything attached to it.
    ///
    /// Blocks until the process exits. If the request context is cancelled
    /// while waiting, the process is killed first.
    pub async fn finish(mut self) -> StreamOutcome {
        let pid = self.pid;
        // An unfed input would keep the process waiting for data forever,
        // an unread output would keep it blocked on a full pipe.
        drop(self.input.take());
        drop(self.output.take());

        let waited = {
            let wait = self.child.wait();
            tokio::select! {
                status = wait => Some(status),
                _ = self.ctx.cancelled() => None,
            }
        };
        let status = match waited {
            Some(status) => status,
            None => {
                tracing::debug!(pid = ?pid, "Request cancelled, killing transcoder");
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(pid = ?pid, error = %e, "Kill failed, process already exiting");
                }
                self.child.wait().await
            }
        };

        // The feed must not outlive the process.
        self.feed_token.cancel();
        if let Some(feeder) = self.feeder.take() {
            match feeder.await {
                Ok(Ok(written)) => {
                    tracing::debug!(pid = ?pid, bytes = written, "Upstream fully fed to transcoder");
                }
                Ok(Err(e)) if self.feed_token.is_cancelled() && e.kind() == io::ErrorKind::Interrupted => {
                    tracing::debug!(pid = ?pid, "Transcoder input feed stopped");
                }
                Ok(Err(e)) if self.ctx.is_cancelled() => {
                    tracing::debug!(pid = ?pid, error = %e, "Transcoder input feed ended by cancellation");
                }
                Ok(Err(e)) => {
                    tracing::warn!(pid = ?pid, error = %e, "Error copying upstream body to transcoder input");
                }
                Err(e) => tracing::error!(pid = ?pid, error = %e, "Transcoder input task failed"),
            }
        }

        let diagnostics = match self.diagnostics.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let diagnostics = String::from_utf8_lossy(&diagnostics);
        let diagnostics = diagnostics.trim_end();

        // The diagnostics buffer is flushed exactly once, with the failure if
        // there is one.
        let outcome = classify(status, self.ctx.is_cancelled());
        match &outcome {
            StreamOutcome::ProcessFailed { exit } => {
                tracing::error!(pid = ?pid, exit = %exit, diagnostics = %diagnostics, "Transcoder exited with error");
            }
            StreamOutcome::Completed | StreamOutcome::TerminatedByCancellation => {
                if !diagnostics.is_empty() {
                    tracing::info!(pid = ?pid, diagnostics = %diagnostics, "Transcoder diagnostics");
                }
                tracing::debug!(pid = ?pid, outcome = ?outcome, "Transcoder reaped");
            }
        }
        outcome
    }
}

impl std::fmt::Debug for TranscodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeSession")
            .field("pid", &self.pid)
            .field("fed", &self.feeder.is_some())
            .finish_non_exhaustive()
    }
}

fn classify(status: io::Result<ExitStatus>, cancelled: bool) -> StreamOutcome {
    match status {
        Ok(status) if status.success() => StreamOutcome::Completed,
        _ if cancelled => StreamOutcome::TerminatedByCancellation,
        Ok(status) => StreamOutcome::ProcessFailed {
            exit: status.to_string(),
        },
        Err(e) => StreamOutcome::ProcessFailed {
            exit: format!("wait failed: {}", e),
        },
    }
}

async fn feed_input<R>(mut source: R, mut input: ProcessInput, token: CancellationToken) -> io::Result<u64>
where
    R: AsyncRead + Send + Unpin,
{
    let copied = tokio::select! {
        copied = tokio::io::copy(&mut source, &mut input) => copied,
        _ = token.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "input feed cancelled")),
    };
    // Closing stdin is the end-of-input signal.
    let _ = input.shutdown().await;
    drop(input);
    copied
}

async fn collect_diagnostics(mut diagnostics: ProcessOutput) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = diagnostics.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "Reading transcoder diagnostics failed");
    }
    buf
}
