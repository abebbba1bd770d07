//! Per-request cancellation context.
//!
//! A `RequestContext` is created once per inbound request as a child of the
//! connection's token, so it is cancelled when the client goes away, when the
//! server shuts down, when the optional deadline passes, or explicitly by the
//! pipeline (e.g. after a failed write to the client). Clones share the same
//! token: the fetcher, the transcoder and the relay all observe one signal.

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Create a context that is cancelled whenever `parent` is.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            deadline: None,
        }
    }

    /// Cancel the context once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The underlying token. Tasks that must stop before the request does
    /// derive child tokens from it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled.
    ///
    /// If the deadline is what fires, the token is cancelled as well so that
    /// child tokens observe it.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::debug!("Request deadline reached");
                        self.token.cancel();
                    }
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Cancel the context when the returned guard is dropped, unless it is
    /// disarmed first.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn parent_cancellation_reaches_request() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::new(&parent);
        let clone = ctx.clone();

        assert!(!ctx.is_cancelled());
        parent.cancel();
        clone.cancelled().await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn request_cancellation_does_not_touch_parent() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::new(&parent);
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_token_and_children() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::new(&parent)
            .with_deadline(Instant::now() + Duration::from_secs(5));
        let child = ctx.token().child_token();

        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn drop_guard_cancels_unless_disarmed() {
        let parent = CancellationToken::new();

        let ctx = RequestContext::new(&parent);
        drop(ctx.cancel_on_drop());
        assert!(ctx.is_cancelled());

        let ctx = RequestContext::new(&parent);
        let _ = ctx.cancel_on_drop().disarm();
        assert!(!ctx.is_cancelled());
    }
}
