//! The streaming request handler.
//!
//! Each request runs the same protocol:
//! 1. derive a `RequestContext` from the connection
//! 2. fetch the upstream; map failures to a status (nothing started yet)
//! 3. start the transcoder; a launch failure is a 500
//! 4. feed the upstream body into the transcoder
//! 5. commit a 200 and hand the transcoder output to a relay task
//! 6. the relay copies output to the client, then reaps the process and
//!    logs the outcome before ending the body

use std::io;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;

use crate::http::request::RequestIdExt;
use crate::http::response::{self, BodySender, ProxyError};
use crate::http::server::AppState;
use crate::lifecycle::RequestContext;
use crate::net::ConnectionContext;
use crate::transcode::{ProcessOutput, StreamOutcome, TranscodeSession};
use crate::upstream::FetchError;

/// Why the copy from the transcoder to the client stopped.
#[derive(Debug)]
pub enum CopyEnd {
    /// The transcoder closed its output.
    Eof,
    /// The client stopped receiving; the response body was dropped.
    ClientGone,
    /// The request context was cancelled.
    Cancelled,
    /// Reading the transcoder output failed.
    ReadFailed(io::Error),
}

#[derive(Debug)]
pub struct CopyReport {
    pub sent: u64,
    pub end: CopyEnd,
}

pub async fn transcode_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let request_id = request.request_id().to_owned();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let conn = request.extensions().get::<ConnectionContext>().cloned();
    let parent = conn
        .as_ref()
        .map(|conn| conn.token().clone())
        .unwrap_or_else(|| state.root.clone());
    drop(request);

    let mut ctx = RequestContext::new(&parent);
    if let Some(limit) = state.stream.deadline {
        ctx = ctx.with_deadline(tokio::time::Instant::now() + limit);
    }
    // Dropping the handler before the relay takes over means the client left.
    let handoff = ctx.cancel_on_drop();

    tracing::info!(
        request_id = %request_id,
        path = %path,
        upstream = %state.fetcher.target_url(&path),
        "Transcoding request received"
    );

    let upstream = match state.fetcher.fetch(&ctx, &path).await {
        Ok(upstream) => upstream,
        Err(e) => {
            match &e {
                FetchError::Cancelled => {
                    tracing::debug!(request_id = %request_id, "Request cancelled before the upstream responded");
                    // Nothing is written for a cancelled fetch. The client may
                    // still be connected (deadline, shutdown), so drop the socket.
                    if let Some(conn) = &conn {
                        conn.abort().await;
                    }
                }
                FetchError::Status { code, .. } => {
                    tracing::warn!(request_id = %request_id, status = code.as_u16(), "Upstream returned non-OK status");
                }
                FetchError::Unreachable(_) | FetchError::TimedOut { .. } => {
                    tracing::error!(request_id = %request_id, error = %e, "Error fetching upstream");
                }
            }
            return ProxyError::from(e).into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        url = %upstream.url(),
        status = upstream.status().as_u16(),
        "Upstream responded"
    );

    let mut session = match state.transcoder.start(&ctx) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                "Error starting transcoder; make sure it is installed and on PATH"
            );
            return ProxyError::from(e).into_response();
        }
    };
    session.feed(upstream.into_body());

    let (tx, body) = response::stream_channel(state.stream.queue_depth);
    tokio::spawn(relay(Relay {
        ctx,
        session,
        tx,
        chunk_size: state.stream.chunk_size,
        request_id,
        path,
        started,
    }));
    let _ = handoff.disarm();

    response::transport_stream(body)
}

struct Relay {
    ctx: RequestContext,
    session: TranscodeSession,
    tx: BodySender,
    chunk_size: usize,
    request_id: String,
    path: String,
    started: Instant,
}

async fn relay(job: Relay) {
    let Relay {
        ctx,
        mut session,
        tx,
        chunk_size,
        request_id,
        path,
        started,
    } = job;
    let pid = session.pid();

    let report = match session.take_output() {
        Some(output) => copy_to_client(&ctx, output, &tx, chunk_size).await,
        None => CopyReport { sent: 0, end: CopyEnd::Eof },
    };

    let read_failure = match report.end {
        CopyEnd::Eof => None,
        CopyEnd::Cancelled => None,
        CopyEnd::ClientGone => {
            tracing::warn!(
                request_id = %request_id,
                pid = ?pid,
                bytes = report.sent,
                "Error copying transcoder output to client: client disconnected"
            );
            ctx.cancel();
            None
        }
        CopyEnd::ReadFailed(e) => {
            tracing::warn!(
                request_id = %request_id,
                pid = ?pid,
                bytes = report.sent,
                error = %e,
                "Error reading transcoder output"
            );
            Some(e)
        }
    };

    let outcome = session.finish().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        StreamOutcome::Completed => tracing::info!(
            request_id = %request_id,
            path = %path,
            bytes = report.sent,
            elapsed_ms,
            "Transcoding and streaming complete"
        ),
        StreamOutcome::TerminatedByCancellation => tracing::info!(
            request_id = %request_id,
            path = %path,
            bytes = report.sent,
            elapsed_ms,
            "Stream ended by cancellation"
        ),
        // Already reported with its diagnostics when the process was reaped.
        StreamOutcome::ProcessFailed { .. } => {}
    }

    if let Some(e) = read_failure {
        let _ = tx.send(Err(e)).await;
    }
}

/// Copy transcoder output into the response body until the output ends, the
/// client goes away, or the context is cancelled.
pub async fn copy_to_client(
    ctx: &RequestContext,
    output: ProcessOutput,
    tx: &BodySender,
    chunk_size: usize,
) -> CopyReport {
    let mut chunks = ReaderStream::with_capacity(output, chunk_size);
    let mut sent = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => return CopyReport { sent, end: CopyEnd::Cancelled },
            _ = tx.closed() => return CopyReport { sent, end: CopyEnd::ClientGone },
            next = chunks.next() => next,
        };

        let chunk = match next {
            None => return CopyReport { sent, end: CopyEnd::Eof },
            Some(Err(e)) => return CopyReport { sent, end: CopyEnd::ReadFailed(e) },
            Some(Ok(chunk)) => chunk,
        };

        let len = chunk.len() as u64;
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return CopyReport { sent, end: CopyEnd::Cancelled },
            delivered = tx.send(Ok(chunk)) => {
                if delivered.is_err() {
                    return CopyReport { sent, end: CopyEnd::ClientGone };
                }
            }
        }
        sent += len;
    }
}
