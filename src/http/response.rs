//! Response construction.
//!
//! # Responsibilities
//! - Map failures that happen before the response is committed to a status
//!   and a short text body
//! - Build the streaming transport-stream response and its body channel
//!
//! # Design Decisions
//! - Once the 200 head is returned nothing can change the status; later
//!   failures only end the body
//! - The body is fed through a bounded channel so the relay reads the
//!   transcoder no faster than the client drains

use std::io;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::transcode::TranscodeError;
use crate::upstream::FetchError;

pub const TRANSPORT_STREAM_CONTENT_TYPE: &str = "video/ts";

/// Status returned when the client is already gone. It is never seen by the
/// client; it only shows up in access logs.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Failures before the response head is committed.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("request cancelled before the upstream responded")]
    Cancelled,

    #[error("error connecting to upstream source")]
    UpstreamUnreachable,

    #[error("upstream returned {status_text}")]
    UpstreamStatus { code: StatusCode, status_text: String },

    #[error("transcoder failed to start")]
    TranscoderUnavailable,
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => ProxyError::Cancelled,
            FetchError::Unreachable(_) | FetchError::TimedOut { .. } => ProxyError::UpstreamUnreachable,
            FetchError::Status { code, status_text } => ProxyError::UpstreamStatus { code, status_text },
        }
    }
}

impl From<TranscodeError> for ProxyError {
    fn from(_: TranscodeError) -> Self {
        ProxyError::TranscoderUnavailable
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Cancelled => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            ProxyError::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamStatus { code, .. } => *code,
            ProxyError::TranscoderUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ProxyError::Cancelled => return status.into_response(),
            ProxyError::UpstreamUnreachable => "Error connecting to upstream source.".to_string(),
            ProxyError::UpstreamStatus { status_text, .. } => {
                format!("Upstream file not found or error: {}", status_text)
            }
            ProxyError::TranscoderUnavailable => {
                "Transcoding service unavailable (transcoder failed to start).".to_string()
            }
        };
        (status, format!("{}\n", message)).into_response()
    }
}

/// Sending half of a streaming response body.
pub type BodySender = mpsc::Sender<io::Result<Bytes>>;

/// A body fed by a bounded channel. The body ends when every sender is
/// dropped, or aborts on the first `Err` sent.
pub fn stream_channel(depth: usize) -> (BodySender, Body) {
    let (tx, rx) = mpsc::channel(depth);
    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    (tx, Body::from_stream(chunks))
}

/// The committed 200 response carrying transcoded media.
pub fn transport_stream(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(TRANSPORT_STREAM_CONTENT_TYPE),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
