//! Outbound requests to the upstream origin.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::StatusCode;
use tokio_util::io::StreamReader;

use crate::config::UpstreamConfig;
use crate::lifecycle::RequestContext;

/// Why an upstream fetch produced no stream.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request context was cancelled before the upstream answered.
    #[error("request cancelled before the upstream responded")]
    Cancelled,

    #[error("upstream unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("upstream sent no response headers within {after:?}")]
    TimedOut { after: Duration },

    /// The upstream answered with something other than 200.
    #[error("upstream returned {status_text}")]
    Status { code: StatusCode, status_text: String },
}

/// Byte source over an upstream response body.
pub type UpstreamBody =
    StreamReader<Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>, Bytes>;

/// A successful (200) upstream response whose body has not been read yet.
#[derive(Debug)]
pub struct UpstreamResponse {
    url: String,
    response: reqwest::Response,
}

impl UpstreamResponse {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Consume the response, yielding its body as an `AsyncRead`.
    ///
    /// Dropping the reader closes the upstream body.
    pub fn into_body(self) -> UpstreamBody {
        let stream = self.response.bytes_stream().map_err(io::Error::other);
        StreamReader::new(Box::pin(stream))
    }
}

/// Fetches media from the configured upstream origin.
#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    client: reqwest::Client,
    base: String,
    response_timeout: Duration,
}

impl UpstreamFetcher {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base: config.base_url.clone(),
            response_timeout: config.response_timeout(),
        })
    }

    /// The URL fetched for an inbound `path` (path plus optional query).
    pub fn target_url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// GET `<base><path>`.
    ///
    /// The response timeout bounds the wait for headers only; the returned
    /// body streams for as long as the caller keeps reading it.
    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<UpstreamResponse, FetchError> {
        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let url = self.target_url(path);
        tracing::debug!(url = %url, "Fetching upstream");

        let send = tokio::time::timeout(self.response_timeout, self.client.get(&url).send());
        let sent = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(FetchError::Cancelled),
            sent = send => sent,
        };

        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(_)) if ctx.is_cancelled() => return Err(FetchError::Cancelled),
            Ok(Err(e)) => return Err(FetchError::Unreachable(e)),
            Err(_) => {
                return Err(FetchError::TimedOut {
                    after: self.response_timeout,
                })
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                code: status,
                status_text: status.to_string(),
            });
        }

        Ok(UpstreamResponse { url, response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn fetcher(base: &str) -> UpstreamFetcher {
        UpstreamFetcher::new(&UpstreamConfig {
            base_url: base.to_string(),
            response_timeout_secs: 2,
            ..Default::default()
        })
        .unwrap()
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn target_is_base_plus_path() {
        let f = fetcher("http://frigate:5000");
        for path in [
            "/",
            "/api/cam/recordings/clip.mp4",
            "/live?src=front&mode=ts",
            "/a%20b/c",
            "/double//slash?x=1&x=2#frag",
        ] {
            assert_eq!(f.target_url(path), format!("http://frigate:5000{}", path));
        }
    }

    #[tokio::test]
    async fn ok_response_streams_body() {
        let base = serve(Router::new().route("/clip.ts", get(|| async { "raw-media-bytes" }))).await;
        let f = fetcher(&base);
        let ctx = RequestContext::new(&CancellationToken::new());

        let response = f.fetch(&ctx, "/clip.ts").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.url(), format!("{}/clip.ts", base));

        let mut body = String::new();
        response.into_body().read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "raw-media-bytes");
    }

    #[tokio::test]
    async fn non_ok_status_is_reported() {
        let base = serve(Router::new()).await;
        let err = fetcher(&base)
            .fetch(&RequestContext::new(&CancellationToken::new()), "/missing")
            .await
            .unwrap_err();

        match err {
            FetchError::Status { code, status_text } => {
                assert_eq!(code, StatusCode::NOT_FOUND);
                assert_eq!(status_text, "404 Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(&format!("http://{}", addr))
            .fetch(&RequestContext::new(&CancellationToken::new()), "/")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_fetch() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "late"
            }),
        ))
        .await;
        let ctx = RequestContext::new(&CancellationToken::new());
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = fetcher(&base).fetch(&ctx, "/slow").await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn slow_headers_time_out() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "late"
            }),
        ))
        .await;

        let err = fetcher(&base)
            .fetch(&RequestContext::new(&CancellationToken::new()), "/slow")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn already_cancelled_skips_request() {
        let ctx = RequestContext::new(&CancellationToken::new());
        ctx.cancel();
        let err = fetcher("http://127.0.0.1:9").fetch(&ctx, "/").await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
