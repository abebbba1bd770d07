//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all transcoding handler
//! - Wire up middleware (tracing, request ID)
//! - Serve accepted connections over HTTP/1.1 and HTTP/2
//! - Enforce the header read timeout and the idle timeout per connection
//! - Cancel every connection, and with it every stream, on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::any, Extension, Router};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::handler::transcode_handler;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::net::{Activity, ActivityIo, ConnectionContext, ConnectionTracker, Listener};
use crate::transcode::{CommandLauncher, Launcher, ProcessSpec, Transcoder};
use crate::upstream::UpstreamFetcher;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for server construction and serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build upstream client: {0}")]
    UpstreamClient(#[from] reqwest::Error),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-stream tuning taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub chunk_size: usize,
    pub queue_depth: usize,
    pub deadline: Option<Duration>,
}

impl StreamSettings {
    fn from_config(config: &ProxyConfig) -> Self {
        Self {
            chunk_size: config.transcoder.output_chunk_size,
            queue_depth: config.transcoder.output_queue_depth,
            deadline: config.timeouts.stream_deadline(),
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<UpstreamFetcher>,
    pub transcoder: Transcoder,
    pub stream: StreamSettings,
    /// Parent token for requests that arrive without a connection context.
    pub root: CancellationToken,
}

/// HTTP server for the transcoding proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    root: CancellationToken,
}

impl HttpServer {
    /// Create a server that runs the configured transcoder program.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let launcher = CommandLauncher::new(ProcessSpec::transcoder(&config.transcoder.program));
        Self::with_launcher(config, Arc::new(launcher))
    }

    /// Create a server with a custom process launcher.
    pub fn with_launcher(config: ProxyConfig, launcher: Arc<dyn Launcher>) -> Result<Self, ServerError> {
        let fetcher = Arc::new(UpstreamFetcher::new(&config.upstream)?);
        let root = CancellationToken::new();

        let state = AppState {
            fetcher,
            transcoder: Transcoder::new(launcher),
            stream: StreamSettings::from_config(&config),
            root: root.clone(),
        };

        let router = Self::build_router(state);
        Ok(Self {
            router,
            config,
            root,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(transcode_handler))
            .route("/", any(transcode_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The fully layered router, for serving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server until `shutdown` is cancelled, then drain connections.
    pub async fn run(self, listener: Listener, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.base_url,
            "HTTP server starting"
        );

        let tracker = ConnectionTracker::new();
        let read_timeout = self.config.timeouts.read();
        let idle_timeout = self.config.timeouts.idle();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let guard = tracker.track();
            let conn = ConnectionContext::new(guard.id(), peer, shutdown.child_token());
            let service = TowerToHyperService::new(Extension(conn.clone()).layer(self.router.clone()));

            tokio::spawn(async move {
                let _guard = guard;
                let _permit = permit;
                let _closed = conn.close_on_drop();
                let token = conn.token().clone();
                // Requests on this connection end with it.
                let _cancel_requests = token.clone().drop_guard();

                let activity = Activity::new();
                let io = TokioIo::new(ActivityIo::new(stream, activity.clone()));

                let mut builder = auto::Builder::new(TokioExecutor::new());
                builder
                    .http1()
                    .timer(TokioTimer::new())
                    .header_read_timeout(read_timeout)
                    .keep_alive(true);

                let connection = builder.serve_connection(io, service);
                tokio::pin!(connection);

                let mut draining = false;
                loop {
                    tokio::select! {
                        served = connection.as_mut() => {
                            if let Err(e) = served {
                                tracing::debug!(connection_id = %conn.id(), peer = %conn.peer(), error = %e, "Connection ended with error");
                            }
                            break;
                        }
                        _ = conn.aborted() => {
                            tracing::debug!(connection_id = %conn.id(), "Connection aborted by handler");
                            break;
                        }
                        _ = token.cancelled(), if !draining => {
                            draining = true;
                            connection.as_mut().graceful_shutdown();
                        }
                        _ = activity.idle(idle_timeout), if !draining => {
                            tracing::debug!(connection_id = %conn.id(), "Closing idle connection");
                            draining = true;
                            connection.as_mut().graceful_shutdown();
                        }
                    }
                }
            });
        }

        tracing::info!(active_connections = tracker.active_count(), "Shutdown requested, draining connections");
        self.root.cancel();

        let remaining = tracker
            .wait_for_shutdown(self.config.timeouts.shutdown_grace())
            .await;
        if remaining > 0 {
            tracing::warn!(remaining, "Connections still open after shutdown grace period");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
