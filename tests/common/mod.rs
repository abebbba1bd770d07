//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::net::TcpListener;

use transcode_proxy::config::ProxyConfig;
use transcode_proxy::http::HttpServer;
use transcode_proxy::lifecycle::Shutdown;
use transcode_proxy::net::Listener;
use transcode_proxy::transcode::{ChildProcess, CommandLauncher, Launcher, ProcessHandle, ProcessSpec};

/// Serve `app` as a mock upstream on an ephemeral port.
pub async fn start_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A body that emits `chunk` bytes of MPEG-TS sync bytes every `interval`, forever.
pub fn endless_body(chunk: usize, interval: Duration) -> Body {
    let chunks = futures_util::stream::unfold((), move |_| async move {
        tokio::time::sleep(interval).await;
        Some((Ok::<_, io::Error>(Bytes::from(vec![0x47u8; chunk])), ()))
    });
    Body::from_stream(chunks)
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn proxy_config(upstream: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.base_url = format!("http://{}", upstream);
    config.upstream.response_timeout_secs = 3;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig, launcher: Arc<dyn Launcher>) -> (SocketAddr, Shutdown) {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections);

    let server = HttpServer::with_launcher(config, launcher).unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Launcher wrapper that records every start, pid and reap.
pub struct CountingLauncher {
    inner: CommandLauncher,
    launched: AtomicUsize,
    reaped: Arc<AtomicUsize>,
    pids: Mutex<Vec<u32>>,
    exits: Arc<Mutex<Vec<ExitStatus>>>,
}

impl CountingLauncher {
    pub fn new(program: &str, args: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: CommandLauncher::new(ProcessSpec::new(program, args.iter().copied())),
            launched: AtomicUsize::new(0),
            reaped: Arc::new(AtomicUsize::new(0)),
            pids: Mutex::new(Vec::new()),
            exits: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// A launcher whose process copies stdin to stdout.
    pub fn echo() -> Arc<Self> {
        Self::new("cat", &[])
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn reaped(&self) -> usize {
        self.reaped.load(Ordering::SeqCst)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.pids.lock().unwrap().clone()
    }

    pub fn exits(&self) -> Vec<ExitStatus> {
        self.exits.lock().unwrap().clone()
    }

    /// Poll until `reaped() == n` or `within` elapses.
    pub async fn wait_reaped(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.reaped() == n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.reaped() == n
    }
}

impl Launcher for CountingLauncher {
    fn launch(&self) -> io::Result<ProcessHandle> {
        let mut handle = self.inner.launch()?;
        self.launched.fetch_add(1, Ordering::SeqCst);
        if let Some(pid) = handle.child.id() {
            self.pids.lock().unwrap().push(pid);
        }
        handle.child = Box::new(CountingChild {
            inner: handle.child,
            reaped: self.reaped.clone(),
            exits: self.exits.clone(),
        });
        Ok(handle)
    }
}

struct CountingChild {
    inner: Box<dyn ChildProcess>,
    reaped: Arc<AtomicUsize>,
    exits: Arc<Mutex<Vec<ExitStatus>>>,
}

impl ChildProcess for CountingChild {
    fn id(&self) -> Option<u32> {
        self.inner.id()
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.inner.start_kill()
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitStatus>> {
        Box::pin(async move {
            let status = self.inner.wait().await;
            if let Ok(status) = &status {
                self.exits.lock().unwrap().push(*status);
            }
            self.reaped.fetch_add(1, Ordering::SeqCst);
            status
        })
    }
}
