use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, LogSink, MessageSink};
use crate::channel::{self, MessageReceiver, MessageSender};
use crate::config::{ServerConfig, clamp_permits};
use crate::conn::{self, CloseReason, ReadPolicy};
use crate::error::ServerError;
use crate::state::ServerState;

pub trait Acceptor: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops once `signal` resolves. If the signal handler cannot be
    /// installed the server keeps running.
    pub async fn stop_on<F>(self, signal: F)
    where
        F: Future<Output = io::Result<()>>,
    {
        match signal.await {
            Ok(()) => {
                info!("shutdown signal received");
                self.stop();
            }
            Err(err) => warn!(error = ?err, "failed to install shutdown signal handler"),
        }
    }
}

pub struct Server {
    config: ServerConfig,
    tx: MessageSender,
    rx: MessageReceiver,
    shutdown: CancellationToken,
    state: ServerState,
    sink: Box<dyn MessageSink>,
}

impl Server {
    pub fn new(listen: impl Into<String>) -> Self {
        Self::with_config(ServerConfig::with_listen(listen))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let (tx, rx) = channel::channel(config.channel_capacity, config.overflow);

        Self {
            config,
            tx,
            rx,
            shutdown: CancellationToken::new(),
            state: ServerState::default(),
            sink: Box::new(LogSink),
        }
    }

    pub fn with_sink(mut self, sink: impl MessageSink) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Binds the configured address and serves until stopped. A bind failure
    /// is returned before any task is spawned.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.run(listener).await
    }

    pub async fn run<A: Acceptor>(self, acceptor: A) -> Result<(), ServerError> {
        let local = acceptor.local_addr().map_err(ServerError::LocalAddr)?;
        let Server {
            config,
            tx,
            rx,
            shutdown,
            state,
            sink,
        } = self;

        info!(address = %local, "server started");

        let accept_task = tokio::spawn(accept_loop(
            acceptor,
            AcceptContext {
                tx,
                state: state.clone(),
                shutdown: shutdown.clone(),
                limit: Arc::new(Semaphore::new(clamp_permits(config.max_connections))),
                policy: Arc::new(ReadPolicy::from(&config)),
                error_delay: config.accept_error_delay,
            },
        ));
        let aggregator_task = tokio::spawn(Aggregator::new(rx, sink).run(shutdown.clone()));

        shutdown.cancelled().await;
        info!(address = %local, stats = ?state.stats(), "shutting down");

        if let Err(err) = accept_task.await {
            warn!(error = %err, "accept loop ended abnormally");
        }
        match aggregator_task.await {
            Ok(handled) => debug!(handled, "aggregator joined"),
            Err(err) => warn!(error = %err, "aggregator ended abnormally"),
        }

        Ok(())
    }
}

struct AcceptContext {
    tx: MessageSender,
    state: ServerState,
    shutdown: CancellationToken,
    limit: Arc<Semaphore>,
    policy: Arc<ReadPolicy>,
    error_delay: Duration,
}

/// Accepts until shutdown. The acceptor, and with it the listening socket, is
/// dropped when this returns.
async fn accept_loop<A: Acceptor>(mut acceptor: A, ctx: AcceptContext) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            p = ctx.limit.clone().acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            r = acceptor.accept() => r,
        };

        match accepted {
            Ok((socket, peer)) => spawn_reader(socket, peer, permit, &ctx),
            Err(err) => {
                ctx.state.record_accept_error();
                error!(error = %err, "failed to accept connection");

                tokio::select! {
                    biased;
                    _ = ctx.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ctx.error_delay) => {}
                }
            }
        }
    }

    debug!("accept loop stopped");
}

fn spawn_reader(socket: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit, ctx: &AcceptContext) {
    let id = ctx.state.register(peer);
    let cancel = ctx.shutdown.child_token();
    let tx = ctx.tx.clone();
    let state = ctx.state.clone();
    let policy = Arc::clone(&ctx.policy);

    debug!(peer = %peer, id, active = ctx.state.active(), "connection accepted");

    tokio::spawn(async move {
        let reason = conn::handle(socket, peer.to_string(), tx, state.clone(), cancel, &policy).await;

        state.unregister(id);
        drop(permit);

        match reason {
            CloseReason::PeerClosed | CloseReason::Cancelled => {
                debug!(peer = %peer, ?reason, "disconnected")
            }
            _ => info!(peer = %peer, ?reason, "disconnected"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_failure_is_reported_as_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let server = Server::new(addr.clone());
        let state = server.state();

        match server.start().await {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected bind error, got {other:?}"),
        }
        assert_eq!(state.stats(), crate::state::Stats::default());
    }

    #[tokio::test]
    async fn stop_before_start_returns_immediately() {
        let server = Server::new("127.0.0.1:0");
        server.stop();

        let handle = server.shutdown_handle();
        assert!(handle.is_stopped());
        server.start().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_limits_do_not_panic() {
        let server = Server::with_config(ServerConfig {
            channel_capacity: usize::MAX,
            max_connections: usize::MAX,
            read_buffer: usize::MAX,
            ..ServerConfig::with_listen("127.0.0.1:0")
        });
        server.stop();

        server.start().await.unwrap();
    }

    #[tokio::test]
    async fn signal_stops_the_server() {
        let server = Server::new("127.0.0.1:0");
        let handle = server.shutdown_handle();

        handle.clone().stop_on(async { Ok(()) }).await;

        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn failed_signal_install_keeps_the_server_running() {
        let server = Server::new("127.0.0.1:0");
        let handle = server.shutdown_handle();

        handle
            .clone()
            .stop_on(async { Err(io::Error::other("no signal support")) })
            .await;

        assert!(!handle.is_stopped());
    }

    #[test]
    fn construction_applies_config() {
        let server = Server::with_config(ServerConfig {
            channel_capacity: 3,
            overflow: channel::OverflowPolicy::Drop,
            ..ServerConfig::with_listen("127.0.0.1:0")
        });

        assert_eq!(server.config().channel_capacity, 3);
        assert_eq!(server.tx.policy(), channel::OverflowPolicy::Drop);
        assert!(!server.shutdown_handle().is_stopped());
    }
}
