//! Listener glue: binding, admission at accept time, the sweep timer, and
//! shutdown.
//!
//! [`Server::listen`] is the entry point. It binds the TCP listener, arms
//! the sweep timer and starts the accept loop, then resolves with a
//! [`ServerHandle`]; a bind failure is the one startup error that surfaces
//! to the caller. Each accepted socket passes through
//! [`ConnectionRegistry::admit`] before its first request event is
//! processed; rejected sockets are destroyed on the spot, which a shedding
//! client observes as an abrupt close.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::HttpConnection;
use crate::handler::{AckHandler, Handler, NoopValidate, Validate};
use crate::registry::{ConnectionPermit, ConnectionRegistry};

/// Fixed period of the ttl sweep.
const SWEEP_PERIOD: Duration = Duration::from_millis(1000);

/// Tunables of the front end, with the stock defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Admission ceiling on concurrently live connections
    pub max_connections: usize,
    /// Maximum connection age before the sweep evicts it
    pub ttl: Duration,
    /// Maximum accepted request body size in bytes
    pub content_size_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 300, ttl: Duration::from_millis(30_000), content_size_limit: 1_000_000 }
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,
}

/// Startup failure: the listener could not be bound.
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("can't bind listen address: {source}")]
    Bind {
        #[from]
        source: io::Error,
    },
}

pub struct ServerBuilder {
    address: Option<Vec<SocketAddr>>,
    handler: Arc<dyn Handler>,
    validator: Arc<dyn Validate>,
    config: ServerConfig,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, handler: Arc::new(AckHandler), validator: Arc::new(NoopValidate), config: ServerConfig::default() }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().unwrap().collect::<Vec<_>>());
        self
    }

    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn validator(mut self, validator: impl Validate + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn content_size_limit(mut self, content_size_limit: usize) -> Self {
        self.config.content_size_limit = content_size_limit;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        Ok(Server { address, handler: self.handler, validator: self.validator, config: self.config })
    }
}

pub struct Server {
    address: Vec<SocketAddr>,
    handler: Arc<dyn Handler>,
    validator: Arc<dyn Validate>,
    config: ServerConfig,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the listener, arms the sweep timer and starts accepting.
    ///
    /// Resolves once both are running; the returned handle outlives this
    /// call and can observe and stop the server.
    pub async fn listen(self) -> Result<ServerHandle, ListenError> {
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(e.into());
            }
        };
        let local_addr = tcp_listener.local_addr()?;

        let registry = ConnectionRegistry::new(self.config.max_connections, self.config.ttl);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_sweeper(Arc::clone(&registry), shutdown.clone()));
        tokio::spawn(run_accept_loop(
            tcp_listener,
            Arc::clone(&registry),
            self.handler,
            self.validator,
            self.config.content_size_limit,
            shutdown.clone(),
        ));

        info!(addr = %local_addr, max_connections = self.config.max_connections, "listening");
        Ok(ServerHandle { local_addr, registry, shutdown })
    }
}

/// Runs the registry's ttl sweep on its fixed period until shutdown.
async fn run_sweeper(registry: Arc<ConnectionRegistry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_PERIOD);
    loop {
        select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => registry.sweep_expired(),
        }
    }
}

async fn run_accept_loop(
    tcp_listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn Handler>,
    validator: Arc<dyn Validate>,
    content_size_limit: usize,
    shutdown: CancellationToken,
) {
    loop {
        let (tcp_stream, remote_addr) = select! {
            _ = shutdown.cancelled() => break,
            accepted = tcp_listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        // admission happens before any request event for this connection
        let permit = match registry.admit() {
            Ok(permit) => permit,
            Err(e) => {
                warn!(cause = %e, addr = %remote_addr, "connection rejected");
                drop(tcp_stream);
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let validator = Arc::clone(&validator);

        tokio::spawn(async move {
            serve_connection(tcp_stream, remote_addr, permit, handler, validator, content_size_limit).await;
        });
    }
}

/// Drives one admitted connection to completion or eviction.
///
/// The socket lives until either the request loop finishes or the sweep
/// cancels the permit's token; eviction drops the in-flight handler future,
/// and the permit's drop deregisters the slot unless the sweep already did.
async fn serve_connection(
    tcp_stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    permit: ConnectionPermit,
    handler: Arc<dyn Handler>,
    validator: Arc<dyn Validate>,
    content_size_limit: usize,
) {
    let token = permit.token().clone();
    let (reader, writer) = tcp_stream.into_split();
    let connection = HttpConnection::new(reader, writer, Some(remote_addr), content_size_limit);

    select! {
        _ = token.cancelled() => {
            info!(index = permit.index(), addr = %remote_addr, "connection evicted while serving");
        }
        result = connection.process(handler, validator) => match result {
            Ok(()) => info!(index = permit.index(), "connection finished"),
            Err(e) => error!(index = permit.index(), cause = %e, "connection failed"),
        },
    }
}

/// A running server: its bound address, its registry, and the switch that
/// stops it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stops accepting, stops the sweep timer, and releases every live
    /// connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.sweep(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{make_handler, Payload};
    use crate::protocol::RequestContext;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn start(builder: ServerBuilder) -> ServerHandle {
        builder.address("127.0.0.1:0").build().unwrap().listen().await.unwrap()
    }

    async fn send_request(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();

        let mut buffer = vec![0u8; 4096];
        let n = stream.read(&mut buffer).await.unwrap();
        String::from_utf8(buffer[..n].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn serves_the_default_acknowledgement() {
        let handle = start(Server::builder()).await;

        let response = send_request(handle.local_addr(), "POST / HTTP/1.1\r\nContent-Length: 7\r\n\r\n{\"a\":1}").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("OK"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn custom_handler_sees_context_and_payload() {
        let handler = make_handler(|ctx: RequestContext, payload: Payload| async move {
            Ok::<_, std::io::Error>(format!("{} fields from {}", payload.len(), ctx.client_ip().unwrap_or("unknown")))
        });
        let handle = start(Server::builder().handler(handler)).await;

        let response = send_request(handle.local_addr(), "POST / HTTP/1.1\r\nContent-Length: 15\r\n\r\n{\"a\":1,\"b\":\"x\"}").await;
        assert!(response.contains("2 fields from 127.0.0.1"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn ceiling_rejection_destroys_the_socket() {
        let handle = start(Server::builder().max_connections(1)).await;

        // occupy the single slot and prove it is live
        let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
        first.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut buffer = vec![0u8; 1024];
        let n = first.read(&mut buffer).await.unwrap();
        assert!(n > 0);

        // the second connection is shed with no response bytes
        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut received = Vec::new();
        let outcome = timeout(Duration::from_secs(5), second.read_to_end(&mut received)).await.unwrap();
        match outcome {
            Ok(n) => assert_eq!(n, 0),
            // a reset instead of a clean FIN is also an abrupt close
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn admission_reopens_when_a_connection_closes() {
        let handle = start(Server::builder().max_connections(1)).await;

        let first = TcpStream::connect(handle.local_addr()).await.unwrap();
        // wait for the accept loop to register the connection
        while handle.registry().count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(first);
        while handle.registry().count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = send_request(handle.local_addr(), "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(handle.registry().count(), handle.registry().len());

        handle.shutdown();
    }

    #[tokio::test]
    async fn sweep_evicts_idle_connections_past_ttl() {
        let handle = start(Server::builder().ttl(Duration::from_millis(100))).await;

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        while handle.registry().count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // the sweep runs every second; well before the 5s cap the socket
        // must be destroyed with nothing written
        let mut received = Vec::new();
        let n = timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await.unwrap().unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(handle.registry().count(), 0);

        handle.shutdown();
    }

    #[tokio::test]
    async fn eviction_mid_request_orphans_the_handler() {
        let handler = make_handler(|_ctx, _payload: Payload| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, std::io::Error>("too late".to_string())
        });
        let handle = start(Server::builder().handler(handler).ttl(Duration::from_millis(100))).await;

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream.write_all(b"POST / HTTP/1.1\r\nContent-Length: 7\r\n\r\n{\"a\":1}").await.unwrap();

        // the connection dies with no response despite the in-flight request
        let mut received = Vec::new();
        let outcome = timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await.unwrap();
        assert!(matches!(outcome, Ok(0) | Err(_)));
        assert!(received.is_empty());
        assert_eq!(handle.registry().count(), 0);

        handle.shutdown();
    }

    #[tokio::test]
    async fn bind_failure_surfaces_to_the_caller() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let result = Server::builder().address(addr).build().unwrap().listen().await;
        assert!(matches!(result, Err(ListenError::Bind { .. })));
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let handle = start(Server::builder()).await;

        let _first = TcpStream::connect(handle.local_addr()).await.unwrap();
        let _second = TcpStream::connect(handle.local_addr()).await.unwrap();
        while handle.registry().count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown();
        assert!(handle.registry().is_empty());

        // new connections are no longer accepted once the loop stops
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(mut stream) = TcpStream::connect(handle.local_addr()).await {
            let mut received = Vec::new();
            let read = timeout(Duration::from_secs(1), stream.read_to_end(&mut received)).await;
            assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_)) | Err(_)) && received.is_empty());
        }
    }
}
