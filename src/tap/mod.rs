//! TCP tap for Redis traffic.
//!
//! Accepts client connections, dials the configured Redis server for each,
//! and relays bytes in both directions. Every chunk read from either side is
//! handed to the correlation dispatcher before it is forwarded.

mod connection;
pub mod probe;

use connection::{ConnectionRegistry, TapConnection};
pub use probe::{Direction, Probe};

use crate::config::{CaptureMode, Config};
use crate::runtime::{ConnTuple, Dispatcher};
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, error, info, trace, warn};

/// Errors raised while running the tap.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("Invalid listen address '{0}': {1}")]
    Address(String, std::net::AddrParseError),

    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, io::Error),

    #[error("Failed to connect to upstream '{0}': {1}")]
    Upstream(String, io::Error),

    #[error("Connection limit closed")]
    LimitClosed(#[from] AcquireError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Tap instance
pub struct Tap {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    connection_limit: Arc<Semaphore>,
    registry: Arc<Mutex<ConnectionRegistry>>,
}

impl Tap {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        let max_connections = config.max_connections;
        Tap {
            config,
            dispatcher,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            registry: Arc::new(Mutex::new(ConnectionRegistry::new(max_connections))),
        }
    }

    /// Bind the listen address and relay connections until an error occurs.
    pub async fn run(&self) -> Result<(), TapError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Bind the configured listen address.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self) -> Result<TcpListener, TapError> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|e| TapError::Address(self.config.listen.clone(), e))?;
        let std_listener = create_listener(addr).map_err(|e| TapError::Bind(addr, e))?;
        let listener = TcpListener::from_std(std_listener)?;
        info!(address = %addr, upstream = %self.config.upstream, "Tap listening");
        Ok(listener)
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TapError> {
        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    let Some(conn_id) = lock(&self.registry).insert(TapConnection::new(addr))
                    else {
                        warn!(peer = %addr, "Connection registry full, rejecting");
                        continue;
                    };
                    debug!(peer = %addr, conn_id, "New connection");

                    let session = Session {
                        conn_id,
                        upstream: self.config.upstream.clone(),
                        capture: self.config.capture,
                        read_buffer_size: self.config.read_buffer_size,
                        dispatcher: Arc::clone(&self.dispatcher),
                        registry: Arc::clone(&self.registry),
                    };

                    tokio::spawn(async move {
                        if let Err(e) = session.run(stream, addr).await {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                        let (closed, active) = {
                            let mut registry = lock(&session.registry);
                            (registry.remove(conn_id), registry.len())
                        };
                        if let Some(conn) = closed {
                            debug!(
                                peer = %conn.client,
                                upstream = ?conn.upstream(),
                                state = ?conn.state,
                                age_ms = conn.age().as_millis() as u64,
                                active,
                                "Connection closed"
                            );
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Number of connections currently tracked.
    pub fn active_connections(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Number of connections currently relaying to the upstream.
    pub fn proxying_connections(&self) -> usize {
        lock(&self.registry).proxying()
    }
}

/// Per-connection state handed to the relay task.
struct Session {
    conn_id: usize,
    upstream: String,
    capture: CaptureMode,
    read_buffer_size: usize,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Mutex<ConnectionRegistry>>,
}

impl Session {
    async fn run(&self, client: TcpStream, client_addr: SocketAddr) -> Result<(), TapError> {
        let server = TcpStream::connect(&self.upstream)
            .await
            .map_err(|e| TapError::Upstream(self.upstream.clone(), e))?;
        let server_addr = server.peer_addr()?;
        client.set_nodelay(true)?;
        server.set_nodelay(true)?;

        if let Some(conn) = lock(&self.registry).get_mut(self.conn_id) {
            conn.start_proxying(server_addr);
        }
        trace!(client = %client_addr, server = %server_addr, "Upstream connected");

        let probe = Probe::new(
            Arc::clone(&self.dispatcher),
            self.capture,
            ConnTuple::tcp(client_addr, server_addr),
        );

        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = server.into_split();

        let result = tokio::try_join!(
            relay(client_read, server_write, &probe, Direction::Request, self.read_buffer_size),
            relay(server_read, client_write, &probe, Direction::Response, self.read_buffer_size),
        );

        if let Some(conn) = lock(&self.registry).get_mut(self.conn_id) {
            conn.close();
        }
        probe.close();

        let (sent, received) = result?;
        trace!(client = %client_addr, sent, received, "Relay finished");
        Ok(())
    }
}

/// Copy bytes from `reader` to `writer`, showing each chunk to the probe
/// before it is forwarded. Returns the number of bytes relayed.
async fn relay<R, W>(
    mut reader: R,
    mut writer: W,
    probe: &Probe,
    direction: Direction,
    buffer_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(buffer_size);
    let mut relayed = 0u64;

    loop {
        buffer.clear();
        let n = reader.read_buf(&mut buffer).await?;
        if n == 0 {
            if let Err(e) = writer.shutdown().await {
                // Peer may already be gone.
                trace!(?direction, error = %e, "Half close failed");
            }
            trace!(?direction, relayed, "Half closed");
            return Ok(relayed);
        }

        probe.observe(direction, &buffer);
        writer.write_all(&buffer).await?;
        relayed += n as u64;
    }
}

/// Create a TCP listener with address reuse.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn lock(registry: &Mutex<ConnectionRegistry>) -> MutexGuard<'_, ConnectionRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
