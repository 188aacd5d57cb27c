//! Server Lifecycle
//!
//! Owns the listening socket from bind to close:
//!
//! - Binds with bounded port retry: contention walks the port up by one,
//!   any other bind error is fatal immediately.
//! - Accepts connections and spawns one handler task per connection. A
//!   transport fault on one connection is caught and logged inside its own
//!   task; the listener and every other connection carry on.
//! - Drains on shutdown: stops accepting, waits for in-flight relays up to
//!   the grace deadline, then aborts whatever remains and closes the socket.
//!
//! Lifecycle states move `Init → Binding → Listening → ShuttingDown →
//! Stopped`, with `Binding → Failed` terminal when the retry budget runs
//! out or a non-contention bind error occurs.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::BindError;
use crate::generator::TextGenerator;
use crate::relay::{self, RelayState};
use crate::shutdown::ShutdownController;

/// Where the server is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, nothing bound yet
    Init,
    /// Working through the bind retry window
    Binding,
    /// Bound and accepting connections
    Listening,
    /// Draining in-flight relays, no longer accepting
    ShuttingDown,
    /// Socket closed, all connections gone
    Stopped,
    /// Bind failed terminally; the process exits non-zero
    Failed,
}

/// Identifier for one accepted connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection bookkeeping, separate from the handler task itself
struct ConnectionState {
    /// When the connection was established
    connected_at: Instant,
    /// Handle to abort the connection task at the grace deadline
    abort_handle: tokio::task::AbortHandle,
}

/// State shared between the server, its handle, and the relays
struct ServerShared {
    state: RwLock<LifecycleState>,
    active_relays: Arc<AtomicUsize>,
    port: AtomicU16,
}

impl ServerShared {
    fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Init),
            active_relays: Arc::new(AtomicUsize::new(0)),
            port: AtomicU16::new(0),
        }
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.write() = next;
        debug!(state = ?next, "lifecycle transition");
    }
}

/// Observer view of a running server: bound port, lifecycle state, and the
/// count of in-flight relays
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    /// Port the listener is bound to (0 before binding completes)
    #[must_use]
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.shared.state.read()
    }

    /// Number of relays currently streaming
    #[must_use]
    pub fn active_relays(&self) -> usize {
        self.shared.active_relays.load(Ordering::SeqCst)
    }
}

/// The relay server: one listening socket, one handler task per connection
pub struct RelayServer<G> {
    listener: TcpListener,
    config: RelayConfig,
    relay_state: RelayState<G>,
    shared: Arc<ServerShared>,
    shutdown: Arc<ShutdownController>,
    connections: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl<G> fmt::Debug for RelayServer<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("port", &self.shared.port.load(Ordering::SeqCst))
            .field("state", &*self.shared.state.read())
            .finish_non_exhaustive()
    }
}

impl<G: TextGenerator> RelayServer<G> {
    /// Bind the listening socket, retrying past contended ports
    ///
    /// # Errors
    ///
    /// Returns [`BindError::PortsExhausted`] when every port in the retry
    /// window is taken, or [`BindError::Io`] on any other bind failure.
    /// Both are fatal; the caller exits non-zero.
    pub async fn start(
        config: RelayConfig,
        generator: Arc<G>,
        shutdown: Arc<ShutdownController>,
    ) -> Result<Self, BindError> {
        let shared = Arc::new(ServerShared::new());

        shared.set_state(LifecycleState::Binding);
        let (listener, port) = match bind_with_retry(config.port, config.max_bind_attempts).await {
            Ok(bound) => bound,
            Err(e) => {
                shared.set_state(LifecycleState::Failed);
                return Err(e);
            }
        };
        shared.port.store(port, Ordering::SeqCst);
        shared.set_state(LifecycleState::Listening);
        info!(port, "listening");

        let relay_state = RelayState::new(
            generator,
            Arc::new(config.clone()),
            Arc::clone(&shared.active_relays),
        );

        Ok(Self {
            listener,
            config,
            relay_state,
            shared,
            shutdown,
            connections: Arc::new(DashMap::new()),
        })
    }

    /// Port the listener is bound to
    #[must_use]
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::SeqCst)
    }

    /// Observer handle that stays valid while the server runs
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accept connections until shutdown triggers, then drain and close
    pub async fn run(self) {
        let Self {
            listener,
            config,
            relay_state,
            shared,
            shutdown,
            connections,
        } = self;

        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            spawn_connection(stream, peer, &relay_state, &connections);
                        }
                        Err(e) => {
                            // One failed accept must not take the listener down
                            error!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        shared.set_state(LifecycleState::ShuttingDown);
        let deadline = Instant::now() + config.shutdown_grace;
        info!(
            active_relays = shared.active_relays.load(Ordering::SeqCst),
            grace_secs = config.shutdown_grace.as_secs(),
            "draining in-flight relays"
        );

        while shared.active_relays.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let leftover = shared.active_relays.load(Ordering::SeqCst);
        if leftover > 0 {
            warn!(
                active_relays = leftover,
                "grace deadline elapsed with relays still active"
            );
        }

        // Give finished relays a moment to flush their final bytes
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Abort whatever remains: relays past the deadline and idle
        // keep-alive connections
        let conn_ids: Vec<ConnectionId> = connections.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, state)) = connections.remove(&conn_id) {
                debug!(
                    conn_id = %conn_id,
                    uptime_ms = state.connected_at.elapsed().as_millis() as u64,
                    "aborting connection"
                );
                state.abort_handle.abort();
            }
        }

        drop(listener);
        shared.set_state(LifecycleState::Stopped);
        info!("server stopped");
    }
}

/// Bind `initial_port`, walking upward past contended ports
///
/// An explicit bounded loop so the attempt count is deterministic. Only
/// address-in-use failures consume retry budget; anything else is fatal on
/// the spot.
async fn bind_with_retry(
    initial_port: u16,
    max_attempts: u32,
) -> Result<(TcpListener, u16), BindError> {
    let mut port = initial_port;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .map_err(|source| BindError::Io { port, source })?
                    .port();
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if attempt >= max_attempts {
                    return Err(BindError::PortsExhausted {
                        first_port: initial_port,
                        attempts: attempt,
                    });
                }
                // Running off the top of the port range ends the window early
                let Some(next) = port.checked_add(1) else {
                    return Err(BindError::PortsExhausted {
                        first_port: initial_port,
                        attempts: attempt,
                    });
                };
                warn!(port, next, attempt, "port in use, retrying");
                port = next;
            }
            Err(source) => return Err(BindError::Io { port, source }),
        }
    }
}

/// Spawn the handler task for one accepted connection
fn spawn_connection<G: TextGenerator>(
    stream: TcpStream,
    peer: SocketAddr,
    relay_state: &RelayState<G>,
    connections: &Arc<DashMap<ConnectionId, ConnectionState>>,
) {
    let conn_id = ConnectionId::new();

    // Fragments should reach the client as they arrive, not sit in Nagle's
    // buffer
    if let Err(e) = stream.set_nodelay(true) {
        debug!(conn_id = %conn_id, error = %e, "failed to disable nagle");
    }

    info!(
        conn_id = %conn_id,
        peer = %peer,
        active_connections = connections.len() + 1,
        "connection accepted"
    );

    let relay_state = relay_state.clone();
    let connections_for_task = Arc::clone(connections);

    let task = tokio::spawn(
        async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| relay::handle(req, relay_state.clone()));

            // Fault isolation boundary: a transport error on this socket is
            // contained here and never crosses into the accept loop
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "connection error");
            }

            connections_for_task.remove(&conn_id);
            debug!(
                active_connections = connections_for_task.len(),
                "connection closed"
            );
        }
        .instrument(tracing::info_span!("connection", %conn_id)),
    );

    connections.insert(
        conn_id,
        ConnectionState {
            connected_at: Instant::now(),
            abort_handle: task.abort_handle(),
        },
    );
}
