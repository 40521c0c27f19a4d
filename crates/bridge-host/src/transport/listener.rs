//! Listener implementation for the command server socket.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use bridge_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionRegistry, LISTENER_TARGET, ListenerError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const JOIN_POLL: Duration = Duration::from_millis(5);
const LISTEN_BACKLOG: i32 = 1;

/// Listener bound to the command server endpoint.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    listener: TcpListener,
}

impl SocketListener {
    /// Binds `endpoint` with address reuse enabled.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = bind_tcp(&endpoint.host, endpoint.port)?;
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
        })
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Starts the accept loop on a background thread.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(ConnectionRegistry::default());
        let accept_loop = AcceptLoop {
            listener: self,
            shutdown: Arc::clone(&shutdown),
            connections: Arc::clone(&connections),
            handler,
        };
        let handle = thread::Builder::new()
            .name("bridge-accept".to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            shutdown,
            connections,
            handle: Some(handle),
        })
    }
}

/// Handle to the background listener thread.
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    connections: Arc<ConnectionRegistry>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to exit; the listening socket closes with it.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Shuts down every open client socket.
    pub(crate) fn close_clients(&self) {
        self.connections.shutdown_all();
    }

    /// Number of clients currently connected.
    pub(crate) fn active_connections(&self) -> usize {
        self.connections.active()
    }

    /// Waits up to `budget` for the accept loop to exit.
    ///
    /// Returns `Ok(false)` when the thread was still running at the deadline;
    /// it is left detached and exits on its next poll.
    pub(crate) fn join_within(mut self, budget: Duration) -> Result<bool, ListenerError> {
        let Some(handle) = self.handle.take() else {
            return Ok(true);
        };
        let deadline = Instant::now() + budget;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    target: LISTENER_TARGET,
                    budget_ms = budget.as_millis(),
                    "listener thread did not stop in time"
                );
                return Ok(false);
            }
            thread::sleep(JOIN_POLL);
        }
        handle
            .join()
            .map(|()| true)
            .map_err(|_| ListenerError::ThreadPanic)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct AcceptLoop {
    listener: SocketListener,
    shutdown: Arc<AtomicBool>,
    connections: Arc<ConnectionRegistry>,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "socket listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !self.shutdown.load(Ordering::SeqCst) {
            match accept_connection(&self.listener.listener) {
                Ok(Some((stream, peer))) => {
                    last_error = None;
                    self.spawn_client(stream, peer);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        info!(target: LISTENER_TARGET, "socket listener stopped");
    }

    fn spawn_client(&self, stream: TcpStream, peer: SocketAddr) {
        let guard = match self.connections.register(&stream) {
            Ok(guard) => guard,
            Err(error) => {
                warn!(target: LISTENER_TARGET, error = %error, %peer, "failed to track client");
                return;
            }
        };
        let active = self.connections.active();
        if active > 1 {
            warn!(
                target: LISTENER_TARGET,
                %peer,
                active,
                "client connected while another is active; commands will interleave"
            );
        } else {
            info!(target: LISTENER_TARGET, %peer, "client connected");
        }
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("bridge-client-{}", guard.id()))
            .spawn(move || {
                let _guard = guard;
                handler.handle(stream);
            });
        if let Err(error) = spawned {
            warn!(target: LISTENER_TARGET, error = %error, %peer, "failed to spawn client handler");
        }
    }
}

fn accept_connection(listener: &TcpListener) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok((stream, peer)) => {
            stream.set_nonblocking(false)?;
            Ok(Some((stream, peer)))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .and_then(|socket| socket.set_reuse_address(true).map(|()| socket))
        .map_err(|source| ListenerError::Configure { addr, source })?;
    socket
        .bind(&addr.into())
        .and_then(|()| socket.listen(LISTEN_BACKLOG))
        .map_err(|source| ListenerError::BindTcp { addr, source })?;
    Ok(socket.into())
}
