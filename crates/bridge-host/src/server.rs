//! Command server lifecycle.
//!
//! The server owns the listening socket and the accept thread. `start` and
//! `stop` are idempotent and may be called from any thread, typically from
//! the host's UI. Commands never run on the server's threads: each decoded
//! frame is deferred onto the [`MainLoop`](crate::MainLoop) that the
//! embedding host services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use bridge_config::SocketEndpoint;

use crate::dispatch::Dispatcher;
use crate::main_loop::MainLoopHandle;
use crate::transport::{
    CommandConnectionHandler, ConnectionHandler, ListenerError, ListenerHandle, SocketListener,
};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Upper bound on how long [`CommandServer::stop`] waits for the accept thread.
pub const STOP_JOIN_BUDGET: Duration = Duration::from_secs(1);

/// Errors reported by [`CommandServer::start`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be set up.
    #[error("failed to start command server on {endpoint}: {source}")]
    Start {
        /// Endpoint that was being bound.
        endpoint: SocketEndpoint,
        /// Underlying listener failure.
        #[source]
        source: ListenerError,
    },
}

/// In-process command server embedded in the host application.
pub struct CommandServer {
    endpoint: SocketEndpoint,
    dispatcher: Dispatcher,
    main_loop: MainLoopHandle,
    state: Mutex<ServerState>,
}

#[derive(Default)]
struct ServerState {
    running: Option<Arc<AtomicBool>>,
    listener: Option<ListenerHandle>,
    local_addr: Option<SocketAddr>,
}

impl CommandServer {
    /// Creates a stopped server for `endpoint`.
    #[must_use]
    pub fn new(endpoint: SocketEndpoint, dispatcher: Dispatcher, main_loop: MainLoopHandle) -> Self {
        Self {
            endpoint,
            dispatcher,
            main_loop,
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Binds the endpoint and starts accepting clients.
    ///
    /// Does nothing when the server is already running.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Start`] when binding fails. The server is left
    /// stopped in that case.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut state = self.lock();
        if state.running.is_some() {
            info!(target: SERVER_TARGET, endpoint = %self.endpoint, "server is already running");
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        state.running = Some(Arc::clone(&running));
        match self.listen(running) {
            Ok((listener, local_addr)) => {
                state.listener = Some(listener);
                state.local_addr = local_addr;
                info!(
                    target: SERVER_TARGET,
                    endpoint = %self.endpoint,
                    local_addr = ?local_addr,
                    "command server started"
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    target: SERVER_TARGET,
                    endpoint = %self.endpoint,
                    error = %source,
                    "failed to start server"
                );
                Self::stop_locked(&mut state);
                Err(ServerError::Start {
                    endpoint: self.endpoint.clone(),
                    source,
                })
            }
        }
    }

    fn listen(
        &self,
        running: Arc<AtomicBool>,
    ) -> Result<(ListenerHandle, Option<SocketAddr>), ListenerError> {
        let listener = SocketListener::bind(&self.endpoint)?;
        let local_addr = listener.local_addr();
        let handler: Arc<dyn ConnectionHandler> = Arc::new(CommandConnectionHandler::new(
            self.dispatcher.clone(),
            self.main_loop.clone(),
            running,
        ));
        Ok((listener.start(handler)?, local_addr))
    }

    /// Stops accepting clients and closes every open client socket.
    ///
    /// Waits at most [`STOP_JOIN_BUDGET`] for the accept thread. Safe to call
    /// repeatedly and before [`CommandServer::start`].
    pub fn stop(&self) {
        Self::stop_locked(&mut self.lock());
    }

    fn stop_locked(state: &mut ServerState) {
        if let Some(running) = state.running.take() {
            running.store(false, Ordering::SeqCst);
        }
        state.local_addr = None;
        if let Some(listener) = state.listener.take() {
            listener.shutdown();
            listener.close_clients();
            if let Err(error) = listener.join_within(STOP_JOIN_BUDGET) {
                warn!(target: SERVER_TARGET, error = %error, "listener thread failed");
            }
        }
        info!(target: SERVER_TARGET, "command server stopped");
    }

    /// Reports whether the server is accepting clients.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    /// Address actually bound, useful when the configured port is 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Number of clients currently connected.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.lock()
            .listener
            .as_ref()
            .map_or(0, ListenerHandle::active_connections)
    }

    /// Endpoint this server binds.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Dispatcher shared with the client handlers.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.running.is_some() {
            Self::stop_locked(state);
        }
    }
}
