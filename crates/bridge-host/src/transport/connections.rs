//! Registry of open client sockets.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::LISTENER_TARGET;

/// Keeps a clone of every open client socket so shutdown can close them.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnectionRegistry {
    /// Tracks `stream` until the returned guard is dropped.
    pub(crate) fn register(self: &Arc<Self>, stream: &TcpStream) -> io::Result<ConnectionGuard> {
        let clone = stream.try_clone()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, clone);
        Ok(ConnectionGuard {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Number of client sockets currently open.
    pub(crate) fn active(&self) -> usize {
        self.lock().len()
    }

    /// Shuts down every tracked socket so blocked reads return end-of-stream.
    pub(crate) fn shutdown_all(&self) {
        for (id, stream) in self.lock().drain() {
            if let Err(error) = stream.shutdown(Shutdown::Both) {
                debug!(
                    target: LISTENER_TARGET,
                    connection = id,
                    error = %error,
                    "client socket already closed"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its socket from the registry when dropped.
#[derive(Debug)]
pub(crate) struct ConnectionGuard {
    id: u64,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    pub(crate) const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;

    use super::*;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        (client, server)
    }

    #[test]
    fn guard_drop_deregisters() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (_client, server) = pair();
        let guard = registry.register(&server).expect("register");
        assert_eq!(registry.active(), 1);
        drop(guard);
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn shutdown_all_unblocks_readers() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (_client, mut server) = pair();
        let _guard = registry.register(&server).expect("register");
        registry.shutdown_all();
        let mut buffer = [0_u8; 8];
        assert_eq!(server.read(&mut buffer).expect("read after shutdown"), 0);
        assert_eq!(registry.active(), 0);
    }
}
