//! TCP transport for the command server.
//!
//! The listener accepts clients on a background thread and hands each one to
//! a dedicated handler thread. Handlers decode frames and defer their
//! execution onto the host main loop.

mod connections;
mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub(crate) use self::connections::ConnectionRegistry;
pub(crate) use self::handler::{CommandConnectionHandler, ConnectionHandler};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
