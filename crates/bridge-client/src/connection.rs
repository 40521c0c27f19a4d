//! Persistent socket to the host command server.
//!
//! A [`HostConnection`] owns at most one TCP stream. Commands are written as
//! bare JSON documents and the reply is read in chunks until the accumulated
//! bytes parse as one document or the response timeout elapses. Any transport
//! or framing failure drops the stream so the next command reconnects.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use bridge_config::{RECEIVE_CHUNK_BYTES, SocketEndpoint};
use bridge_protocol::{Command, Envelope, FrameBuffer, FrameStatus, Params, encode, try_decode};

use crate::errors::ClientError;

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Upper bound on establishing the TCP connection.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of the bridge socket.
#[derive(Debug)]
pub struct HostConnection {
    endpoint: SocketEndpoint,
    response_timeout: Duration,
    stream: Option<TcpStream>,
}

impl HostConnection {
    /// Creates a disconnected handle for `endpoint`.
    #[must_use]
    pub const fn new(endpoint: SocketEndpoint, response_timeout: Duration) -> Self {
        Self {
            endpoint,
            response_timeout,
            stream: None,
        }
    }

    /// Endpoint this connection dials.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Reports whether a socket is currently held.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the socket unless one is already held.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when the endpoint cannot be resolved
    /// or refuses the connection.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = dial(&self.endpoint).map_err(|source| {
            error!(
                target: CONNECTION_TARGET,
                endpoint = %self.endpoint,
                error = %source,
                "failed to connect to host"
            );
            ClientError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            }
        })?;
        info!(target: CONNECTION_TARGET, endpoint = %self.endpoint, "connected to host");
        self.stream = Some(stream);
        Ok(())
    }

    /// Closes the socket if one is held.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(error) = stream.shutdown(Shutdown::Both) {
                debug!(target: CONNECTION_TARGET, error = %error, "socket already closed");
            }
            info!(target: CONNECTION_TARGET, endpoint = %self.endpoint, "disconnected from host");
        }
    }

    /// Sends one command and waits for its result.
    ///
    /// Connects first when no socket is held. A host-reported error keeps the
    /// socket; every other failure drops it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] carrying the host's message for error
    /// envelopes, and a transport or framing variant otherwise.
    pub fn send_command(
        &mut self,
        command_type: &str,
        params: Option<Params>,
    ) -> Result<Value, ClientError> {
        self.connect()?;
        let command = Command::new(command_type, params.unwrap_or_default());
        let outcome = self.round_trip(&command);
        if let Err(error) = &outcome {
            if error.invalidates_connection() {
                warn!(
                    target: CONNECTION_TARGET,
                    command = %command_type,
                    error = %error,
                    "dropping host connection"
                );
                self.disconnect();
            } else {
                warn!(
                    target: CONNECTION_TARGET,
                    command = %command_type,
                    error = %error,
                    "host reported an error"
                );
            }
        }
        outcome
    }

    fn round_trip(&mut self, command: &Command) -> Result<Value, ClientError> {
        let bytes = encode(command)?;
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        info!(
            target: CONNECTION_TARGET,
            command = %command.command_type,
            bytes = bytes.len(),
            "sending command"
        );
        stream
            .write_all(&bytes)
            .and_then(|()| stream.flush())
            .map_err(ClientError::ConnectionLost)?;

        let response = self.receive_full_response()?;
        let envelope = Envelope::from_reply(response).map_err(ClientError::InvalidResponse)?;
        envelope.into_result().map_err(ClientError::Remote)
    }

    /// Reads until the accumulated bytes form one JSON document.
    ///
    /// Returns as soon as a document completes. When the response timeout
    /// elapses or the peer closes after sending some bytes, the bytes read so
    /// far are parsed as a last attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ClosedBeforeData`] when the peer closes without
    /// sending anything, [`ClientError::Timeout`] when nothing arrives in time,
    /// [`ClientError::IncompleteResponse`] when the bytes never parse, and
    /// [`ClientError::ConnectionLost`] for socket failures.
    pub fn receive_full_response(&mut self) -> Result<Value, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        let deadline = Instant::now() + self.response_timeout;
        let mut frames = FrameBuffer::new();
        let mut chunk = vec![0_u8; RECEIVE_CHUNK_BYTES];

        loop {
            let Some(remaining) = deadline
                .checked_duration_since(Instant::now())
                .filter(|remaining| !remaining.is_zero())
            else {
                warn!(target: CONNECTION_TARGET, "timed out waiting for response");
                break;
            };
            stream
                .set_read_timeout(Some(remaining))
                .map_err(ClientError::ConnectionLost)?;

            match stream.read(&mut chunk) {
                Ok(0) if frames.is_empty() => return Err(ClientError::ClosedBeforeData),
                Ok(0) => break,
                Ok(read) => {
                    let bytes = chunk.get(..read).unwrap_or_default();
                    if let FrameStatus::Complete(value) = frames.push(bytes) {
                        debug!(target: CONNECTION_TARGET, bytes = read, "received complete response");
                        return Ok(value);
                    }
                }
                Err(error) if is_timeout(&error) => {
                    warn!(target: CONNECTION_TARGET, "timed out waiting for response");
                    break;
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    error!(target: CONNECTION_TARGET, error = %error, "socket error during receive");
                    return Err(ClientError::ConnectionLost(error));
                }
            }
        }

        if frames.is_empty() {
            return Err(ClientError::Timeout);
        }
        let buffered = frames.take();
        debug!(
            target: CONNECTION_TARGET,
            bytes = buffered.len(),
            "parsing partial response"
        );
        try_decode(&buffered)
            .complete()
            .ok_or(ClientError::IncompleteResponse)
    }
}

impl Drop for HostConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn dial(endpoint: &SocketEndpoint) -> io::Result<TcpStream> {
    let address = resolve_tcp_address(&endpoint.host, endpoint.port)?;
    TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
