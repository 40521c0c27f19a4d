//! Failures reported by the client connection.

use std::io;

use thiserror::Error;

use bridge_config::{ConfigError, SocketEndpoint};
use bridge_protocol::FrameError;

/// Errors raised while talking to the host.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint could not be reached.
    #[error("Could not connect to Blender. Make sure the Blender addon is running.")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: SocketEndpoint,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The endpoint could not be resolved from the environment.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A command was issued without a live socket.
    #[error("Not connected to Blender")]
    NotConnected,
    /// No complete frame arrived before the response timeout.
    #[error("Timeout waiting for Blender response - try simplifying your request")]
    Timeout,
    /// The peer closed the stream before sending anything.
    #[error("Connection closed before receiving any data")]
    ClosedBeforeData,
    /// Bytes arrived but never formed a complete JSON document.
    #[error("Incomplete JSON response received")]
    IncompleteResponse,
    /// The socket failed while writing or reading.
    #[error("Connection to Blender lost: {0}")]
    ConnectionLost(#[source] io::Error),
    /// The response was JSON but not a result envelope.
    #[error("Invalid response from Blender: {0}")]
    InvalidResponse(#[source] serde_json::Error),
    /// The command could not be serialised.
    #[error("Communication error with Blender: {0}")]
    Encode(#[from] FrameError),
    /// The host answered with an error envelope.
    #[error("{0}")]
    Remote(String),
}

impl ClientError {
    /// Reports whether the socket must be discarded after this failure.
    ///
    /// Only host-reported errors leave the connection usable.
    #[must_use]
    pub const fn invalidates_connection(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }

    /// Message carried by a host-reported error.
    #[must_use]
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote(message) => Some(message),
            _ => None,
        }
    }
}
