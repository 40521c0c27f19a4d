use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::defaults::{DEFAULT_HOST, DEFAULT_PORT};
use crate::env::{EnvSource, HOST_ENV_VAR, PORT_ENV_VAR};

/// TCP endpoint shared by the host command server and the client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SocketEndpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl SocketEndpoint {
    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves the endpoint from `BLENDER_HOST` / `BLENDER_PORT`, falling back
    /// to `localhost:9876` for whichever variable is unset.
    ///
    /// # Errors
    ///
    /// Returns [`SocketParseError::InvalidPort`] when `BLENDER_PORT` is set but
    /// is not a valid TCP port.
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, SocketParseError> {
        let host = env
            .var(HOST_ENV_VAR)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = match env.var(PORT_ENV_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| SocketParseError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        Ok(Self::tcp(host, port))
    }
}

impl Default for SocketEndpoint {
    fn default() -> Self {
        Self::tcp(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "tcp://{}:{}", self.host, self.port)
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        if url.scheme() != "tcp" {
            return Err(SocketParseError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
        let port = url
            .port()
            .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
        Ok(Self::tcp(host, port))
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`].
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Scheme was not recognised.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Port override was not a number in range.
    #[error("invalid TCP port '{0}'")]
    InvalidPort(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
