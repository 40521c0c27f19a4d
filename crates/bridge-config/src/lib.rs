//! Shared configuration for the host bridge and its client.
//!
//! Both sides of the bridge agree on the socket endpoint, the environment
//! overrides used to locate the host, the feature switches that gate optional
//! command groups, and how logs are rendered.

mod defaults;
mod env;
mod features;
mod logging;
mod socket;
pub mod telemetry;

use std::time::Duration;

use thiserror::Error;

pub use defaults::{
    DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_PORT, DEFAULT_RESPONSE_TIMEOUT, RECEIVE_CHUNK_BYTES,
    default_log_filter, default_log_format, default_socket_endpoint,
};
pub use env::{EnvSource, HOST_ENV_VAR, PORT_ENV_VAR, SystemEnv};
pub use features::{Feature, FeatureFlags};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError};

/// Resolved settings for one side of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Endpoint the server binds or the client connects to.
    pub endpoint: SocketEndpoint,
    /// Time the client waits for a complete response frame.
    pub response_timeout: Duration,
    /// Tracing filter expression.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_socket_endpoint(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Builds a configuration whose endpoint honours the environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Endpoint`] when the overrides are malformed.
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: SocketEndpoint::from_env(env)?,
            ..Self::default()
        })
    }

    /// Accessor for the configured log filter.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Accessor for the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The endpoint overrides could not be parsed.
    #[error("invalid endpoint configuration: {0}")]
    Endpoint(#[from] SocketParseError),
}
