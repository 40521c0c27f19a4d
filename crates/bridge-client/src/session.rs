//! Lifecycle of the client's single host connection.
//!
//! A [`Session`] creates its [`HostConnection`] on first use and revalidates
//! it before every reuse with a cheap status query. A connection that fails
//! the check is torn down and replaced transparently within the same call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use bridge_config::{DEFAULT_RESPONSE_TIMEOUT, EnvSource, Feature, SocketEndpoint, SystemEnv};
use bridge_protocol::Params;

use crate::connection::HostConnection;
use crate::errors::ClientError;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Owner of the persistent host connection.
pub struct Session {
    env: Arc<dyn EnvSource>,
    response_timeout: Duration,
    connection: Option<HostConnection>,
    polyhaven_enabled: bool,
}

impl Session {
    /// Creates a session resolving its endpoint through `env`.
    #[must_use]
    pub fn new(env: Arc<dyn EnvSource>, response_timeout: Duration) -> Self {
        Self {
            env,
            response_timeout,
            connection: None,
            polyhaven_enabled: false,
        }
    }

    /// Session reading the process environment with the default timeout.
    #[must_use]
    pub fn from_system_env() -> Self {
        Self::new(Arc::new(SystemEnv), DEFAULT_RESPONSE_TIMEOUT)
    }

    /// Returns a live connection, revalidating or recreating it as needed.
    ///
    /// An existing connection is reused only when the status query succeeds;
    /// the query also refreshes [`Session::polyhaven_enabled`]. Otherwise a new
    /// connection is opened against the endpoint currently named by the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the environment overrides are
    /// malformed and [`ClientError::Connect`] when the host is unreachable.
    pub fn connection(&mut self) -> Result<&mut HostConnection, ClientError> {
        if !self.revalidate() {
            let mut connection = HostConnection::new(self.endpoint()?, self.response_timeout);
            connection.connect()?;
            info!(
                target: SESSION_TARGET,
                endpoint = %connection.endpoint(),
                "created persistent host connection"
            );
            self.connection = Some(connection);
        }
        self.connection.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Sends one command through the session's connection.
    ///
    /// # Errors
    ///
    /// See [`Session::connection`] and [`HostConnection::send_command`].
    pub fn send_command(
        &mut self,
        command_type: &str,
        params: Option<Params>,
    ) -> Result<Value, ClientError> {
        self.connection()?.send_command(command_type, params)
    }

    /// Queries the Poly Haven status now and caches the answer.
    ///
    /// # Errors
    ///
    /// See [`Session::send_command`].
    pub fn refresh_polyhaven(&mut self) -> Result<bool, ClientError> {
        let status = self.send_command(Feature::Polyhaven.status_command(), None)?;
        self.polyhaven_enabled = enabled_flag(&status);
        Ok(self.polyhaven_enabled)
    }

    /// Poly Haven state reported by the most recent status query.
    #[must_use]
    pub const fn polyhaven_enabled(&self) -> bool {
        self.polyhaven_enabled
    }

    /// Reports whether a connection is currently held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(HostConnection::is_connected)
    }

    /// Disconnects and forgets the connection.
    pub fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            info!(target: SESSION_TARGET, "disconnecting from host on shutdown");
            connection.disconnect();
        }
    }

    fn endpoint(&self) -> Result<SocketEndpoint, ClientError> {
        SocketEndpoint::from_env(self.env.as_ref()).map_err(|error| ClientError::Config(error.into()))
    }

    fn revalidate(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        match connection.send_command(Feature::Polyhaven.status_command(), None) {
            Ok(status) => {
                self.polyhaven_enabled = enabled_flag(&status);
                true
            }
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    error = %error,
                    "existing connection is no longer valid"
                );
                connection.disconnect();
                self.connection = None;
                false
            }
        }
    }
}

fn enabled_flag(status: &Value) -> bool {
    status
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
