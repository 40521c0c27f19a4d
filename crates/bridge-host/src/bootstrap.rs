//! Host bootstrap orchestration.

use std::sync::atomic::AtomicBool;

use thiserror::Error;
use tracing::info;

use bridge_config::telemetry::{self, TelemetryError, TelemetryHandle};
use bridge_config::{Config, FeatureFlags};

use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::main_loop::MainLoop;
use crate::server::{CommandServer, ServerError};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The command server could not start listening.
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// A running host: command server plus the main loop it feeds.
pub struct Host {
    main_loop: MainLoop,
    server: CommandServer,
    flags: FeatureFlags,
    telemetry: TelemetryHandle,
}

impl Host {
    /// Command server accepting clients.
    #[must_use]
    pub const fn server(&self) -> &CommandServer {
        &self.server
    }

    /// Main loop that executes deferred commands.
    #[must_use]
    pub const fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    /// Feature switches consulted on every dispatch.
    #[must_use]
    pub const fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Services deferred commands on the calling thread until `stop` is set,
    /// then stops the server.
    pub fn run_until(&self, stop: &AtomicBool) {
        self.main_loop.run_until(stop);
        self.server.stop();
    }
}

/// Initialises telemetry and starts a command server over `registry`.
///
/// # Errors
///
/// Returns [`BootstrapError::Telemetry`] for an unusable log filter and
/// [`BootstrapError::Server`] when the endpoint cannot be bound.
pub fn bootstrap_with(
    config: &Config,
    registry: HandlerRegistry,
    flags: FeatureFlags,
) -> Result<Host, BootstrapError> {
    let telemetry = telemetry::initialise(config.log_filter(), config.log_format())
        .map_err(|source| BootstrapError::Telemetry { source })?;

    let main_loop = MainLoop::new();
    let dispatcher = Dispatcher::new(registry, flags.clone());
    let server = CommandServer::new(config.endpoint.clone(), dispatcher, main_loop.handle());
    server.start()?;
    info!(
        target: BOOTSTRAP_TARGET,
        endpoint = %config.endpoint,
        enabled = ?flags.enabled(),
        "host bootstrap complete"
    );

    Ok(Host {
        main_loop,
        server,
        flags,
        telemetry,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    use bridge_config::SocketEndpoint;
    use serde_json::{Value, json};

    use super::*;
    use crate::{InMemoryScene, Integrations, standard_registry};

    fn loopback_config() -> Config {
        Config {
            endpoint: SocketEndpoint::tcp("127.0.0.1", 0),
            ..Config::default()
        }
    }

    #[test]
    fn bootstrap_serves_scene_commands() {
        let flags = FeatureFlags::new();
        let registry = standard_registry(InMemoryScene::starter(), Integrations::in_memory(), &flags);
        let host = bootstrap_with(&loopback_config(), registry, flags).expect("bootstrap");
        let addr = host.server().local_addr().expect("bound address");

        let stop = Arc::new(AtomicBool::new(false));
        let client_stop = Arc::clone(&stop);
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).expect("connect");
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("timeout");
            stream
                .write_all(br#"{"type":"get_scene_info","params":{}}"#)
                .expect("write");
            let mut buffer = vec![0_u8; 8192];
            let read = stream.read(&mut buffer).expect("read");
            client_stop.store(true, Ordering::SeqCst);
            serde_json::from_slice::<Value>(buffer.get(..read).expect("slice")).expect("json")
        });

        host.run_until(&stop);
        let response = client.join().expect("client thread");
        assert_eq!(response["status"], json!("success"));
        assert_eq!(response["result"]["name"], json!("Scene"));
        assert!(!host.server().is_running());
    }

    #[test]
    fn bootstrap_rejects_bad_log_filter() {
        let config = Config {
            log_filter: "bridge=[".to_owned(),
            ..loopback_config()
        };
        // Telemetry may already be installed by another test in this binary.
        match bootstrap_with(&config, HandlerRegistry::new(), FeatureFlags::new()) {
            Err(BootstrapError::Telemetry { .. }) => {}
            Ok(host) => host.server().stop(),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
