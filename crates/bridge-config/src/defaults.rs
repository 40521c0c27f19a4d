use std::time::Duration;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default host for the command server and the client.
pub const DEFAULT_HOST: &str = "localhost";

/// Default TCP port for the command server and the client.
pub const DEFAULT_PORT: u16 = 9876;

/// Time the client waits for a complete response frame.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Size of each socket read on both sides of the bridge.
pub const RECEIVE_CHUNK_BYTES: usize = 8192;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Function form of [`DEFAULT_LOG_FILTER`] for default constructors.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default endpoint for the command server.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::default()
}
