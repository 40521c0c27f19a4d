//! Environment lookups used to resolve the connection target.

use std::env;

/// Environment variable overriding the host the client connects to.
pub const HOST_ENV_VAR: &str = "BLENDER_HOST";

/// Environment variable overriding the port the client connects to.
pub const PORT_ENV_VAR: &str = "BLENDER_PORT";

/// Source of environment variables, injectable for tests.
pub trait EnvSource: Send + Sync {
    /// Returns the value of `key`, or `None` when unset or not valid UTF-8.
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}
