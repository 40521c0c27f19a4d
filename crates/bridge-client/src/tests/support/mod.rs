//! Shared fixtures for the client tests.

mod fake_host;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bridge_config::{EnvSource, HOST_ENV_VAR, PORT_ENV_VAR};

use crate::session::Session;

pub(crate) use fake_host::{FakeHost, Reply};

/// Environment backed by a fixed map.
pub(crate) struct MapEnv(pub(crate) HashMap<&'static str, String>);

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Session whose environment points at `host`.
pub(crate) fn session_for(host: &FakeHost) -> Session {
    let env = MapEnv(HashMap::from([
        (HOST_ENV_VAR, "127.0.0.1".to_owned()),
        (PORT_ENV_VAR, host.port().to_string()),
    ]));
    Session::new(Arc::new(env), Duration::from_millis(500))
}
