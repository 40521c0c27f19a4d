//! Standalone host serving an in-memory scene until interrupted.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;

use bridge_config::{
    Config, ConfigError, DEFAULT_LOG_FILTER, EnvSource, Feature, FeatureFlags, LogFormat,
    SocketEndpoint, SystemEnv,
};
use bridge_host::{
    BootstrapError, InMemoryScene, Integrations, ShutdownError, ShutdownSignal,
    SystemShutdownSignal, bootstrap_with, standard_registry,
};
use thiserror::Error;

/// Runs the bridge command server against an in-memory scene.
///
/// The bind address comes from `--endpoint`, then `--host`/`--port`, then
/// `BLENDER_HOST`/`BLENDER_PORT`, then `localhost:9876`.
#[derive(Debug, Parser)]
#[command(name = "bridge-host", version)]
struct HostArgs {
    /// Full bind address such as `tcp://127.0.0.1:9876`.
    #[arg(long, value_name = "URL")]
    endpoint: Option<SocketEndpoint>,
    /// Address to bind.
    #[arg(long)]
    host: Option<String>,
    /// TCP port to bind.
    #[arg(long)]
    port: Option<u16>,
    /// Optional integration to switch on; repeat for several.
    #[arg(long = "enable", value_name = "FEATURE")]
    enable: Vec<Feature>,
    /// Tracing filter expression.
    #[arg(long, env = "BRIDGE_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
    /// Log output format (`compact` or `json`).
    #[arg(long, env = "BRIDGE_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

impl HostArgs {
    fn config(&self, env: &dyn EnvSource) -> Result<Config, ConfigError> {
        let mut config = Config::from_env(env)?;
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        } else {
            if let Some(host) = &self.host {
                config.endpoint.host.clone_from(host);
            }
            if let Some(port) = self.port {
                config.endpoint.port = port;
            }
        }
        config.log_filter.clone_from(&self.log_filter);
        config.log_format = self.log_format;
        Ok(config)
    }
}

#[derive(Debug, Error)]
enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

fn main() -> ExitCode {
    let args = HostArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr().lock(), "bridge-host: {error}").ok();
            ExitCode::FAILURE
        }
    }
}

fn run(args: &HostArgs) -> Result<(), HostError> {
    let flags = FeatureFlags::with_enabled(args.enable.iter().copied());
    let config = args.config(&SystemEnv)?;
    let registry = standard_registry(InMemoryScene::starter(), Integrations::in_memory(), &flags);
    let host = bootstrap_with(&config, registry, flags)?;

    let stop = Arc::new(AtomicBool::new(false));
    SystemShutdownSignal.arm(Arc::clone(&stop))?;
    host.run_until(&stop);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bridge_config::{HOST_ENV_VAR, PORT_ENV_VAR};
    use rstest::rstest;

    use super::*;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn var(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|value| (*value).to_owned())
        }
    }

    fn no_env() -> MapEnv {
        MapEnv(HashMap::new())
    }

    #[rstest]
    fn defaults_match_shared_configuration() {
        let args = HostArgs::try_parse_from(["bridge-host"]).expect("parse");
        let config = args.config(&no_env()).expect("config");
        assert_eq!(config.endpoint, SocketEndpoint::default());
        assert!(args.enable.is_empty());
    }

    #[rstest]
    fn environment_supplies_the_bind_address() {
        let env = MapEnv(HashMap::from([(HOST_ENV_VAR, "0.0.0.0"), (PORT_ENV_VAR, "9100")]));
        let args = HostArgs::try_parse_from(["bridge-host", "--port", "9200"]).expect("parse");
        let config = args.config(&env).expect("config");
        assert_eq!(config.endpoint, SocketEndpoint::tcp("0.0.0.0", 9200));
    }

    #[rstest]
    fn endpoint_flag_wins_over_everything() {
        let env = MapEnv(HashMap::from([(HOST_ENV_VAR, "0.0.0.0")]));
        let args = HostArgs::try_parse_from([
            "bridge-host",
            "--endpoint",
            "tcp://127.0.0.1:7000",
            "--port",
            "9200",
        ])
        .expect("parse");
        let config = args.config(&env).expect("config");
        assert_eq!(config.endpoint, SocketEndpoint::tcp("127.0.0.1", 7000));
    }

    #[rstest]
    #[case::scheme("unix:///tmp/bridge.sock")]
    #[case::port("tcp://localhost")]
    fn endpoint_flag_rejects_bad_urls(#[case] raw: &str) {
        assert!(HostArgs::try_parse_from(["bridge-host", "--endpoint", raw]).is_err());
    }

    #[rstest]
    fn malformed_port_variable_is_a_config_error() {
        let env = MapEnv(HashMap::from([(PORT_ENV_VAR, "ninety")]));
        let args = HostArgs::try_parse_from(["bridge-host"]).expect("parse");
        assert!(matches!(args.config(&env), Err(ConfigError::Endpoint(_))));
    }

    #[rstest]
    fn enable_is_repeatable() {
        let args = HostArgs::try_parse_from([
            "bridge-host",
            "--enable",
            "polyhaven",
            "--enable",
            "sketchfab",
            "--port",
            "9000",
        ])
        .expect("parse");
        assert_eq!(args.enable, vec![Feature::Polyhaven, Feature::Sketchfab]);
        assert_eq!(args.config(&no_env()).expect("config").endpoint.port, 9000);
    }

    #[rstest]
    fn rejects_unknown_feature() {
        assert!(HostArgs::try_parse_from(["bridge-host", "--enable", "unknown"]).is_err());
    }
}
