//! Command-line interface for the `bridge` client binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use serde_json::Number;

use bridge_config::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RESPONSE_TIMEOUT, EnvSource, Feature, HOST_ENV_VAR,
    LogFormat, PORT_ENV_VAR, SocketEndpoint,
};
use bridge_protocol::Params;

use crate::tools::DEFAULT_SCREENSHOT_SIZE;

/// Log filter used by the client unless overridden.
const CLIENT_LOG_FILTER: &str = "warn";

/// Sends commands to a running host.
#[derive(Parser, Debug)]
#[command(name = "bridge", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Full server address such as `tcp://127.0.0.1:9876`; overrides
    /// `--host` and `--port`.
    #[arg(long, value_name = "URL")]
    pub(crate) endpoint: Option<SocketEndpoint>,
    /// Host running the command server.
    #[arg(long, env = HOST_ENV_VAR, default_value = DEFAULT_HOST)]
    pub(crate) host: String,
    /// Port of the command server.
    #[arg(long, env = PORT_ENV_VAR, default_value_t = DEFAULT_PORT)]
    pub(crate) port: u16,
    /// Seconds to wait for a complete response.
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_RESPONSE_TIMEOUT.as_secs())]
    pub(crate) timeout_secs: u64,
    /// Tracing filter expression.
    #[arg(long, env = "BRIDGE_LOG_FILTER", default_value = CLIENT_LOG_FILTER)]
    pub(crate) log_filter: String,
    /// Log output format (`compact` or `json`).
    #[arg(long, env = "BRIDGE_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

impl Cli {
    pub(crate) const fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Endpoint named by the flags, `--endpoint` first.
    pub(crate) fn endpoint(&self) -> SocketEndpoint {
        self.endpoint
            .clone()
            .unwrap_or_else(|| SocketEndpoint::tcp(self.host.clone(), self.port))
    }

    /// Environment view in which the parsed flags take precedence.
    pub(crate) fn env(&self) -> ArgumentEnv {
        let SocketEndpoint { host, port } = self.endpoint();
        ArgumentEnv { host, port }
    }
}

/// Operations offered by the client.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Sends a raw command and prints its result as JSON.
    Call {
        /// Command type, for example `get_scene_info`.
        #[arg(value_name = "TYPE")]
        command_type: String,
        /// Parameters as a JSON object.
        #[arg(long, value_name = "JSON", value_parser = parse_params)]
        params: Option<Params>,
    },
    /// Prints a summary of the active scene.
    Scene,
    /// Prints the details of one object.
    Object {
        /// Object name.
        name: String,
    },
    /// Runs a snippet inside the host.
    Exec {
        /// Source code to execute.
        code: String,
    },
    /// Prints integration status; every integration when none is named.
    Status {
        /// Integration to query.
        feature: Option<Feature>,
    },
    /// Captures the viewport into a PNG file.
    Screenshot {
        /// Destination file.
        output: PathBuf,
        /// Longest edge of the image in pixels.
        #[arg(long, default_value_t = DEFAULT_SCREENSHOT_SIZE)]
        max_size: u32,
    },
    /// Lists Poly Haven categories.
    Categories {
        /// One of `hdris`, `textures`, `models` or `all`.
        #[arg(default_value = "hdris")]
        asset_type: String,
    },
    /// Searches Poly Haven assets.
    Search {
        /// One of `hdris`, `textures`, `models` or `all`.
        #[arg(default_value = "all")]
        asset_type: String,
        /// Comma-separated category filter.
        #[arg(long)]
        categories: Option<String>,
    },
    /// Downloads a Poly Haven asset into the scene.
    Download {
        /// Poly Haven asset id.
        asset_id: String,
        /// One of `hdris`, `textures` or `models`.
        asset_type: String,
        /// `1k`, `2k` or `4k`.
        #[arg(long, default_value = "1k")]
        resolution: String,
        /// File format; the asset type's default when omitted.
        #[arg(long)]
        file_format: Option<String>,
    },
    /// Applies a downloaded Poly Haven texture to an object.
    SetTexture {
        /// Object receiving the material.
        object_name: String,
        /// Texture asset id.
        texture_id: String,
    },
    /// Submits a Hyper3D job from a text prompt.
    GenerateText {
        /// Description of the model.
        prompt: String,
        /// Comma-separated length, width and height ratios.
        #[arg(long, value_delimiter = ',')]
        bbox: Option<Vec<Number>>,
    },
    /// Submits a Hyper3D job from reference images.
    GenerateImages {
        /// Local image file; repeat for several.
        #[arg(long = "image-path", value_name = "PATH")]
        paths: Vec<PathBuf>,
        /// Image URL; repeat for several.
        #[arg(long = "image-url", value_name = "URL")]
        urls: Vec<String>,
        /// Comma-separated length, width and height ratios.
        #[arg(long, value_delimiter = ',')]
        bbox: Option<Vec<Number>>,
    },
    /// Prints the status list of a Hyper3D job.
    PollJob {
        /// Subscription key returned on submission.
        #[arg(long)]
        subscription_key: Option<String>,
        /// Request id, used when no subscription key is given.
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Imports a finished Hyper3D job.
    ImportAsset {
        /// Name of the imported object.
        name: String,
        /// Task uuid returned on submission.
        #[arg(long)]
        task_uuid: Option<String>,
        /// Request id, used when no task uuid is given.
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Searches Sketchfab models.
    SketchfabSearch {
        /// Text matched against model names.
        query: String,
        /// Comma-separated category filter.
        #[arg(long)]
        categories: Option<String>,
        /// Maximum number of results.
        #[arg(long, default_value_t = 20)]
        count: u32,
        /// Restrict results to downloadable models.
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        downloadable: bool,
    },
    /// Imports a Sketchfab model by uid.
    SketchfabDownload {
        /// Sketchfab model uid.
        uid: String,
    },
}

fn parse_params(raw: &str) -> Result<Params, String> {
    serde_json::from_str(raw).map_err(|error| format!("expected a JSON object: {error}"))
}

/// Endpoint lookup answering from parsed flags.
///
/// Clap has already merged the environment overrides into the flags, so the
/// session sees one consistent view.
#[derive(Debug, Clone)]
pub(crate) struct ArgumentEnv {
    host: String,
    port: u16,
}

impl EnvSource for ArgumentEnv {
    fn var(&self, key: &str) -> Option<String> {
        match key {
            HOST_ENV_VAR => Some(self.host.clone()),
            PORT_ENV_VAR => Some(self.port.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn call_accepts_json_params() {
        let cli = Cli::try_parse_from([
            "bridge",
            "--port",
            "9100",
            "call",
            "get_object_info",
            "--params",
            r#"{"name": "Cube"}"#,
        ])
        .expect("parse");

        let CliCommand::Call {
            command_type,
            params,
        } = cli.command
        else {
            panic!("expected call");
        };
        assert_eq!(command_type, "get_object_info");
        let params = params.expect("params");
        assert_eq!(params.get("name"), Some(&json!("Cube")));
    }

    #[rstest]
    #[case::array("[1, 2]")]
    #[case::garbage("{name")]
    fn call_rejects_non_object_params(#[case] raw: &str) {
        let error = Cli::try_parse_from(["bridge", "call", "x", "--params", raw])
            .expect_err("invalid params");
        assert!(error.to_string().contains("expected a JSON object"));
    }

    #[rstest]
    fn flags_feed_the_endpoint_lookup() {
        let cli = Cli::try_parse_from(["bridge", "--host", "10.0.0.2", "--port", "9100", "scene"])
            .expect("parse");
        let env = cli.env();

        assert_eq!(env.var(HOST_ENV_VAR).as_deref(), Some("10.0.0.2"));
        assert_eq!(env.var(PORT_ENV_VAR).as_deref(), Some("9100"));
        assert_eq!(env.var("HOME"), None);
    }

    #[rstest]
    fn endpoint_overrides_host_and_port() {
        let cli = Cli::try_parse_from([
            "bridge",
            "--host",
            "10.0.0.2",
            "--endpoint",
            "tcp://192.168.1.5:9200",
            "scene",
        ])
        .expect("parse");

        assert_eq!(cli.endpoint(), SocketEndpoint::tcp("192.168.1.5", 9200));
        let env = cli.env();
        assert_eq!(env.var(HOST_ENV_VAR).as_deref(), Some("192.168.1.5"));
        assert_eq!(env.var(PORT_ENV_VAR).as_deref(), Some("9200"));
    }

    #[rstest]
    fn endpoint_must_be_a_tcp_url() {
        let error = Cli::try_parse_from(["bridge", "--endpoint", "http://host:80", "scene"])
            .expect_err("scheme");
        assert!(error.to_string().contains("unsupported socket scheme"));
    }

    #[rstest]
    fn bbox_accepts_comma_separated_ratios() {
        let cli = Cli::try_parse_from(["bridge", "generate-text", "a stool", "--bbox", "1,0.5,2"])
            .expect("parse");
        let CliCommand::GenerateText { prompt, bbox } = cli.command else {
            panic!("expected generate-text");
        };
        assert_eq!(prompt, "a stool");
        assert_eq!(
            bbox.map(|values| values.iter().map(Number::to_string).collect::<Vec<_>>()),
            Some(vec!["1".to_owned(), "0.5".to_owned(), "2".to_owned()])
        );
    }

    #[rstest]
    #[case::default(&["bridge", "sketchfab-search", "chair"], true)]
    #[case::explicit(&["bridge", "sketchfab-search", "chair", "--downloadable", "false"], false)]
    fn sketchfab_search_downloadable_flag(#[case] argv: &[&str], #[case] expected: bool) {
        let cli = Cli::try_parse_from(argv).expect("parse");
        let CliCommand::SketchfabSearch {
            downloadable,
            count,
            ..
        } = cli.command
        else {
            panic!("expected sketchfab-search");
        };
        assert_eq!(downloadable, expected);
        assert_eq!(count, 20);
    }

    #[rstest]
    fn status_feature_is_optional() {
        let cli = Cli::try_parse_from(["bridge", "status", "sketchfab"]).expect("parse");
        assert!(matches!(
            cli.command,
            CliCommand::Status {
                feature: Some(Feature::Sketchfab)
            }
        ));
        assert!(Cli::try_parse_from(["bridge", "status", "blender"]).is_err());
    }

    #[rstest]
    fn timeout_defaults_to_shared_value() {
        let cli = Cli::try_parse_from(["bridge", "scene"]).expect("parse");
        assert_eq!(cli.response_timeout(), DEFAULT_RESPONSE_TIMEOUT);
    }
}
