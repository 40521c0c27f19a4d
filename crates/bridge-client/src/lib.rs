//! Client side of the host bridge.
//!
//! [`HostConnection`] owns one socket and performs framed request/response
//! round trips against the command server. [`Session`] keeps a single
//! connection alive across calls, revalidating it before reuse and replacing it
//! after transport failures. The [`tools`] module renders results for
//! callers, and [`run`] drives the `bridge` binary.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::error::ErrorKind;
use thiserror::Error;
use tracing::debug;

use bridge_config::telemetry::{self, TelemetryError};
use bridge_config::Feature;

mod cli;
mod connection;
mod errors;
mod session;
pub mod tools;

pub use connection::{CONNECTION_TIMEOUT, HostConnection};
pub use errors::ClientError;
pub use session::Session;
pub use tools::ToolError;

use cli::{Cli, CliCommand};

const RUN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Runs the client using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };
    match execute(&cli, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(stderr, "bridge: {error}").ok();
            ExitCode::FAILURE
        }
    }
}

fn report_usage<W: Write, E: Write>(error: &clap::Error, stdout: &mut W, stderr: &mut E) -> ExitCode {
    if matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    ) {
        write!(stdout, "{error}").ok();
        ExitCode::SUCCESS
    } else {
        write!(stderr, "{error}").ok();
        ExitCode::FAILURE
    }
}

fn execute<W: Write>(cli: &Cli, stdout: &mut W) -> Result<(), AppError> {
    telemetry::initialise(&cli.log_filter, cli.log_format)?;
    let mut session = Session::new(Arc::new(cli.env()), cli.response_timeout());
    debug!(
        target: RUN_TARGET,
        endpoint = %cli.endpoint(),
        "running client command"
    );

    let output = match &cli.command {
        CliCommand::Call {
            command_type,
            params,
        } => {
            let result = session.send_command(command_type, params.clone())?;
            serde_json::to_string_pretty(&result).map_err(AppError::Render)?
        }
        CliCommand::Scene => tools::get_scene_info(&mut session),
        CliCommand::Object { name } => tools::get_object_info(&mut session, name),
        CliCommand::Exec { code } => tools::execute_blender_code(&mut session, code),
        CliCommand::Status { feature } => status_report(&mut session, *feature),
        CliCommand::Screenshot { output, max_size } => {
            let image = tools::get_viewport_screenshot(&mut session, *max_size)?;
            fs::write(output, &image).map_err(|source| AppError::SaveScreenshot {
                path: output.clone(),
                source,
            })?;
            format!("Saved {} bytes to {}", image.len(), output.display())
        }
        CliCommand::Categories { asset_type } => {
            tools::get_polyhaven_categories(&mut session, asset_type)
        }
        CliCommand::Search {
            asset_type,
            categories,
        } => tools::search_polyhaven_assets(&mut session, asset_type, categories.as_deref()),
        CliCommand::Download {
            asset_id,
            asset_type,
            resolution,
            file_format,
        } => tools::download_polyhaven_asset(
            &mut session,
            asset_id,
            asset_type,
            resolution,
            file_format.as_deref(),
        ),
        CliCommand::SetTexture {
            object_name,
            texture_id,
        } => tools::set_texture(&mut session, object_name, texture_id),
        CliCommand::GenerateText { prompt, bbox } => {
            tools::generate_hyper3d_model_via_text(&mut session, prompt, bbox.as_deref())
        }
        CliCommand::GenerateImages { paths, urls, bbox } => {
            tools::generate_hyper3d_model_via_images(
                &mut session,
                non_empty(paths),
                non_empty(urls),
                bbox.as_deref(),
            )
        }
        CliCommand::PollJob {
            subscription_key,
            request_id,
        } => tools::poll_rodin_job_status(
            &mut session,
            subscription_key.as_deref(),
            request_id.as_deref(),
        ),
        CliCommand::ImportAsset {
            name,
            task_uuid,
            request_id,
        } => tools::import_generated_asset(
            &mut session,
            name,
            task_uuid.as_deref(),
            request_id.as_deref(),
        ),
        CliCommand::SketchfabSearch {
            query,
            categories,
            count,
            downloadable,
        } => tools::search_sketchfab_models(
            &mut session,
            query,
            categories.as_deref(),
            *count,
            *downloadable,
        ),
        CliCommand::SketchfabDownload { uid } => tools::download_sketchfab_model(&mut session, uid),
    };
    session.shutdown();

    writeln!(stdout, "{output}").map_err(AppError::Output)?;
    stdout.flush().map_err(AppError::Output)
}

fn non_empty<T>(values: &[T]) -> Option<&[T]> {
    (!values.is_empty()).then_some(values)
}

fn status_report(session: &mut Session, feature: Option<Feature>) -> String {
    match feature {
        Some(feature) => feature_status(session, feature),
        None => Feature::all()
            .map(|feature| format!("{}: {}", feature.label(), feature_status(session, feature)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn feature_status(session: &mut Session, feature: Feature) -> String {
    match feature {
        Feature::Polyhaven => tools::get_polyhaven_status(session),
        Feature::Hyper3d => tools::get_hyper3d_status(session),
        Feature::Sketchfab => tools::get_sketchfab_status(session),
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("failed to render result: {0}")]
    Render(serde_json::Error),
    #[error("failed to write screenshot to {}: {source}", path.display())]
    SaveScreenshot { path: PathBuf, source: io::Error },
    #[error("failed to write output: {0}")]
    Output(io::Error),
}

#[cfg(test)]
mod tests;
