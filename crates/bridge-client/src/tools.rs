//! Caller-facing operations built on a [`Session`].
//!
//! Each tool shapes its arguments, issues one command and renders the result
//! as text. Failures are rendered too, as `"Error ...: <cause>"`, so callers
//! always receive a printable answer. The screenshot tool is the exception:
//! it returns image bytes and reports failures as [`ToolError`].
//!
//! Hyper3D image references travel as URLs; local files are sent as
//! `file://` URLs the host resolves itself.

use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Number, Value, json};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use bridge_config::Feature;

use crate::errors::ClientError;
use crate::session::Session;

const TOOLS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tools");

/// Longest edge requested for viewport screenshots by default.
pub const DEFAULT_SCREENSHOT_SIZE: u32 = 800;

const HYPER3D_ACTION: &str = "generating Hyper3D task";

const POLYHAVEN_DISABLED: &str =
    "PolyHaven integration is disabled. Select it in the sidebar in BlenderMCP, then run it again.";

/// Failures of tools that do not render errors as text.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The viewport capture failed.
    #[error("Screenshot failed: {0}")]
    Screenshot(String),
    /// A bounding box contained a non-positive ratio.
    #[error("Incorrect number range: bbox must be bigger than zero!")]
    BboxRange,
}

/// Pretty-printed summary of the active scene.
#[must_use]
pub fn get_scene_info(session: &mut Session) -> String {
    render_json(session.send_command("get_scene_info", None))
        .unwrap_or_else(|error| failure("getting scene info", &error))
}

/// Pretty-printed details of one object.
#[must_use]
pub fn get_object_info(session: &mut Session, object_name: &str) -> String {
    let params = object([("name", json!(object_name))]);
    render_json(session.send_command("get_object_info", Some(params)))
        .unwrap_or_else(|error| failure("getting object info", &error))
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionResult {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    text_name: Option<String>,
}

/// Runs `code` inside the host and reports its output.
#[must_use]
pub fn execute_blender_code(session: &mut Session, code: &str) -> String {
    let params = object([("code", json!(code))]);
    match session.send_command("execute_code", Some(params)) {
        Ok(value) => {
            let execution: ExecutionResult = serde_json::from_value(value).unwrap_or_default();
            let output = execution
                .result
                .as_ref()
                .map(display_value)
                .unwrap_or_default();
            let mut message = format!("Code executed successfully: {output}");
            if let Some(text_name) = execution.text_name.filter(|name| !name.is_empty()) {
                message.push_str("\nSnippet stored in Blender Text block: ");
                message.push_str(&text_name);
            }
            message
        }
        Err(error) => failure("executing code", &error),
    }
}

/// Captures the viewport and returns the PNG bytes.
///
/// The host writes the image to a temporary file that is removed afterwards.
///
/// # Errors
///
/// Returns [`ToolError::Screenshot`] when the command fails, the host reports
/// an error, or the file never appears.
pub fn get_viewport_screenshot(session: &mut Session, max_size: u32) -> Result<Vec<u8>, ToolError> {
    let screenshot_failed = |cause: String| {
        error!(target: TOOLS_TARGET, error = %cause, "error capturing screenshot");
        ToolError::Screenshot(cause)
    };
    let directory = tempfile::Builder::new()
        .prefix("bridge-screenshot")
        .tempdir()
        .map_err(|error| screenshot_failed(error.to_string()))?;
    let path = directory
        .path()
        .join(format!("blender_screenshot_{}.png", std::process::id()));

    let params = object([
        ("max_size", json!(max_size)),
        ("filepath", json!(path.to_string_lossy())),
        ("format", json!("png")),
    ]);
    let result = session
        .send_command("get_viewport_screenshot", Some(params))
        .map_err(|error| screenshot_failed(error.to_string()))?;
    if let Some(cause) = result.get("error") {
        return Err(screenshot_failed(display_value(cause)));
    }
    read_screenshot(&path).map_err(screenshot_failed)
}

fn read_screenshot(path: &Path) -> Result<Vec<u8>, String> {
    if !path.exists() {
        return Err("Screenshot file was not created".to_owned());
    }
    let bytes = fs::read(path).map_err(|error| error.to_string())?;
    fs::remove_file(path).map_err(|error| error.to_string())?;
    Ok(bytes)
}

/// Poly Haven status message, with a usage tip when enabled.
#[must_use]
pub fn get_polyhaven_status(session: &mut Session) -> String {
    feature_status(session, Feature::Polyhaven)
}

/// Hyper3D Rodin status message.
#[must_use]
pub fn get_hyper3d_status(session: &mut Session) -> String {
    feature_status(session, Feature::Hyper3d)
}

/// Sketchfab status message, with a usage tip when enabled.
#[must_use]
pub fn get_sketchfab_status(session: &mut Session) -> String {
    feature_status(session, Feature::Sketchfab)
}

fn feature_status(session: &mut Session, feature: Feature) -> String {
    match session.send_command(feature.status_command(), None) {
        Ok(status) => {
            let mut message = status
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            if status.get("enabled").and_then(Value::as_bool) == Some(true) {
                message.push_str(status_tip(feature));
            }
            message
        }
        Err(error) => failure(&format!("checking {} status", status_subject(feature)), &error),
    }
}

const fn status_subject(feature: Feature) -> &'static str {
    match feature {
        Feature::Polyhaven => "PolyHaven",
        Feature::Hyper3d => "Hyper3D",
        Feature::Sketchfab => "Sketchfab",
    }
}

const fn status_tip(feature: Feature) -> &'static str {
    match feature {
        Feature::Polyhaven => {
            "PolyHaven is good at Textures, and has a wider variety of textures than Sketchfab."
        }
        Feature::Sketchfab => {
            "Sketchfab is good at Realistic models, and has a wider variety of models than PolyHaven."
        }
        Feature::Hyper3d => "",
    }
}

/// Poly Haven categories for `asset_type`, most populated first.
#[must_use]
pub fn get_polyhaven_categories(session: &mut Session, asset_type: &str) -> String {
    polyhaven_categories(session, asset_type)
        .unwrap_or_else(|error| failure("getting Polyhaven categories", &error))
}

fn polyhaven_categories(session: &mut Session, asset_type: &str) -> Result<String, ClientError> {
    if !session.refresh_polyhaven()? {
        return Ok(POLYHAVEN_DISABLED.to_owned());
    }
    let params = object([("asset_type", json!(asset_type))]);
    let result = session.send_command("get_polyhaven_categories", Some(params))?;
    if let Some(cause) = result.get("error") {
        return Ok(format!("Error: {}", display_value(cause)));
    }

    let mut categories: Vec<(&String, u64)> = result
        .get("categories")
        .and_then(Value::as_object)
        .map(|categories| {
            categories
                .iter()
                .map(|(name, count)| (name, count.as_u64().unwrap_or(0)))
                .collect()
        })
        .unwrap_or_default();
    categories.sort_by(|left, right| right.1.cmp(&left.1));

    let mut output = format!("Categories for {asset_type}:\n\n");
    for (name, count) in categories {
        writeln!(output, "- {name}: {count} assets").ok();
    }
    Ok(output)
}

/// Poly Haven assets matching `asset_type` and the comma-separated
/// `categories`, most downloaded first.
#[must_use]
pub fn search_polyhaven_assets(
    session: &mut Session,
    asset_type: &str,
    categories: Option<&str>,
) -> String {
    search_assets(session, asset_type, categories)
        .unwrap_or_else(|error| failure("searching Polyhaven assets", &error))
}

fn search_assets(
    session: &mut Session,
    asset_type: &str,
    categories: Option<&str>,
) -> Result<String, ClientError> {
    let params = object([
        ("asset_type", json!(asset_type)),
        ("categories", json!(categories)),
    ]);
    let result = session.send_command("search_polyhaven_assets", Some(params))?;
    if let Some(cause) = result.get("error") {
        return Ok(format!("Error: {}", display_value(cause)));
    }

    let total_count = result.get("total_count").and_then(Value::as_u64).unwrap_or(0);
    let returned_count = result
        .get("returned_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let mut output = format!("Found {total_count} assets");
    if let Some(categories) = categories.filter(|categories| !categories.is_empty()) {
        write!(output, " in categories: {categories}").ok();
    }
    writeln!(output, "\nShowing {returned_count} assets:\n").ok();

    let empty = Map::new();
    let mut assets: Vec<(&String, &Value)> = result
        .get("assets")
        .and_then(Value::as_object)
        .unwrap_or(&empty)
        .iter()
        .collect();
    assets.sort_by_key(|(_, asset)| std::cmp::Reverse(download_count(asset)));

    for (id, asset) in assets {
        let name = asset.get("name").and_then(Value::as_str).unwrap_or(id);
        let categories: Vec<&str> = asset
            .get("categories")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let downloads = asset
            .get("download_count")
            .map_or_else(|| "Unknown".to_owned(), display_value);
        writeln!(output, "- {name} (ID: {id})").ok();
        writeln!(output, "  Type: {}", asset_type_label(asset.get("type"))).ok();
        writeln!(output, "  Categories: {}", categories.join(", ")).ok();
        writeln!(output, "  Downloads: {downloads}\n").ok();
    }
    Ok(output)
}

fn download_count(asset: &Value) -> u64 {
    asset
        .get("download_count")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn asset_type_label(kind: Option<&Value>) -> &'static str {
    match kind.map_or(Some(0), Value::as_u64) {
        Some(0) => "HDRI",
        Some(1) => "Texture",
        Some(2) => "Model",
        _ => "Unknown",
    }
}

/// Downloads a Poly Haven asset into the scene and describes the import.
#[must_use]
pub fn download_polyhaven_asset(
    session: &mut Session,
    asset_id: &str,
    asset_type: &str,
    resolution: &str,
    file_format: Option<&str>,
) -> String {
    let params = object([
        ("asset_id", json!(asset_id)),
        ("asset_type", json!(asset_type)),
        ("resolution", json!(resolution)),
        ("file_format", json!(file_format)),
    ]);
    match session.send_command("download_polyhaven_asset", Some(params)) {
        Ok(result) => render_download(asset_type, &result),
        Err(error) => failure("downloading Polyhaven asset", &error),
    }
}

fn render_download(asset_type: &str, result: &Value) -> String {
    if let Some(cause) = result.get("error") {
        return format!("Error: {}", display_value(cause));
    }
    if !flag(result, "success") {
        return format!("Failed to download asset: {}", message_or_unknown(result));
    }
    let message = result
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Asset downloaded and imported successfully");
    match asset_type {
        "hdris" => format!("{message}. The HDRI has been set as the world environment."),
        "textures" => format!(
            "{message}. Created material '{}' with maps: {}.",
            text(result, "material"),
            strings(result, "maps").join(", ")
        ),
        "models" => format!("{message}. The model has been imported into the current scene."),
        _ => message.to_owned(),
    }
}

/// Applies a downloaded Poly Haven texture to `object_name` and describes
/// the resulting material.
#[must_use]
pub fn set_texture(session: &mut Session, object_name: &str, texture_id: &str) -> String {
    let params = object([
        ("object_name", json!(object_name)),
        ("texture_id", json!(texture_id)),
    ]);
    match session.send_command("set_texture", Some(params)) {
        Ok(result) => render_texture(object_name, texture_id, &result),
        Err(error) => failure("applying texture", &error),
    }
}

fn render_texture(object_name: &str, texture_id: &str, result: &Value) -> String {
    if let Some(cause) = result.get("error") {
        return format!("Error: {}", display_value(cause));
    }
    if !flag(result, "success") {
        return format!("Failed to apply texture: {}", message_or_unknown(result));
    }
    let node_count = result
        .pointer("/material_info/node_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let has_nodes = result
        .pointer("/material_info/has_nodes")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut output = format!("Successfully applied texture '{texture_id}' to {object_name}.\n");
    writeln!(
        output,
        "Using material '{}' with maps: {}.\n",
        text(result, "material"),
        strings(result, "maps").join(", ")
    )
    .ok();
    writeln!(output, "Material has nodes: {}", bool_label(has_nodes)).ok();
    writeln!(output, "Total node count: {node_count}\n").ok();

    let nodes = result
        .pointer("/material_info/texture_nodes")
        .and_then(Value::as_array)
        .filter(|nodes| !nodes.is_empty());
    let Some(nodes) = nodes else {
        output.push_str("No texture nodes found in the material.\n");
        return output;
    };
    output.push_str("Texture nodes:\n");
    for node in nodes {
        writeln!(output, "- {} using image: {}", text(node, "name"), text(node, "image")).ok();
        let connections = node
            .get("connections")
            .and_then(Value::as_array)
            .filter(|connections| !connections.is_empty());
        if let Some(connections) = connections {
            output.push_str("  Connections:\n");
            for connection in connections {
                writeln!(output, "    {}", display_value(connection)).ok();
            }
        }
    }
    output
}

/// Submits a Hyper3D job described by `text_prompt`.
///
/// Returns the task handles as JSON once the job is accepted, or the host's
/// answer verbatim otherwise.
#[must_use]
pub fn generate_hyper3d_model_via_text(
    session: &mut Session,
    text_prompt: &str,
    bbox_condition: Option<&[Number]>,
) -> String {
    let bbox = match process_bbox(bbox_condition) {
        Ok(bbox) => bbox,
        Err(error) => return failure(HYPER3D_ACTION, &error),
    };
    submit_job(
        session,
        object([
            ("text_prompt", json!(text_prompt)),
            ("images", Value::Null),
            ("bbox_condition", json!(bbox)),
        ]),
    )
}

/// Submits a Hyper3D job from reference images, given either as local paths
/// or as URLs but never both.
#[must_use]
pub fn generate_hyper3d_model_via_images(
    session: &mut Session,
    input_image_paths: Option<&[PathBuf]>,
    input_image_urls: Option<&[String]>,
    bbox_condition: Option<&[Number]>,
) -> String {
    let images = match (input_image_paths, input_image_urls) {
        (Some(_), Some(_)) => return "Error: Conflict parameters given!".to_owned(),
        (None, None) => return "Error: No image given!".to_owned(),
        (Some(paths), None) => match file_urls(paths) {
            Some(images) => images,
            None => return "Error: not all image paths are valid!".to_owned(),
        },
        (None, Some(urls)) => {
            if !urls.iter().all(|url| Url::parse(url).is_ok()) {
                return "Error: not all image URLs are valid!".to_owned();
            }
            urls.to_vec()
        }
    };
    let bbox = match process_bbox(bbox_condition) {
        Ok(bbox) => bbox,
        Err(error) => return failure(HYPER3D_ACTION, &error),
    };
    submit_job(
        session,
        object([
            ("text_prompt", Value::Null),
            ("images", json!(images)),
            ("bbox_condition", json!(bbox)),
        ]),
    )
}

fn file_urls(paths: &[PathBuf]) -> Option<Vec<String>> {
    paths
        .iter()
        .map(|path| {
            let absolute = fs::canonicalize(path).ok()?;
            Url::from_file_path(absolute).ok().map(String::from)
        })
        .collect()
}

fn submit_job(session: &mut Session, params: Map<String, Value>) -> String {
    let result = match session.send_command("create_rodin_job", Some(params)) {
        Ok(result) => result,
        Err(error) => return failure(HYPER3D_ACTION, &error),
    };
    let submitted = result
        .get("submit_time")
        .and_then(Value::as_str)
        .is_some_and(|time| !time.is_empty());
    if !submitted {
        return result.to_string();
    }
    json!({
        "task_uuid": result.get("uuid"),
        "subscription_key": result.pointer("/jobs/subscription_key"),
    })
    .to_string()
}

/// Pretty-printed status list of a Hyper3D job, addressed by its
/// subscription key or, failing that, its request id.
#[must_use]
pub fn poll_rodin_job_status(
    session: &mut Session,
    subscription_key: Option<&str>,
    request_id: Option<&str>,
) -> String {
    let mut params = Map::new();
    if let Some(key) = non_empty(subscription_key) {
        params.insert("subscription_key".to_owned(), json!(key));
    } else if let Some(id) = non_empty(request_id) {
        params.insert("request_id".to_owned(), json!(id));
    }
    render_json(session.send_command("poll_rodin_job_status", Some(params)))
        .unwrap_or_else(|error| failure(HYPER3D_ACTION, &error))
}

/// Imports a finished Hyper3D job as object `name`.
#[must_use]
pub fn import_generated_asset(
    session: &mut Session,
    name: &str,
    task_uuid: Option<&str>,
    request_id: Option<&str>,
) -> String {
    let mut params = object([("name", json!(name))]);
    if let Some(task) = non_empty(task_uuid) {
        params.insert("task_uuid".to_owned(), json!(task));
    } else if let Some(id) = non_empty(request_id) {
        params.insert("request_id".to_owned(), json!(id));
    }
    render_json(session.send_command("import_generated_asset", Some(params)))
        .unwrap_or_else(|error| failure(HYPER3D_ACTION, &error))
}

/// Sketchfab models matching `query`, one block per model.
#[must_use]
pub fn search_sketchfab_models(
    session: &mut Session,
    query: &str,
    categories: Option<&str>,
    count: u32,
    downloadable: bool,
) -> String {
    info!(
        target: TOOLS_TARGET,
        query,
        categories,
        count,
        downloadable,
        "searching Sketchfab models"
    );
    let params = object([
        ("query", json!(query)),
        ("categories", json!(categories)),
        ("count", json!(count)),
        ("downloadable", json!(downloadable)),
    ]);
    match session.send_command("search_sketchfab_models", Some(params)) {
        Ok(result) => render_models(query, &result),
        Err(error) => failure("searching Sketchfab models", &error),
    }
}

fn render_models(query: &str, result: &Value) -> String {
    if let Some(cause) = result.get("error") {
        error!(target: TOOLS_TARGET, error = %cause, "Sketchfab search failed");
        return format!("Error: {}", display_value(cause));
    }
    let models = result
        .get("results")
        .and_then(Value::as_array)
        .filter(|models| !models.is_empty());
    let Some(models) = models else {
        return format!("No models found matching '{query}'");
    };

    let mut output = format!("Found {} models matching '{query}':\n\n", models.len());
    for model in models {
        let name = model.get("name").and_then(Value::as_str).unwrap_or("Unnamed model");
        let uid = model.get("uid").and_then(Value::as_str).unwrap_or("Unknown ID");
        let author = model
            .pointer("/user/username")
            .and_then(Value::as_str)
            .unwrap_or("Unknown author");
        let license = model
            .pointer("/license/label")
            .and_then(Value::as_str)
            .unwrap_or("Unknown");
        let faces = model
            .get("faceCount")
            .map_or_else(|| "Unknown".to_owned(), display_value);
        let downloadable = if flag(model, "isDownloadable") { "Yes" } else { "No" };
        writeln!(output, "- {name} (UID: {uid})").ok();
        writeln!(output, "  Author: {author}").ok();
        writeln!(output, "  License: {license}").ok();
        writeln!(output, "  Face count: {faces}").ok();
        writeln!(output, "  Downloadable: {downloadable}\n").ok();
    }
    output
}

/// Downloads Sketchfab model `uid` into the scene and names the objects it
/// created.
#[must_use]
pub fn download_sketchfab_model(session: &mut Session, uid: &str) -> String {
    info!(target: TOOLS_TARGET, uid, "downloading Sketchfab model");
    let params = object([("uid", json!(uid))]);
    let result = match session.send_command("download_sketchfab_model", Some(params)) {
        Ok(result) => result,
        Err(error) => return failure("downloading Sketchfab model", &error),
    };
    if let Some(cause) = result.get("error") {
        error!(target: TOOLS_TARGET, error = %cause, "Sketchfab download failed");
        return format!("Error: {}", display_value(cause));
    }
    if !flag(&result, "success") {
        return format!("Failed to download model: {}", message_or_unknown(&result));
    }
    let objects = strings(&result, "imported_objects");
    let names = if objects.is_empty() {
        "none".to_owned()
    } else {
        objects.join(", ")
    };
    format!("Successfully imported model. Created objects: {names}")
}

/// Normalises a Hyper3D bounding box condition.
///
/// Integer boxes pass through unchanged. Otherwise every ratio must be
/// positive and the box is scaled so its largest edge is 100.
///
/// # Errors
///
/// Returns [`ToolError::BboxRange`] when a ratio is zero or negative.
pub fn process_bbox(original: Option<&[Number]>) -> Result<Option<Vec<i64>>, ToolError> {
    let Some(values) = original else {
        return Ok(None);
    };
    let integers: Option<Vec<i64>> = values.iter().map(Number::as_i64).collect();
    if let Some(integers) = integers {
        return Ok(Some(integers));
    }

    let floats: Vec<f64> = values
        .iter()
        .map(|value| value.as_f64().unwrap_or(0.0))
        .collect();
    if floats.iter().any(|value| *value <= 0.0) {
        return Err(ToolError::BboxRange);
    }
    let largest = floats.iter().copied().fold(f64::MIN, f64::max);
    Ok(Some(floats.into_iter().map(|value| scale_to_percent(value, largest)).collect()))
}

#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    reason = "bbox ratios are truncated to whole percentages"
)]
fn scale_to_percent(value: f64, largest: f64) -> i64 {
    (value / largest * 100.0) as i64
}

fn render_json(result: Result<Value, ClientError>) -> Result<String, ClientError> {
    let value = result?;
    Ok(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
}

fn failure(action: &str, error: &dyn fmt::Display) -> String {
    error!(target: TOOLS_TARGET, action, error = %error, "tool failed");
    format!("Error {action}: {error}")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn strings<'a>(value: &'a Value, key: &str) -> Vec<&'a str> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn message_or_unknown(value: &Value) -> &str {
    value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
}

const fn bool_label(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

fn object<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
