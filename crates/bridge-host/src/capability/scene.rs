//! Scene inspection, viewport capture, and code execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Capability;
use crate::dispatch::{HandlerError, HandlerGroup, NoParams, handler_fn};

/// Text block that accumulates every executed snippet.
pub const CODE_TEXT_BLOCK: &str = "MCP Delegated Code";

/// Separator written between consecutive snippets in [`CODE_TEXT_BLOCK`].
pub const CODE_SEPARATOR: &str = "\n########\n";

const SCENE_OBJECT_LIMIT: usize = 10;
const DEFAULT_SCREENSHOT_SIZE: u32 = 800;

/// Vertex, edge, and polygon counts of a mesh object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStats {
    /// Vertex count.
    pub vertices: usize,
    /// Edge count.
    pub edges: usize,
    /// Polygon count.
    pub polygons: usize,
}

/// Detailed view of one scene object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    /// Unique object name.
    pub name: String,
    /// Host object type, for example `MESH` or `LIGHT`.
    #[serde(rename = "type")]
    pub kind: String,
    /// World location.
    pub location: [f64; 3],
    /// Euler rotation in radians.
    pub rotation: [f64; 3],
    /// Per-axis scale.
    pub scale: [f64; 3],
    /// Whether the object is visible in the viewport.
    pub visible: bool,
    /// Names of the materials assigned to the object's slots.
    pub materials: Vec<String>,
    /// World-space axis-aligned bounding box for meshes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_bounding_box: Option<[[f64; 3]; 2]>,
    /// Mesh statistics for meshes with geometry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshStats>,
}

impl SceneObject {
    /// Builds a visible, unscaled object of `kind` at `location`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>, location: [f64; 3]) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            location,
            rotation: [0.0; 3],
            scale: [1.0; 3],
            visible: true,
            materials: Vec::new(),
            world_bounding_box: None,
            mesh: None,
        }
    }
}

/// A material and the texture maps feeding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    /// Unique material name.
    pub name: String,
    /// Texture map kinds, for example `Diffuse` or `nor_gl`.
    pub maps: Vec<String>,
}

/// Pixel dimensions of a captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Access to the host application's scene.
///
/// Every method is only ever called from the main loop thread.
pub trait SceneHost: Send + Sync {
    /// Name of the active scene.
    fn scene_name(&self) -> String;

    /// Objects of the active scene in host order.
    fn objects(&self) -> Vec<SceneObject>;

    /// Looks up an object by name.
    fn object(&self, name: &str) -> Option<SceneObject>;

    /// Number of materials in the document.
    fn materials_count(&self) -> usize;

    /// Captures the 3D viewport into `filepath`.
    ///
    /// Returns `Ok(None)` when no 3D viewport is open.
    ///
    /// # Errors
    ///
    /// Returns a description of the capture failure.
    fn capture_viewport(&self, filepath: &Path) -> Result<Option<ImageSize>, String>;

    /// Rescales the image at `filepath` and saves it as `format`.
    ///
    /// # Errors
    ///
    /// Returns a description of the resize failure.
    fn rescale_image(&self, filepath: &Path, size: ImageSize, format: &str) -> Result<(), String>;

    /// Current contents of a text block, if it exists.
    fn text_block(&self, name: &str) -> Option<String>;

    /// Replaces the contents of a text block, creating it when missing.
    fn write_text_block(&self, name: &str, contents: String);

    /// Runs `code` in the host interpreter and returns its captured stdout.
    ///
    /// # Errors
    ///
    /// Returns the interpreter's error message.
    fn run_code(&self, code: &str) -> Result<String, String>;

    /// Links `object` into the scene, replacing an object of the same name.
    fn add_object(&self, object: SceneObject);

    /// Uses the image `image_name` as the world environment.
    fn set_world_texture(&self, image_name: &str);

    /// Creates or rebuilds material `name` from texture `maps`.
    fn create_material(&self, name: &str, maps: &[String]);

    /// Material called `name`, or else the first whose name starts with it.
    fn material(&self, name: &str) -> Option<Material>;

    /// Puts `material` into the active slot of `object_name`.
    ///
    /// # Errors
    ///
    /// Returns a description of why the material could not be assigned.
    fn assign_material(&self, object_name: &str, material: &str) -> Result<(), String>;
}

impl<H: SceneHost + ?Sized> SceneHost for Arc<H> {
    fn scene_name(&self) -> String {
        (**self).scene_name()
    }

    fn objects(&self) -> Vec<SceneObject> {
        (**self).objects()
    }

    fn object(&self, name: &str) -> Option<SceneObject> {
        (**self).object(name)
    }

    fn materials_count(&self) -> usize {
        (**self).materials_count()
    }

    fn capture_viewport(&self, filepath: &Path) -> Result<Option<ImageSize>, String> {
        (**self).capture_viewport(filepath)
    }

    fn rescale_image(&self, filepath: &Path, size: ImageSize, format: &str) -> Result<(), String> {
        (**self).rescale_image(filepath, size, format)
    }

    fn text_block(&self, name: &str) -> Option<String> {
        (**self).text_block(name)
    }

    fn write_text_block(&self, name: &str, contents: String) {
        (**self).write_text_block(name, contents);
    }

    fn run_code(&self, code: &str) -> Result<String, String> {
        (**self).run_code(code)
    }

    fn add_object(&self, object: SceneObject) {
        (**self).add_object(object);
    }

    fn set_world_texture(&self, image_name: &str) {
        (**self).set_world_texture(image_name);
    }

    fn create_material(&self, name: &str, maps: &[String]) {
        (**self).create_material(name, maps);
    }

    fn material(&self, name: &str) -> Option<Material> {
        (**self).material(name)
    }

    fn assign_material(&self, object_name: &str, material: &str) -> Result<(), String> {
        (**self).assign_material(object_name, material)
    }
}

/// Base scene operations over a [`SceneHost`].
pub struct SceneCapability<H> {
    host: H,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObjectParams {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScreenshotParams {
    #[serde(default = "default_screenshot_size")]
    max_size: u32,
    #[serde(default)]
    filepath: Option<PathBuf>,
    #[serde(default = "default_screenshot_format")]
    format: String,
}

fn default_screenshot_size() -> u32 {
    DEFAULT_SCREENSHOT_SIZE
}

fn default_screenshot_format() -> String {
    "png".to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CodeParams {
    code: String,
}

impl<H: SceneHost> SceneCapability<H> {
    /// Wraps `host`.
    pub const fn new(host: H) -> Self {
        Self { host }
    }

    /// Summary of the active scene with the first objects listed.
    pub fn scene_info(&self) -> Value {
        let objects: Vec<Value> = self
            .host
            .objects()
            .into_iter()
            .take(SCENE_OBJECT_LIMIT)
            .map(|object| {
                json!({
                    "name": object.name,
                    "type": object.kind,
                    "location": object.location.map(round_centi),
                })
            })
            .collect();
        json!({
            "name": self.host.scene_name(),
            "object_count": self.host.objects().len(),
            "objects": objects,
            "materials_count": self.host.materials_count(),
        })
    }

    /// Detailed information about one object.
    ///
    /// # Errors
    ///
    /// Fails with `Object not found: <name>` for unknown objects.
    pub fn object_info(&self, name: &str) -> Result<SceneObject, HandlerError> {
        self.host
            .object(name)
            .ok_or_else(|| HandlerError::failed(format!("Object not found: {name}")))
    }

    fn viewport_screenshot(&self, params: &ScreenshotParams) -> Value {
        let Some(filepath) = params.filepath.as_deref() else {
            return json!({"error": "No filepath provided"});
        };
        match self.capture(filepath, params.max_size, &params.format) {
            Ok(Some(size)) => json!({
                "success": true,
                "width": size.width,
                "height": size.height,
                "filepath": filepath.to_string_lossy(),
            }),
            Ok(None) => json!({"error": "No 3D viewport found"}),
            Err(error) => json!({"error": error}),
        }
    }

    fn capture(
        &self,
        filepath: &Path,
        max_size: u32,
        format: &str,
    ) -> Result<Option<ImageSize>, String> {
        let Some(size) = self.host.capture_viewport(filepath)? else {
            return Ok(None);
        };
        let Some(scaled) = fit_within(size, max_size) else {
            return Ok(Some(size));
        };
        self.host
            .rescale_image(filepath, scaled, &format.to_ascii_uppercase())?;
        Ok(Some(scaled))
    }

    /// Records `code` in the audit text block and runs it.
    ///
    /// # Errors
    ///
    /// Fails with `Code execution error: <cause>` when the interpreter fails.
    pub fn execute_code(&self, code: &str) -> Result<Value, HandlerError> {
        let text_name = self.store_executed_code(code);
        let output = self
            .host
            .run_code(code)
            .map_err(|error| HandlerError::failed(format!("Code execution error: {error}")))?;
        Ok(json!({"executed": true, "result": output, "text_name": text_name}))
    }

    fn store_executed_code(&self, code: &str) -> String {
        let mut contents = self.host.text_block(CODE_TEXT_BLOCK).unwrap_or_default();
        if !contents.trim().is_empty() {
            contents.push_str(CODE_SEPARATOR);
        }
        contents.push_str(code);
        if !code.ends_with('\n') {
            contents.push('\n');
        }
        self.host.write_text_block(CODE_TEXT_BLOCK, contents);
        CODE_TEXT_BLOCK.to_owned()
    }
}

impl<H: SceneHost + 'static> Capability for SceneCapability<H> {
    fn register(self: Arc<Self>, group: &mut HandlerGroup) {
        let scene = Arc::clone(&self);
        group.add(
            "get_scene_info",
            handler_fn(move |_: NoParams| Ok(scene.scene_info())),
        );
        let scene = Arc::clone(&self);
        group.add(
            "get_object_info",
            handler_fn(move |params: ObjectParams| scene.object_info(&params.name)),
        );
        let scene = Arc::clone(&self);
        group.add(
            "get_viewport_screenshot",
            handler_fn(move |params: ScreenshotParams| Ok(scene.viewport_screenshot(&params))),
        );
        group.add(
            "execute_code",
            handler_fn(move |params: CodeParams| self.execute_code(&params.code)),
        );
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "scene summaries report locations to two decimal places"
)]
fn round_centi(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[expect(
    clippy::integer_division,
    reason = "scaled pixel sizes truncate towards zero"
)]
fn fit_within(size: ImageSize, max_size: u32) -> Option<ImageSize> {
    let longest = size.width.max(size.height);
    if longest <= max_size || longest == 0 {
        return None;
    }
    let scale = |side: u32| {
        let scaled = u64::from(side) * u64::from(max_size) / u64::from(longest);
        u32::try_from(scaled).unwrap_or(max_size)
    };
    Some(ImageSize {
        width: scale(size.width),
        height: scale(size.height),
    })
}

#[cfg(test)]
#[path = "scene_tests.rs"]
mod tests;
