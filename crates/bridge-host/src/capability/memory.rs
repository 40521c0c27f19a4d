use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::scene::{ImageSize, Material, SceneHost, SceneObject};

/// Scene held entirely in memory.
///
/// Backs the standalone host binary and the test suites. It has no viewport
/// and no code interpreter, so screenshots report a missing viewport and code
/// execution fails after the snippet has been recorded.
#[derive(Debug)]
pub struct InMemoryScene {
    state: Mutex<SceneState>,
}

#[derive(Debug, Default)]
struct SceneState {
    name: String,
    objects: Vec<SceneObject>,
    materials: Vec<Material>,
    world_texture: Option<String>,
    texts: BTreeMap<String, String>,
}

impl Default for InMemoryScene {
    fn default() -> Self {
        Self::new("Scene")
    }
}

impl InMemoryScene {
    /// Creates an empty scene called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SceneState {
                name: name.into(),
                ..SceneState::default()
            }),
        }
    }

    /// Scene with a camera and a unit cube, like a fresh document.
    #[must_use]
    pub fn starter() -> Self {
        let scene = Self::default();
        let mut cube = SceneObject::new("Cube", "MESH", [0.0, 0.0, 0.0]);
        cube.materials.push("Material".to_owned());
        cube.world_bounding_box = Some([[-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]]);
        cube.mesh = Some(super::MeshStats {
            vertices: 8,
            edges: 12,
            polygons: 6,
        });
        scene.add_object(cube);
        scene.add_object(SceneObject::new("Camera", "CAMERA", [7.36, -6.93, 4.96]));
        scene.add_material("Material");
        scene
    }

    /// Removes an object by name, reporting whether it existed.
    pub fn remove_object(&self, name: &str) -> bool {
        let mut state = self.lock();
        let before = state.objects.len();
        state.objects.retain(|object| object.name != name);
        state.objects.len() != before
    }

    /// Adds a material without texture maps.
    pub fn add_material(&self, name: impl Into<String>) {
        self.create_material(&name.into(), &[]);
    }

    /// Image currently used as the world environment.
    #[must_use]
    pub fn world_texture(&self) -> Option<String> {
        self.lock().world_texture.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SceneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SceneHost for InMemoryScene {
    fn scene_name(&self) -> String {
        self.lock().name.clone()
    }

    fn objects(&self) -> Vec<SceneObject> {
        self.lock().objects.clone()
    }

    fn object(&self, name: &str) -> Option<SceneObject> {
        self.lock()
            .objects
            .iter()
            .find(|object| object.name == name)
            .cloned()
    }

    fn materials_count(&self) -> usize {
        self.lock().materials.len()
    }

    fn capture_viewport(&self, _filepath: &Path) -> Result<Option<ImageSize>, String> {
        Ok(None)
    }

    fn rescale_image(&self, filepath: &Path, _size: ImageSize, _format: &str) -> Result<(), String> {
        Err(format!("no image loaded from {}", filepath.display()))
    }

    fn text_block(&self, name: &str) -> Option<String> {
        self.lock().texts.get(name).cloned()
    }

    fn write_text_block(&self, name: &str, contents: String) {
        self.lock().texts.insert(name.to_owned(), contents);
    }

    fn run_code(&self, _code: &str) -> Result<String, String> {
        Err("no code interpreter is attached to this host".to_owned())
    }

    fn add_object(&self, object: SceneObject) {
        let mut state = self.lock();
        state.objects.retain(|existing| existing.name != object.name);
        state.objects.push(object);
    }

    fn set_world_texture(&self, image_name: &str) {
        self.lock().world_texture = Some(image_name.to_owned());
    }

    fn create_material(&self, name: &str, maps: &[String]) {
        let mut state = self.lock();
        state.materials.retain(|material| material.name != name);
        state.materials.push(Material {
            name: name.to_owned(),
            maps: maps.to_vec(),
        });
    }

    fn material(&self, name: &str) -> Option<Material> {
        let state = self.lock();
        state
            .materials
            .iter()
            .find(|material| material.name == name)
            .or_else(|| {
                state
                    .materials
                    .iter()
                    .find(|material| material.name.starts_with(name))
            })
            .cloned()
    }

    fn assign_material(&self, object_name: &str, material: &str) -> Result<(), String> {
        let mut state = self.lock();
        let object = state
            .objects
            .iter_mut()
            .find(|object| object.name == object_name)
            .ok_or_else(|| format!("Object '{object_name}' not found"))?;
        match object.materials.first_mut() {
            Some(slot) => material.clone_into(slot),
            None => object.materials.push(material.to_owned()),
        }
        Ok(())
    }
}
