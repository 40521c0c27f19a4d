//! Poly Haven asset browsing and import, gated by [`Feature::Polyhaven`].
//!
//! Downloads are resolved by the [`AssetCatalog`] and applied to the scene:
//! HDRIs become the world environment, texture sets become materials and
//! models are linked into the scene.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};

use bridge_config::Feature;

use super::Capability;
use super::scene::{SceneHost, SceneObject};
use crate::dispatch::{HandlerError, HandlerGroup, handler_fn};

const SEARCH_RESULT_LIMIT: usize = 20;
const IN_MEMORY_RESOLUTIONS: [&str; 3] = ["1k", "2k", "4k"];
const MATERIAL_CAPABLE_KINDS: [&str; 5] = ["MESH", "CURVE", "SURFACE", "META", "FONT"];

/// Asset families offered by the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AssetType {
    /// High dynamic range environment maps.
    Hdris,
    /// Material texture sets.
    Textures,
    /// Geometry.
    Models,
    /// Every family.
    All,
}

/// One catalogue entry as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    /// Display name.
    pub name: String,
    /// Numeric family: 0 HDRI, 1 texture, 2 model.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Category tags.
    pub categories: Vec<String>,
    /// Lifetime download count.
    pub download_count: u64,
}

impl AssetType {
    fn default_file_format(self) -> &'static str {
        match self {
            Self::Hdris => "hdr",
            Self::Textures => "jpg",
            Self::Models | Self::All => "gltf",
        }
    }

    fn file_formats(self) -> &'static [&'static str] {
        match self {
            Self::Hdris => &["hdr", "exr"],
            Self::Textures => &["jpg", "png", "exr"],
            Self::Models => &["gltf", "glb", "fbx", "obj", "blend"],
            Self::All => &[],
        }
    }

    fn unavailable(self) -> &'static str {
        match self {
            Self::Hdris => "Requested resolution or format not available for this HDRI",
            Self::Textures => "No texture maps found for the requested resolution and format",
            Self::Models | Self::All => "Requested format or resolution not available for this model",
        }
    }
}

impl AssetSummary {
    fn matches(&self, asset_type: AssetType) -> bool {
        match asset_type {
            AssetType::All => true,
            AssetType::Hdris => self.kind == 0,
            AssetType::Textures => self.kind == 1,
            AssetType::Models => self.kind == 2,
        }
    }
}

/// One asset file selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRequest<'a> {
    /// Catalogue id of the asset.
    pub asset_id: &'a str,
    /// Family the asset is expected to belong to.
    pub asset_type: AssetType,
    /// Resolution label such as `1k` or `4k`.
    pub resolution: &'a str,
    /// File format such as `hdr` or `gltf`.
    pub file_format: &'a str,
}

/// Files fetched for a download, ready to be applied to the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetDownload {
    /// Environment map stored as `image_name`.
    Hdri {
        /// Name of the loaded image.
        image_name: String,
    },
    /// Texture set with one image per map kind.
    Texture {
        /// Map kinds, for example `Diffuse` or `nor_gl`.
        maps: Vec<String>,
    },
    /// Model geometry.
    Model {
        /// Objects created by importing the model file.
        objects: Vec<SceneObject>,
    },
}

/// Source of Poly Haven asset metadata and files.
pub trait AssetCatalog: Send + Sync {
    /// Category names with asset counts for `asset_type`.
    ///
    /// # Errors
    ///
    /// Returns a description of the lookup failure.
    fn categories(&self, asset_type: AssetType) -> Result<BTreeMap<String, u64>, String>;

    /// Assets of `asset_type`, keyed by id, filtered to any of `categories`.
    ///
    /// # Errors
    ///
    /// Returns a description of the lookup failure.
    fn assets(
        &self,
        asset_type: AssetType,
        categories: &[String],
    ) -> Result<BTreeMap<String, AssetSummary>, String>;

    /// Fetches the files selected by `request`.
    ///
    /// # Errors
    ///
    /// Returns a description of the missing asset, resolution or format.
    fn download(&self, request: &DownloadRequest<'_>) -> Result<AssetDownload, String>;
}

/// Catalogue held in memory.
///
/// Every asset is offered at `1k`, `2k` and `4k` in the usual formats of its
/// family. Texture sets carry diffuse, normal and roughness maps.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    assets: BTreeMap<String, AssetSummary>,
}

impl InMemoryCatalog {
    /// Creates an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an asset under `id`.
    #[must_use]
    pub fn with_asset(mut self, id: impl Into<String>, asset: AssetSummary) -> Self {
        self.assets.insert(id.into(), asset);
        self
    }
}

impl AssetCatalog for InMemoryCatalog {
    fn categories(&self, asset_type: AssetType) -> Result<BTreeMap<String, u64>, String> {
        let mut counts = BTreeMap::new();
        for asset in self.assets.values().filter(|asset| asset.matches(asset_type)) {
            for category in &asset.categories {
                *counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    fn assets(
        &self,
        asset_type: AssetType,
        categories: &[String],
    ) -> Result<BTreeMap<String, AssetSummary>, String> {
        Ok(self
            .assets
            .iter()
            .filter(|(_, asset)| asset.matches(asset_type))
            .filter(|(_, asset)| {
                categories.is_empty()
                    || asset
                        .categories
                        .iter()
                        .any(|category| categories.contains(category))
            })
            .map(|(id, asset)| (id.clone(), asset.clone()))
            .collect())
    }

    fn download(&self, request: &DownloadRequest<'_>) -> Result<AssetDownload, String> {
        let asset = self
            .assets
            .get(request.asset_id)
            .ok_or_else(|| "Failed to get asset files: 404".to_owned())?;
        let available = asset.matches(request.asset_type)
            && IN_MEMORY_RESOLUTIONS.contains(&request.resolution)
            && request
                .asset_type
                .file_formats()
                .contains(&request.file_format);
        if !available {
            return Err(request.asset_type.unavailable().to_owned());
        }
        Ok(match request.asset_type {
            AssetType::Hdris => AssetDownload::Hdri {
                image_name: format!(
                    "{}_{}.{}",
                    request.asset_id, request.resolution, request.file_format
                ),
            },
            AssetType::Textures => AssetDownload::Texture {
                maps: ["Diffuse", "nor_gl", "Rough"].map(str::to_owned).to_vec(),
            },
            AssetType::Models | AssetType::All => AssetDownload::Model {
                objects: vec![SceneObject::new(request.asset_id, "MESH", [0.0; 3])],
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategoriesParams {
    #[serde(default = "default_categories_type")]
    asset_type: String,
}

fn default_categories_type() -> String {
    AssetType::Hdris.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchParams {
    #[serde(default)]
    asset_type: Option<String>,
    #[serde(default)]
    categories: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DownloadParams {
    asset_id: String,
    asset_type: String,
    #[serde(default = "default_resolution")]
    resolution: String,
    #[serde(default)]
    file_format: Option<String>,
}

fn default_resolution() -> String {
    "1k".to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextureParams {
    object_name: String,
    texture_id: String,
}

/// Poly Haven handlers over an [`AssetCatalog`] and the scene it imports into.
pub struct CatalogCapability<C, H> {
    catalog: C,
    scene: H,
}

impl<C: AssetCatalog, H: SceneHost> CatalogCapability<C, H> {
    /// Wraps `catalog`, importing downloads into `scene`.
    pub const fn new(catalog: C, scene: H) -> Self {
        Self { catalog, scene }
    }

    fn categories(&self, params: &CategoriesParams) -> Value {
        let Some(asset_type) = parse_asset_type(&params.asset_type) else {
            return invalid_asset_type(&params.asset_type);
        };
        match self.catalog.categories(asset_type) {
            Ok(categories) => json!({"categories": categories}),
            Err(error) => json!({"error": error}),
        }
    }

    fn search(&self, params: &SearchParams) -> Value {
        let asset_type = match params.asset_type.as_deref() {
            None | Some("all") => AssetType::All,
            Some(raw) => match parse_asset_type(raw) {
                Some(asset_type) => asset_type,
                None => return invalid_asset_type(raw),
            },
        };
        let categories: Vec<String> = params
            .categories
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|category| !category.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        match self.catalog.assets(asset_type, &categories) {
            Ok(assets) => {
                let total_count = assets.len();
                let mut ranked: Vec<(String, AssetSummary)> = assets.into_iter().collect();
                ranked.sort_by_key(|(_, asset)| std::cmp::Reverse(asset.download_count));
                let limited: Map<String, Value> = ranked
                    .into_iter()
                    .take(SEARCH_RESULT_LIMIT)
                    .filter_map(|(id, asset)| {
                        serde_json::to_value(asset).ok().map(|value| (id, value))
                    })
                    .collect();
                json!({
                    "returned_count": limited.len(),
                    "assets": limited,
                    "total_count": total_count,
                })
            }
            Err(error) => json!({"error": error}),
        }
    }

    fn download(&self, params: &DownloadParams) -> Value {
        let asset_type = match parse_asset_type(&params.asset_type) {
            Some(AssetType::All) | None => {
                return json!({"error": format!("Unsupported asset type: {}", params.asset_type)});
            }
            Some(asset_type) => asset_type,
        };
        let request = DownloadRequest {
            asset_id: &params.asset_id,
            asset_type,
            resolution: &params.resolution,
            file_format: params
                .file_format
                .as_deref()
                .unwrap_or_else(|| asset_type.default_file_format()),
        };
        let download = match self.catalog.download(&request) {
            Ok(download) => download,
            Err(error) => return json!({"error": error}),
        };
        let asset_id = &params.asset_id;
        match download {
            AssetDownload::Hdri { image_name } => {
                self.scene.set_world_texture(&image_name);
                json!({
                    "success": true,
                    "message": format!("HDRI {asset_id} imported successfully"),
                    "image_name": image_name,
                })
            }
            AssetDownload::Texture { maps } => {
                self.scene.create_material(asset_id, &maps);
                json!({
                    "success": true,
                    "message": format!("Texture {asset_id} imported as material"),
                    "material": asset_id,
                    "maps": maps,
                })
            }
            AssetDownload::Model { objects } => {
                let imported: Vec<String> = objects.iter().map(|object| object.name.clone()).collect();
                for object in objects {
                    self.scene.add_object(object);
                }
                json!({
                    "success": true,
                    "message": format!("Model {asset_id} imported successfully"),
                    "imported_objects": imported,
                })
            }
        }
    }

    fn set_texture(&self, params: &TextureParams) -> Value {
        let TextureParams {
            object_name,
            texture_id,
        } = params;
        let Some(object) = self.scene.object(object_name) else {
            return json!({"error": format!("Object '{object_name}' not found")});
        };
        let Some(material) = self.scene.material(texture_id) else {
            return json!({
                "error": format!(
                    "Material '{texture_id}' not found. Download the texture first \
                     or verify the material name in Blender."
                )
            });
        };
        if !MATERIAL_CAPABLE_KINDS.contains(&object.kind.as_str()) {
            return json!({"error": format!("Object '{object_name}' does not support materials")});
        }
        if let Err(error) = self.scene.assign_material(object_name, &material.name) {
            return json!({"error": error});
        }

        let mut maps = material.maps.clone();
        maps.sort_unstable();
        let texture_nodes: Vec<Value> = material
            .maps
            .iter()
            .map(|map| json!({"name": map, "image": format!("{}_{map}", material.name)}))
            .collect();
        json!({
            "success": true,
            "message": format!("Applied texture '{texture_id}' to {object_name}"),
            "material": material.name,
            "maps": maps,
            "material_info": {
                "has_nodes": !texture_nodes.is_empty(),
                "node_count": texture_nodes.len(),
                "texture_nodes": texture_nodes,
            },
        })
    }
}

fn parse_asset_type(raw: &str) -> Option<AssetType> {
    raw.parse().ok()
}

fn invalid_asset_type(raw: &str) -> Value {
    json!({
        "error": format!(
            "Invalid asset type: {raw}. Must be one of: hdris, textures, models, all"
        )
    })
}

impl<C, H> Capability for CatalogCapability<C, H>
where
    C: AssetCatalog + 'static,
    H: SceneHost + 'static,
{
    fn feature(&self) -> Option<Feature> {
        Some(Feature::Polyhaven)
    }

    fn register(self: Arc<Self>, group: &mut HandlerGroup) {
        let catalog = Arc::clone(&self);
        group.add(
            "get_polyhaven_categories",
            handler_fn(move |params: CategoriesParams| {
                Ok::<_, HandlerError>(catalog.categories(&params))
            }),
        );
        let catalog = Arc::clone(&self);
        group.add(
            "search_polyhaven_assets",
            handler_fn(move |params: SearchParams| Ok::<_, HandlerError>(catalog.search(&params))),
        );
        let catalog = Arc::clone(&self);
        group.add(
            "download_polyhaven_asset",
            handler_fn(move |params: DownloadParams| {
                Ok::<_, HandlerError>(catalog.download(&params))
            }),
        );
        group.add(
            "set_texture",
            handler_fn(move |params: TextureParams| Ok::<_, HandlerError>(self.set_texture(&params))),
        );
    }
}
