//! Sketchfab model search and import, gated by [`Feature::Sketchfab`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use bridge_config::Feature;

use super::Capability;
use super::scene::{SceneHost, SceneObject};
use crate::dispatch::{HandlerError, HandlerGroup, handler_fn};

const DEFAULT_SEARCH_COUNT: usize = 20;

/// Author of a listed model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAuthor {
    /// Account name.
    pub username: String,
}

/// Licence a listed model is published under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLicense {
    /// Display label, for example `CC Attribution`.
    pub label: String,
}

/// One search hit, in the marketplace's own field naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListing {
    /// Marketplace id.
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Publishing account.
    pub user: ModelAuthor,
    /// Publishing licence.
    pub license: ModelLicense,
    /// Triangle count.
    pub face_count: u64,
    /// Whether the model can be downloaded.
    pub is_downloadable: bool,
    /// Category slugs.
    pub categories: Vec<String>,
}

/// Search filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelQuery {
    /// Free text matched against model names.
    pub text: String,
    /// Category slugs; any match suffices.
    pub categories: Vec<String>,
    /// Maximum number of hits.
    pub count: usize,
    /// Only return downloadable models.
    pub downloadable: bool,
}

/// Source of downloadable 3D models.
pub trait ModelMarketplace: Send + Sync {
    /// Models matching `query`.
    ///
    /// # Errors
    ///
    /// Returns a description of the search failure.
    fn search(&self, query: &ModelQuery) -> Result<Vec<ModelListing>, String>;

    /// Downloads model `uid` and returns the objects its file contains.
    ///
    /// # Errors
    ///
    /// Returns a description of the download failure.
    fn download(&self, uid: &str) -> Result<Vec<SceneObject>, String>;
}

/// Marketplace held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMarketplace {
    models: BTreeMap<String, (ModelListing, Vec<SceneObject>)>,
}

impl InMemoryMarketplace {
    /// Creates an empty marketplace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists `listing`, whose download yields `objects`.
    #[must_use]
    pub fn with_model(mut self, listing: ModelListing, objects: Vec<SceneObject>) -> Self {
        self.models.insert(listing.uid.clone(), (listing, objects));
        self
    }
}

impl ModelMarketplace for InMemoryMarketplace {
    fn search(&self, query: &ModelQuery) -> Result<Vec<ModelListing>, String> {
        let text = query.text.to_lowercase();
        Ok(self
            .models
            .values()
            .map(|(listing, _)| listing)
            .filter(|listing| listing.name.to_lowercase().contains(&text))
            .filter(|listing| !query.downloadable || listing.is_downloadable)
            .filter(|listing| {
                query.categories.is_empty()
                    || listing
                        .categories
                        .iter()
                        .any(|category| query.categories.contains(category))
            })
            .take(query.count)
            .cloned()
            .collect())
    }

    fn download(&self, uid: &str) -> Result<Vec<SceneObject>, String> {
        let (listing, objects) = self
            .models
            .get(uid)
            .ok_or_else(|| "Download request failed with status code 404".to_owned())?;
        if !listing.is_downloadable {
            return Err("No gltf download URL available for this model".to_owned());
        }
        Ok(objects.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchParams {
    query: String,
    #[serde(default)]
    categories: Option<String>,
    #[serde(default = "default_count")]
    count: usize,
    #[serde(default = "default_downloadable")]
    downloadable: bool,
}

const fn default_count() -> usize {
    DEFAULT_SEARCH_COUNT
}

const fn default_downloadable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DownloadParams {
    uid: String,
}

/// Sketchfab handlers over a [`ModelMarketplace`].
pub struct MarketplaceCapability<M, H> {
    marketplace: M,
    scene: H,
}

impl<M: ModelMarketplace, H: SceneHost> MarketplaceCapability<M, H> {
    /// Wraps `marketplace`, importing downloads into `scene`.
    pub const fn new(marketplace: M, scene: H) -> Self {
        Self { marketplace, scene }
    }

    fn search(&self, params: SearchParams) -> Value {
        let query = ModelQuery {
            text: params.query,
            categories: params
                .categories
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|category| !category.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            count: params.count,
            downloadable: params.downloadable,
        };
        match self.marketplace.search(&query) {
            Ok(results) => json!({"results": results}),
            Err(error) => json!({"error": error}),
        }
    }

    fn download(&self, uid: &str) -> Value {
        match self.marketplace.download(uid) {
            Ok(objects) => {
                let imported: Vec<String> = objects.iter().map(|object| object.name.clone()).collect();
                for object in objects {
                    self.scene.add_object(object);
                }
                json!({
                    "success": true,
                    "message": "Model imported successfully",
                    "imported_objects": imported,
                })
            }
            Err(error) => json!({"error": error}),
        }
    }
}

impl<M, H> Capability for MarketplaceCapability<M, H>
where
    M: ModelMarketplace + 'static,
    H: SceneHost + 'static,
{
    fn feature(&self) -> Option<Feature> {
        Some(Feature::Sketchfab)
    }

    fn register(self: Arc<Self>, group: &mut HandlerGroup) {
        let marketplace = Arc::clone(&self);
        group.add(
            "search_sketchfab_models",
            handler_fn(move |params: SearchParams| {
                Ok::<_, HandlerError>(marketplace.search(params))
            }),
        );
        group.add(
            "download_sketchfab_model",
            handler_fn(move |params: DownloadParams| {
                Ok::<_, HandlerError>(self.download(&params.uid))
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use bridge_config::FeatureFlags;
    use bridge_protocol::{Command, Envelope};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::capability::InMemoryScene;
    use crate::dispatch::{Dispatcher, HandlerRegistry};

    fn listing(uid: &str, name: &str, downloadable: bool, categories: &[&str]) -> ModelListing {
        ModelListing {
            uid: uid.to_owned(),
            name: name.to_owned(),
            user: ModelAuthor {
                username: "modeller".to_owned(),
            },
            license: ModelLicense {
                label: "CC Attribution".to_owned(),
            },
            face_count: 1200,
            is_downloadable: downloadable,
            categories: categories.iter().map(|value| (*value).to_owned()).collect(),
        }
    }

    #[fixture]
    fn marketplace() -> InMemoryMarketplace {
        InMemoryMarketplace::new()
            .with_model(
                listing("a1", "Oak Chair", true, &["furniture-home"]),
                vec![SceneObject::new("Oak Chair", "MESH", [0.0; 3])],
            )
            .with_model(listing("b2", "Chair Prototype", false, &["furniture-home"]), vec![])
            .with_model(listing("c3", "Street Lamp", true, &["architecture"]), vec![])
    }

    fn call(dispatcher: &Dispatcher, command_type: &str, params: Value) -> Value {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        match dispatcher.dispatch(&Command::new(command_type, params)) {
            Envelope::Success { result } => result,
            Envelope::Error { message } => panic!("expected success, got error: {message}"),
        }
    }

    fn dispatcher(marketplace: InMemoryMarketplace, scene: Arc<InMemoryScene>) -> Dispatcher {
        let mut registry = HandlerRegistry::new();
        registry.install(Arc::new(MarketplaceCapability::new(marketplace, scene)));
        Dispatcher::new(registry, FeatureFlags::with_enabled([Feature::Sketchfab]))
    }

    #[rstest]
    fn search_defaults_to_downloadable_models(marketplace: InMemoryMarketplace) {
        let dispatcher = dispatcher(marketplace, Arc::new(InMemoryScene::starter()));
        let result = call(&dispatcher, "search_sketchfab_models", json!({"query": "chair"}));
        let results = result["results"].as_array().expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["uid"], json!("a1"));
        assert_eq!(results[0]["isDownloadable"], json!(true));
        assert_eq!(results[0]["user"]["username"], json!("modeller"));
    }

    #[rstest]
    #[case::everything(json!({"query": "chair", "downloadable": false}), 2)]
    #[case::category(json!({"query": "", "categories": "architecture"}), 1)]
    #[case::count(json!({"query": "", "count": 1, "downloadable": false}), 1)]
    fn search_applies_filters(
        marketplace: InMemoryMarketplace,
        #[case] params: Value,
        #[case] expected: usize,
    ) {
        let dispatcher = dispatcher(marketplace, Arc::new(InMemoryScene::starter()));
        let result = call(&dispatcher, "search_sketchfab_models", params);
        assert_eq!(result["results"].as_array().map(Vec::len), Some(expected));
    }

    #[rstest]
    fn download_links_model_objects(marketplace: InMemoryMarketplace) {
        let scene = Arc::new(InMemoryScene::starter());
        let dispatcher = dispatcher(marketplace, Arc::clone(&scene));
        let result = call(&dispatcher, "download_sketchfab_model", json!({"uid": "a1"}));
        assert_eq!(result["imported_objects"], json!(["Oak Chair"]));
        assert!(scene.object("Oak Chair").is_some());
    }

    #[rstest]
    #[case::unknown("zz", "Download request failed with status code 404")]
    #[case::locked("b2", "No gltf download URL available for this model")]
    fn download_failures_are_reported(
        marketplace: InMemoryMarketplace,
        #[case] uid: &str,
        #[case] expected: &str,
    ) {
        let dispatcher = dispatcher(marketplace, Arc::new(InMemoryScene::starter()));
        let result = call(&dispatcher, "download_sketchfab_model", json!({"uid": uid}));
        assert_eq!(result, json!({"error": expected}));
    }
}
