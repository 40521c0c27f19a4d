//! Capability groups that contribute handlers to the dispatcher.
//!
//! Each group adds its operations to a [`HandlerGroup`]. The
//! [`HandlerRegistry`](crate::dispatch::HandlerRegistry) files the group as
//! gated when the capability names a [`Feature`], and as always available
//! otherwise.

mod catalog;
mod generation;
mod marketplace;
mod memory;
mod scene;
mod status;

use std::sync::Arc;

use bridge_config::Feature;

use crate::dispatch::HandlerGroup;

pub use self::catalog::{
    AssetCatalog, AssetDownload, AssetSummary, AssetType, CatalogCapability, DownloadRequest,
    InMemoryCatalog,
};
pub use self::generation::{
    GeneratedMesh, GenerationCapability, GenerationRequest, InMemoryJobs, JobBackend, JobHandles,
    JobState, SubmittedJob,
};
pub use self::marketplace::{
    InMemoryMarketplace, MarketplaceCapability, ModelAuthor, ModelLicense, ModelListing,
    ModelMarketplace, ModelQuery,
};
pub use self::memory::InMemoryScene;
pub use self::scene::{
    CODE_SEPARATOR, CODE_TEXT_BLOCK, ImageSize, Material, MeshStats, SceneCapability, SceneHost,
    SceneObject,
};
pub use self::status::FeatureStatusCapability;

/// A group of related command handlers.
pub trait Capability: Send + Sync {
    /// Feature gating this group, or `None` when always available.
    fn feature(&self) -> Option<Feature> {
        None
    }

    /// Adds this group's handlers to `group`.
    fn register(self: Arc<Self>, group: &mut HandlerGroup);
}
