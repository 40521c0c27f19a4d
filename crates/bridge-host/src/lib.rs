//! Host side of the Blender MCP bridge.
//!
//! The host embeds a [`CommandServer`] that accepts TCP clients, decodes bare
//! JSON frames and defers every decoded command onto a [`MainLoop`]. The loop
//! runs on the thread that owns the host API, so handlers registered in the
//! [`HandlerRegistry`] never run on socket threads.
//!
//! Handlers are contributed by capability groups (see [`Capability`]). Groups
//! tied to an optional integration are gated by a [`bridge_config::Feature`]
//! and become visible as soon as the matching flag is switched on, without a
//! server restart.

mod bootstrap;
mod capability;
mod dispatch;
mod main_loop;
mod server;
mod shutdown;
mod transport;

use std::sync::Arc;

use bridge_config::FeatureFlags;

pub use bootstrap::{BootstrapError, Host, bootstrap_with};
pub use capability::{
    AssetCatalog, AssetDownload, AssetSummary, AssetType, CODE_SEPARATOR, CODE_TEXT_BLOCK,
    Capability, CatalogCapability, DownloadRequest, FeatureStatusCapability, GeneratedMesh,
    GenerationCapability, GenerationRequest, ImageSize, InMemoryCatalog, InMemoryJobs,
    InMemoryMarketplace, InMemoryScene, JobBackend, JobHandles, JobState, MarketplaceCapability,
    Material, MeshStats, ModelAuthor, ModelLicense, ModelListing, ModelMarketplace, ModelQuery,
    SceneCapability, SceneHost, SceneObject, SubmittedJob,
};
pub use dispatch::{
    Dispatcher, Handler, HandlerError, HandlerGroup, HandlerRegistry, HandlerTable, NoParams,
    handler_fn,
};
pub use main_loop::{MainLoop, MainLoopClosed, MainLoopHandle, POLL_INTERVAL, Work};
pub use server::{CommandServer, STOP_JOIN_BUDGET, ServerError};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use transport::ListenerError;

/// Backends behind the optional integrations.
#[derive(Debug)]
pub struct Integrations<C, J, M> {
    /// Poly Haven catalogue.
    pub catalog: C,
    /// Hyper3D job service.
    pub jobs: J,
    /// Sketchfab marketplace.
    pub marketplace: M,
}

impl Integrations<InMemoryCatalog, InMemoryJobs, InMemoryMarketplace> {
    /// Empty in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            catalog: InMemoryCatalog::new(),
            jobs: InMemoryJobs::new(),
            marketplace: InMemoryMarketplace::new(),
        }
    }
}

impl<C, J, M> Integrations<C, J, M> {
    /// Swaps in another catalogue.
    #[must_use]
    pub fn with_catalog<D>(self, catalog: D) -> Integrations<D, J, M> {
        Integrations {
            catalog,
            jobs: self.jobs,
            marketplace: self.marketplace,
        }
    }

    /// Swaps in another marketplace.
    #[must_use]
    pub fn with_marketplace<N>(self, marketplace: N) -> Integrations<C, J, N> {
        Integrations {
            catalog: self.catalog,
            jobs: self.jobs,
            marketplace,
        }
    }
}

/// Builds a registry holding the status queries, the scene group and one
/// gated group per integration, all sharing `scene`.
#[must_use]
pub fn standard_registry<H, C, J, M>(
    scene: H,
    integrations: Integrations<C, J, M>,
    flags: &FeatureFlags,
) -> HandlerRegistry
where
    H: SceneHost + 'static,
    C: AssetCatalog + 'static,
    J: JobBackend + 'static,
    M: ModelMarketplace + 'static,
{
    let scene = Arc::new(scene);
    let mut registry = HandlerRegistry::new();
    for status in FeatureStatusCapability::for_all(flags) {
        registry.install(status);
    }
    registry.install(Arc::new(SceneCapability::new(Arc::clone(&scene))));
    registry.install(Arc::new(CatalogCapability::new(
        integrations.catalog,
        Arc::clone(&scene),
    )));
    registry.install(Arc::new(GenerationCapability::new(
        integrations.jobs,
        Arc::clone(&scene),
    )));
    registry.install(Arc::new(MarketplaceCapability::new(
        integrations.marketplace,
        scene,
    )));
    registry
}

#[cfg(test)]
mod tests {
    use bridge_config::Feature;

    use super::*;

    #[test]
    fn standard_registry_gates_integration_commands() {
        let flags = FeatureFlags::new();
        let registry = standard_registry(InMemoryScene::starter(), Integrations::in_memory(), &flags);

        let names = |flags: &FeatureFlags| -> Vec<String> {
            registry
                .table(flags)
                .names()
                .into_iter()
                .map(str::to_owned)
                .collect()
        };
        let disabled = names(&flags);
        assert!(disabled.contains(&"get_scene_info".to_owned()));
        assert!(disabled.contains(&"get_hyper3d_status".to_owned()));
        assert!(!disabled.contains(&"search_polyhaven_assets".to_owned()));
        assert!(!disabled.contains(&"create_rodin_job".to_owned()));
        assert!(!disabled.contains(&"search_sketchfab_models".to_owned()));

        flags.set(Feature::Polyhaven, true);
        let enabled = names(&flags);
        assert!(enabled.contains(&"search_polyhaven_assets".to_owned()));
        assert!(enabled.contains(&"get_polyhaven_categories".to_owned()));
        assert!(enabled.contains(&"download_polyhaven_asset".to_owned()));
        assert!(enabled.contains(&"set_texture".to_owned()));
        assert!(!enabled.contains(&"poll_rodin_job_status".to_owned()));

        flags.set(Feature::Hyper3d, true);
        flags.set(Feature::Sketchfab, true);
        let everything = names(&flags);
        for command in [
            "create_rodin_job",
            "poll_rodin_job_status",
            "import_generated_asset",
            "search_sketchfab_models",
            "download_sketchfab_model",
        ] {
            assert!(everything.contains(&command.to_owned()), "{command}");
        }
    }
}
