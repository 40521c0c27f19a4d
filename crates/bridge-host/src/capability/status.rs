use std::sync::Arc;

use serde_json::{Value, json};

use bridge_config::{Feature, FeatureFlags};

use super::Capability;
use crate::dispatch::{HandlerGroup, NoParams, handler_fn};

/// Always-available `get_<feature>_status` query for one integration.
#[derive(Debug, Clone)]
pub struct FeatureStatusCapability {
    feature: Feature,
    flags: FeatureFlags,
}

impl FeatureStatusCapability {
    /// Creates the status query for `feature`, reading `flags` on each call.
    #[must_use]
    pub const fn new(feature: Feature, flags: FeatureFlags) -> Self {
        Self { feature, flags }
    }

    /// One status capability per known feature.
    pub fn for_all(flags: &FeatureFlags) -> impl Iterator<Item = Arc<Self>> + '_ {
        Feature::all().map(move |feature| Arc::new(Self::new(feature, flags.clone())))
    }

    /// Integration this query reports on.
    #[must_use]
    pub const fn integration(&self) -> Feature {
        self.feature
    }

    /// Reports `{enabled, message}` for the integration.
    #[must_use]
    pub fn status(&self) -> Value {
        let label = self.feature.label();
        if self.flags.is_enabled(self.feature) {
            return json!({
                "enabled": true,
                "message": format!("{label} integration is enabled and ready to use."),
            });
        }
        json!({
            "enabled": false,
            "message": format!(
                "{label} integration is currently disabled. To enable it:\n\
                 1. In the 3D Viewport, find the BlenderMCP panel in the sidebar (press N if hidden)\n\
                 2. Check the '{}' checkbox\n\
                 3. Restart the connection to Claude",
                checkbox_label(self.feature)
            ),
        })
    }

}

impl Capability for FeatureStatusCapability {
    fn register(self: Arc<Self>, group: &mut HandlerGroup) {
        let name = self.feature.status_command();
        group.add(name, handler_fn(move |_: NoParams| Ok(self.status())));
    }
}

const fn checkbox_label(feature: Feature) -> &'static str {
    match feature {
        Feature::Polyhaven => "Use assets from Poly Haven",
        Feature::Hyper3d => "Use Hyper3D Rodin 3D model generation",
        Feature::Sketchfab => "Use assets from Sketchfab",
    }
}
