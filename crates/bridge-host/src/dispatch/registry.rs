use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bridge_config::{Feature, FeatureFlags};

use super::handler::Handler;
use crate::capability::Capability;

/// Every handler the host knows about, grouped by the feature gating it.
#[derive(Default)]
pub struct HandlerRegistry {
    base: BTreeMap<String, Handler>,
    gated: BTreeMap<Feature, BTreeMap<String, Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an always-available handler, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) {
        self.base.insert(name.into(), handler);
    }

    /// Registers a handler that is only available while `feature` is enabled.
    pub fn register_gated(&mut self, feature: Feature, name: impl Into<String>, handler: Handler) {
        self.gated
            .entry(feature)
            .or_default()
            .insert(name.into(), handler);
    }

    /// Collects `capability`'s handlers and files them under its feature.
    ///
    /// Capabilities without a feature become always available.
    pub fn install<C>(&mut self, capability: Arc<C>)
    where
        C: Capability + 'static,
    {
        let feature = capability.feature();
        let mut group = HandlerGroup::default();
        capability.register(&mut group);
        for (name, handler) in group.handlers {
            match feature {
                Some(feature) => self.register_gated(feature, name, handler),
                None => self.register(name, handler),
            }
        }
    }

    /// Builds the table of handlers visible under the current `flags`.
    ///
    /// Gated handlers shadow base handlers of the same name.
    #[must_use]
    pub fn table(&self, flags: &FeatureFlags) -> HandlerTable<'_> {
        let mut entries: HashMap<&str, &Handler> = self
            .base
            .iter()
            .map(|(name, handler)| (name.as_str(), handler))
            .collect();
        for (feature, handlers) in &self.gated {
            if flags.is_enabled(*feature) {
                entries.extend(
                    handlers
                        .iter()
                        .map(|(name, handler)| (name.as_str(), handler)),
                );
            }
        }
        HandlerTable { entries }
    }
}

/// Handlers contributed by one capability before gating is applied.
#[derive(Default)]
pub struct HandlerGroup {
    handlers: BTreeMap<String, Handler>,
}

impl HandlerGroup {
    /// Adds a handler, replacing any previous one of the same name.
    pub fn add(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }
}

/// Snapshot of the handlers available for one dispatch.
pub struct HandlerTable<'a> {
    entries: HashMap<&'a str, &'a Handler>,
}

impl HandlerTable<'_> {
    /// Looks up the handler for `command_type`.
    #[must_use]
    pub fn get(&self, command_type: &str) -> Option<&Handler> {
        self.entries.get(command_type).copied()
    }

    /// Sorted list of the available command types.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::dispatch::{NoParams, handler_fn};

    #[fixture]
    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("get_scene_info", handler_fn(|_: NoParams| Ok(json!("scene"))));
        registry.register_gated(
            Feature::Polyhaven,
            "search_polyhaven_assets",
            handler_fn(|_: NoParams| Ok(json!("assets"))),
        );
        registry
    }

    #[rstest]
    fn disabled_features_hide_handlers(registry: HandlerRegistry) {
        let table = registry.table(&FeatureFlags::new());
        assert_eq!(table.names(), vec!["get_scene_info"]);
        assert!(table.get("search_polyhaven_assets").is_none());
    }

    #[rstest]
    fn enabled_features_expose_handlers(registry: HandlerRegistry) {
        let flags = FeatureFlags::with_enabled([Feature::Polyhaven]);
        let table = registry.table(&flags);
        assert_eq!(
            table.names(),
            vec!["get_scene_info", "search_polyhaven_assets"]
        );
    }

    struct Toggle(Option<Feature>);

    impl Capability for Toggle {
        fn feature(&self) -> Option<Feature> {
            self.0
        }

        fn register(self: Arc<Self>, group: &mut HandlerGroup) {
            group.add("toggle", handler_fn(|_: NoParams| Ok(json!("toggled"))));
        }
    }

    #[rstest]
    #[case::ungated(None, true)]
    #[case::gated(Some(Feature::Sketchfab), false)]
    fn install_gates_by_capability_feature(
        #[case] feature: Option<Feature>,
        #[case] visible_when_disabled: bool,
    ) {
        let mut registry = HandlerRegistry::new();
        registry.install(Arc::new(Toggle(feature)));

        let flags = FeatureFlags::new();
        assert_eq!(registry.table(&flags).get("toggle").is_some(), visible_when_disabled);
        flags.set(Feature::Sketchfab, true);
        assert!(registry.table(&flags).get("toggle").is_some());
    }

    #[rstest]
    fn table_reflects_flag_changes(registry: HandlerRegistry) {
        let flags = FeatureFlags::new();
        assert!(registry.table(&flags).get("search_polyhaven_assets").is_none());
        flags.set(Feature::Polyhaven, true);
        assert!(registry.table(&flags).get("search_polyhaven_assets").is_some());
    }
}
