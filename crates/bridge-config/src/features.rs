//! Feature flags gating optional command groups.
//!
//! Flags live behind a shared handle so the host UI (or any other thread) can
//! flip them while the command server is running. The dispatcher consults the
//! flags on every command, so enabling a feature takes effect on the next
//! command without restarting the server.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Optional integrations whose commands are only available when enabled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    EnumString,
    EnumIter,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Feature {
    /// Poly Haven asset search and download.
    Polyhaven,
    /// Hyper3D Rodin model generation jobs.
    Hyper3d,
    /// Sketchfab model search and download.
    Sketchfab,
}

impl Feature {
    /// Human-readable integration name used in status messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Polyhaven => "PolyHaven",
            Self::Hyper3d => "Hyper3D Rodin",
            Self::Sketchfab => "Sketchfab",
        }
    }

    /// Name of the always-available status command for this feature.
    #[must_use]
    pub const fn status_command(self) -> &'static str {
        match self {
            Self::Polyhaven => "get_polyhaven_status",
            Self::Hyper3d => "get_hyper3d_status",
            Self::Sketchfab => "get_sketchfab_status",
        }
    }

    /// Iterates over every known feature.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Shared, mutable feature switches.
///
/// Cloning yields another handle to the same switches.
#[derive(Clone, Default)]
pub struct FeatureFlags {
    switches: Arc<Switches>,
}

#[derive(Default)]
struct Switches {
    polyhaven: AtomicBool,
    hyper3d: AtomicBool,
    sketchfab: AtomicBool,
}

impl FeatureFlags {
    /// Creates flags with every feature disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates flags with the listed features enabled.
    #[must_use]
    pub fn with_enabled(features: impl IntoIterator<Item = Feature>) -> Self {
        let flags = Self::new();
        for feature in features {
            flags.set(feature, true);
        }
        flags
    }

    /// Reports whether `feature` is currently enabled.
    #[must_use]
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.switch(feature).load(Ordering::Acquire)
    }

    /// Enables or disables `feature`.
    pub fn set(&self, feature: Feature, enabled: bool) {
        self.switch(feature).store(enabled, Ordering::Release);
    }

    /// Returns the features enabled at the time of the call.
    #[must_use]
    pub fn enabled(&self) -> Vec<Feature> {
        Feature::all().filter(|feature| self.is_enabled(*feature)).collect()
    }

    fn switch(&self, feature: Feature) -> &AtomicBool {
        match feature {
            Feature::Polyhaven => &self.switches.polyhaven,
            Feature::Hyper3d => &self.switches.hyper3d,
            Feature::Sketchfab => &self.switches.sketchfab,
        }
    }
}

impl fmt::Debug for FeatureFlags {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FeatureFlags")
            .field("enabled", &self.enabled())
            .finish()
    }
}
