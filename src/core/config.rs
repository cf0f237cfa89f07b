use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one rendering pipeline.
///
/// Everything has a sensible default so an empty TOML table (or
/// `PipelineConfig::default()`) yields a working pipeline; embedders
/// override individual keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Delay between typewriter characters, in milliseconds.
    #[serde(default = "default_typewriter_delay_ms")]
    pub typewriter_delay_ms: u64,
    /// Whether new sessions pace their output at all. When false, fragments
    /// are emitted as they arrive.
    #[serde(default = "default_typewriter_enabled")]
    pub typewriter_enabled: bool,
    /// Minimum interval between full-row refreshes of an off-screen message.
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: u64,
    /// Minimum interval between row-size recomputations of a visible
    /// message. Independent of the refresh interval; relayout is the more
    /// expensive of the two.
    #[serde(default = "default_min_relayout_interval_ms")]
    pub min_relayout_interval_ms: u64,
    /// Distance from the content bottom edge, in points, within which the
    /// list counts as "near bottom" for auto-scroll.
    #[serde(default = "default_near_bottom_threshold")]
    pub near_bottom_threshold: f32,
    /// Settling pause before the first scroll to a freshly inserted
    /// message, in milliseconds.
    #[serde(default = "default_first_scroll_delay_ms")]
    pub first_scroll_delay_ms: u64,
}

fn default_typewriter_delay_ms() -> u64 {
    20
}

fn default_typewriter_enabled() -> bool {
    true
}

fn default_min_refresh_interval_ms() -> u64 {
    250
}

fn default_min_relayout_interval_ms() -> u64 {
    100
}

fn default_near_bottom_threshold() -> f32 {
    120.0
}

fn default_first_scroll_delay_ms() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            typewriter_delay_ms: default_typewriter_delay_ms(),
            typewriter_enabled: default_typewriter_enabled(),
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
            min_relayout_interval_ms: default_min_relayout_interval_ms(),
            near_bottom_threshold: default_near_bottom_threshold(),
            first_scroll_delay_ms: default_first_scroll_delay_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("invalid pipeline config: {e}"))
    }

    pub fn typewriter_delay(&self) -> Duration {
        Duration::from_millis(self.typewriter_delay_ms)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    pub fn min_relayout_interval(&self) -> Duration {
        Duration::from_millis(self.min_relayout_interval_ms)
    }

    pub fn first_scroll_delay(&self) -> Duration {
        Duration::from_millis(self.first_scroll_delay_ms)
    }
}
