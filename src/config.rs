//! Editor settings and layout constants.
//!
//! Settings are plain data handed to every timeline the document creates;
//! hosts load them from their own config file with [`EditorSettings::from_json`].

use serde::{Deserialize, Serialize};

/// Height of a freshly created timeline, in pixels.
pub const DEFAULT_TIMELINE_HEIGHT: u32 = 40;
/// Vertical space a hierarchy timeline needs per level.
pub const LEVEL_HEIGHT: u32 = 25;
/// Space above the top level of a hierarchy timeline.
pub const HEIGHT_PADDING: u32 = 10;
/// Highest level a hierarchy can be placed at.
pub const MAX_LEVEL: u32 = 1000;
/// Beats per measure when a beat timeline is created without a pattern (4/4).
pub const DEFAULT_BEAT_PATTERN: &[u32] = &[4];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub default_height: u32,
    pub level_height: u32,
    pub height_padding: u32,
    /// Grow hierarchy timelines when a level is added above the visible ones
    pub auto_fit_height: bool,
    pub default_beat_pattern: Vec<u32>,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            default_height: DEFAULT_TIMELINE_HEIGHT,
            level_height: LEVEL_HEIGHT,
            height_padding: HEIGHT_PADDING,
            auto_fit_height: true,
            default_beat_pattern: DEFAULT_BEAT_PATTERN.to_vec(),
        }
    }
}

impl EditorSettings {
    /// Parse settings; missing fields take their defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Height needed to show `max_level` levels.
    pub fn height_for_levels(&self, max_level: u32) -> u32 {
        max_level
            .saturating_mul(self.level_height)
            .saturating_add(self.height_padding)
    }
}
