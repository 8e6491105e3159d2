//! Serializable application state used for undo/redo.
//!
//! The undo manager never looks inside an `AppState`; it is produced by
//! `Document::snapshot()` and consumed by the document's restore listener.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Format tag written into every snapshot.
pub const APP_NAME: &str = "strata";

/// Full document state at one point in history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Media metadata (duration, title, ...) as a free-form map
    #[serde(default)]
    pub media_metadata: Map<String, Value>,
    /// Serialized timelines, in display order
    #[serde(default)]
    pub timelines: Value,
    /// Path of the loaded media
    #[serde(default)]
    pub media_path: String,
    /// Path the document was loaded from or saved to
    #[serde(default)]
    pub file_path: String,
    pub app_name: String,
    pub version: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            media_metadata: Map::new(),
            timelines: Value::Array(Vec::new()),
            media_path: String::new(),
            file_path: String::new(),
            app_name: APP_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppState {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let state: AppState = serde_json::from_str(json)?;
        if state.app_name != APP_NAME {
            anyhow::bail!("not a {} snapshot (app_name = {:?})", APP_NAME, state.app_name);
        }
        Ok(state)
    }
}
