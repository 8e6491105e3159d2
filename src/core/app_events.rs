//! Application-level bus tokens: state restore and host queries.

use super::event_bus::{Post, Query};
use super::snapshot::AppState;

// === Undo / Redo ===

/// Posted by the undo manager: replace the whole document with this state.
#[derive(Clone, Debug)]
pub struct RestoreAppState(pub AppState);
impl Post for RestoreAppState {}

/// Posted by the document once a restore has been applied.
#[derive(Clone, Debug)]
pub struct AppStateRestored;
impl Post for AppStateRestored {}

// === Host queries ===

/// Duration of the loaded media, in seconds. Served by the playback backend.
#[derive(Clone, Debug)]
pub struct MediaDuration;
impl Query for MediaDuration {
    type Reply = f64;
}

/// Yes/no confirmation from the user. Served by the UI layer.
#[derive(Clone, Debug)]
pub struct AskYesOrNo {
    pub title: String,
    pub prompt: String,
}
impl Query for AskYesOrNo {
    type Reply = bool;
}
