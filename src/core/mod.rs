//! Core engine modules - bus, undo history, snapshots
//!
//! These modules know nothing about timelines; the entity layer and the
//! document build on top of them.

pub mod app_events;
pub mod event_bus;
pub mod snapshot;
pub mod undo;

// Re-exports for convenience
pub use app_events::{AppStateRestored, AskYesOrNo, MediaDuration, RestoreAppState};
pub use event_bus::{
    BusError, BusSender, EventBus, OwnerId, Post, Query, Subscription, SubscriptionGuard,
    SubscriptionKind,
};
pub use snapshot::AppState;
pub use undo::{UndoFrame, UndoManager};
