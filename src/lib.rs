//! STRATA - time-based annotation editor core
//!
//! Parallel timelines of annotations anchored to a media timebase, with
//! undo/redo and live notification between components.

// Core engine (bus, undo history, snapshots)
pub mod core;

// Annotation model
pub mod document;
pub mod entities;

// Ambient
pub mod config;
pub mod logging;

// Re-export commonly used types from core
pub use crate::core::event_bus::{BusError, EventBus, OwnerId, Post, Query, Subscription};
pub use crate::core::snapshot::AppState;
pub use crate::core::undo::UndoManager;

// Re-export entities
pub use config::EditorSettings;
pub use document::{Document, DurationPolicy, MediaMetadata};
pub use entities::{
    Boundary, Component, ComponentKind, ComponentSpec, MetricInterval, MetricPosition,
    ModelError, ModelResult, Timeline,
};
