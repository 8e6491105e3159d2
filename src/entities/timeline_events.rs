//! Timeline events for UI refresh and cross-timeline updates.
//!
//! # Emission
//!
//! Every structural operation on a [`Timeline`](super::Timeline) commits by
//! diffing the old component set against the new one. Each difference is
//! announced exactly once:
//!
//! - [`ComponentCreated`]: id present only in the new set
//! - [`ComponentDeleted`]: id present only in the old set
//! - [`ComponentRepositioned`]: id in both sets but start/end/level changed
//!
//! Listeners receive events after the commit; the timeline already reflects
//! the new state when they run.

use uuid::Uuid;

use super::component::{ComponentId, ComponentKind};
use crate::core::Post;

// === Component lifecycle ===

#[derive(Clone, Debug)]
pub struct ComponentCreated {
    pub timeline: Uuid,
    pub kind: ComponentKind,
    pub component: ComponentId,
}
impl Post for ComponentCreated {}

#[derive(Clone, Debug)]
pub struct ComponentDeleted {
    pub timeline: Uuid,
    pub kind: ComponentKind,
    pub component: ComponentId,
}
impl Post for ComponentDeleted {}

/// Position or level changed; labels and extensions are not reported.
#[derive(Clone, Debug)]
pub struct ComponentRepositioned {
    pub timeline: Uuid,
    pub component: ComponentId,
}
impl Post for ComponentRepositioned {}

// === Timeline state ===

/// Every component was removed at once (clear, or replaced by a restore).
#[derive(Clone, Debug)]
pub struct TimelineCleared {
    pub timeline: Uuid,
}
impl Post for TimelineCleared {}

#[derive(Clone, Debug)]
pub struct TimelineHeightChanged {
    pub timeline: Uuid,
    pub height: u32,
}
impl Post for TimelineHeightChanged {}
