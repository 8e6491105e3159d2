//! Entities module - the annotation model
//!
//! A document holds several [`Timeline`]s, each an ordered set of
//! [`Component`]s of one [`ComponentKind`]:
//! - points: markers, beats, harmonies, page markers
//! - intervals: hierarchies, nested by level
//!
//! Timelines validate every edit against the media duration (queried on the
//! bus) and announce committed changes through [`timeline_events`].

pub mod beats;
pub mod component;
pub mod error;
pub mod hierarchy;
pub mod hierarchy_ops;
pub mod metric;
pub mod point;
pub mod timeline;
pub mod timeline_events;

pub use beats::BeatPattern;
pub use component::{
    Component, ComponentId, ComponentKind, ComponentSpec, TimeKey, TimelineComponent,
    UniquenessKey,
};
pub use error::{ModelError, ModelResult, StructuralError, ValidationFailure};
pub use hierarchy::Hierarchy;
pub use hierarchy_ops::Boundary;
pub use metric::{MetricInterval, MetricPosition, MetricSpan};
pub use point::{Beat, Harmony, Marker, PageMarker};
pub use timeline::Timeline;
pub use timeline_events::{
    ComponentCreated, ComponentDeleted, ComponentRepositioned, TimelineCleared,
    TimelineHeightChanged,
};
