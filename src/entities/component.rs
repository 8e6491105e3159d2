//! Component - enum over every kind of timeline element.
//!
//! Each timeline holds components of exactly one [`ComponentKind`]. The kind
//! tag picks the concrete struct once, at creation ([`ComponentSpec::build`]);
//! afterwards the shared [`TimelineComponent`] interface is dispatched through
//! `enum_dispatch`.
//!
//! - Points: [`Marker`], [`Beat`], [`Harmony`], [`PageMarker`] (`start == end`)
//! - Intervals: [`Hierarchy`] (levels, parent/children, pre-start/post-end)

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::hierarchy::Hierarchy;
use super::point::{Beat, Harmony, Marker, PageMarker};

pub type ComponentId = Uuid;

/// Kind of component a timeline holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Hierarchy,
    Marker,
    Beat,
    Harmony,
    PageMarker,
}

impl ComponentKind {
    pub fn is_interval(self) -> bool {
        matches!(self, ComponentKind::Hierarchy)
    }

    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Hierarchy => "hierarchy",
            ComponentKind::Marker => "marker",
            ComponentKind::Beat => "beat",
            ComponentKind::Harmony => "harmony",
            ComponentKind::PageMarker => "page marker",
        }
    }
}

/// Exact-time key; `-0.0` and `0.0` compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeKey(u64);

impl TimeKey {
    pub fn new(time: f64) -> Self {
        Self((time + 0.0).to_bits())
    }
}

/// Two components of one timeline may never share a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniquenessKey {
    Time(TimeKey),
    Span {
        start: TimeKey,
        end: TimeKey,
        level: u32,
    },
}

/// Shared interface of every component kind.
#[enum_dispatch]
pub trait TimelineComponent {
    fn id(&self) -> ComponentId;

    fn kind(&self) -> ComponentKind;

    /// Span start (the time, for points).
    fn start(&self) -> f64;

    /// Span end (the time, for points).
    fn end(&self) -> f64;

    fn uniqueness_key(&self) -> UniquenessKey;

    /// Multiply every time value by `factor`.
    fn scale(&mut self, factor: f64);

    /// Clamp to `[0, length]`. Returns false when the component lies past
    /// `length` and has to be deleted.
    fn crop(&mut self, length: f64) -> bool;

    fn label(&self) -> &str;
}

#[enum_dispatch(TimelineComponent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Component {
    Hierarchy(Hierarchy),
    Marker(Marker),
    Beat(Beat),
    Harmony(Harmony),
    PageMarker(PageMarker),
}

impl Component {
    pub fn as_hierarchy(&self) -> Option<&Hierarchy> {
        match self {
            Component::Hierarchy(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_hierarchy_mut(&mut self) -> Option<&mut Hierarchy> {
        match self {
            Component::Hierarchy(h) => Some(h),
            _ => None,
        }
    }

    /// Point time. None for intervals.
    pub fn time(&self) -> Option<f64> {
        match self {
            Component::Hierarchy(_) => None,
            other => Some(other.start()),
        }
    }

    /// Move a point component. Intervals are untouched.
    pub(crate) fn set_time(&mut self, time: f64) {
        match self {
            Component::Hierarchy(_) => {}
            Component::Marker(m) => m.time = time,
            Component::Beat(b) => b.time = time,
            Component::Harmony(h) => h.time = time,
            Component::PageMarker(p) => p.time = time,
        }
    }

    /// Replace the label. Returns false for kinds without one.
    pub(crate) fn set_label(&mut self, label: String) -> bool {
        match self {
            Component::Hierarchy(h) => h.label = label,
            Component::Marker(m) => m.label = label,
            Component::Harmony(h) => h.symbol = label,
            Component::Beat(_) | Component::PageMarker(_) => return false,
        }
        true
    }
}

/// Creation request; the timeline validates it before anything is inserted.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentSpec {
    Hierarchy {
        start: f64,
        end: f64,
        level: u32,
        label: String,
    },
    Marker {
        time: f64,
        label: String,
    },
    Beat {
        time: f64,
    },
    Harmony {
        time: f64,
        symbol: String,
    },
    PageMarker {
        time: f64,
        page: u32,
    },
}

impl ComponentSpec {
    pub fn hierarchy(start: f64, end: f64, level: u32) -> Self {
        ComponentSpec::Hierarchy {
            start,
            end,
            level,
            label: String::new(),
        }
    }

    pub fn marker(time: f64) -> Self {
        ComponentSpec::Marker {
            time,
            label: String::new(),
        }
    }

    pub fn beat(time: f64) -> Self {
        ComponentSpec::Beat { time }
    }

    pub fn harmony(time: f64, symbol: impl Into<String>) -> Self {
        ComponentSpec::Harmony {
            time,
            symbol: symbol.into(),
        }
    }

    pub fn page_marker(time: f64, page: u32) -> Self {
        ComponentSpec::PageMarker { time, page }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentSpec::Hierarchy { .. } => ComponentKind::Hierarchy,
            ComponentSpec::Marker { .. } => ComponentKind::Marker,
            ComponentSpec::Beat { .. } => ComponentKind::Beat,
            ComponentSpec::Harmony { .. } => ComponentKind::Harmony,
            ComponentSpec::PageMarker { .. } => ComponentKind::PageMarker,
        }
    }

    /// Build the component with a fresh id.
    pub fn build(self) -> Component {
        let id = Uuid::new_v4();
        match self {
            ComponentSpec::Hierarchy {
                start,
                end,
                level,
                label,
            } => Hierarchy::new(id, start, end, level).with_label(label).into(),
            ComponentSpec::Marker { time, label } => Marker {
                id,
                time,
                label,
                color: None,
            }
            .into(),
            ComponentSpec::Beat { time } => Beat { id, time }.into(),
            ComponentSpec::Harmony { time, symbol } => Harmony { id, time, symbol }.into(),
            ComponentSpec::PageMarker { time, page } => PageMarker { id, time, page }.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dispatches_on_kind() {
        let c = ComponentSpec::harmony(1.5, "Am").build();
        assert_eq!(c.kind(), ComponentKind::Harmony);
        assert_eq!(c.start(), 1.5);
        assert_eq!(c.end(), 1.5);
        assert_eq!(c.label(), "Am");
        assert_eq!(c.time(), Some(1.5));

        let h = ComponentSpec::hierarchy(1.0, 2.0, 3).build();
        assert_eq!(h.kind(), ComponentKind::Hierarchy);
        assert_eq!(h.time(), None);
        assert_eq!(h.as_hierarchy().map(|h| h.level), Some(3));
    }

    #[test]
    fn test_time_key_normalizes_negative_zero() {
        assert_eq!(TimeKey::new(-0.0), TimeKey::new(0.0));
        assert_ne!(TimeKey::new(1.0), TimeKey::new(1.0 + f64::EPSILON));
    }

    #[test]
    fn test_set_label_only_on_labelled_kinds() {
        let mut marker = ComponentSpec::marker(1.0).build();
        assert!(marker.set_label("intro".into()));
        assert_eq!(marker.label(), "intro");

        let mut beat = ComponentSpec::beat(1.0).build();
        assert!(!beat.set_label("x".into()));
    }

    #[test]
    fn test_serde_roundtrip_keeps_variant() {
        let c = ComponentSpec::page_marker(3.0, 7).build();
        let v = serde_json::to_value(&c).unwrap();
        let back: Component = serde_json::from_value(v).unwrap();
        assert_eq!(back, c);
    }
}
