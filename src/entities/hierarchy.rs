//! Hierarchy - nested interval component.
//!
//! # Coordinates
//!
//! - `start` / `end`: the span, `start < end`
//! - `pre_start <= start`, `post_end >= end`: extended but inert boundary
//!   (anacrusis, trailing silence). Equal to start/end when unused.
//! - `level >= 1`: nesting depth, higher levels group lower ones
//!
//! # Genealogy
//!
//! `parent` and `children` are derived from geometry by the owning timeline
//! after every committed edit: the parent is the interval one level up whose
//! span covers this one. They are never edited directly.

use serde::{Deserialize, Serialize};

use super::component::{ComponentId, ComponentKind, TimeKey, TimelineComponent, UniquenessKey};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub id: ComponentId,
    pub start: f64,
    pub end: f64,
    pub pre_start: f64,
    pub post_end: f64,
    pub level: u32,

    #[serde(default)]
    pub parent: Option<ComponentId>,
    /// Sorted by start
    #[serde(default)]
    pub children: Vec<ComponentId>,

    #[serde(default)]
    pub label: String,
    /// Formal function ("verse", "A'", "coda")
    #[serde(default)]
    pub formal_type: String,
    #[serde(default)]
    pub comments: String,
}

impl Hierarchy {
    pub fn new(id: ComponentId, start: f64, end: f64, level: u32) -> Self {
        Self {
            id,
            start,
            end,
            pre_start: start,
            post_end: end,
            level,
            parent: None,
            children: Vec::new(),
            label: String::new(),
            formal_type: String::new(),
            comments: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    pub fn has_pre_start(&self) -> bool {
        self.pre_start < self.start
    }

    pub fn has_post_end(&self) -> bool {
        self.post_end > self.end
    }

    /// Length of the pre-start extension (0 when unused).
    pub fn pre_start_length(&self) -> f64 {
        self.start - self.pre_start
    }

    /// Length of the post-end extension (0 when unused).
    pub fn post_end_length(&self) -> f64 {
        self.post_end - self.end
    }

    /// `start < time < end`
    pub fn contains_strictly(&self, time: f64) -> bool {
        self.start < time && time < self.end
    }

    /// Spans share more than a boundary point.
    pub fn overlaps(&self, other: &Hierarchy) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// `other` lies within this span (boundaries may coincide).
    pub fn covers(&self, other: &Hierarchy) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Move `start`, carrying the pre-start extension along.
    pub(crate) fn set_start(&mut self, start: f64) {
        let pre = self.pre_start_length();
        self.start = start;
        self.pre_start = start - pre;
    }

    /// Move `end`, carrying the post-end extension along.
    pub(crate) fn set_end(&mut self, end: f64) {
        let post = self.post_end_length();
        self.end = end;
        self.post_end = end + post;
    }
}

impl TimelineComponent for Hierarchy {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Hierarchy
    }

    fn start(&self) -> f64 {
        self.start
    }

    fn end(&self) -> f64 {
        self.end
    }

    fn uniqueness_key(&self) -> UniquenessKey {
        UniquenessKey::Span {
            start: TimeKey::new(self.start),
            end: TimeKey::new(self.end),
            level: self.level,
        }
    }

    fn scale(&mut self, factor: f64) {
        self.start *= factor;
        self.end *= factor;
        self.pre_start *= factor;
        self.post_end *= factor;
    }

    fn crop(&mut self, length: f64) -> bool {
        if self.start >= length {
            return false;
        }
        self.end = self.end.min(length);
        self.post_end = self.post_end.min(length);
        self.pre_start = self.pre_start.min(length);
        true
    }

    fn label(&self) -> &str {
        &self.label
    }
}
