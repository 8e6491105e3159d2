//! Timeline - ordered set of components of one kind.
//!
//! # Editing model
//!
//! Every structural edit works on a *candidate*: a copy of the component
//! map with the edit applied. The candidate is validated as a whole
//! ([`Timeline::check`]) and only then swapped in ([`Timeline::commit`]).
//! A failed edit therefore never leaves the timeline half-changed.
//!
//! Validation:
//! - changed components: finite times, inside `[0, media duration]`,
//!   `end > start`, `1 <= level <= MAX_LEVEL`
//! - all components: unique [`UniquenessKey`]
//! - hierarchies: no overlap at the same level, no crossing between levels
//!
//! The media duration comes from the [`MediaDuration`] query, so a timeline
//! must be attached to a bus with a responder before it can be edited.
//!
//! # Events
//!
//! `commit` diffs old against new and posts [`ComponentDeleted`],
//! [`ComponentCreated`] and [`ComponentRepositioned`], in that order.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::beats::BeatPattern;
use super::component::{
    Component, ComponentId, ComponentKind, ComponentSpec, TimelineComponent, UniquenessKey,
};
use super::error::{ModelResult, StructuralError, invalid};
use super::hierarchy::Hierarchy;
use super::metric::{MetricPosition, MetricSpan};
use super::timeline_events::{
    ComponentCreated, ComponentDeleted, ComponentRepositioned, TimelineCleared,
    TimelineHeightChanged,
};
use crate::config::{EditorSettings, MAX_LEVEL};
use crate::core::{EventBus, MediaDuration};

/// Working copy of a timeline's components.
pub(crate) type Candidate = IndexMap<ComponentId, Component>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timeline {
    id: Uuid,
    kind: ComponentKind,
    pub name: String,
    pub visible: bool,
    height: u32,
    /// Display position among the document's timelines
    pub ordinal: usize,
    #[serde(default)]
    beat_pattern: Option<BeatPattern>,
    /// Sorted by start, parents before their children
    components: Candidate,

    #[serde(skip)]
    settings: EditorSettings,
    #[serde(skip)]
    bus: EventBus,
}

impl Timeline {
    pub fn new(
        kind: ComponentKind,
        name: impl Into<String>,
        bus: EventBus,
        settings: &EditorSettings,
    ) -> Self {
        let beat_pattern = (kind == ComponentKind::Beat).then(|| {
            BeatPattern::new(settings.default_beat_pattern.clone()).unwrap_or_default()
        });
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            visible: true,
            height: settings.default_height,
            ordinal: 0,
            beat_pattern,
            components: Candidate::new(),
            settings: settings.clone(),
            bus,
        }
    }

    /// Rebind a deserialized timeline to a live bus.
    pub(crate) fn attach(&mut self, bus: EventBus, settings: &EditorSettings) {
        self.bus = bus;
        self.settings = settings.clone();
    }

    // ========== Accessors ==========

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    /// Component by id, or `StructuralError::UnknownComponent`.
    pub fn try_get(&self, id: ComponentId) -> ModelResult<&Component> {
        self.components.get(&id).ok_or_else(|| {
            StructuralError::UnknownComponent {
                timeline: self.id,
                component: id,
            }
            .into()
        })
    }

    pub fn hierarchy(&self, id: ComponentId) -> ModelResult<&Hierarchy> {
        self.require(ComponentKind::Hierarchy, "hierarchy")?;
        let component = self.try_get(id)?;
        component.as_hierarchy().ok_or_else(|| {
            StructuralError::WrongKind {
                timeline: self.id,
                operation: "hierarchy",
                expected: ComponentKind::Hierarchy,
                actual: component.kind(),
            }
            .into()
        })
    }

    /// Components in display order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Ids of the components whose span contains `time` (boundaries included).
    pub fn components_at(&self, time: f64) -> Vec<ComponentId> {
        self.components
            .values()
            .filter(|c| c.start() <= time && time <= c.end())
            .map(|c| c.id())
            .collect()
    }

    pub fn beat_pattern(&self) -> Option<&BeatPattern> {
        self.beat_pattern.as_ref()
    }

    /// Media duration, as answered by the host.
    pub fn media_duration(&self) -> ModelResult<f64> {
        Ok(self.bus.get(MediaDuration)?)
    }

    // ========== Display ==========

    pub fn set_height(&mut self, height: u32) -> ModelResult<()> {
        if height == self.height {
            return Ok(());
        }
        self.height = height;
        self.bus.post(TimelineHeightChanged {
            timeline: self.id,
            height,
        })?;
        Ok(())
    }

    /// Grow the timeline so its deepest level fits. Never shrinks.
    pub(crate) fn fit_height(&mut self) -> ModelResult<()> {
        if !self.settings.auto_fit_height || !self.kind.is_interval() {
            return Ok(());
        }
        let max_level = self
            .components
            .values()
            .filter_map(Component::as_hierarchy)
            .map(|h| h.level)
            .max()
            .unwrap_or(0);
        let needed = self.settings.height_for_levels(max_level);
        if needed > self.height {
            debug!("timeline {} grows to {}px for level {}", self.id, needed, max_level);
            self.set_height(needed)?;
        }
        Ok(())
    }

    // ========== Editing ==========

    /// Validate and insert a new component. Returns its id.
    pub fn create(&mut self, spec: ComponentSpec) -> ModelResult<ComponentId> {
        if spec.kind() != self.kind {
            return Err(StructuralError::WrongKind {
                timeline: self.id,
                operation: "create",
                expected: self.kind,
                actual: spec.kind(),
            }
            .into());
        }
        let component = spec.build();
        let id = component.id();

        let mut candidate = self.components.clone();
        candidate.insert(id, component);
        self.check(&candidate)?;
        self.commit(candidate)?;
        Ok(id)
    }

    /// Remove a component. Children of a deleted hierarchy become roots.
    pub fn delete(&mut self, id: ComponentId) -> ModelResult<()> {
        self.try_get(id)?;
        let mut candidate = self.components.clone();
        candidate.shift_remove(&id);
        self.commit(candidate)
    }

    /// Replace a component's label (harmony: its symbol).
    pub fn set_label(&mut self, id: ComponentId, label: impl Into<String>) -> ModelResult<()> {
        let (timeline, kind) = (self.id, self.kind);
        let Some(component) = self.components.get_mut(&id) else {
            return Err(StructuralError::UnknownComponent {
                timeline,
                component: id,
            }
            .into());
        };
        if component.set_label(label.into()) {
            Ok(())
        } else {
            invalid(format!("A {} has no label", kind.name()))
        }
    }

    /// Move a point component to `time`.
    pub fn move_point(&mut self, id: ComponentId, time: f64) -> ModelResult<()> {
        if self.try_get(id)?.kind().is_interval() {
            return invalid("Intervals are moved by their boundaries");
        }
        let mut candidate = self.components.clone();
        if let Some(component) = candidate.get_mut(&id) {
            component.set_time(time);
        }
        self.check(&candidate)?;
        self.commit(candidate)
    }

    /// Multiply every time value by `factor`.
    pub fn scale(&mut self, factor: f64) -> ModelResult<()> {
        if !(factor.is_finite() && factor > 0.0) {
            return invalid(format!("Scale factor must be positive, got {factor}"));
        }
        let mut candidate = self.components.clone();
        for component in candidate.values_mut() {
            component.scale(factor);
        }
        self.check_structure(&candidate)?;
        debug!("timeline {}: scale by {}", self.id, factor);
        self.commit(candidate)
    }

    /// Cut the timeline to `[0, length]`.
    ///
    /// Components starting at or after `length` are deleted; hierarchies
    /// reaching past it are clamped.
    pub fn crop(&mut self, length: f64) -> ModelResult<()> {
        if !(length.is_finite() && length > 0.0) {
            return invalid(format!("Crop length must be positive, got {length}"));
        }
        let mut candidate = self.components.clone();
        candidate.retain(|_, component| component.crop(length));
        self.check_structure(&candidate)?;
        debug!("timeline {}: crop to {}", self.id, length);
        self.commit(candidate)
    }

    /// Remove every component at once.
    pub fn clear(&mut self) -> ModelResult<()> {
        self.components.clear();
        debug!("timeline {}: cleared", self.id);
        self.bus.post(TimelineCleared { timeline: self.id })?;
        Ok(())
    }

    /// Fail with `WrongKind` unless this timeline holds `expected`.
    pub(crate) fn require(&self, expected: ComponentKind, operation: &'static str) -> ModelResult<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(StructuralError::WrongKind {
                timeline: self.id,
                operation,
                expected,
                actual: self.kind,
            }
            .into())
        }
    }

    pub(crate) fn candidate(&self) -> Candidate {
        self.components.clone()
    }

    // ========== Validation ==========

    /// Full validation of a candidate before commit.
    pub(crate) fn check(&self, candidate: &Candidate) -> ModelResult<()> {
        let changed: Vec<&Component> = candidate
            .values()
            .filter(|c| {
                self.components
                    .get(&c.id())
                    .is_none_or(|old| !same_position(old, c))
            })
            .collect();

        if !changed.is_empty() {
            let duration = self.media_duration()?;
            for component in changed {
                check_bounds(component, duration)?;
            }
        }
        self.check_structure(candidate)
    }

    /// Uniqueness and nesting invariants over the whole candidate.
    pub(crate) fn check_structure(&self, candidate: &Candidate) -> ModelResult<()> {
        let mut keys: HashMap<UniquenessKey, ComponentId> = HashMap::with_capacity(candidate.len());
        for component in candidate.values() {
            if keys.insert(component.uniqueness_key(), component.id()).is_some() {
                return invalid(duplicate_reason(component));
            }
        }

        let hierarchies: Vec<&Hierarchy> =
            candidate.values().filter_map(Component::as_hierarchy).collect();
        for (i, a) in hierarchies.iter().enumerate() {
            for b in &hierarchies[i + 1..] {
                if !a.overlaps(b) {
                    continue;
                }
                if a.level == b.level {
                    return invalid(format!(
                        "Hierarchies can't overlap at the same level ({:.3}-{:.3} and {:.3}-{:.3}, level {})",
                        a.start, a.end, b.start, b.end, a.level
                    ));
                }
                let (upper, lower) = if a.level > b.level { (a, b) } else { (b, a) };
                if !upper.covers(lower) {
                    return invalid(format!(
                        "Hierarchy at level {} ({:.3}-{:.3}) would cross level {} ({:.3}-{:.3})",
                        lower.level, lower.start, lower.end, upper.level, upper.start, upper.end
                    ));
                }
            }
        }
        Ok(())
    }

    // ========== Commit ==========

    /// Swap in a validated candidate and announce the differences.
    pub(crate) fn commit(&mut self, mut candidate: Candidate) -> ModelResult<()> {
        candidate.sort_by(|_, a, _, b| display_order(a, b));
        relink(&mut candidate);
        let old = std::mem::replace(&mut self.components, candidate);

        let deleted: Vec<&Component> = old
            .values()
            .filter(|c| !self.components.contains_key(&c.id()))
            .collect();
        let created: Vec<(ComponentId, ComponentKind)> = self
            .components
            .values()
            .filter(|c| !old.contains_key(&c.id()))
            .map(|c| (c.id(), c.kind()))
            .collect();
        let repositioned: Vec<ComponentId> = self
            .components
            .values()
            .filter(|c| old.get(&c.id()).is_some_and(|o| moved(o, c)))
            .map(|c| c.id())
            .collect();

        trace!(
            "timeline {}: commit -{} +{} ~{}",
            self.id,
            deleted.len(),
            created.len(),
            repositioned.len()
        );

        for component in deleted {
            self.bus.post(ComponentDeleted {
                timeline: self.id,
                kind: component.kind(),
                component: component.id(),
            })?;
        }
        for (component, kind) in created {
            self.bus.post(ComponentCreated {
                timeline: self.id,
                kind,
                component,
            })?;
        }
        for component in repositioned {
            self.bus.post(ComponentRepositioned {
                timeline: self.id,
                component,
            })?;
        }
        self.fit_height()
    }

    // ========== Beats ==========

    pub fn set_beat_pattern(&mut self, pattern: BeatPattern) -> ModelResult<()> {
        self.require(ComponentKind::Beat, "set_beat_pattern")?;
        self.beat_pattern = Some(pattern);
        Ok(())
    }

    /// Metric position of the last beat at or before `time`.
    ///
    /// None before the first beat.
    pub fn metric_position_at(&self, time: f64) -> ModelResult<Option<MetricPosition>> {
        self.require(ComponentKind::Beat, "metric_position_at")?;
        let count = self.components.values().filter(|c| c.start() <= time).count();
        let pattern = self.beat_pattern.clone().unwrap_or_default();
        Ok(count.checked_sub(1).map(|index| pattern.position_of(index)))
    }

    /// Metric extent of `[start, end]`, e.g. of a hierarchy on another timeline.
    pub fn measure_span(&self, start: f64, end: f64) -> ModelResult<Option<MetricSpan>> {
        let first = self.metric_position_at(start)?;
        let last = self.metric_position_at(end)?;
        Ok(first.zip(last).map(|(a, b)| MetricSpan::new(a, b)))
    }

    // ========== Serialization ==========

    pub fn to_value(&self) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value, bus: EventBus, settings: &EditorSettings) -> anyhow::Result<Self> {
        let mut timeline: Timeline = serde_json::from_value(value)?;
        timeline.attach(bus, settings);
        Ok(timeline)
    }
}

fn level_of(component: &Component) -> u32 {
    component.as_hierarchy().map(|h| h.level).unwrap_or(0)
}

/// By start; at equal starts, higher levels first.
fn display_order(a: &Component, b: &Component) -> Ordering {
    a.start()
        .total_cmp(&b.start())
        .then_with(|| level_of(b).cmp(&level_of(a)))
        .then_with(|| a.end().total_cmp(&b.end()))
}

/// Start, end or level changed.
fn moved(old: &Component, new: &Component) -> bool {
    old.start() != new.start() || old.end() != new.end() || level_of(old) != level_of(new)
}

/// Same position including pre-start/post-end extensions.
fn same_position(old: &Component, new: &Component) -> bool {
    if moved(old, new) {
        return false;
    }
    match (old.as_hierarchy(), new.as_hierarchy()) {
        (Some(a), Some(b)) => a.pre_start == b.pre_start && a.post_end == b.post_end,
        _ => true,
    }
}

fn check_bounds(component: &Component, duration: f64) -> ModelResult<()> {
    match component {
        Component::Hierarchy(h) => {
            if ![h.start, h.end, h.pre_start, h.post_end].iter().all(|t| t.is_finite()) {
                return invalid("Times must be finite numbers");
            }
            if h.start < 0.0 {
                return invalid(format!("Start can't be negative ({:.3})", h.start));
            }
            if h.end > duration {
                return invalid(format!(
                    "End ({:.3}) can't be past the end of the media ({:.3})",
                    h.end, duration
                ));
            }
            if h.end <= h.start {
                return invalid("End must be greater than start");
            }
            if h.pre_start < 0.0 {
                return invalid(format!("Pre-start can't be negative ({:.3})", h.pre_start));
            }
            if h.post_end > duration {
                return invalid(format!(
                    "Post-end ({:.3}) can't be past the end of the media ({:.3})",
                    h.post_end, duration
                ));
            }
            if h.level < 1 {
                return invalid("Level must be at least 1");
            }
            if h.level > MAX_LEVEL {
                return invalid(format!("Level can't be higher than {MAX_LEVEL}"));
            }
            Ok(())
        }
        point => {
            let time = point.start();
            if !time.is_finite() {
                return invalid("Time must be a finite number");
            }
            if time < 0.0 {
                return invalid(format!("Time can't be negative ({time:.3})"));
            }
            if time > duration {
                return invalid(format!(
                    "Time ({:.3}) can't be past the end of the media ({:.3})",
                    time, duration
                ));
            }
            Ok(())
        }
    }
}

fn duplicate_reason(component: &Component) -> String {
    match component {
        Component::Hierarchy(h) => format!(
            "There is already a hierarchy from {:.3} to {:.3} at level {}",
            h.start, h.end, h.level
        ),
        point => format!(
            "There is already a {} at {:.3}",
            point.kind().name(),
            point.start()
        ),
    }
}

/// Recompute parent/children from geometry.
///
/// The parent of a hierarchy is the one at `level + 1` whose span covers it.
/// Same-level spans never overlap, so there is at most one.
fn relink(candidate: &mut Candidate) {
    // level -> (start, end, id), sorted by start
    let mut by_level: HashMap<u32, Vec<(f64, f64, ComponentId)>> = HashMap::new();
    for h in candidate.values().filter_map(Component::as_hierarchy) {
        by_level.entry(h.level).or_default().push((h.start, h.end, h.id));
    }
    for spans in by_level.values_mut() {
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    let mut parents: Vec<(ComponentId, Option<ComponentId>)> = Vec::new();
    for h in candidate.values().filter_map(Component::as_hierarchy) {
        let above = h.level.checked_add(1).and_then(|up| by_level.get(&up));
        let parent = above.and_then(|spans| {
            let idx = spans.partition_point(|s| s.0 <= h.start);
            let (start, end, id) = *spans.get(idx.checked_sub(1)?)?;
            (start <= h.start && h.end <= end).then_some(id)
        });
        parents.push((h.id, parent));
    }

    let mut children: HashMap<ComponentId, Vec<ComponentId>> = HashMap::new();
    for (child, parent) in &parents {
        if let Some(parent) = parent {
            children.entry(*parent).or_default().push(*child);
        }
    }

    // candidate is in display order, so children come out sorted by start
    for (id, parent) in parents {
        if let Some(h) = candidate.get_mut(&id).and_then(Component::as_hierarchy_mut) {
            h.parent = parent;
            h.children = children.remove(&id).unwrap_or_default();
        }
    }
}
