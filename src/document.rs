//! Document - owner of the timelines and of their undo history.
//!
//! The undo manager only stores and broadcasts [`AppState`]s; the document
//! is the state owner that produces them ([`Document::snapshot`]) and applies
//! them (its `RestoreAppState` listener).
//!
//! # Edits
//!
//! Timelines are edited through [`Document::edit`], which runs a closure on
//! one timeline and records an undo frame when the timeline changed. A
//! rejected edit changes nothing, so it never leaves a frame behind.
//!
//! Listeners of timeline events run while the document is inside `edit` and
//! must not call back into the document; the event payload carries the ids
//! they need.
//!
//! # Media duration
//!
//! The document answers the [`MediaDuration`] query from its media metadata,
//! so timelines validate against whatever was last passed to
//! [`Document::set_media`]. A playback backend may serve the query itself
//! instead; the last responder wins.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::EditorSettings;
use crate::core::{
    AppState, AppStateRestored, EventBus, MediaDuration, OwnerId, RestoreAppState, UndoManager,
};
use crate::entities::error::invalid;
use crate::entities::{
    ComponentKind, ModelError, ModelResult, StructuralError, Timeline, TimelineCleared,
};

/// Loaded media as far as the editor cares.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub title: String,
    /// Anything else the host wants to keep with the document
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaMetadata {
    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    fn to_map(&self) -> anyhow::Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("media metadata serialized to {other}"),
        }
    }

    fn from_map(map: &Map<String, Value>) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(Value::Object(map.clone()))?)
    }
}

/// What happens to existing annotations when the media duration changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Stretch every timeline by `new / old`
    Scale,
    /// Cut every timeline to the new duration (when it got shorter)
    Crop,
    /// Leave components where they are
    Keep,
}

#[derive(Debug, Default)]
struct DocumentState {
    settings: EditorSettings,
    media: MediaMetadata,
    media_path: String,
    file_path: String,
    /// Display order
    timelines: Vec<Timeline>,
}

impl DocumentState {
    fn position(&self, id: Uuid) -> ModelResult<usize> {
        self.timelines
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| StructuralError::UnknownTimeline(id).into())
    }

    fn snapshot(&self) -> anyhow::Result<AppState> {
        let timelines = self
            .timelines
            .iter()
            .map(Timeline::to_value)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(AppState {
            media_metadata: self.media.to_map()?,
            timelines: Value::Array(timelines),
            media_path: self.media_path.clone(),
            file_path: self.file_path.clone(),
            ..AppState::default()
        })
    }

    fn renumber(&mut self) {
        for (ordinal, timeline) in self.timelines.iter_mut().enumerate() {
            timeline.ordinal = ordinal;
        }
    }
}

pub struct Document {
    bus: EventBus,
    owner: OwnerId,
    undo: UndoManager,
    duration: Rc<Cell<f64>>,
    state: Rc<RefCell<DocumentState>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("owner", &self.owner)
            .field("duration", &self.duration.get())
            .field("undo_frames", &self.undo.len())
            .finish()
    }
}

impl Document {
    /// Empty document on `bus`. Records the initial undo frame.
    pub fn new(bus: EventBus, settings: EditorSettings) -> ModelResult<Self> {
        let owner = OwnerId::new();
        let duration = Rc::new(Cell::new(0.0));
        let state = Rc::new(RefCell::new(DocumentState {
            settings,
            ..DocumentState::default()
        }));

        let served = Rc::clone(&duration);
        bus.serve::<MediaDuration, _>(owner, move |_| Ok(served.get()));

        let weak: Weak<RefCell<DocumentState>> = Rc::downgrade(&state);
        let restore_bus = bus.clone();
        let restore_duration = Rc::clone(&duration);
        bus.listen::<RestoreAppState, _>(owner, move |event| {
            let Some(state) = weak.upgrade() else {
                return Ok(());
            };
            apply_state(&state, &restore_duration, &restore_bus, &event.0)
        });

        let mut doc = Self {
            undo: UndoManager::new(bus.clone()),
            bus,
            owner,
            duration,
            state,
        };
        doc.record("open", false, None)?;
        Ok(doc)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn undo_manager(&self) -> &UndoManager {
        &self.undo
    }

    pub fn settings(&self) -> EditorSettings {
        self.state.borrow().settings.clone()
    }

    pub fn media(&self) -> MediaMetadata {
        self.state.borrow().media.clone()
    }

    pub fn media_duration(&self) -> f64 {
        self.duration.get()
    }

    pub fn set_file_path(&mut self, path: impl Into<String>) {
        self.state.borrow_mut().file_path = path.into();
    }

    /// Replace the media metadata (new media loaded).
    pub fn set_media(&mut self, path: impl Into<String>, media: MediaMetadata) -> ModelResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.media_path = path.into();
            self.duration.set(media.duration);
            state.media = media;
        }
        self.record("set media", false, None)
    }

    // ========== Timelines ==========

    pub fn timeline_ids(&self) -> Vec<Uuid> {
        self.state.borrow().timelines.iter().map(Timeline::id).collect()
    }

    pub fn add_timeline(&mut self, kind: ComponentKind, name: impl Into<String>) -> ModelResult<Uuid> {
        let id = {
            let mut state = self.state.borrow_mut();
            let mut timeline = Timeline::new(kind, name, self.bus.clone(), &state.settings);
            timeline.ordinal = state.timelines.len();
            let id = timeline.id();
            state.timelines.push(timeline);
            id
        };
        debug!("add {} timeline {}", kind.name(), id);
        self.record("add timeline", false, None)?;
        Ok(id)
    }

    pub fn remove_timeline(&mut self, id: Uuid) -> ModelResult<()> {
        {
            let mut state = self.state.borrow_mut();
            let pos = state.position(id)?;
            state.timelines.remove(pos);
            state.renumber();
        }
        debug!("remove timeline {}", id);
        self.bus.post(TimelineCleared { timeline: id })?;
        self.record("remove timeline", false, None)
    }

    /// Read access to one timeline.
    pub fn with_timeline<R>(&self, id: Uuid, f: impl FnOnce(&Timeline) -> R) -> ModelResult<R> {
        let state = self.state.borrow();
        let pos = state.position(id)?;
        Ok(f(&state.timelines[pos]))
    }

    /// Run an edit on one timeline; record an undo frame if it changed.
    pub fn edit<R>(
        &mut self,
        id: Uuid,
        action: &str,
        f: impl FnOnce(&mut Timeline) -> ModelResult<R>,
    ) -> ModelResult<R> {
        self.edit_with(id, action, None, f)
    }

    /// Like [`edit`](Self::edit), but consecutive edits with the same
    /// `repeat_id` share one undo frame.
    pub fn edit_repeatable<R>(
        &mut self,
        id: Uuid,
        action: &str,
        repeat_id: &str,
        f: impl FnOnce(&mut Timeline) -> ModelResult<R>,
    ) -> ModelResult<R> {
        self.edit_with(id, action, Some(repeat_id), f)
    }

    fn edit_with<R>(
        &mut self,
        id: Uuid,
        action: &str,
        repeat_id: Option<&str>,
        f: impl FnOnce(&mut Timeline) -> ModelResult<R>,
    ) -> ModelResult<R> {
        let (result, changed) = {
            let mut state = self.state.borrow_mut();
            let pos = state.position(id)?;
            let timeline = &mut state.timelines[pos];
            let before = timeline.to_value().map_err(ModelError::Snapshot)?;
            let result = f(timeline);
            let after = timeline.to_value().map_err(ModelError::Snapshot)?;
            (result, before != after)
        };

        if changed {
            // a listener failure after commit still leaves a changed timeline
            self.record(action, repeat_id.is_some(), repeat_id)?;
        }
        if let Err(e) = &result {
            debug!("{} rejected: {}", action, e);
        }
        result
    }

    // ========== Media duration ==========

    /// Switch to a new media duration, adapting every timeline per `policy`.
    ///
    /// Recorded as a single undo frame. If any timeline fails, the document
    /// is restored to the state before the call.
    pub fn change_media_duration(&mut self, duration: f64, policy: DurationPolicy) -> ModelResult<()> {
        if !(duration.is_finite() && duration > 0.0) {
            return invalid(format!("Media duration must be positive, got {duration}"));
        }
        let before = self.snapshot()?;
        let old = self.duration.get();

        if let Err(e) = self.adapt_timelines(old, duration, policy) {
            warn!("media duration change failed, rolling back: {}", e);
            apply_state(&self.state, &self.duration, &self.bus, &before).map_err(ModelError::Snapshot)?;
            return Err(e);
        }
        self.record("change media duration", false, None)
    }

    fn adapt_timelines(&mut self, old: f64, new: f64, policy: DurationPolicy) -> ModelResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.media.duration = new;
            self.duration.set(new);
        }
        let ids = self.timeline_ids();
        for id in ids {
            let mut state = self.state.borrow_mut();
            let pos = state.position(id)?;
            let timeline = &mut state.timelines[pos];
            match policy {
                DurationPolicy::Scale if old > 0.0 => timeline.scale(new / old)?,
                DurationPolicy::Crop if new < old => timeline.crop(new)?,
                _ => {}
            }
        }
        debug!("media duration {} -> {} ({:?})", old, new, policy);
        Ok(())
    }

    // ========== Undo ==========

    /// Current state as an undo snapshot.
    pub fn snapshot(&self) -> ModelResult<AppState> {
        self.state.borrow().snapshot().map_err(ModelError::Snapshot)
    }

    pub fn undo(&mut self) -> anyhow::Result<bool> {
        self.undo.undo()
    }

    pub fn redo(&mut self) -> anyhow::Result<bool> {
        self.undo.redo()
    }

    fn record(&mut self, action: &str, no_repeat: bool, repeat_id: Option<&str>) -> ModelResult<()> {
        let state = self.snapshot()?;
        self.undo.record_with(state, action, no_repeat, repeat_id);
        Ok(())
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.bus.stop_listening_to_all(self.owner);
        self.bus.stop_serving_all(self.owner);
    }
}

/// Replace the document contents with `app`.
///
/// Posts `TimelineCleared` for every replaced timeline, then
/// `AppStateRestored`.
fn apply_state(
    state: &RefCell<DocumentState>,
    duration: &Cell<f64>,
    bus: &EventBus,
    app: &AppState,
) -> anyhow::Result<()> {
    let values: Vec<Value> = serde_json::from_value(app.timelines.clone())?;
    let media = MediaMetadata::from_map(&app.media_metadata)?;

    let replaced: Vec<Uuid> = {
        let mut state = state
            .try_borrow_mut()
            .map_err(|_| anyhow::anyhow!("document is busy, can't restore"))?;
        let timelines = values
            .into_iter()
            .map(|v| Timeline::from_value(v, bus.clone(), &state.settings))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let old = std::mem::replace(&mut state.timelines, timelines);
        duration.set(media.duration);
        state.media = media;
        state.media_path = app.media_path.clone();
        state.file_path = app.file_path.clone();
        old.iter().map(Timeline::id).collect()
    };

    debug!("restored state, {} timeline(s) replaced", replaced.len());
    for timeline in replaced {
        bus.post(TimelineCleared { timeline })?;
    }
    bus.post(AppStateRestored)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Boundary, Component, ComponentSpec, TimelineComponent};
    use crate::logging;

    fn document(duration: f64) -> Document {
        logging::init_for_tests();
        let mut doc = Document::new(EventBus::new(), EditorSettings::default()).unwrap();
        doc.set_media("song.wav", MediaMetadata::with_duration(duration))
            .unwrap();
        doc
    }

    fn times(doc: &Document, id: Uuid) -> Vec<f64> {
        doc.with_timeline(id, |t| t.components().map(|c| c.start()).collect())
            .unwrap()
    }

    #[test]
    fn test_new_records_initial_frame() {
        let doc = Document::new(EventBus::new(), EditorSettings::default()).unwrap();
        assert_eq!(doc.undo_manager().len(), 1);
        assert!(doc.bus().is_served::<MediaDuration>());
    }

    #[test]
    fn test_undo_redo_roundtrip_is_exact() {
        let mut doc = document(100.0);
        let tl = doc.add_timeline(ComponentKind::Hierarchy, "form").unwrap();
        doc.edit(tl, "create", |t| t.create(ComponentSpec::hierarchy(0.0, 33.3, 1)))
            .unwrap();
        doc.edit(tl, "split", |t| t.split(10.1)).unwrap();

        let before = doc.snapshot().unwrap();
        assert!(doc.undo().unwrap());
        assert_eq!(doc.with_timeline(tl, |t| t.len()).unwrap(), 1);
        assert!(doc.redo().unwrap());
        assert_eq!(doc.snapshot().unwrap(), before);
    }

    #[test]
    fn test_rejected_edit_records_nothing() {
        let mut doc = document(10.0);
        let tl = doc.add_timeline(ComponentKind::Marker, "markers").unwrap();
        let frames = doc.undo_manager().len();

        let err = doc
            .edit(tl, "create", |t| t.create(ComponentSpec::marker(11.0)))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(doc.undo_manager().len(), frames);
    }

    #[test]
    fn test_repeatable_edits_share_a_frame() {
        let mut doc = document(100.0);
        let tl = doc.add_timeline(ComponentKind::Hierarchy, "form").unwrap();
        let h = doc
            .edit(tl, "create", |t| t.create(ComponentSpec::hierarchy(0.0, 10.0, 1)))
            .unwrap();
        let frames = doc.undo_manager().len();

        for end in [11.0, 12.0, 13.0] {
            doc.edit_repeatable(tl, "nudge", "nudge-end", |t| {
                t.move_boundary(h, Boundary::End, end)
            })
            .unwrap();
        }
        assert_eq!(doc.undo_manager().len(), frames + 1);

        doc.undo().unwrap();
        let end = doc
            .with_timeline(tl, |t| t.get(h).map(Component::end))
            .unwrap();
        assert_eq!(end, Some(10.0));
    }

    #[test]
    fn test_restore_posts_cleared_then_restored() {
        let mut doc = document(10.0);
        let tl = doc.add_timeline(ComponentKind::Marker, "markers").unwrap();
        let log = Rc::new(RefCell::new(Vec::<String>::new()));

        let sink = Rc::clone(&log);
        doc.bus().listen::<TimelineCleared, _>(OwnerId::new(), move |e| {
            sink.borrow_mut().push(format!("cleared {}", e.timeline));
            Ok(())
        });
        let sink = Rc::clone(&log);
        doc.bus().listen::<AppStateRestored, _>(OwnerId::new(), move |_| {
            sink.borrow_mut().push("restored".into());
            Ok(())
        });

        doc.undo().unwrap();
        assert_eq!(*log.borrow(), vec![format!("cleared {tl}"), "restored".to_string()]);
        assert!(doc.timeline_ids().is_empty());
    }

    #[test]
    fn test_change_media_duration_scale_and_undo() {
        let mut doc = document(10.0);
        let tl = doc.add_timeline(ComponentKind::Marker, "markers").unwrap();
        doc.edit(tl, "create", |t| t.create(ComponentSpec::marker(4.0))).unwrap();

        doc.change_media_duration(20.0, DurationPolicy::Scale).unwrap();
        assert_eq!(times(&doc, tl), vec![8.0]);
        assert_eq!(doc.media_duration(), 20.0);

        doc.undo().unwrap();
        assert_eq!(times(&doc, tl), vec![4.0]);
        assert_eq!(doc.media_duration(), 10.0);
    }

    #[test]
    fn test_change_media_duration_crop_and_keep() {
        let mut doc = document(10.0);
        let tl = doc.add_timeline(ComponentKind::Marker, "markers").unwrap();
        for time in [2.0, 6.0, 9.0] {
            doc.edit(tl, "create", |t| t.create(ComponentSpec::marker(time))).unwrap();
        }

        doc.change_media_duration(8.0, DurationPolicy::Keep).unwrap();
        assert_eq!(times(&doc, tl), vec![2.0, 6.0, 9.0]);

        doc.change_media_duration(5.0, DurationPolicy::Crop).unwrap();
        assert_eq!(times(&doc, tl), vec![2.0]);

        assert!(
            doc.change_media_duration(0.0, DurationPolicy::Crop)
                .unwrap_err()
                .is_validation()
        );
    }

    #[test]
    fn test_unknown_timeline() {
        let mut doc = document(10.0);
        let err = doc.remove_timeline(Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Structural(StructuralError::UnknownTimeline(_))
        ));
    }

    #[test]
    fn test_remove_timeline_renumbers() {
        let mut doc = document(10.0);
        let a = doc.add_timeline(ComponentKind::Marker, "a").unwrap();
        let b = doc.add_timeline(ComponentKind::Beat, "b").unwrap();
        doc.remove_timeline(a).unwrap();
        assert_eq!(doc.timeline_ids(), vec![b]);
        assert_eq!(doc.with_timeline(b, |t| t.ordinal).unwrap(), 0);

        doc.undo().unwrap();
        assert_eq!(doc.timeline_ids(), vec![a, b]);
    }

    #[test]
    fn test_drop_releases_bus() {
        let bus = EventBus::new();
        let doc = Document::new(bus.clone(), EditorSettings::default()).unwrap();
        drop(doc);
        assert!(!bus.is_served::<MediaDuration>());
        assert_eq!(bus.listener_count::<RestoreAppState>(), 0);
    }
}
