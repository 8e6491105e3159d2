//! Snapshot-based undo/redo manager.
//!
//! Every frame holds a full [`AppState`], not a diff. The top frame is the
//! *current* state: the state owner records a frame after each successful
//! edit, so undoing means restoring the frame below the cursor.
//!
//! ```text
//! record(A) record(B) record(C)      [A, B, C]   cursor -> C
//! undo() undo()                      [A, B, C]   cursor -> A   (posts B, then A)
//! record(D)                          [A, D]      cursor -> D   (B, C discarded)
//! ```
//!
//! Restoring is a single `RestoreAppState` broadcast; the manager never
//! applies state itself.
//!
//! # Coalescing
//!
//! `record_with(.., no_repeat = true, Some(id))` overwrites the top frame
//! instead of pushing when `id` equals the identifier of the previous record.
//! Used for streams of small edits (nudging a boundary with the arrow keys)
//! that should undo in one step.

use log::{debug, trace};

use super::app_events::RestoreAppState;
use super::event_bus::EventBus;
use super::snapshot::AppState;

/// One entry of the undo stack.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoFrame {
    pub state: AppState,
    /// Human-readable action label ("split", "change level", ...)
    pub action: String,
    pub repeat_id: Option<String>,
}

/// Undo stack with a cursor counted from the top.
#[derive(Debug)]
pub struct UndoManager {
    bus: EventBus,
    stack: Vec<UndoFrame>,
    /// Frames above the cursor (0 = cursor at top).
    undone: usize,
    last_repeat_id: Option<String>,
}

impl UndoManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            stack: Vec::new(),
            undone: 0,
            last_repeat_id: None,
        }
    }

    /// Push `state` as a new frame.
    pub fn record(&mut self, state: AppState, action: impl Into<String>) {
        self.record_with(state, action, false, None);
    }

    /// Push `state`, or overwrite the top frame when coalescing applies.
    pub fn record_with(
        &mut self,
        state: AppState,
        action: impl Into<String>,
        no_repeat: bool,
        repeat_id: Option<&str>,
    ) {
        self.discard_undone();
        let action = action.into();

        let coalesce = no_repeat
            && repeat_id.is_some()
            && repeat_id == self.last_repeat_id.as_deref()
            && !self.stack.is_empty();

        if coalesce {
            // coalesce implies a non-empty stack
            if let Some(top) = self.stack.last_mut() {
                trace!("coalesce '{}' into '{}'", action, top.action);
                top.state = state;
            }
        } else {
            debug!("record '{}' (depth {})", action, self.stack.len() + 1);
            self.stack.push(UndoFrame {
                state,
                action,
                repeat_id: repeat_id.map(str::to_string),
            });
        }

        if let Some(id) = repeat_id {
            self.last_repeat_id = Some(id.to_string());
        }
    }

    /// Restore the frame below the cursor. Returns false at the bottom.
    ///
    /// If the restore broadcast fails the cursor stays where it was.
    pub fn undo(&mut self) -> anyhow::Result<bool> {
        if !self.can_undo() {
            trace!("undo: nothing to undo");
            return Ok(false);
        }
        let target = self.cursor_index() - 1;
        debug!("undo '{}'", self.stack[target + 1].action);
        self.bus.post(RestoreAppState(self.stack[target].state.clone()))?;
        self.undone += 1;
        Ok(true)
    }

    /// Restore the frame above the cursor. Returns false at the top.
    pub fn redo(&mut self) -> anyhow::Result<bool> {
        if !self.can_redo() {
            trace!("redo: nothing to redo");
            return Ok(false);
        }
        let target = self.cursor_index() + 1;
        debug!("redo '{}'", self.stack[target].action);
        self.bus.post(RestoreAppState(self.stack[target].state.clone()))?;
        self.undone -= 1;
        Ok(true)
    }

    /// Drop every frame above the cursor and move the cursor to the top.
    pub fn discard_undone(&mut self) {
        if self.undone > 0 {
            let keep = self.stack.len() - self.undone;
            trace!("discard {} undone frame(s)", self.undone);
            self.stack.truncate(keep);
            self.undone = 0;
        }
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.undone = 0;
        self.last_repeat_id = None;
        debug!("undo history cleared");
    }

    pub fn can_undo(&self) -> bool {
        self.stack.len() > 1 && self.undone < self.stack.len() - 1
    }

    pub fn can_redo(&self) -> bool {
        self.undone > 0
    }

    /// Label of the action the next `undo()` reverts.
    pub fn undo_label(&self) -> Option<&str> {
        if self.can_undo() {
            Some(self.stack[self.cursor_index()].action.as_str())
        } else {
            None
        }
    }

    /// Label of the action the next `redo()` re-applies.
    pub fn redo_label(&self) -> Option<&str> {
        if self.can_redo() {
            Some(self.stack[self.cursor_index() + 1].action.as_str())
        } else {
            None
        }
    }

    /// Frame under the cursor.
    pub fn current(&self) -> Option<&UndoFrame> {
        if self.stack.is_empty() {
            None
        } else {
            self.stack.get(self.cursor_index())
        }
    }

    pub fn frames(&self) -> &[UndoFrame] {
        &self.stack
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Index of the cursor from the bottom. Only meaningful on a non-empty stack.
    fn cursor_index(&self) -> usize {
        self.stack.len() - 1 - self.undone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::OwnerId;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn state(tag: &str) -> AppState {
        AppState {
            media_path: format!("{tag}.ogg"),
            timelines: json!([{ "tag": tag }]),
            ..AppState::default()
        }
    }

    /// Manager plus a log of every restored media_path.
    fn manager() -> (UndoManager, Rc<RefCell<Vec<String>>>) {
        let bus = EventBus::new();
        let restored = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&restored);
        bus.listen::<RestoreAppState, _>(OwnerId::new(), move |e| {
            r.borrow_mut().push(e.0.media_path.clone());
            Ok(())
        });
        (UndoManager::new(bus), restored)
    }

    fn paths(m: &UndoManager) -> Vec<String> {
        m.frames().iter().map(|f| f.state.media_path.clone()).collect()
    }

    #[test]
    fn test_record_with_distinct_ids_pushes_every_call() {
        let (mut m, _) = manager();
        for i in 0..5 {
            let id = format!("id{i}");
            m.record_with(state(&i.to_string()), "edit", true, Some(&id));
        }
        assert_eq!(m.len(), 5);
    }

    #[test]
    fn test_undo_redo_posts_neighbour_frames() {
        let (mut m, restored) = manager();
        m.record(state("a"), "load");
        m.record(state("b"), "create");
        m.record(state("c"), "split");

        assert_eq!(m.undo_label(), Some("split"));
        assert!(m.undo().unwrap());
        assert!(m.undo().unwrap());
        assert!(!m.undo().unwrap());
        assert_eq!(*restored.borrow(), vec!["b.ogg", "a.ogg"]);

        assert_eq!(m.redo_label(), Some("create"));
        assert!(m.redo().unwrap());
        assert!(m.redo().unwrap());
        assert!(!m.redo().unwrap());
        assert_eq!(*restored.borrow(), vec!["b.ogg", "a.ogg", "b.ogg", "c.ogg"]);
    }

    #[test]
    fn test_undo_then_redo_restores_identical_state() {
        let (mut m, _) = manager();
        m.record(state("a"), "load");
        m.record(state("b"), "edit");
        let before = m.current().unwrap().state.clone();

        m.undo().unwrap();
        m.redo().unwrap();
        assert_eq!(m.current().unwrap().state, before);
    }

    #[test]
    fn test_record_after_undo_discards_redo_branch() {
        let (mut m, _) = manager();
        m.record(state("A"), "a");
        m.record(state("B"), "b");
        m.record(state("C"), "c");
        m.undo().unwrap();
        m.undo().unwrap();

        m.record(state("D"), "d");
        assert_eq!(paths(&m), vec!["A.ogg", "D.ogg"]);
        assert!(!m.can_redo());
    }

    #[test]
    fn test_coalescing_overwrites_top_frame() {
        let (mut m, _) = manager();
        m.record(state("base"), "load");
        m.record_with(state("s1"), "x", true, Some("k"));
        m.record_with(state("s2"), "x", true, Some("k"));

        assert_eq!(paths(&m), vec!["base.ogg", "s2.ogg"]);
    }

    #[test]
    fn test_no_coalescing_without_no_repeat() {
        let (mut m, _) = manager();
        m.record_with(state("s1"), "x", false, Some("k"));
        m.record_with(state("s2"), "x", false, Some("k"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_coalescing_on_empty_stack_pushes() {
        let (mut m, _) = manager();
        m.record_with(state("s1"), "x", true, Some("k"));
        m.clear();
        m.record_with(state("s2"), "x", true, Some("k"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_boundaries_are_noops() {
        let (mut m, restored) = manager();
        assert!(!m.undo().unwrap());
        assert!(!m.redo().unwrap());

        m.record(state("only"), "load");
        assert!(!m.undo().unwrap());
        assert!(!m.redo().unwrap());
        assert!(restored.borrow().is_empty());
    }

    #[test]
    fn test_failed_restore_keeps_cursor() {
        let bus = EventBus::new();
        bus.listen::<RestoreAppState, _>(OwnerId::new(), |_| anyhow::bail!("corrupt"));
        let mut m = UndoManager::new(bus);
        m.record(state("a"), "a");
        m.record(state("b"), "b");

        assert!(m.undo().is_err());
        assert_eq!(m.current().unwrap().state.media_path, "b.ogg");
        assert!(!m.can_redo());
    }

    #[test]
    fn test_clear_resets() {
        let (mut m, _) = manager();
        m.record(state("a"), "a");
        m.record(state("b"), "b");
        m.undo().unwrap();
        m.clear();

        assert!(m.is_empty());
        assert!(!m.can_undo());
        assert!(!m.can_redo());
        assert!(m.current().is_none());
    }
}
