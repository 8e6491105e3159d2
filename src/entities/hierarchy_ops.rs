//! Structural operations of hierarchy timelines.
//!
//! All of them follow the candidate/commit model of [`Timeline`]: the edit is
//! applied to a copy, the copy is validated as a whole, and only a valid copy
//! replaces the components. Parent/children links are recomputed from
//! geometry on commit, so operations here only place spans and levels.

use log::debug;

use super::component::{Component, ComponentId, ComponentKind};
use super::error::{ModelResult, invalid};
use super::hierarchy::Hierarchy;
use super::timeline::{Candidate, Timeline};
use crate::core::AskYesOrNo;

/// Which end of a hierarchy a drag acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

impl Timeline {
    /// Shift the level of every selected hierarchy by `delta`.
    pub fn change_level(&mut self, ids: &[ComponentId], delta: i32) -> ModelResult<()> {
        self.require(ComponentKind::Hierarchy, "change_level")?;
        if ids.is_empty() {
            return invalid("No hierarchy selected");
        }
        let mut candidate = self.candidate();
        for &id in ids {
            let level = i64::from(self.hierarchy(id)?.level) + i64::from(delta);
            if level < 1 {
                return invalid("Level can't be lower than 1");
            }
            if let Some(h) = candidate.get_mut(&id).and_then(Component::as_hierarchy_mut) {
                h.level = u32::try_from(level).unwrap_or(u32::MAX);
            }
        }
        self.check(&candidate)?;
        debug!("timeline {}: change level of {} by {}", self.id(), ids.len(), delta);
        self.commit(candidate)
    }

    /// Create a parent one level above a contiguous same-level selection.
    pub fn group(&mut self, ids: &[ComponentId]) -> ModelResult<ComponentId> {
        self.require(ComponentKind::Hierarchy, "group")?;
        if ids.is_empty() {
            return invalid("Select at least one hierarchy to group");
        }
        let selection = self.contiguous_selection(ids, "group")?;
        let (first, last) = (&selection[0], &selection[selection.len() - 1]);

        let parent = Hierarchy::new(
            uuid::Uuid::new_v4(),
            first.start,
            last.end,
            first.level.saturating_add(1),
        );
        let parent_id = parent.id;
        let mut candidate = self.candidate();
        candidate.insert(parent_id, parent.into());

        self.check(&candidate)?;
        debug!("timeline {}: group {} into {}", self.id(), ids.len(), parent_id);
        self.commit(candidate)?;
        Ok(parent_id)
    }

    /// Replace two or more contiguous same-level hierarchies by their union.
    ///
    /// The replacement takes label and pre-start of the first, post-end of
    /// the last.
    pub fn merge(&mut self, ids: &[ComponentId]) -> ModelResult<ComponentId> {
        self.require(ComponentKind::Hierarchy, "merge")?;
        let mut distinct = ids.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < 2 {
            return invalid("Select at least two hierarchies to merge");
        }
        let selection = self.contiguous_selection(ids, "merge")?;
        let (first, last) = (&selection[0], &selection[selection.len() - 1]);

        let mut merged = Hierarchy::new(uuid::Uuid::new_v4(), first.start, last.end, first.level)
            .with_label(first.label.clone());
        merged.pre_start = first.pre_start;
        merged.post_end = last.post_end;
        merged.formal_type = first.formal_type.clone();
        merged.comments = first.comments.clone();
        let merged_id = merged.id;

        let mut candidate = self.candidate();
        for h in &selection {
            candidate.shift_remove(&h.id);
        }
        candidate.insert(merged_id, merged.into());

        self.check(&candidate)?;
        debug!("timeline {}: merge {} into {}", self.id(), ids.len(), merged_id);
        self.commit(candidate)?;
        Ok(merged_id)
    }

    /// Split every hierarchy that strictly contains `time`.
    ///
    /// Returns the (left, right) ids of each split, lowest level first.
    pub fn split(&mut self, time: f64) -> ModelResult<Vec<(ComponentId, ComponentId)>> {
        self.require(ComponentKind::Hierarchy, "split")?;
        let mut targets: Vec<Hierarchy> = self
            .components()
            .filter_map(Component::as_hierarchy)
            .filter(|h| h.contains_strictly(time))
            .cloned()
            .collect();
        if targets.is_empty() {
            return invalid(format!("No hierarchy to split at {time:.3}"));
        }
        targets.sort_by_key(|h| h.level);

        let mut candidate = self.candidate();
        let mut halves = Vec::with_capacity(targets.len());
        for h in targets {
            let (left, right) = split_at(&h, time);
            halves.push((left.id, right.id));
            candidate.shift_remove(&h.id);
            candidate.insert(left.id, left.into());
            candidate.insert(right.id, right.into());
        }

        self.check(&candidate)?;
        debug!("timeline {}: split {} at {}", self.id(), halves.len(), time);
        self.commit(candidate)?;
        Ok(halves)
    }

    /// Create a hierarchy one level below `id`, spanning all of it.
    ///
    /// At level 1 the user is asked whether to raise every hierarchy by one
    /// level first; declining fails the operation.
    pub fn create_child(&mut self, id: ComponentId) -> ModelResult<ComponentId> {
        let parent = self.hierarchy(id)?.clone();
        if !parent.children.is_empty() {
            return invalid("Hierarchy already has children");
        }

        let mut candidate = self.candidate();
        let mut level = parent.level;
        if level == 1 {
            let raise = self.bus().get(AskYesOrNo {
                title: "Create child".into(),
                prompt: "There is no lower level. Raise every hierarchy by one level?".into(),
            })?;
            if !raise {
                return invalid("Can't create a child below level 1");
            }
            raise_all(&mut candidate);
            level += 1;
        }

        let child = Hierarchy::new(uuid::Uuid::new_v4(), parent.start, parent.end, level - 1);
        let child_id = child.id;
        candidate.insert(child_id, child.into());

        self.check(&candidate)?;
        debug!("timeline {}: create child {} of {}", self.id(), child_id, id);
        self.commit(candidate)?;
        Ok(child_id)
    }

    /// Extend the boundary `length` before start. 0 removes the pre-start.
    pub fn add_pre_start(&mut self, id: ComponentId, length: f64) -> ModelResult<()> {
        self.extend(id, Boundary::Start, length)
    }

    /// Extend the boundary `length` after end. 0 removes the post-end.
    pub fn add_post_end(&mut self, id: ComponentId, length: f64) -> ModelResult<()> {
        self.extend(id, Boundary::End, length)
    }

    fn extend(&mut self, id: ComponentId, boundary: Boundary, length: f64) -> ModelResult<()> {
        self.hierarchy(id)?;
        if !(length.is_finite() && length >= 0.0) {
            return invalid(format!("Length can't be negative, got {length}"));
        }
        let mut candidate = self.candidate();
        if let Some(h) = candidate.get_mut(&id).and_then(Component::as_hierarchy_mut) {
            match boundary {
                Boundary::Start => h.pre_start = h.start - length,
                Boundary::End => h.post_end = h.end + length,
            }
        }
        self.check(&candidate)?;
        self.commit(candidate)
    }

    // ========== Dragging ==========

    /// Range a boundary can be dragged in, as `(min, max)`.
    ///
    /// A start may take any value in `[min, max)`, an end any value in
    /// `(min, max]`. Descendants sharing the boundary move with it, so their
    /// neighbours limit the drag too.
    pub fn boundary_limits(&self, id: ComponentId, boundary: Boundary) -> ModelResult<(f64, f64)> {
        let h = self.hierarchy(id)?;
        let chain = self.edge_chain(h, boundary);
        let parent = h.parent.and_then(|p| self.get(p)).and_then(Component::as_hierarchy);

        match boundary {
            Boundary::Start => {
                let mut min = parent.map(|p| p.start).unwrap_or(0.0);
                let mut max = f64::INFINITY;
                for m in &chain {
                    let pre = m.pre_start_length();
                    min = min.max(pre);
                    if let Some(prev) = self.neighbour(m, Boundary::Start) {
                        min = min.max(prev.post_end + pre);
                    }
                    max = max.min(m.end);
                }
                Ok((min, max))
            }
            Boundary::End => {
                let duration = self.media_duration()?;
                let mut min = f64::NEG_INFINITY;
                let mut max = parent.map(|p| p.end).unwrap_or(duration);
                for m in &chain {
                    let post = m.post_end_length();
                    max = max.min(duration - post);
                    if let Some(next) = self.neighbour(m, Boundary::End) {
                        max = max.min(next.pre_start - post);
                    }
                    min = min.max(m.start);
                }
                Ok((min, max))
            }
        }
    }

    /// Drag a boundary to `time`, carrying pre-start/post-end along.
    pub fn move_boundary(&mut self, id: ComponentId, boundary: Boundary, time: f64) -> ModelResult<()> {
        let (min, max) = self.boundary_limits(id, boundary)?;
        let in_range = match boundary {
            Boundary::Start => min <= time && time < max,
            Boundary::End => min < time && time <= max,
        };
        if !in_range {
            return invalid(format!(
                "Boundary can only move between {min:.3} and {max:.3}"
            ));
        }

        let members: Vec<ComponentId> = {
            let h = self.hierarchy(id)?;
            self.edge_chain(h, boundary).iter().map(|m| m.id).collect()
        };
        let mut candidate = self.candidate();
        for member in members {
            if let Some(h) = candidate.get_mut(&member).and_then(Component::as_hierarchy_mut) {
                match boundary {
                    Boundary::Start => h.set_start(time),
                    Boundary::End => h.set_end(time),
                }
            }
        }
        self.check(&candidate)?;
        self.commit(candidate)
    }

    // ========== Helpers ==========

    /// Selected hierarchies sorted by start; same level, each starting where
    /// the previous one ends.
    fn contiguous_selection(&self, ids: &[ComponentId], operation: &str) -> ModelResult<Vec<Hierarchy>> {
        let mut selection = ids
            .iter()
            .map(|&id| self.hierarchy(id).cloned())
            .collect::<ModelResult<Vec<_>>>()?;
        selection.sort_by(|a, b| a.start.total_cmp(&b.start));
        selection.dedup_by_key(|h| h.id);

        let level = selection[0].level;
        if selection.iter().any(|h| h.level != level) {
            return invalid(format!("Can't {operation} hierarchies of different levels"));
        }
        if selection.windows(2).any(|w| w[1].start != w[0].end) {
            return invalid(format!("Can't {operation} hierarchies that are not contiguous"));
        }
        Ok(selection)
    }

    /// `h` plus every descendant sharing its start (or end).
    fn edge_chain<'a>(&'a self, h: &'a Hierarchy, boundary: Boundary) -> Vec<&'a Hierarchy> {
        let mut chain = vec![h];
        let mut current = h;
        loop {
            let next = current
                .children
                .iter()
                .filter_map(|c| self.get(*c).and_then(Component::as_hierarchy))
                .find(|c| match boundary {
                    Boundary::Start => c.start == current.start,
                    Boundary::End => c.end == current.end,
                });
            match next {
                Some(next) => {
                    chain.push(next);
                    current = next;
                }
                None => break chain,
            }
        }
    }

    /// Closest same-level hierarchy before (Start) or after (End) `h`.
    fn neighbour(&self, h: &Hierarchy, side: Boundary) -> Option<&Hierarchy> {
        let same_level = self
            .components()
            .filter_map(Component::as_hierarchy)
            .filter(|o| o.level == h.level && o.id != h.id);
        match side {
            Boundary::Start => same_level
                .filter(|o| o.end <= h.start)
                .max_by(|a, b| a.end.total_cmp(&b.end)),
            Boundary::End => same_level
                .filter(|o| o.start >= h.end)
                .min_by(|a, b| a.start.total_cmp(&b.start)),
        }
    }
}

fn split_at(h: &Hierarchy, time: f64) -> (Hierarchy, Hierarchy) {
    let mut left = Hierarchy::new(uuid::Uuid::new_v4(), h.start, time, h.level)
        .with_label(h.label.clone());
    left.pre_start = h.pre_start;
    left.formal_type = h.formal_type.clone();
    left.comments = h.comments.clone();

    let mut right = Hierarchy::new(uuid::Uuid::new_v4(), time, h.end, h.level)
        .with_label(h.label.clone());
    right.post_end = h.post_end;
    right.formal_type = h.formal_type.clone();
    right.comments = h.comments.clone();

    (left, right)
}

fn raise_all(candidate: &mut Candidate) {
    for h in candidate.values_mut().filter_map(Component::as_hierarchy_mut) {
        h.level = h.level.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BusError, EventBus, OwnerId};
    use crate::entities::error::ModelError;
    use crate::entities::timeline::tests::{collect, timeline};
    use crate::entities::timeline_events::{ComponentDeleted, TimelineHeightChanged};
    use crate::config::MAX_LEVEL;
    use crate::entities::ComponentSpec;

    fn hierarchies(spans: &[(f64, f64, u32)]) -> (Timeline, Vec<ComponentId>) {
        let mut tl = timeline(ComponentKind::Hierarchy, 100.0);
        let ids = spans
            .iter()
            .map(|&(s, e, l)| tl.create(ComponentSpec::hierarchy(s, e, l)).unwrap())
            .collect();
        (tl, ids)
    }

    fn answer(bus: &EventBus, yes: bool) {
        bus.serve::<AskYesOrNo, _>(OwnerId::new(), move |_| Ok(yes));
    }

    #[test]
    fn test_group_adjacent() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (10.0, 25.0, 1), (25.0, 30.0, 1)]);
        let parent = tl.group(&[ids[1], ids[0]]).unwrap();

        let p = tl.hierarchy(parent).unwrap();
        assert_eq!((p.start, p.end, p.level), (0.0, 25.0, 2));
        assert_eq!(p.children, vec![ids[0], ids[1]]);
        assert_eq!(tl.hierarchy(ids[0]).unwrap().parent, Some(parent));
        assert_eq!(tl.hierarchy(ids[2]).unwrap().parent, None);
    }

    #[test]
    fn test_group_failures() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (10.0, 20.0, 1), (30.0, 40.0, 1), (50.0, 60.0, 2)]);

        assert!(tl.group(&[]).unwrap_err().is_validation());
        // gap between 20 and 30
        assert!(tl.group(&[ids[1], ids[2]]).unwrap_err().is_validation());
        assert!(tl.group(&[ids[2], ids[3]]).unwrap_err().is_validation());

        // a level-2 parent already covers part of the selection
        tl.group(&[ids[0]]).unwrap();
        assert!(tl.group(&[ids[0], ids[1]]).unwrap_err().is_validation());
        assert_eq!(tl.len(), 5);
    }

    #[test]
    fn test_merge_keeps_first_label_and_outer_extensions() {
        let (mut tl, ids) = hierarchies(&[(2.0, 10.0, 1), (10.0, 20.0, 1)]);
        tl.set_label(ids[0], "A").unwrap();
        tl.set_label(ids[1], "B").unwrap();
        tl.add_pre_start(ids[0], 1.0).unwrap();
        tl.add_post_end(ids[1], 3.0).unwrap();

        let merged = tl.merge(&ids).unwrap();
        let m = tl.hierarchy(merged).unwrap();
        assert_eq!((m.pre_start, m.start, m.end, m.post_end), (1.0, 2.0, 20.0, 23.0));
        assert_eq!(m.label, "A");
        assert_eq!(tl.len(), 1);

        let (mut other, single) = hierarchies(&[(0.0, 10.0, 1)]);
        assert!(other.merge(&single).unwrap_err().is_validation());
    }

    #[test]
    fn test_merge_counts_distinct_hierarchies() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (10.0, 20.0, 1)]);
        let deleted = collect::<ComponentDeleted>(tl.bus());

        assert!(tl.merge(&[ids[0], ids[0]]).unwrap_err().is_validation());
        assert_eq!(tl.len(), 2);
        assert!(tl.get(ids[0]).is_some());
        assert!(deleted.borrow().is_empty());

        // duplicates alongside a real pair are harmless
        tl.merge(&[ids[0], ids[1], ids[0]]).unwrap();
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn test_split_every_containing_level() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (0.0, 10.0, 2)]);
        tl.set_label(ids[0], "verse").unwrap();
        tl.add_pre_start(ids[0], 0.0).unwrap();
        let deleted = collect::<ComponentDeleted>(tl.bus());

        let halves = tl.split(4.0).unwrap();
        assert_eq!(halves.len(), 2);
        assert_eq!(deleted.borrow().len(), 2);
        assert_eq!(tl.len(), 4);

        let (left, right) = halves[0];
        let (l, r) = (tl.hierarchy(left).unwrap(), tl.hierarchy(right).unwrap());
        assert_eq!((l.start, l.end, r.start, r.end), (0.0, 4.0, 4.0, 10.0));
        assert_eq!((l.label.as_str(), r.label.as_str()), ("verse", "verse"));

        // nesting survives: each lower half has an upper half as parent
        let (upper_left, upper_right) = halves[1];
        assert_eq!(l.parent, Some(upper_left));
        assert_eq!(r.parent, Some(upper_right));

        assert!(tl.split(4.0).unwrap_err().is_validation());
        assert!(tl.split(50.0).unwrap_err().is_validation());
    }

    #[test]
    fn test_split_extensions_go_to_outer_halves() {
        let (mut tl, ids) = hierarchies(&[(5.0, 10.0, 1)]);
        tl.add_pre_start(ids[0], 2.0).unwrap();
        tl.add_post_end(ids[0], 1.0).unwrap();

        let (left, right) = tl.split(7.0).unwrap()[0];
        let l = tl.hierarchy(left).unwrap();
        let r = tl.hierarchy(right).unwrap();
        assert_eq!((l.pre_start, l.post_end), (3.0, 7.0));
        assert_eq!((r.pre_start, r.post_end), (7.0, 11.0));
    }

    #[test]
    fn test_create_child_above_level_one() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 3)]);
        let child = tl.create_child(ids[0]).unwrap();
        let c = tl.hierarchy(child).unwrap();
        assert_eq!((c.start, c.end, c.level), (0.0, 10.0, 2));
        assert_eq!(c.parent, Some(ids[0]));
        assert!(tl.create_child(ids[0]).unwrap_err().is_validation());
    }

    #[test]
    fn test_create_child_at_level_one_asks() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (10.0, 20.0, 1)]);

        let err = tl.create_child(ids[0]).unwrap_err();
        assert!(matches!(err, ModelError::Protocol(BusError::NoResponder { .. })));

        answer(tl.bus(), false);
        assert!(tl.create_child(ids[0]).unwrap_err().is_validation());
        assert_eq!(tl.hierarchy(ids[0]).unwrap().level, 1);

        answer(tl.bus(), true);
        let child = tl.create_child(ids[0]).unwrap();
        assert_eq!(tl.hierarchy(child).unwrap().level, 1);
        assert_eq!(tl.hierarchy(ids[0]).unwrap().level, 2);
        assert_eq!(tl.hierarchy(ids[1]).unwrap().level, 2);
    }

    #[test]
    fn test_pre_start_and_post_end_bounds() {
        let (mut tl, ids) = hierarchies(&[(5.0, 95.0, 1)]);
        tl.add_pre_start(ids[0], 5.0).unwrap();
        tl.add_post_end(ids[0], 5.0).unwrap();
        let h = tl.hierarchy(ids[0]).unwrap();
        assert_eq!((h.pre_start, h.start, h.end, h.post_end), (0.0, 5.0, 95.0, 100.0));

        assert!(tl.add_pre_start(ids[0], 6.0).unwrap_err().is_validation());
        assert!(tl.add_post_end(ids[0], 6.0).unwrap_err().is_validation());
        assert!(tl.add_post_end(ids[0], -1.0).unwrap_err().is_validation());
        assert_eq!(tl.hierarchy(ids[0]).unwrap().post_end, 100.0);
    }

    #[test]
    fn test_change_level() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (0.0, 20.0, 2)]);
        let heights = collect::<TimelineHeightChanged>(tl.bus());

        assert!(tl.change_level(&[ids[0]], -1).unwrap_err().is_validation());
        // would reach level 2 inside a level-2 span
        assert!(tl.change_level(&[ids[0]], 1).unwrap_err().is_validation());

        tl.change_level(&[ids[1]], 2).unwrap();
        assert_eq!(tl.hierarchy(ids[1]).unwrap().level, 4);
        assert_eq!(tl.hierarchy(ids[0]).unwrap().parent, None);
        assert!(heights.borrow().iter().any(|e| e.height >= 110));
        assert_eq!(tl.height(), 110);
    }

    #[test]
    fn test_level_is_capped() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1)]);
        let heights = collect::<TimelineHeightChanged>(tl.bus());

        let err = tl.change_level(&[ids[0]], 200_000_000).unwrap_err();
        assert!(err.reason().unwrap_or_default().contains("higher than"));
        assert!(tl.change_level(&[ids[0]], i32::MAX).unwrap_err().is_validation());
        assert_eq!(tl.hierarchy(ids[0]).unwrap().level, 1);
        assert!(heights.borrow().is_empty());

        let (mut top, ids) = hierarchies(&[(0.0, 10.0, MAX_LEVEL)]);
        assert!(top.group(&ids).unwrap_err().is_validation());
        assert!(top.change_level(&ids, 1).unwrap_err().is_validation());
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_hierarchy_ops_need_hierarchy_timeline() {
        let mut tl = timeline(ComponentKind::Marker, 10.0);
        assert!(matches!(
            tl.split(1.0).unwrap_err(),
            ModelError::Structural(_)
        ));
    }

    #[test]
    fn test_boundary_limits_and_move() {
        let (mut tl, ids) = hierarchies(&[(0.0, 10.0, 1), (10.0, 20.0, 1), (30.0, 40.0, 1)]);
        let (min, max) = tl.boundary_limits(ids[1], Boundary::End).unwrap();
        assert_eq!((min, max), (10.0, 30.0));

        tl.add_pre_start(ids[2], 5.0).unwrap();
        let (_, max) = tl.boundary_limits(ids[1], Boundary::End).unwrap();
        assert_eq!(max, 25.0);

        tl.move_boundary(ids[1], Boundary::End, 22.0).unwrap();
        assert_eq!(tl.hierarchy(ids[1]).unwrap().end, 22.0);
        assert!(tl.move_boundary(ids[1], Boundary::End, 26.0).unwrap_err().is_validation());

        let (min, max) = tl.boundary_limits(ids[1], Boundary::Start).unwrap();
        assert_eq!((min, max), (10.0, 22.0));
    }

    #[test]
    fn test_move_boundary_drags_shared_descendants() {
        let (mut tl, ids) = hierarchies(&[(0.0, 5.0, 1), (5.0, 10.0, 1), (0.0, 10.0, 2)]);
        tl.move_boundary(ids[2], Boundary::End, 12.0).unwrap();
        assert_eq!(tl.hierarchy(ids[2]).unwrap().end, 12.0);
        assert_eq!(tl.hierarchy(ids[1]).unwrap().end, 12.0);
        assert_eq!(tl.hierarchy(ids[0]).unwrap().end, 5.0);
    }
}
