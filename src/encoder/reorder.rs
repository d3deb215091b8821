//! Frame reordering buffer for one golden-frame group.
//!
//! Frames arrive in display order but leave in the order the group's
//! [`GroupPlan`] dictates. For a group with a trailing AltRef every frame of
//! the group has to be buffered before the first one can leave, because the
//! AltRef (the last frame in display order) is encoded right after the golden
//! frame:
//! - Push order: G(0) 1 2 3 4 5 6 7
//! - Pop order:  G(0) 7 3 1 2 R(3) 4 5 6 R(7)
//!
//! Flat groups pop one frame per push.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::dpb::ReferenceListManager;
use super::frame::{FrameArena, FrameId};
use super::gop::{GroupPlan, PlanEntry};
use crate::error::{GopError, Result};

/// How a group's golden frame enters the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupHead {
    /// The golden frame is a new input (key or intra-only) that still has to be encoded.
    Fresh(FrameId),
    /// The golden frame was encoded by the previous group and lives in the reference list.
    Carried(FrameId),
}

/// A frame leaving the reorder queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoppedFrame {
    /// Frame to encode, or to show again for a repeat.
    pub id: FrameId,
    /// Index of the plan slot this pop consumed.
    pub plan_index: usize,
    /// The plan slot itself.
    pub entry: PlanEntry,
}

impl PoppedFrame {
    /// Whether this pop re-emits an already encoded frame.
    pub fn is_repeat(&self) -> bool {
        self.entry.is_repeat()
    }
}

/// Reorder buffer driven by one group plan.
#[derive(Debug)]
pub struct ReorderQueue {
    plan: GroupPlan,
    head: GroupHead,
    /// Frames pushed but not yet popped, in display order.
    queue: VecDeque<FrameId>,
    /// frame_num of the last pushed frame (the golden frame counts as pushed).
    last_pushed_num: u32,
    /// Frames pushed so far, golden frame included.
    pushed_count: u32,
    /// Index of the last consumed plan slot (-1 if none).
    last_popped_index: i32,
}

impl ReorderQueue {
    /// Start a group with `plan`, headed by `head`.
    pub fn new(plan: GroupPlan, head: GroupHead) -> Self {
        let (queue, last_popped_index) = match head {
            GroupHead::Fresh(id) => (VecDeque::from([id]), -1),
            // Slot 0 was produced as part of the previous group.
            GroupHead::Carried(_) => (VecDeque::new(), 0),
        };

        debug!(
            "Start group at frame_num {}: size={}, backward={}, highest_level={}, head={:?}",
            plan.start_offset(),
            plan.size(),
            plan.uses_backward_ref(),
            plan.highest_level(),
            head
        );

        Self {
            last_pushed_num: plan.start_offset(),
            plan,
            head,
            queue,
            pushed_count: 1,
            last_popped_index,
        }
    }

    /// The plan driving this queue.
    pub fn plan(&self) -> &GroupPlan {
        &self.plan
    }

    /// How the golden frame entered this group.
    pub fn head(&self) -> GroupHead {
        self.head
    }

    /// Frames pushed so far, golden frame included.
    pub fn pushed_count(&self) -> u32 {
        self.pushed_count
    }

    /// Frames waiting in the buffer.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Index of the last consumed plan slot (-1 if none).
    pub fn last_popped_index(&self) -> i32 {
        self.last_popped_index
    }

    /// Whether no more frames can be pushed into this group.
    pub fn is_full(&self) -> bool {
        self.pushed_count >= self.plan.size()
    }

    /// Whether every slot of the plan has been consumed.
    pub fn is_finished(&self) -> bool {
        self.next_index() >= self.plan.output_frame_num()
    }

    /// Whether nothing can be popped right now.
    ///
    /// A group can be empty without being finished while it waits for pushes.
    pub fn is_empty(&self) -> bool {
        !self.can_pop()
    }

    /// Append a frame in display order.
    pub fn push(&mut self, id: FrameId, frames: &FrameArena) -> Result<()> {
        let frame_num = frames.get(id)?.frame_num;

        if self.is_full() {
            return Err(GopError::sequence(format!(
                "group at frame_num {} is full ({} frames), cannot push frame_num {}",
                self.plan.start_offset(),
                self.plan.size(),
                frame_num
            )));
        }
        if frame_num != self.last_pushed_num + 1 {
            return Err(GopError::sequence(format!(
                "non-monotonic push: frame_num {} after {}",
                frame_num, self.last_pushed_num
            )));
        }

        self.queue.push_back(id);
        self.last_pushed_num = frame_num;
        self.pushed_count += 1;
        trace!(
            "Pushed frame {} (frame_num {}), {}/{} in group",
            id,
            frame_num,
            self.pushed_count,
            self.plan.size()
        );
        Ok(())
    }

    /// Pop the next frame in encode order, if the plan allows it yet.
    ///
    /// Repeat slots resolve to a frame in `refs`; other slots remove their
    /// frame from the buffer and stamp it with the slot's type, level and flags.
    pub fn pop(
        &mut self,
        frames: &mut FrameArena,
        refs: &ReferenceListManager,
    ) -> Result<Option<PoppedFrame>> {
        if self.is_finished() {
            return Err(GopError::sequence(format!(
                "pop from exhausted group at frame_num {}",
                self.plan.start_offset()
            )));
        }
        if !self.can_pop() {
            return Ok(None);
        }

        let index = self.next_index();
        let entry = *self
            .plan
            .entry(index)
            .ok_or_else(|| GopError::sequence(format!("no plan slot {index}")))?;
        let target = self.plan.start_offset() + entry.frame_offset;

        let id = if entry.is_repeat() {
            refs.find_by_frame_num(frames, target).ok_or_else(|| {
                GopError::sequence(format!(
                    "repeat target frame_num {target} is not in the reference list"
                ))
            })?
        } else {
            let position = self
                .queue
                .iter()
                .position(|&id| frames.get(id).is_ok_and(|f| f.frame_num == target))
                .ok_or_else(|| {
                    GopError::sequence(format!("frame_num {target} is not in the reorder queue"))
                })?;
            let id = self.queue.remove(position).ok_or_else(|| {
                GopError::sequence(format!("reorder queue lost frame_num {target}"))
            })?;

            let record = frames.get_mut(id)?;
            record.frame_type = entry.frame_type;
            record.pyramid_level = entry.pyramid_level;
            record.flags = entry.flags;
            id
        };

        self.last_popped_index = index as i32;
        trace!(
            "Popped plan slot {} -> frame_num {} ({:?}, level {})",
            index,
            target,
            entry.frame_type,
            entry.pyramid_level
        );

        Ok(Some(PoppedFrame {
            id,
            plan_index: index,
            entry,
        }))
    }

    /// Cut the group short at the frames pushed so far.
    ///
    /// The plan is rebuilt for `pushed_count` frames, dropping to a flat plan
    /// when too few frames arrived for a trailing AltRef. No-op for a full group.
    pub fn finish_early(&mut self) {
        if self.is_full() {
            return;
        }
        debug!(
            "Finish group at frame_num {} early: {} of {} frames pushed",
            self.plan.start_offset(),
            self.pushed_count,
            self.plan.size()
        );
        self.plan = self.plan.truncated(self.pushed_count);
    }

    /// Remove every frame still buffered.
    pub fn drain(&mut self) -> Vec<FrameId> {
        self.queue.drain(..).collect()
    }

    /// Whether `id` is waiting in the buffer.
    pub fn contains(&self, id: FrameId) -> bool {
        self.queue.contains(&id)
    }

    fn next_index(&self) -> usize {
        (self.last_popped_index + 1) as usize
    }

    fn can_pop(&self) -> bool {
        let Some(entry) = self.plan.entry(self.next_index()) else {
            return false;
        };
        // The trailing AltRef is the last frame in display order.
        if self.plan.uses_backward_ref() && !self.is_full() {
            return false;
        }
        entry.is_repeat() || self.plan.start_offset() + entry.frame_offset <= self.last_pushed_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::frame::{FrameFlags, FrameRecord, FrameType};

    fn arena_with(frame_nums: std::ops::Range<u32>) -> FrameArena {
        let mut arena = FrameArena::new();
        for n in frame_nums {
            arena.insert(FrameRecord::new(n as u64, n)).unwrap();
        }
        arena
    }

    /// Pops everything and stores each encoded frame in `refs` like the scheduler does.
    fn pop_all(
        queue: &mut ReorderQueue,
        frames: &mut FrameArena,
        refs: &mut ReferenceListManager,
    ) -> Vec<(u64, bool)> {
        let mut out = Vec::new();
        while !queue.is_finished() {
            let popped = queue.pop(frames, refs).unwrap().expect("pop blocked");
            if !popped.is_repeat() {
                let slot = refs.find_slot_to_evict(frames, popped.id).unwrap();
                frames.get_mut(popped.id).unwrap().update_index = slot;
                refs.update(frames, popped.id).unwrap();
            }
            out.push((popped.id, popped.is_repeat()));
        }
        out
    }

    #[test]
    fn test_flat_group_pops_per_push() {
        let mut frames = arena_with(0..4);
        let refs = ReferenceListManager::new(4);
        let plan = GroupPlan::build(0, 4, FrameType::Key, 2, false);
        let mut queue = ReorderQueue::new(plan, GroupHead::Fresh(0));

        let key = queue.pop(&mut frames, &refs).unwrap().unwrap();
        assert_eq!(key.id, 0);
        assert_eq!(frames.get(0).unwrap().frame_type, FrameType::Key);
        assert!(queue.is_empty());
        assert!(!queue.is_finished());

        for n in 1..4u64 {
            queue.push(n, &frames).unwrap();
            let popped = queue.pop(&mut frames, &refs).unwrap().unwrap();
            assert_eq!(popped.id, n);
            if !queue.is_finished() {
                assert_eq!(queue.pop(&mut frames, &refs).unwrap(), None);
            }
        }
        assert!(queue.is_finished());
        assert!(frames.get(3).unwrap().flags.contains(FrameFlags::LAST_IN_GROUP));
    }

    #[test]
    fn test_backward_group_waits_for_altref() {
        let mut frames = arena_with(0..8);
        let mut refs = ReferenceListManager::new(8);
        let plan = GroupPlan::build(0, 8, FrameType::Key, 3, true);
        let mut queue = ReorderQueue::new(plan, GroupHead::Fresh(0));

        assert!(queue.is_empty());
        assert_eq!(queue.pop(&mut frames, &refs).unwrap(), None);
        for n in 1..7u64 {
            queue.push(n, &frames).unwrap();
            assert!(queue.is_empty());
        }
        queue.push(7, &frames).unwrap();
        assert!(queue.is_full());
        assert!(!queue.is_empty());

        let order = pop_all(&mut queue, &mut frames, &mut refs);
        assert_eq!(
            order,
            vec![
                (0, false),
                (7, false),
                (3, false),
                (1, false),
                (2, false),
                (3, true),
                (4, false),
                (5, false),
                (6, false),
                (7, true),
            ]
        );
        assert!(frames.get(7).unwrap().flags.contains(FrameFlags::NOT_SHOWN));
        assert_eq!(frames.get(3).unwrap().pyramid_level, 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_push_rejects_gaps_and_overflow() {
        let frames = arena_with(0..4);
        let plan = GroupPlan::build(0, 2, FrameType::Key, 2, false);
        let mut queue = ReorderQueue::new(plan, GroupHead::Fresh(0));

        let err = queue.push(2, &frames).unwrap_err();
        assert!(err.is_sequence());

        queue.push(1, &frames).unwrap();
        let err = queue.push(2, &frames).unwrap_err();
        assert!(err.is_sequence());
    }

    #[test]
    fn test_carried_golden_skips_slot_zero() {
        // Golden frame 7 was encoded by the previous group.
        let mut frames = FrameArena::new();
        for n in 7..11u32 {
            frames.insert(FrameRecord::new(n as u64, n)).unwrap();
        }
        let refs = ReferenceListManager::new(4);
        let plan = GroupPlan::build(7, 4, FrameType::Inter, 2, false);
        let mut queue = ReorderQueue::new(plan, GroupHead::Carried(7));

        assert_eq!(queue.last_popped_index(), 0);
        assert!(queue.is_empty());
        queue.push(8, &frames).unwrap();
        let popped = queue.pop(&mut frames, &refs).unwrap().unwrap();
        assert_eq!(popped.id, 8);
        assert_eq!(popped.plan_index, 1);
    }

    #[test]
    fn test_finish_early_falls_back_to_flat() {
        let mut frames = arena_with(0..3);
        let mut refs = ReferenceListManager::new(8);
        let plan = GroupPlan::build(0, 8, FrameType::Key, 3, true);
        let mut queue = ReorderQueue::new(plan, GroupHead::Fresh(0));
        queue.push(1, &frames).unwrap();
        queue.push(2, &frames).unwrap();
        assert!(queue.is_empty());

        queue.finish_early();
        assert!(!queue.plan().uses_backward_ref());
        assert_eq!(queue.plan().size(), 3);

        let order = pop_all(&mut queue, &mut frames, &mut refs);
        assert_eq!(order, vec![(0, false), (1, false), (2, false)]);
    }

    #[test]
    fn test_pop_exhausted_group_is_an_error() {
        let mut frames = arena_with(0..1);
        let refs = ReferenceListManager::new(2);
        let plan = GroupPlan::build(0, 1, FrameType::Key, 2, false);
        let mut queue = ReorderQueue::new(plan, GroupHead::Fresh(0));

        queue.pop(&mut frames, &refs).unwrap().unwrap();
        assert!(queue.is_finished());
        assert!(queue.pop(&mut frames, &refs).unwrap_err().is_sequence());
    }

    #[test]
    fn test_repeat_without_reference_is_an_error() {
        let mut frames = arena_with(0..4);
        let refs = ReferenceListManager::new(4);
        let plan = GroupPlan::build(0, 4, FrameType::Key, 2, true);
        let mut queue = ReorderQueue::new(plan, GroupHead::Fresh(0));
        for n in 1..4u64 {
            queue.push(n, &frames).unwrap();
        }

        // Nothing is ever stored, so the trailing AltRef has no slot to show.
        for expected in [0, 3, 1, 2] {
            let popped = queue.pop(&mut frames, &refs).unwrap().unwrap();
            assert_eq!(popped.id, expected);
            assert!(!popped.is_repeat());
        }
        let err = queue.pop(&mut frames, &refs).unwrap_err();
        assert!(err.is_sequence());
        assert!(err
            .to_string()
            .contains("repeat target frame_num 3 is not in the reference list"));
    }
}
