//! Reference slot management for golden-frame group encoding.
//!
//! This module provides:
//! - A fixed-capacity reference list mapping slot indices to encoded frames,
//!   with golden-frame protection and lowest-frame_num eviction
//! - Reference role assignment for AV1 (seven roles) and VP9 (three roles)
//!
//! Slots hold [`FrameId`]s into the scheduler's [`FrameArena`]; the list never
//! owns frame records.

// Loops in this module use index-based iteration because they need the slot index.
#![allow(clippy::needless_range_loop)]

mod reference_lists;

pub use reference_lists::{RefAssignment, RefIndexAssigner, RefPolicy};

use tracing::trace;

use super::frame::{FrameArena, FrameFlags, FrameId, FrameType};
use crate::error::{GopError, Result};

/// Reference slots defined by AV1 and VP9 (NUM_REF_FRAMES / REF_FRAMES).
pub const NUM_REF_SLOTS: usize = 8;

/// Bounded set of frames usable as prediction references.
#[derive(Debug, Clone)]
pub struct ReferenceListManager {
    /// Slot contents, only the first `capacity` are used.
    slots: [Option<FrameId>; NUM_REF_SLOTS],
    /// Number of usable slots.
    capacity: usize,
}

impl ReferenceListManager {
    /// Create an empty reference list with `capacity` slots (at most [`NUM_REF_SLOTS`]).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: [None; NUM_REF_SLOTS],
            capacity: capacity.min(NUM_REF_SLOTS),
        }
    }

    /// Number of usable slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Usable slots.
    pub fn slots(&self) -> &[Option<FrameId>] {
        &self.slots[..self.capacity]
    }

    /// Frame in slot `index`, if any.
    pub fn slot(&self, index: usize) -> Option<FrameId> {
        self.slots().get(index).copied().flatten()
    }

    /// Occupied slots as `(slot index, frame)` pairs.
    pub fn occupied(&self) -> impl Iterator<Item = (i8, FrameId)> + '_ {
        self.slots()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|id| (i as i8, id)))
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied().count()
    }

    /// Whether every slot is empty.
    pub fn is_empty(&self) -> bool {
        self.slots().iter().all(Option::is_none)
    }

    /// Whether `id` occupies any slot.
    pub fn contains(&self, id: FrameId) -> bool {
        self.slot_of(id).is_some()
    }

    /// Slot holding `id`.
    pub fn slot_of(&self, id: FrameId) -> Option<i8> {
        self.occupied()
            .find(|&(_, slot_id)| slot_id == id)
            .map(|(i, _)| i)
    }

    /// Frame with the given frame_num.
    pub fn find_by_frame_num(&self, frames: &FrameArena, frame_num: u32) -> Option<FrameId> {
        self.occupied()
            .map(|(_, id)| id)
            .find(|&id| frames.get(id).is_ok_and(|f| f.frame_num == frame_num))
    }

    /// The golden frame and its slot.
    pub fn find_golden(&self, frames: &FrameArena) -> Option<(i8, FrameId)> {
        self.occupied().find(|&(_, id)| {
            frames
                .get(id)
                .is_ok_and(|f| f.flags.contains(FrameFlags::GOLDEN))
        })
    }

    /// Number of slots flagged golden.
    pub fn golden_count(&self, frames: &FrameArena) -> usize {
        self.occupied()
            .filter(|&(_, id)| {
                frames
                    .get(id)
                    .is_ok_and(|f| f.flags.contains(FrameFlags::GOLDEN))
            })
            .count()
    }

    /// Promote the golden frame for the next group.
    ///
    /// Picks the frame flagged LAST_IN_GROUP (the highest frame_num if none is),
    /// clears stale group flags on every slot and marks the pick golden.
    pub fn find_next_golden(&self, frames: &mut FrameArena) -> Result<FrameId> {
        let mut last_in_group: Option<(u32, FrameId)> = None;
        let mut highest: Option<(u32, FrameId)> = None;

        for i in 0..self.capacity {
            let Some(id) = self.slots[i] else {
                continue;
            };
            let frame = frames.get(id)?;
            let key = (frame.frame_num, id);
            if frame.flags.contains(FrameFlags::LAST_IN_GROUP) && last_in_group.is_none_or(|k| key > k) {
                last_in_group = Some(key);
            }
            if highest.is_none_or(|k| key > k) {
                highest = Some(key);
            }
        }

        let (_, golden) = last_in_group.or(highest).ok_or_else(|| {
            GopError::sequence("no frame in the reference list to serve as golden frame")
        })?;

        for i in 0..self.capacity {
            if let Some(id) = self.slots[i] {
                frames.get_mut(id)?.flags.remove(
                    FrameFlags::LAST_IN_GROUP | FrameFlags::ALT_REF | FrameFlags::GOLDEN,
                );
            }
        }
        frames.get_mut(golden)?.flags.insert(FrameFlags::GOLDEN);

        let golden_count = self.golden_count(frames);
        if golden_count != 1 {
            return Err(GopError::sequence(format!(
                "{golden_count} golden frames after promoting frame {golden}"
            )));
        }

        trace!("Promoted frame {} to golden", golden);
        Ok(golden)
    }

    /// Slot `candidate` would occupy once encoded, -1 if it cannot become a reference.
    ///
    /// An empty slot is preferred; otherwise the non-golden frame with the lowest
    /// frame_num not above the candidate's is evicted. Golden frames are never evicted.
    pub fn find_slot_to_evict(&self, frames: &FrameArena, candidate: FrameId) -> Result<i8> {
        let candidate_num = frames.get(candidate)?.frame_num;
        let mut victim: Option<(u32, i8)> = None;

        for i in 0..self.capacity {
            let Some(id) = self.slots[i] else {
                return Ok(i as i8);
            };
            let frame = frames.get(id)?;
            if frame.flags.contains(FrameFlags::GOLDEN) || frame.frame_num > candidate_num {
                continue;
            }
            if victim.is_none_or(|(num, _)| frame.frame_num < num) {
                victim = Some((frame.frame_num, i as i8));
            }
        }

        Ok(victim.map_or(-1, |(_, slot)| slot))
    }

    /// Store an encoded frame in its `update_index` slot.
    ///
    /// A key frame empties every slot first. A frame with a negative
    /// `update_index` leaves the list untouched. Returns the evicted frame.
    pub fn update(&mut self, frames: &mut FrameArena, id: FrameId) -> Result<Option<FrameId>> {
        let frame = frames.get_mut(id)?;
        frame.flags.insert(FrameFlags::ALREADY_ENCODED);
        let frame_type = frame.frame_type;
        let update_index = frame.update_index;

        if frame_type == FrameType::Key {
            self.clear();
        }
        if update_index < 0 {
            trace!("Frame {} is not a reference", id);
            return Ok(None);
        }

        let slot = update_index as usize;
        if slot >= self.capacity {
            return Err(GopError::sequence(format!(
                "update slot {slot} out of range (capacity {})",
                self.capacity
            )));
        }

        let evicted = self.slots[slot].replace(id);
        trace!(
            "Reference slot {} <- frame {} (evicted {:?})",
            slot,
            id,
            evicted
        );
        Ok(evicted.filter(|&old| old != id))
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.slots = [None; NUM_REF_SLOTS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::frame::FrameRecord;

    fn add(frames: &mut FrameArena, id: u64, frame_num: u32, flags: FrameFlags) {
        let mut record = FrameRecord::new(id, frame_num);
        record.flags = flags;
        if frame_num > 0 {
            record.frame_type = FrameType::Inter;
        }
        frames.insert(record).unwrap();
    }

    fn store(refs: &mut ReferenceListManager, frames: &mut FrameArena, id: u64) -> Option<u64> {
        let slot = refs.find_slot_to_evict(frames, id).unwrap();
        frames.get_mut(id).unwrap().update_index = slot;
        refs.update(frames, id).unwrap()
    }

    #[test]
    fn test_key_frame_clears_list() {
        let mut frames = FrameArena::new();
        let mut refs = ReferenceListManager::new(4);
        add(&mut frames, 0, 0, FrameFlags::GOLDEN);
        add(&mut frames, 1, 1, FrameFlags::UPDATE_REF);
        add(&mut frames, 2, 2, FrameFlags::UPDATE_REF);
        for id in 0..3 {
            store(&mut refs, &mut frames, id);
        }
        assert_eq!(refs.len(), 3);

        add(&mut frames, 3, 0, FrameFlags::GOLDEN);
        frames.get_mut(3).unwrap().update_index = 0;
        refs.update(&mut frames, 3).unwrap();

        assert_eq!(refs.len(), 1);
        assert_eq!(refs.slot(0), Some(3));
        assert!(frames.get(3).unwrap().flags.contains(FrameFlags::ALREADY_ENCODED));
    }

    #[test]
    fn test_eviction_spares_golden() {
        let mut frames = FrameArena::new();
        let mut refs = ReferenceListManager::new(2);
        add(&mut frames, 0, 0, FrameFlags::GOLDEN);
        assert_eq!(store(&mut refs, &mut frames, 0), None);

        add(&mut frames, 1, 1, FrameFlags::UPDATE_REF);
        assert_eq!(store(&mut refs, &mut frames, 1), None);

        for n in 2..7u64 {
            add(&mut frames, n, n as u32, FrameFlags::UPDATE_REF);
            assert_eq!(refs.find_slot_to_evict(&frames, n).unwrap(), 1);
            assert_eq!(store(&mut refs, &mut frames, n), Some(n - 1));
            assert_eq!(refs.slot(0), Some(0));
        }
        assert_eq!(refs.golden_count(&frames), 1);
    }

    #[test]
    fn test_no_slot_for_older_candidate() {
        // Slots hold the golden frame and a frame newer than the candidate.
        let mut frames = FrameArena::new();
        let mut refs = ReferenceListManager::new(2);
        add(&mut frames, 0, 0, FrameFlags::GOLDEN);
        add(&mut frames, 7, 7, FrameFlags::ALT_REF | FrameFlags::NOT_SHOWN);
        store(&mut refs, &mut frames, 0);
        store(&mut refs, &mut frames, 7);

        add(&mut frames, 3, 3, FrameFlags::UPDATE_REF);
        assert_eq!(refs.find_slot_to_evict(&frames, 3).unwrap(), -1);
        assert_eq!(store(&mut refs, &mut frames, 3), None);
        assert!(!refs.contains(3));
    }

    #[test]
    fn test_find_next_golden_prefers_last_in_group() {
        let mut frames = FrameArena::new();
        let mut refs = ReferenceListManager::new(4);
        add(&mut frames, 0, 0, FrameFlags::GOLDEN);
        add(&mut frames, 8, 8, FrameFlags::ALT_REF | FrameFlags::LAST_IN_GROUP);
        add(&mut frames, 6, 6, FrameFlags::LEAF);
        for id in [0, 8, 6] {
            store(&mut refs, &mut frames, id);
        }

        assert_eq!(refs.find_golden(&frames), Some((0, 0)));
        let golden = refs.find_next_golden(&mut frames).unwrap();
        assert_eq!(golden, 8);
        assert_eq!(refs.find_golden(&frames), Some((1, 8)));
        let flags = frames.get(8).unwrap().flags;
        assert!(!flags.contains(FrameFlags::LAST_IN_GROUP));
        assert!(!flags.contains(FrameFlags::ALT_REF));
        assert!(!frames.get(0).unwrap().flags.contains(FrameFlags::GOLDEN));
    }

    #[test]
    fn test_find_next_golden_falls_back_to_highest() {
        let mut frames = FrameArena::new();
        let mut refs = ReferenceListManager::new(4);
        add(&mut frames, 0, 0, FrameFlags::GOLDEN);
        add(&mut frames, 2, 2, FrameFlags::LEAF);
        add(&mut frames, 1, 1, FrameFlags::LEAF);
        for id in [0, 2, 1] {
            store(&mut refs, &mut frames, id);
        }

        assert_eq!(refs.find_next_golden(&mut frames).unwrap(), 2);
        assert_eq!(refs.golden_count(&frames), 1);
    }

    #[test]
    fn test_find_next_golden_on_empty_list() {
        let mut frames = FrameArena::new();
        let refs = ReferenceListManager::new(4);
        assert!(refs.find_next_golden(&mut frames).unwrap_err().is_sequence());
    }

    #[test]
    fn test_negative_update_index_leaves_list() {
        let mut frames = FrameArena::new();
        let mut refs = ReferenceListManager::new(2);
        add(&mut frames, 4, 4, FrameFlags::LEAF);
        assert_eq!(refs.update(&mut frames, 4).unwrap(), None);
        assert!(refs.is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let refs = ReferenceListManager::new(32);
        assert_eq!(refs.capacity(), NUM_REF_SLOTS);
        assert_eq!(refs.slots().len(), NUM_REF_SLOTS);
    }
}
