//! Per-frame bookkeeping for the GOP engine.
//!
//! Every input frame gets a [`FrameRecord`] stored in a [`FrameArena`] and
//! addressed by its display index. The reorder queue and the reference list
//! only hold [`FrameId`]s, so a frame can sit in both at once without shared
//! ownership.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::{GopError, Result};

/// Stable frame identifier (the caller-supplied display index).
pub type FrameId = u64;

/// Number of semantic reference roles (LAST..ALTREF).
pub const NUM_REF_ROLES: usize = 7;

/// Number of bits in an AV1 order hint.
pub const ORDER_HINT_BITS: u32 = 8;

/// Frame type as seen by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    /// Key frame, resets all references.
    Key,
    /// Inter frame.
    #[default]
    Inter,
    /// Intra-only frame (no references, no reset).
    IntraOnly,
    /// Switch frame.
    Switch,
    /// Re-emit an already encoded frame without encoding it again.
    Repeat,
}

impl FrameType {
    /// Whether this frame type is coded without references.
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::Key | Self::IntraOnly)
    }

    /// Whether this is a key frame.
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key)
    }
}

bitflags! {
    /// Scheduling flags carried by a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u32 {
        /// Heads a golden-frame group.
        const GOLDEN = 1 << 0;
        /// Trailing backward reference of a group.
        const ALT_REF = 1 << 1;
        /// Leaf of the pyramid, nothing nests below it.
        const LEAF = 1 << 2;
        /// Internal backward reference produced by the bisection.
        const ALT_REF_INLINE = 1 << 3;
        /// Becomes a reference once encoded.
        const UPDATE_REF = 1 << 4;
        /// Last frame (in display order) of its group.
        const LAST_IN_GROUP = 1 << 5;
        /// Encoded and submitted to the backend.
        const ALREADY_ENCODED = 1 << 6;
        /// Encoded without being shown; a repeat shows it later.
        const NOT_SHOWN = 1 << 7;
        /// A not-shown frame that has since been shown by a repeat.
        const ALREADY_OUTPUTTED = 1 << 8;
    }
}

/// Semantic reference roles, in AV1 `ref_frame_idx[]` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    Last = 0,
    Last2 = 1,
    Last3 = 2,
    Golden = 3,
    BackwardRef = 4,
    AltRef2 = 5,
    AltRef = 6,
}

impl ReferenceRole {
    /// All roles in index order.
    pub const ALL: [ReferenceRole; NUM_REF_ROLES] = [
        ReferenceRole::Last,
        ReferenceRole::Last2,
        ReferenceRole::Last3,
        ReferenceRole::Golden,
        ReferenceRole::BackwardRef,
        ReferenceRole::AltRef2,
        ReferenceRole::AltRef,
    ];

    /// Position of this role in `ref_frame_idx[]`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this role predicts from a future (display order) frame.
    pub fn is_backward(self) -> bool {
        matches!(
            self,
            ReferenceRole::BackwardRef | ReferenceRole::AltRef2 | ReferenceRole::AltRef
        )
    }
}

/// Bookkeeping for one input frame.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Monotonic input counter (display order).
    pub display_index: u64,
    /// Position relative to the last key frame.
    pub frame_num: u32,
    /// Frame type assigned by the group plan.
    pub frame_type: FrameType,
    /// Pyramid depth (0 = golden/key).
    pub pyramid_level: u8,
    /// Scheduling flags.
    pub flags: FrameFlags,
    /// Reference slot per role, -1 if unused.
    pub ref_frame_idx: [i8; NUM_REF_ROLES],
    /// Reference slot this frame occupies once encoded, -1 if none.
    pub update_index: i8,
    /// Output-order tag used for reference distances.
    pub order_hint: u32,
}

impl FrameRecord {
    /// Create a record for a freshly accepted input frame.
    pub fn new(display_index: u64, frame_num: u32) -> Self {
        Self {
            display_index,
            frame_num,
            frame_type: if frame_num == 0 {
                FrameType::Key
            } else {
                FrameType::Inter
            },
            pyramid_level: 0,
            flags: FrameFlags::empty(),
            ref_frame_idx: [-1; NUM_REF_ROLES],
            update_index: -1,
            order_hint: frame_num & ((1 << ORDER_HINT_BITS) - 1),
        }
    }

    /// Whether this frame still has to be shown by a repeat.
    pub fn awaits_repeat(&self) -> bool {
        self.flags.contains(FrameFlags::NOT_SHOWN)
            && !self.flags.contains(FrameFlags::ALREADY_OUTPUTTED)
    }

    /// Whether this frame may serve as a backward reference.
    pub fn is_backward_candidate(&self) -> bool {
        self.flags
            .intersects(FrameFlags::ALT_REF | FrameFlags::ALT_REF_INLINE)
    }
}

/// Owner of all live frame records, keyed by [`FrameId`].
#[derive(Debug, Default)]
pub struct FrameArena {
    frames: HashMap<FrameId, FrameRecord>,
}

impl FrameArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its display index.
    pub fn insert(&mut self, record: FrameRecord) -> Result<FrameId> {
        let id = record.display_index;
        if self.frames.contains_key(&id) {
            return Err(GopError::sequence(format!(
                "frame {id} is already tracked"
            )));
        }
        self.frames.insert(id, record);
        Ok(id)
    }

    /// Look up a record.
    pub fn get(&self, id: FrameId) -> Result<&FrameRecord> {
        self.frames
            .get(&id)
            .ok_or_else(|| GopError::sequence(format!("unknown frame {id}")))
    }

    /// Look up a record mutably.
    pub fn get_mut(&mut self, id: FrameId) -> Result<&mut FrameRecord> {
        self.frames
            .get_mut(&id)
            .ok_or_else(|| GopError::sequence(format!("unknown frame {id}")))
    }

    /// Remove a record.
    pub fn remove(&mut self, id: FrameId) -> Option<FrameRecord> {
        self.frames.remove(&id)
    }

    /// Whether a record is tracked.
    pub fn contains(&self, id: FrameId) -> bool {
        self.frames.contains_key(&id)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no records are tracked.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Ids of all live records, in display order.
    pub fn ids(&self) -> Vec<FrameId> {
        let mut ids: Vec<FrameId> = self.frames.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record() {
        let key = FrameRecord::new(10, 0);
        assert_eq!(key.frame_type, FrameType::Key);
        assert_eq!(key.update_index, -1);
        assert_eq!(key.ref_frame_idx, [-1; NUM_REF_ROLES]);

        let inter = FrameRecord::new(11, 1);
        assert_eq!(inter.frame_type, FrameType::Inter);
        assert_eq!(inter.order_hint, 1);
    }

    #[test]
    fn test_order_hint_wrapping() {
        // Order hints are 8 bits wide.
        let record = FrameRecord::new(300, 258);
        assert_eq!(record.order_hint, 2);
    }

    #[test]
    fn test_awaits_repeat() {
        let mut record = FrameRecord::new(0, 7);
        assert!(!record.awaits_repeat());

        record.flags = FrameFlags::ALT_REF | FrameFlags::NOT_SHOWN;
        assert!(record.awaits_repeat());
        assert!(record.is_backward_candidate());

        record.flags |= FrameFlags::ALREADY_OUTPUTTED;
        assert!(!record.awaits_repeat());
    }

    #[test]
    fn test_reference_roles() {
        for (i, role) in ReferenceRole::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
        }
        assert!(!ReferenceRole::Golden.is_backward());
        assert!(ReferenceRole::BackwardRef.is_backward());
        assert!(ReferenceRole::AltRef.is_backward());
    }

    #[test]
    fn test_arena() {
        let mut arena = FrameArena::new();
        arena.insert(FrameRecord::new(3, 0)).unwrap();
        arena.insert(FrameRecord::new(1, 1)).unwrap();
        assert!(arena.insert(FrameRecord::new(3, 2)).is_err());

        assert_eq!(arena.ids(), vec![1, 3]);
        arena.get_mut(1).unwrap().pyramid_level = 2;
        assert_eq!(arena.get(1).unwrap().pyramid_level, 2);

        assert!(arena.remove(1).is_some());
        assert!(arena.get(1).is_err());
        assert_eq!(arena.len(), 1);
    }
}
