//! Golden-frame group planning.
//!
//! A golden-frame group is a run of frames headed by one golden (or key)
//! frame. Its [`GroupPlan`] lists, in encode/output order, which frame of the
//! group is produced next, at what pyramid level and with which flags.
//!
//! Without backward reference the plan is flat:
//! - Display order: G(0) P(1) P(2) P(3)
//! - Output order:  G(0) P(1) P(2) P(3)
//!
//! With backward reference the last frame of the group is encoded right after
//! the golden frame as a hidden AltRef, the frames in between are bisected
//! into a pyramid, and a final repeat shows the AltRef:
//! - Display order: G(0) 1 2 3 4 5 6 A(7)
//! - Output order:  G(0) A(7) 3 1 2 R(3) 4 5 6 R(7)     (max level 3)

use super::frame::{FrameFlags, FrameType};

/// Maximum number of frames following the golden frame in one group.
pub const MAX_GF_GROUP_SIZE: u32 = 32;

/// Deepest pyramid level a plan may use.
pub const HIGHEST_PYRAMID_LEVEL: u8 = 6;

/// Pyramid level of the first bisection layer (below golden and AltRef).
const FIRST_BISECTION_LEVEL: u8 = 2;

/// One output slot of a group plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    /// Frame type to encode with (or `Repeat`).
    pub frame_type: FrameType,
    /// Pyramid level.
    pub pyramid_level: u8,
    /// Flags applied to the frame when it is popped.
    pub flags: FrameFlags,
    /// Offset of the frame from the group start (the repeated frame for `Repeat`).
    pub frame_offset: u32,
}

impl PlanEntry {
    /// Whether this slot re-emits an already encoded frame.
    pub fn is_repeat(&self) -> bool {
        self.frame_type == FrameType::Repeat
    }
}

/// Encode order template for one golden-frame group.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    start_offset: u32,
    size: u32,
    uses_backward_ref: bool,
    max_level: u8,
    highest_level: u8,
    head_type: FrameType,
    entries: Vec<PlanEntry>,
}

impl GroupPlan {
    /// Build the plan for a group of `size` frames starting at `start_offset`.
    ///
    /// `head_type` is the type of the golden slot (`Key` for the first frame
    /// after a key frame boundary, `Inter` for a golden frame handed over from
    /// the previous group, `IntraOnly` in intra-only mode).
    ///
    /// # Panics
    ///
    /// Panics if the parameters break the group contract: `size` must be in
    /// `1..=MAX_GF_GROUP_SIZE + 1`, `max_level` at most
    /// [`HIGHEST_PYRAMID_LEVEL`], and backward reference needs more than 3
    /// frames and a max level of at least 2. Callers negotiate their
    /// configuration before building plans.
    pub fn build(
        start_offset: u32,
        size: u32,
        head_type: FrameType,
        max_level: u8,
        uses_backward_ref: bool,
    ) -> Self {
        assert!(size >= 1, "group must contain its golden frame");
        assert!(size <= MAX_GF_GROUP_SIZE + 1, "group size {size} too large");
        assert!(
            max_level <= HIGHEST_PYRAMID_LEVEL,
            "pyramid level {max_level} too deep"
        );
        if uses_backward_ref {
            assert!(size > 3, "backward reference needs more than 3 frames");
            assert!(
                max_level >= FIRST_BISECTION_LEVEL,
                "backward reference needs at least 2 pyramid levels"
            );
        }

        let mut entries = Vec::with_capacity(size as usize * 2);
        entries.push(PlanEntry {
            frame_type: head_type,
            pyramid_level: 0,
            flags: FrameFlags::GOLDEN | FrameFlags::UPDATE_REF,
            frame_offset: 0,
        });

        if uses_backward_ref {
            let alt_offset = size - 1;
            entries.push(PlanEntry {
                frame_type: FrameType::Inter,
                pyramid_level: 1,
                flags: FrameFlags::ALT_REF
                    | FrameFlags::UPDATE_REF
                    | FrameFlags::LAST_IN_GROUP
                    | FrameFlags::NOT_SHOWN,
                frame_offset: alt_offset,
            });
            entries.extend(multi_layer(1, alt_offset, FIRST_BISECTION_LEVEL, max_level));
            entries.push(PlanEntry {
                frame_type: FrameType::Repeat,
                pyramid_level: 1,
                flags: FrameFlags::ALT_REF,
                frame_offset: alt_offset,
            });
        } else {
            entries.extend((1..size).map(|offset| PlanEntry {
                frame_type: FrameType::Inter,
                pyramid_level: 1,
                flags: FrameFlags::LEAF | FrameFlags::UPDATE_REF,
                frame_offset: offset,
            }));
            if size > 1 {
                if let Some(last) = entries.last_mut() {
                    last.flags |= FrameFlags::LAST_IN_GROUP;
                }
            }
        }

        let highest_level = entries.iter().map(|e| e.pyramid_level).max().unwrap_or(0);

        Self {
            start_offset,
            size,
            uses_backward_ref,
            max_level,
            highest_level,
            head_type,
            entries,
        }
    }

    /// Rebuild this plan for a group cut short after `pushed` frames.
    ///
    /// Falls back to a flat plan when fewer than 4 frames were pushed.
    pub fn truncated(&self, pushed: u32) -> Self {
        let size = pushed.clamp(1, self.size);
        Self::build(
            self.start_offset,
            size,
            self.head_type,
            self.max_level,
            self.uses_backward_ref && size > 3,
        )
    }

    /// frame_num of the golden frame.
    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Frames in the group, golden frame included.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether the group has a trailing AltRef.
    pub fn uses_backward_ref(&self) -> bool {
        self.uses_backward_ref
    }

    /// Deepest pyramid level actually used.
    pub fn highest_level(&self) -> u8 {
        self.highest_level
    }

    /// Number of output slots (frames plus repeats).
    pub fn output_frame_num(&self) -> usize {
        self.entries.len()
    }

    /// Output slot `index`.
    pub fn entry(&self, index: usize) -> Option<&PlanEntry> {
        self.entries.get(index)
    }

    /// All output slots in order.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// frame_num targeted by output slot `index`.
    pub fn frame_num_at(&self, index: usize) -> Option<u32> {
        self.entries
            .get(index)
            .map(|e| self.start_offset + e.frame_offset)
    }
}

/// Bisect `[start, end)` into pyramid layers starting at `level`.
fn multi_layer(start: u32, end: u32, level: u8, max_level: u8) -> Vec<PlanEntry> {
    let count = end.saturating_sub(start);

    if level >= max_level || count <= 2 {
        return (start..end)
            .map(|offset| PlanEntry {
                frame_type: FrameType::Inter,
                pyramid_level: level,
                flags: FrameFlags::LEAF | FrameFlags::UPDATE_REF,
                frame_offset: offset,
            })
            .collect();
    }

    let mid = (start + end - 1) / 2;
    let mut entries = Vec::with_capacity(count as usize * 2);
    entries.push(PlanEntry {
        frame_type: FrameType::Inter,
        pyramid_level: level,
        flags: FrameFlags::ALT_REF_INLINE | FrameFlags::UPDATE_REF | FrameFlags::NOT_SHOWN,
        frame_offset: mid,
    });
    entries.extend(multi_layer(start, mid, level + 1, max_level));
    entries.push(PlanEntry {
        frame_type: FrameType::Repeat,
        pyramid_level: level,
        flags: FrameFlags::ALT_REF_INLINE,
        frame_offset: mid,
    });
    entries.extend(multi_layer(mid + 1, end, level + 1, max_level));
    entries
}
