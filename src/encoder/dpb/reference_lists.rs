//! Reference role assignment.
//!
//! Before a frame is encoded every semantic reference role (LAST..ALTREF) is
//! mapped onto a slot of the [`ReferenceListManager`]. Slots holding frames
//! earlier in display order are forward candidates, slots holding hidden
//! AltRefs later in display order are backward candidates:
//! - Forward roles take the nearest frames first (LAST, LAST2, LAST3).
//! - Backward roles take the nearest future frame for BWDREF, the next for
//!   ALTREF2 and the furthest for ALTREF.
//! - Any role without its own candidate falls back to the golden slot.

use tracing::trace;

use super::ReferenceListManager;
use crate::encoder::frame::{FrameArena, FrameFlags, FrameId, ReferenceRole, NUM_REF_ROLES};
use crate::error::{GopError, Result};

/// Forward roles in priority order.
const FORWARD_ROLES: [ReferenceRole; 3] = [
    ReferenceRole::Last,
    ReferenceRole::Last2,
    ReferenceRole::Last3,
];

/// Role assignment policy.
///
/// AV1 and VP9 are kept as separate policies: VP9 has no forward-only budget
/// and lets LAST land on the golden slot when it is the most recent frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPolicy {
    /// AV1: seven roles.
    Av1 {
        /// Forward roles for frames without a backward reference.
        forward_only: u8,
        /// Forward roles for bidirectional frames.
        forward: u8,
        /// Backward roles.
        backward: u8,
    },
    /// VP9: LAST, GOLDEN and ALTREF only.
    Vp9 {
        /// 0 or 1: whether LAST may differ from GOLDEN.
        forward: u8,
        /// 0 or 1: whether ALTREF may point at a future frame.
        backward: u8,
    },
}

impl RefPolicy {
    fn backward_budget(&self) -> usize {
        match *self {
            RefPolicy::Av1 { backward, .. } => backward as usize,
            RefPolicy::Vp9 { backward, .. } => backward as usize,
        }
    }
}

/// Result of a role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefAssignment {
    /// Slot per role, -1 if unused.
    pub ref_frame_idx: [i8; NUM_REF_ROLES],
    /// Slot to show again for a repeat, -1 otherwise.
    pub repeat_index: i8,
    /// Whether any role points at a future frame.
    pub bidirectional: bool,
}

impl Default for RefAssignment {
    fn default() -> Self {
        Self {
            ref_frame_idx: [-1; NUM_REF_ROLES],
            repeat_index: -1,
            bidirectional: false,
        }
    }
}

impl RefAssignment {
    /// Slot assigned to `role`, -1 if unused.
    pub fn slot(&self, role: ReferenceRole) -> i8 {
        self.ref_frame_idx[role.index()]
    }
}

/// Maps reference roles onto reference slots.
#[derive(Debug, Clone)]
pub struct RefIndexAssigner {
    policy: RefPolicy,
}

/// An occupied slot seen from the frame being encoded.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    slot: i8,
    frame_num: u32,
}

impl RefIndexAssigner {
    /// Create an assigner for `policy`.
    pub fn new(policy: RefPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub fn policy(&self) -> RefPolicy {
        self.policy
    }

    /// Assign reference slots for `id` and store them in its record.
    ///
    /// For a repeat only `repeat_index` is resolved.
    pub fn assign(
        &self,
        refs: &ReferenceListManager,
        frames: &mut FrameArena,
        id: FrameId,
        is_repeat: bool,
    ) -> Result<RefAssignment> {
        let mut assignment = RefAssignment::default();

        if is_repeat {
            assignment.repeat_index = refs.slot_of(id).ok_or_else(|| {
                GopError::sequence(format!("repeated frame {id} is not in the reference list"))
            })?;
            return Ok(assignment);
        }

        let current = frames.get(id)?;
        if current.frame_type.is_intra() {
            frames.get_mut(id)?.ref_frame_idx = assignment.ref_frame_idx;
            return Ok(assignment);
        }
        let current_num = current.frame_num;

        let (golden_slot, _) = refs.find_golden(frames).ok_or_else(|| {
            GopError::sequence(format!("no golden frame to reference from frame {id}"))
        })?;

        let mut forward = Vec::new();
        let mut backward = Vec::new();
        for (slot, ref_id) in refs.occupied() {
            let frame = frames.get(ref_id)?;
            let candidate = Candidate {
                slot,
                frame_num: frame.frame_num,
            };
            if frame.frame_num < current_num {
                forward.push(candidate);
            } else if frame.is_backward_candidate() {
                backward.push(candidate);
            } else {
                return Err(GopError::sequence(format!(
                    "frame_num {} in slot {} is ahead of frame_num {} but is not an AltRef",
                    frame.frame_num, slot, current_num
                )));
            }
        }
        // Nearest first in both directions.
        forward.sort_by(|a, b| b.frame_num.cmp(&a.frame_num));
        backward.sort_by(|a, b| a.frame_num.cmp(&b.frame_num));

        let backward_budget = self.policy.backward_budget().min(backward.len());
        assignment.bidirectional = backward_budget > 0;
        let idx = &mut assignment.ref_frame_idx;

        match self.policy {
            RefPolicy::Av1 {
                forward_only,
                forward: forward_budget,
                ..
            } => {
                idx[ReferenceRole::Golden.index()] = golden_slot;

                let budget = if assignment.bidirectional {
                    forward_budget
                } else {
                    forward_only
                } as usize;
                forward.retain(|c| c.slot != golden_slot);
                for (i, role) in FORWARD_ROLES.iter().enumerate() {
                    idx[role.index()] = if i < budget {
                        forward.get(i).map_or(golden_slot, |c| c.slot)
                    } else {
                        golden_slot
                    };
                }

                let (bwd, alt2, alt) = match backward_budget.min(3) {
                    0 => (golden_slot, golden_slot, golden_slot),
                    1 => (backward[0].slot, backward[0].slot, backward[0].slot),
                    2 => {
                        let furthest = backward[backward.len() - 1].slot;
                        (backward[0].slot, furthest, furthest)
                    }
                    _ => (
                        backward[0].slot,
                        backward[1].slot,
                        backward[backward.len() - 1].slot,
                    ),
                };
                idx[ReferenceRole::BackwardRef.index()] = bwd;
                idx[ReferenceRole::AltRef2.index()] = alt2;
                idx[ReferenceRole::AltRef.index()] = alt;
            }
            RefPolicy::Vp9 {
                forward: forward_budget,
                ..
            } => {
                idx[ReferenceRole::Golden.index()] = golden_slot;
                idx[ReferenceRole::Last.index()] = if forward_budget > 0 {
                    forward.first().map_or(golden_slot, |c| c.slot)
                } else {
                    golden_slot
                };
                idx[ReferenceRole::AltRef.index()] = if assignment.bidirectional {
                    backward[0].slot
                } else {
                    golden_slot
                };
            }
        }

        trace!(
            "Frame {} (frame_num {}) refs {:?}, bidirectional={}",
            id,
            current_num,
            assignment.ref_frame_idx,
            assignment.bidirectional
        );
        frames.get_mut(id)?.ref_frame_idx = assignment.ref_frame_idx;
        Ok(assignment)
    }

    /// Decide which slot `id` overwrites once encoded and store it as its `update_index`.
    ///
    /// Key frames always take slot 0 (the list is cleared before they are stored).
    pub fn find_ref_to_update(
        &self,
        refs: &ReferenceListManager,
        frames: &mut FrameArena,
        id: FrameId,
    ) -> Result<i8> {
        let frame = frames.get(id)?;
        let update_index = if refs.capacity() == 0 {
            -1
        } else if frame.frame_type.is_key() {
            0
        } else if !frame.flags.contains(FrameFlags::UPDATE_REF) {
            -1
        } else {
            refs.find_slot_to_evict(frames, id)?
        };

        frames.get_mut(id)?.update_index = update_index;
        Ok(update_index)
    }
}
