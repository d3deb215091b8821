//! Frame scheduler.
//!
//! [`EncodeFrameScheduler`] accepts frames in display order, decides when a
//! golden-frame group starts and ends, pops frames in encode order and keeps
//! the reference list in step with what the backend has encoded.
//!
//! Each popped frame goes through `prepare` (reference role assignment and
//! update slot selection) and `submit` (backend encode, then reference list
//! update). `encode` and `flush` run the whole loop.
//!
//! States:
//! - `Idle`: no group active, the next input becomes a key frame.
//! - `GroupActive`: frames are pushed into and popped from the current group.
//! - `Draining`: a flush is emptying every buffer; no input is accepted.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::dpb::{RefIndexAssigner, ReferenceListManager, NUM_REF_SLOTS};
use super::frame::{FrameArena, FrameFlags, FrameId, FrameRecord, FrameType, NUM_REF_ROLES};
use super::gop::GroupPlan;
use super::reorder::{GroupHead, PoppedFrame, ReorderQueue};
use super::{GopConfig, NegotiatedConfig};
use crate::error::{BackendError, GopError, Result};

/// A raw input frame.
#[derive(Debug, Clone)]
pub struct InputFrame<P> {
    /// Caller-supplied display order index, strictly increasing.
    pub display_index: u64,
    /// Encode this frame as a key frame.
    pub force_keyframe: bool,
    /// Opaque payload handed to the backend unchanged.
    pub payload: P,
}

impl<P> InputFrame<P> {
    /// Create an input frame.
    pub fn new(display_index: u64, payload: P) -> Self {
        Self {
            display_index,
            force_keyframe: false,
            payload,
        }
    }

    /// Force this frame to be a key frame.
    pub fn with_force_keyframe(mut self, force: bool) -> Self {
        self.force_keyframe = force;
        self
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// No group is active.
    #[default]
    Idle,
    /// A group is being filled and emptied.
    GroupActive,
    /// A flush is draining every buffered frame.
    Draining,
}

/// Everything the backend needs to encode (or re-show) one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParams {
    /// Display index of the frame.
    pub display_index: u64,
    /// Position relative to the last key frame.
    pub frame_num: u32,
    /// Order hint of the frame.
    pub order_hint: u32,
    /// Position in the output sequence.
    pub encode_order: u64,
    /// Frame type (`Repeat` for a repeat).
    pub frame_type: FrameType,
    /// Pyramid level.
    pub pyramid_level: u8,
    /// Scheduling flags.
    pub flags: FrameFlags,
    /// Reference slot per role, -1 if unused.
    pub ref_frame_idx: [i8; NUM_REF_ROLES],
    /// Slot overwritten by this frame, -1 if none.
    pub update_index: i8,
    /// Whether this output only re-shows an encoded frame.
    pub is_repeat: bool,
    /// Slot to re-show for a repeat, -1 otherwise.
    pub repeat_index: i8,
    /// Whether any role points at a future frame.
    pub bidirectional: bool,
    /// Order hint of the frame in each reference slot.
    pub ref_order_hint: [Option<u32>; NUM_REF_SLOTS],
}

/// One output of the scheduler.
#[derive(Debug, Clone)]
pub struct EncodedFrame<O> {
    /// Parameters the frame was submitted with.
    pub params: FrameParams,
    /// What the backend returned.
    pub output: O,
}

/// External encoder driven by the scheduler.
///
/// `encode` must return only once the frame can serve as a reference.
pub trait EncodeBackend<P> {
    /// Backend output per frame (bitstream, packet handle, ...).
    type Output;

    /// Encode a frame.
    fn encode(
        &mut self,
        payload: &P,
        params: &FrameParams,
    ) -> std::result::Result<Self::Output, BackendError>;

    /// Emit a header that shows the frame in reference slot `repeat_index` again.
    fn emit_repeat_header(
        &mut self,
        repeat_index: i8,
    ) -> std::result::Result<Self::Output, BackendError>;
}

/// GOP scheduler for one stream.
///
/// `P` is the payload type handed through to the [`EncodeBackend`].
pub struct EncodeFrameScheduler<P> {
    config: NegotiatedConfig,
    assigner: RefIndexAssigner,
    frames: FrameArena,
    payloads: HashMap<FrameId, P>,
    group: Option<ReorderQueue>,
    refs: ReferenceListManager,
    pending_key: Option<FrameId>,
    next_frame_num: u32,
    last_display_index: Option<u64>,
    encode_order: u64,
    force_keyframe: bool,
    state: SchedulerState,
}

impl<P> EncodeFrameScheduler<P> {
    /// Create a scheduler, negotiating `config` first.
    pub fn new(config: &GopConfig) -> Result<Self> {
        let config = config.negotiate()?;
        debug!("Creating scheduler for {:?}", config.codec);

        Ok(Self {
            assigner: RefIndexAssigner::new(config.policy),
            refs: ReferenceListManager::new(config.num_reference_frames),
            config,
            frames: FrameArena::new(),
            payloads: HashMap::new(),
            group: None,
            pending_key: None,
            next_frame_num: 0,
            last_display_index: None,
            encode_order: 0,
            force_keyframe: false,
            state: SchedulerState::Idle,
        })
    }

    /// The negotiated configuration.
    pub fn config(&self) -> &NegotiatedConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The reference list.
    pub fn reference_list(&self) -> &ReferenceListManager {
        &self.refs
    }

    /// Records of every frame still tracked.
    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    /// The active group, if any.
    pub fn current_group(&self) -> Option<&ReorderQueue> {
        self.group.as_ref()
    }

    /// Key frame waiting for the current group to drain.
    pub fn pending_keyframe(&self) -> Option<FrameId> {
        self.pending_key
    }

    /// Force the next input frame to be a key frame.
    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Accept an input frame (or none) and pop the next frame to encode.
    ///
    /// With `bump_all` the scheduler drains: the current group is cut short
    /// and every buffered frame is popped. Once nothing is left the reference
    /// list is cleared and `None` is returned. `new_frame` must be `None` then.
    ///
    /// Every popped frame must go through [`prepare`](Self::prepare) and
    /// [`submit`](Self::submit) before the next call.
    pub fn reorder(
        &mut self,
        new_frame: Option<InputFrame<P>>,
        bump_all: bool,
    ) -> Result<Option<PoppedFrame>> {
        if bump_all || self.state == SchedulerState::Draining {
            if let Some(frame) = new_frame {
                return Err(GopError::sequence(format!(
                    "frame {} submitted while draining",
                    frame.display_index
                )));
            }
            return self.bump();
        }

        let Some(input) = new_frame else {
            if let Some(popped) = self.pop()? {
                return Ok(Some(popped));
            }
            if self.group_finished() {
                if let Some(key) = self.pending_key.take() {
                    self.start_fresh(key)?;
                    return self.pop();
                }
            }
            return Ok(None);
        };

        let id = self.accept(input)?;
        let frame_num = self.frames.get(id)?.frame_num;

        if frame_num == 0 {
            if let Some(pending) = self.pending_key {
                return Err(GopError::sequence(format!(
                    "key frame {id} arrived while key frame {pending} is still pending"
                )));
            }
            match self.group.as_mut() {
                Some(group) => {
                    group.finish_early();
                    if group.is_finished() {
                        self.start_fresh(id)?;
                    } else {
                        debug!("Key frame {} pending until the current group drains", id);
                        self.pending_key = Some(id);
                    }
                }
                None => self.start_fresh(id)?,
            }
            return self.pop();
        }

        if let Some(key) = self.pending_key {
            if !self.group_finished() {
                return Err(GopError::sequence(format!(
                    "frame {id} arrived before pending key frame {key} was started"
                )));
            }
            self.pending_key = None;
            self.start_fresh(key)?;
        }

        if self.group_finished() {
            if self.config.is_intra_only() {
                self.start_fresh(id)?;
                return self.pop();
            }
            let golden = self.refs.find_next_golden(&mut self.frames)?;
            self.start_carried(golden)?;
        }

        let group = self
            .group
            .as_mut()
            .ok_or_else(|| GopError::sequence(format!("no group to push frame {id} into")))?;
        group.push(id, &self.frames)?;
        self.pop()
    }

    /// Assign references and the update slot for a popped frame.
    pub fn prepare(&mut self, popped: &PoppedFrame) -> Result<FrameParams> {
        let is_repeat = popped.is_repeat();
        let assignment = self
            .assigner
            .assign(&self.refs, &mut self.frames, popped.id, is_repeat)?;
        let update_index = if is_repeat {
            -1
        } else {
            self.assigner
                .find_ref_to_update(&self.refs, &mut self.frames, popped.id)?
        };

        let mut ref_order_hint = [None; NUM_REF_SLOTS];
        for (slot, id) in self.refs.occupied() {
            ref_order_hint[slot as usize] = Some(self.frames.get(id)?.order_hint);
        }

        let frame = self.frames.get(popped.id)?;
        Ok(FrameParams {
            display_index: frame.display_index,
            frame_num: frame.frame_num,
            order_hint: frame.order_hint,
            encode_order: self.encode_order,
            frame_type: if is_repeat {
                FrameType::Repeat
            } else {
                frame.frame_type
            },
            pyramid_level: popped.entry.pyramid_level,
            flags: if is_repeat {
                popped.entry.flags
            } else {
                frame.flags
            },
            ref_frame_idx: assignment.ref_frame_idx,
            update_index,
            is_repeat,
            repeat_index: assignment.repeat_index,
            bidirectional: assignment.bidirectional,
            ref_order_hint,
        })
    }

    /// Hand a prepared frame to the backend and record the result.
    ///
    /// On a backend error nothing is updated, so the same frame may be
    /// submitted again with the same parameters.
    pub fn submit<B>(
        &mut self,
        popped: &PoppedFrame,
        params: FrameParams,
        backend: &mut B,
    ) -> Result<EncodedFrame<B::Output>>
    where
        B: EncodeBackend<P>,
    {
        let encode_error = |source| GopError::Encode {
            display_index: params.display_index,
            source,
        };

        let output = if popped.is_repeat() {
            let output = backend
                .emit_repeat_header(params.repeat_index)
                .map_err(encode_error)?;
            self.frames
                .get_mut(popped.id)?
                .flags
                .insert(FrameFlags::ALREADY_OUTPUTTED);
            output
        } else {
            let payload = self.payloads.get(&popped.id).ok_or_else(|| {
                GopError::sequence(format!("no payload for frame {}", popped.id))
            })?;
            let output = backend.encode(payload, &params).map_err(encode_error)?;
            if let Some(evicted) = self.refs.update(&mut self.frames, popped.id)? {
                trace!("Frame {} evicted frame {}", popped.id, evicted);
            }
            // Repeats only need the slot, never the input.
            self.payloads.remove(&popped.id);
            output
        };

        trace!(
            "Submitted frame {} as #{} ({:?}, update slot {})",
            params.display_index,
            params.encode_order,
            params.frame_type,
            params.update_index
        );
        self.encode_order += 1;
        self.retire();
        Ok(EncodedFrame { params, output })
    }

    /// Push one input frame and encode everything that becomes ready.
    pub fn encode<B>(
        &mut self,
        input: InputFrame<P>,
        backend: &mut B,
    ) -> Result<Vec<EncodedFrame<B::Output>>>
    where
        B: EncodeBackend<P>,
    {
        let mut encoded = Vec::new();
        let mut next = self.reorder(Some(input), false)?;
        while let Some(popped) = next {
            encoded.push(self.process(&popped, backend)?);
            next = self.reorder(None, false)?;
        }
        Ok(encoded)
    }

    /// Encode every buffered frame and reset the reference list.
    pub fn flush<B>(&mut self, backend: &mut B) -> Result<Vec<EncodedFrame<B::Output>>>
    where
        B: EncodeBackend<P>,
    {
        let mut encoded = Vec::new();
        while let Some(popped) = self.reorder(None, true)? {
            encoded.push(self.process(&popped, backend)?);
        }
        Ok(encoded)
    }

    fn process<B>(&mut self, popped: &PoppedFrame, backend: &mut B) -> Result<EncodedFrame<B::Output>>
    where
        B: EncodeBackend<P>,
    {
        let params = self.prepare(popped)?;
        self.submit(popped, params, backend)
    }

    /// Track a new input frame and give it a frame_num.
    fn accept(&mut self, input: InputFrame<P>) -> Result<FrameId> {
        let display_index = input.display_index;
        if let Some(last) = self.last_display_index {
            if display_index <= last {
                return Err(GopError::sequence(format!(
                    "display index {display_index} does not follow {last}"
                )));
            }
        }

        let interval = self.config.keyframe_interval;
        let force = input.force_keyframe || std::mem::take(&mut self.force_keyframe);
        let frame_num = if force || (interval > 0 && self.next_frame_num >= interval) {
            0
        } else {
            self.next_frame_num
        };

        let id = self.frames.insert(FrameRecord::new(display_index, frame_num))?;
        self.payloads.insert(id, input.payload);
        self.last_display_index = Some(display_index);
        self.next_frame_num = frame_num + 1;
        trace!("Accepted frame {} as frame_num {}", id, frame_num);
        Ok(id)
    }

    fn group_finished(&self) -> bool {
        self.group.as_ref().is_none_or(ReorderQueue::is_finished)
    }

    fn pop(&mut self) -> Result<Option<PoppedFrame>> {
        match self.group.as_mut() {
            Some(group) if !group.is_finished() && !group.is_empty() => {
                group.pop(&mut self.frames, &self.refs)
            }
            _ => Ok(None),
        }
    }

    /// Start a group headed by a frame that still has to be encoded.
    fn start_fresh(&mut self, id: FrameId) -> Result<()> {
        let frame = self.frames.get_mut(id)?;
        let start = frame.frame_num;
        let head_type = if start == 0 {
            FrameType::Key
        } else {
            FrameType::IntraOnly
        };
        frame.frame_type = head_type;

        let size = self.config.group_size_at(start);
        let plan = GroupPlan::build(
            start,
            size,
            head_type,
            self.config.max_level,
            self.config.uses_backward_ref && size > 3,
        );
        self.set_group(ReorderQueue::new(plan, GroupHead::Fresh(id)));
        Ok(())
    }

    /// Start a group headed by the golden frame promoted from the reference list.
    fn start_carried(&mut self, golden: FrameId) -> Result<()> {
        let start = self.frames.get(golden)?.frame_num;
        let size = self.config.group_size_at(start);
        let plan = GroupPlan::build(
            start,
            size,
            FrameType::Inter,
            self.config.max_level,
            self.config.uses_backward_ref && size > 3,
        );
        self.set_group(ReorderQueue::new(plan, GroupHead::Carried(golden)));
        Ok(())
    }

    fn set_group(&mut self, group: ReorderQueue) {
        self.group = Some(group);
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::GroupActive;
        }
    }

    /// One step of a flush.
    fn bump(&mut self) -> Result<Option<PoppedFrame>> {
        if self.state != SchedulerState::Draining {
            debug!("Draining scheduler");
            self.state = SchedulerState::Draining;
        }

        if let Some(group) = self.group.as_mut() {
            group.finish_early();
        }
        if let Some(popped) = self.pop()? {
            return Ok(Some(popped));
        }

        if self.group_finished() {
            if let Some(key) = self.pending_key.take() {
                self.start_fresh(key)?;
                if let Some(group) = self.group.as_mut() {
                    group.finish_early();
                }
                return self.pop();
            }
        }

        let mut discarded = self.group.take().map(|mut g| g.drain()).unwrap_or_default();
        if let Some(key) = self.pending_key.take() {
            discarded.push(key);
        }
        for id in self.frames.ids() {
            let unencoded = self
                .frames
                .get(id)
                .is_ok_and(|f| !f.flags.contains(FrameFlags::ALREADY_ENCODED));
            if unencoded && !discarded.contains(&id) {
                discarded.push(id);
            }
        }
        if !discarded.is_empty() {
            warn!("Flush discarded {} unencoded frames: {:?}", discarded.len(), discarded);
        }

        self.refs.clear();
        self.frames.clear();
        self.payloads.clear();
        self.next_frame_num = 0;
        self.state = SchedulerState::Idle;
        debug!("Scheduler drained");
        Ok(None)
    }

    /// Drop frames nothing refers to any more.
    fn retire(&mut self) {
        for id in self.frames.ids() {
            let Ok(frame) = self.frames.get(id) else {
                continue;
            };
            if !frame.flags.contains(FrameFlags::ALREADY_ENCODED) || frame.awaits_repeat() {
                continue;
            }
            if self.refs.contains(id)
                || self.pending_key == Some(id)
                || self.group.as_ref().is_some_and(|g| g.contains(id))
            {
                continue;
            }
            self.frames.remove(id);
            self.payloads.remove(&id);
            trace!("Retired frame {}", id);
        }
    }
}
