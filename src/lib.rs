//! # gopforge
//!
//! Golden-frame group scheduling and reference slot management for AV1 and
//! VP9 hardware encoders.
//!
//! The crate decides, for a stream of frames arriving in display order:
//! - which frames form a golden-frame group and how its pyramid is laid out
//! - the order in which frames are handed to the encoder
//! - which reference slot each reference role points at
//! - which slot an encoded frame overwrites
//!
//! Bitstream writing and hardware submission stay with the caller, behind
//! the [`EncodeBackend`] trait.
//!
//! ```no_run
//! use gopforge::{BackendError, EncodeBackend, EncodeFrameScheduler, FrameParams, GopConfig, InputFrame};
//!
//! struct Backend;
//!
//! impl EncodeBackend<Vec<u8>> for Backend {
//!     type Output = Vec<u8>;
//!
//!     fn encode(&mut self, payload: &Vec<u8>, params: &FrameParams) -> Result<Vec<u8>, BackendError> {
//!         // Submit `payload` with `params.ref_frame_idx` and `params.update_index`.
//!         Ok(payload.clone())
//!     }
//!
//!     fn emit_repeat_header(&mut self, repeat_index: i8) -> Result<Vec<u8>, BackendError> {
//!         Ok(vec![repeat_index as u8])
//!     }
//! }
//!
//! # fn main() -> Result<(), gopforge::GopError> {
//! let mut scheduler = EncodeFrameScheduler::new(&GopConfig::av1().with_group_size(8))?;
//! let mut backend = Backend;
//! for i in 0..30u64 {
//!     for frame in scheduler.encode(InputFrame::new(i, vec![0u8; 16]), &mut backend)? {
//!         println!("#{} frame_num {}", frame.params.encode_order, frame.params.frame_num);
//!     }
//! }
//! scheduler.flush(&mut backend)?;
//! # Ok(())
//! # }
//! ```

pub mod encoder;
pub mod error;

pub use encoder::dpb::{RefAssignment, RefIndexAssigner, RefPolicy, ReferenceListManager};
pub use encoder::frame::{FrameArena, FrameFlags, FrameId, FrameRecord, FrameType, ReferenceRole};
pub use encoder::gop::{GroupPlan, PlanEntry};
pub use encoder::reorder::{GroupHead, PoppedFrame, ReorderQueue};
pub use encoder::scheduler::{
    EncodeBackend, EncodeFrameScheduler, EncodedFrame, FrameParams, InputFrame, SchedulerState,
};
pub use encoder::{Codec, GopConfig, NegotiatedConfig};
pub use error::{BackendError, GopError, Result};
