//! Encoder-side GOP engine: configuration, group planning, reordering and
//! reference management.
//!
//! This module provides:
//! - Stream configuration and budget negotiation (`GopConfig`, `NegotiatedConfig`)
//! - Golden-frame group plans (`gop` module)
//! - The per-group reorder buffer (`reorder` module)
//! - Reference slots and role assignment (`dpb` module)
//! - The frame scheduler tying them together (`scheduler` module)

pub mod dpb;
pub mod frame;
pub mod gop;
pub mod reorder;
pub mod scheduler;

use tracing::info;

use self::dpb::{RefPolicy, NUM_REF_SLOTS};
use self::gop::{HIGHEST_PYRAMID_LEVEL, MAX_GF_GROUP_SIZE};
use crate::error::{GopError, Result};

// Default configuration constants.

/// Default golden-frame group size (golden frame included).
pub const DEFAULT_GROUP_SIZE: u32 = 16;

/// Default number of pyramid layers (golden layer included).
pub const DEFAULT_PYRAMID_LEVELS: u32 = 4;

/// Default number of AV1 reference frames.
pub const DEFAULT_AV1_REFERENCE_FRAMES: u32 = 7;

/// Default number of VP9 reference frames.
pub const DEFAULT_VP9_REFERENCE_FRAMES: u32 = 3;

/// Default AV1 forward budget for bidirectional frames.
pub const DEFAULT_AV1_FORWARD_REFS: u32 = 2;

/// Default AV1 forward budget for frames without a backward reference.
pub const DEFAULT_AV1_FORWARD_ONLY_REFS: u32 = 3;

/// Default AV1 backward budget.
pub const DEFAULT_AV1_BACKWARD_REFS: u32 = 2;

/// AV1 forward roles (LAST, LAST2, LAST3).
const AV1_MAX_FORWARD_REFS: u32 = 3;

/// AV1 backward roles (BWDREF, ALTREF2, ALTREF).
const AV1_MAX_BACKWARD_REFS: u32 = 3;

/// VP9 has a single LAST and a single ALTREF role.
const VP9_MAX_FORWARD_REFS: u32 = 1;
const VP9_MAX_BACKWARD_REFS: u32 = 1;

/// Smallest group that can carry a trailing AltRef.
const MIN_BACKWARD_GROUP_SIZE: u32 = 4;

/// Fewest pyramid layers that leave room for the AltRef layer.
const MIN_BACKWARD_LAYERS: u32 = 3;

/// Video codec types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// AV1: seven reference roles, up to three backward.
    Av1,
    /// VP9: LAST, GOLDEN and ALTREF.
    Vp9,
}

impl Codec {
    /// Reference slots the codec defines.
    pub fn reference_slots(&self) -> usize {
        NUM_REF_SLOTS
    }

    fn max_forward_refs(&self) -> u32 {
        match self {
            Codec::Av1 => AV1_MAX_FORWARD_REFS,
            Codec::Vp9 => VP9_MAX_FORWARD_REFS,
        }
    }

    fn max_backward_refs(&self) -> u32 {
        match self {
            Codec::Av1 => AV1_MAX_BACKWARD_REFS,
            Codec::Vp9 => VP9_MAX_BACKWARD_REFS,
        }
    }
}

/// Requested GOP configuration.
///
/// Values are requests; [`GopConfig::negotiate`] clamps them into a
/// combination the engine can schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct GopConfig {
    /// Codec the stream is encoded with.
    pub codec: Codec,
    /// Frames per golden-frame group, golden frame included.
    pub group_size: u32,
    /// Pyramid layers, golden layer included.
    pub max_pyramid_level: u32,
    /// Reference slots to use (0 = intra-only).
    pub num_reference_frames: u32,
    /// Forward references for bidirectional frames.
    pub forward_reference_budget: u32,
    /// Forward references for frames without a backward reference (AV1 only).
    pub forward_only_reference_budget: u32,
    /// Backward references.
    pub backward_reference_budget: u32,
    /// frame_num at which a key frame is forced (0 = never).
    pub keyframe_interval: u32,
}

impl GopConfig {
    /// Create an AV1 configuration with default settings.
    pub fn av1() -> Self {
        Self {
            codec: Codec::Av1,
            group_size: DEFAULT_GROUP_SIZE,
            max_pyramid_level: DEFAULT_PYRAMID_LEVELS,
            num_reference_frames: DEFAULT_AV1_REFERENCE_FRAMES,
            forward_reference_budget: DEFAULT_AV1_FORWARD_REFS,
            forward_only_reference_budget: DEFAULT_AV1_FORWARD_ONLY_REFS,
            backward_reference_budget: DEFAULT_AV1_BACKWARD_REFS,
            keyframe_interval: 0,
        }
    }

    /// Create a VP9 configuration with default settings.
    pub fn vp9() -> Self {
        Self {
            codec: Codec::Vp9,
            group_size: DEFAULT_GROUP_SIZE,
            max_pyramid_level: DEFAULT_PYRAMID_LEVELS,
            num_reference_frames: DEFAULT_VP9_REFERENCE_FRAMES,
            forward_reference_budget: VP9_MAX_FORWARD_REFS,
            forward_only_reference_budget: VP9_MAX_FORWARD_REFS,
            backward_reference_budget: VP9_MAX_BACKWARD_REFS,
            keyframe_interval: 0,
        }
    }

    /// Set the golden-frame group size.
    pub fn with_group_size(mut self, size: u32) -> Self {
        self.group_size = size;
        self
    }

    /// Set the number of pyramid layers.
    pub fn with_max_pyramid_level(mut self, levels: u32) -> Self {
        self.max_pyramid_level = levels;
        self
    }

    /// Set the number of reference frames (0 for intra-only).
    pub fn with_num_reference_frames(mut self, count: u32) -> Self {
        self.num_reference_frames = count;
        self
    }

    /// Set the forward reference budget.
    pub fn with_forward_reference_budget(mut self, count: u32) -> Self {
        self.forward_reference_budget = count;
        self
    }

    /// Set the forward-only reference budget.
    pub fn with_forward_only_reference_budget(mut self, count: u32) -> Self {
        self.forward_only_reference_budget = count;
        self
    }

    /// Set the backward reference budget.
    pub fn with_backward_reference_budget(mut self, count: u32) -> Self {
        self.backward_reference_budget = count;
        self
    }

    /// Set the periodic key frame interval.
    pub fn with_keyframe_interval(mut self, interval: u32) -> Self {
        self.keyframe_interval = interval;
        self
    }

    /// Clamp the requested values into a schedulable configuration.
    ///
    /// The result depends on nothing but `self`.
    pub fn negotiate(&self) -> Result<NegotiatedConfig> {
        if self.group_size == 0 {
            return Err(GopError::Configuration(
                "group size must be at least 1".to_string(),
            ));
        }
        if self.max_pyramid_level == 0 {
            return Err(GopError::Configuration(
                "at least one pyramid level is required".to_string(),
            ));
        }

        if self.num_reference_frames == 0 {
            if self.backward_reference_budget > 0 {
                return Err(GopError::Configuration(format!(
                    "backward reference budget {} requested without reference frames",
                    self.backward_reference_budget
                )));
            }
            let negotiated = NegotiatedConfig {
                codec: self.codec,
                group_size: 1,
                max_level: 1,
                num_reference_frames: 0,
                policy: self.policy(0, 0, 0),
                uses_backward_ref: false,
                keyframe_interval: self.keyframe_interval,
            };
            info!("Negotiated intra-only GOP for {:?}", self.codec);
            return Ok(negotiated);
        }

        let num_refs = self
            .num_reference_frames
            .clamp(2, self.codec.reference_slots() as u32);
        let group_size = self.group_size.clamp(2, MAX_GF_GROUP_SIZE + 1);
        let layers = self
            .max_pyramid_level
            .clamp(2, HIGHEST_PYRAMID_LEVEL as u32 + 1);

        let forward_cap = self.codec.max_forward_refs().min(num_refs - 1);
        let forward = self.forward_reference_budget.min(forward_cap);
        let forward_only = self.forward_only_reference_budget.min(forward_cap);
        let mut backward = self
            .backward_reference_budget
            .min(self.codec.max_backward_refs());
        if group_size < MIN_BACKWARD_GROUP_SIZE || layers < MIN_BACKWARD_LAYERS {
            backward = 0;
        }

        let mut max_level = layers - 1;
        if backward > 0 {
            // Every hidden frame must keep a slot until it is repeated.
            max_level = max_level.min(num_refs);
        }

        let negotiated = NegotiatedConfig {
            codec: self.codec,
            group_size,
            max_level: max_level as u8,
            num_reference_frames: num_refs as usize,
            policy: self.policy(forward, forward_only, backward),
            uses_backward_ref: backward > 0,
            keyframe_interval: self.keyframe_interval,
        };
        info!(
            "Negotiated GOP for {:?}: group_size={}, max_level={}, refs={}, policy={:?}",
            negotiated.codec,
            negotiated.group_size,
            negotiated.max_level,
            negotiated.num_reference_frames,
            negotiated.policy
        );
        Ok(negotiated)
    }

    fn policy(&self, forward: u32, forward_only: u32, backward: u32) -> RefPolicy {
        match self.codec {
            Codec::Av1 => RefPolicy::Av1 {
                forward_only: forward_only as u8,
                forward: forward as u8,
                backward: backward as u8,
            },
            Codec::Vp9 => RefPolicy::Vp9 {
                forward: forward as u8,
                backward: backward as u8,
            },
        }
    }
}

/// Configuration after clamping, as used by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedConfig {
    /// Codec the stream is encoded with.
    pub codec: Codec,
    /// Frames per group, golden frame included.
    pub group_size: u32,
    /// Deepest pyramid level a plan may use.
    pub max_level: u8,
    /// Reference slots in use (0 = intra-only).
    pub num_reference_frames: usize,
    /// Reference role policy with its budgets.
    pub policy: RefPolicy,
    /// Whether groups carry a trailing AltRef.
    pub uses_backward_ref: bool,
    /// frame_num at which a key frame is forced (0 = never).
    pub keyframe_interval: u32,
}

impl NegotiatedConfig {
    /// Whether inter prediction is disabled.
    pub fn is_intra_only(&self) -> bool {
        self.num_reference_frames == 0
    }

    /// Size of a group starting at `start_frame_num`, cut at the next periodic key frame.
    pub fn group_size_at(&self, start_frame_num: u32) -> u32 {
        let size = if self.keyframe_interval > 0 {
            self.group_size
                .min(self.keyframe_interval.saturating_sub(start_frame_num))
        } else {
            self.group_size
        };
        size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // GopConfig tests.
    mod gop_config_tests {
        use super::*;

        #[test]
        fn test_av1_defaults() {
            let config = GopConfig::av1();

            assert_eq!(config.codec, Codec::Av1);
            assert_eq!(config.group_size, 16);
            assert_eq!(config.max_pyramid_level, 4);
            assert_eq!(config.num_reference_frames, 7);
            assert_eq!(config.keyframe_interval, 0);
        }

        #[test]
        fn test_vp9_defaults() {
            let config = GopConfig::vp9();

            assert_eq!(config.codec, Codec::Vp9);
            assert_eq!(config.num_reference_frames, 3);
            assert_eq!(config.backward_reference_budget, 1);
        }

        #[test]
        fn test_builder_chaining() {
            let config = GopConfig::av1()
                .with_group_size(8)
                .with_max_pyramid_level(3)
                .with_num_reference_frames(4)
                .with_forward_reference_budget(1)
                .with_forward_only_reference_budget(2)
                .with_backward_reference_budget(1)
                .with_keyframe_interval(60);

            assert_eq!(config.group_size, 8);
            assert_eq!(config.max_pyramid_level, 3);
            assert_eq!(config.num_reference_frames, 4);
            assert_eq!(config.forward_reference_budget, 1);
            assert_eq!(config.forward_only_reference_budget, 2);
            assert_eq!(config.backward_reference_budget, 1);
            assert_eq!(config.keyframe_interval, 60);
        }
    }

    // Negotiation tests.
    mod negotiate_tests {
        use super::*;

        #[test]
        fn test_av1_defaults() {
            let negotiated = GopConfig::av1().negotiate().unwrap();

            assert_eq!(negotiated.group_size, 16);
            assert_eq!(negotiated.max_level, 3);
            assert_eq!(negotiated.num_reference_frames, 7);
            assert!(negotiated.uses_backward_ref);
            assert_eq!(
                negotiated.policy,
                RefPolicy::Av1 {
                    forward_only: 3,
                    forward: 2,
                    backward: 2
                }
            );
        }

        #[test]
        fn test_zero_values_rejected() {
            assert!(matches!(
                GopConfig::av1().with_group_size(0).negotiate(),
                Err(GopError::Configuration(_))
            ));
            assert!(matches!(
                GopConfig::av1().with_max_pyramid_level(0).negotiate(),
                Err(GopError::Configuration(_))
            ));
        }

        #[test]
        fn test_backward_without_references_rejected() {
            let result = GopConfig::av1()
                .with_num_reference_frames(0)
                .with_backward_reference_budget(1)
                .negotiate();
            assert!(matches!(result, Err(GopError::Configuration(_))));
        }

        #[test]
        fn test_intra_only() {
            let negotiated = GopConfig::vp9()
                .with_num_reference_frames(0)
                .with_backward_reference_budget(0)
                .negotiate()
                .unwrap();

            assert!(negotiated.is_intra_only());
            assert_eq!(negotiated.group_size, 1);
            assert!(!negotiated.uses_backward_ref);
            assert_eq!(
                negotiated.policy,
                RefPolicy::Vp9 {
                    forward: 0,
                    backward: 0
                }
            );
        }

        #[test]
        fn test_clamping() {
            let negotiated = GopConfig::av1()
                .with_group_size(100)
                .with_max_pyramid_level(20)
                .with_num_reference_frames(20)
                .with_forward_reference_budget(9)
                .with_forward_only_reference_budget(9)
                .with_backward_reference_budget(9)
                .negotiate()
                .unwrap();

            assert_eq!(negotiated.group_size, MAX_GF_GROUP_SIZE + 1);
            assert_eq!(negotiated.max_level, HIGHEST_PYRAMID_LEVEL);
            assert_eq!(negotiated.num_reference_frames, NUM_REF_SLOTS);
            assert_eq!(
                negotiated.policy,
                RefPolicy::Av1 {
                    forward_only: 3,
                    forward: 3,
                    backward: 3
                }
            );
        }

        #[test]
        fn test_forward_budget_bounded_by_references() {
            let negotiated = GopConfig::av1()
                .with_num_reference_frames(2)
                .negotiate()
                .unwrap();

            assert_eq!(
                negotiated.policy,
                RefPolicy::Av1 {
                    forward_only: 1,
                    forward: 1,
                    backward: 2
                }
            );
            // Golden and AltRef take both slots, no inline AltRefs.
            assert_eq!(negotiated.max_level, 2);
        }

        #[test]
        fn test_vp9_budgets() {
            let negotiated = GopConfig::vp9()
                .with_forward_reference_budget(3)
                .with_backward_reference_budget(3)
                .negotiate()
                .unwrap();

            assert_eq!(
                negotiated.policy,
                RefPolicy::Vp9 {
                    forward: 1,
                    backward: 1
                }
            );
        }

        #[test]
        fn test_backward_disabled_for_small_groups() {
            let small = GopConfig::av1().with_group_size(3).negotiate().unwrap();
            assert!(!small.uses_backward_ref);

            let shallow = GopConfig::av1().with_max_pyramid_level(2).negotiate().unwrap();
            assert!(!shallow.uses_backward_ref);
            assert_eq!(shallow.max_level, 1);

            let single = GopConfig::av1().with_group_size(1).negotiate().unwrap();
            assert_eq!(single.group_size, 2);
        }

        #[test]
        fn test_negotiation_is_deterministic() {
            for group_size in [1, 3, 4, 8, 17, 40] {
                for levels in 1..9 {
                    for refs in [1, 2, 3, 5, 8, 12] {
                        for backward in 0..5 {
                            let config = GopConfig::av1()
                                .with_group_size(group_size)
                                .with_max_pyramid_level(levels)
                                .with_num_reference_frames(refs)
                                .with_backward_reference_budget(backward);
                            let first = config.negotiate().unwrap();
                            let second = config.clone().negotiate().unwrap();
                            assert_eq!(first, second);
                            assert!(first.max_level <= HIGHEST_PYRAMID_LEVEL);
                            if first.uses_backward_ref {
                                assert!(first.group_size >= MIN_BACKWARD_GROUP_SIZE);
                                assert!(first.max_level as usize <= first.num_reference_frames);
                            }
                        }
                    }
                }
            }
        }

        #[test]
        fn test_group_size_at_keyframe_interval() {
            let negotiated = GopConfig::av1()
                .with_group_size(8)
                .with_keyframe_interval(10)
                .negotiate()
                .unwrap();

            assert_eq!(negotiated.group_size_at(0), 8);
            assert_eq!(negotiated.group_size_at(7), 3);

            let unbounded = GopConfig::av1().with_group_size(8).negotiate().unwrap();
            assert_eq!(unbounded.group_size_at(100), 8);
        }
    }
}
