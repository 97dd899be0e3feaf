//! Progressive accumulation state.
//!
//! Two radiance images, A and B, take turns being read and written by the
//! final gather. After `k` completed gathers since the last clear the newest
//! average lives in A when `k` is even and in B when it is odd.
//!
//! ```text
//!            camera / bvh / geometry / resize / request
//! Continuing ------------------------------------------> Reset
//!     ^                                                   |
//!     +------------- clear scheduled by begin_frame ------+
//! ```

use crate::util::Vec4;

/// One of the two ping-pong radiance images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RadianceBuffer {
    #[default]
    A,
    B,
}

impl RadianceBuffer {
    pub fn other(self) -> Self {
        match self {
            RadianceBuffer::A => RadianceBuffer::B,
            RadianceBuffer::B => RadianceBuffer::A,
        }
    }

    /// Image holding the newest average after `gathers` completed gathers.
    pub fn after_gathers(gathers: u32) -> Self {
        if gathers % 2 == 0 {
            RadianceBuffer::A
        } else {
            RadianceBuffer::B
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationState {
    Continuing,
    Reset,
}

/// Why the accumulated image was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    Initial,
    CameraMoved,
    BvhToggled,
    GeometryChanged,
    Resized,
    SettingsChanged,
    Requested,
}

/// What the next frame has to do, decided by
/// [`AccumulationController::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStart {
    /// Clear both images first.
    pub clear: bool,
    /// Samples to trace this frame; 0 once converged.
    pub samples: u32,
    /// Gathers completed before the first sample of this frame.
    pub frames_before: u32,
}

/// Reset/continue state machine plus the running sample count.
#[derive(Debug, Clone)]
pub struct AccumulationController {
    state: AccumulationState,
    reason: ResetReason,
    frames_accumulated: u32,
    /// 0 = unbounded.
    max_samples: u32,
    last_generation: Option<u64>,
}

impl AccumulationController {
    pub fn new(max_samples: u32) -> Self {
        Self {
            state: AccumulationState::Reset,
            reason: ResetReason::Initial,
            frames_accumulated: 0,
            max_samples,
            last_generation: None,
        }
    }

    pub fn state(&self) -> AccumulationState {
        self.state
    }

    /// Reason for the pending (or most recent) reset.
    pub fn reset_reason(&self) -> ResetReason {
        self.reason
    }

    /// Completed final gathers since the last clear.
    pub fn frames_accumulated(&self) -> u32 {
        self.frames_accumulated
    }

    pub fn max_samples(&self) -> u32 {
        self.max_samples
    }

    pub fn set_max_samples(&mut self, max_samples: u32) {
        self.max_samples = max_samples;
    }

    pub fn is_converged(&self) -> bool {
        self.max_samples > 0 && self.frames_accumulated >= self.max_samples
    }

    /// Image to present right now.
    pub fn display_buffer(&self) -> RadianceBuffer {
        RadianceBuffer::after_gathers(self.frames_accumulated)
    }

    /// Enter Reset. The clear happens on the next [`begin_frame`](Self::begin_frame).
    pub fn request_reset(&mut self, reason: ResetReason) {
        if self.state != AccumulationState::Reset {
            tracing::debug!(?reason, frames = self.frames_accumulated, "accumulation reset");
        }
        self.state = AccumulationState::Reset;
        self.reason = reason;
        self.frames_accumulated = 0;
    }

    /// Reset if the camera reported a pose change.
    pub fn observe_camera(&mut self, updated: bool) {
        if updated {
            self.request_reset(ResetReason::CameraMoved);
        }
    }

    /// Reset when the scene generation moved since the last call.
    ///
    /// Returns true when it did, i.e. the scene needs re-uploading.
    pub fn observe_scene_generation(&mut self, generation: u64) -> bool {
        let changed = self.last_generation != Some(generation);
        if changed {
            if self.last_generation.is_some() {
                self.request_reset(ResetReason::GeometryChanged);
            }
            self.last_generation = Some(generation);
        }
        changed
    }

    /// Decide the next frame and leave Reset.
    pub fn begin_frame(&mut self, samples_per_frame: u32) -> FrameStart {
        let clear = self.state == AccumulationState::Reset;
        if clear {
            self.frames_accumulated = 0;
            self.state = AccumulationState::Continuing;
        }
        let samples = if self.max_samples == 0 {
            samples_per_frame
        } else {
            samples_per_frame.min(self.max_samples.saturating_sub(self.frames_accumulated))
        };
        FrameStart {
            clear,
            samples,
            frames_before: self.frames_accumulated,
        }
    }

    /// Record `gathers` completed final gathers.
    pub fn complete_gathers(&mut self, gathers: u32) {
        self.frames_accumulated += gathers;
    }
}

impl Default for AccumulationController {
    fn default() -> Self {
        Self::new(0)
    }
}

/// CPU form of the final-gather blend: mean of `frames_before` samples
/// folded with one more.
#[inline]
pub fn blend(prev: Vec4, sample: Vec4, frames_before: u32) -> Vec4 {
    prev + (sample - prev) / (frames_before as f32 + 1.0)
}
