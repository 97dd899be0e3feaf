//! Path-tracing frame orchestration.
//!
//! This module is GPU-free: it decides *what* runs each frame and in which
//! order. [`FrameScheduler::plan`] turns an accumulation decision into a
//! [`FramePlan`], an ordered list of compute dispatches plus the per-dispatch
//! parameter block each one reads. The wgpu executor in `gpu::compute`
//! encodes that list verbatim into one command encoder.
//!
//! Per sample:
//! ```text
//! GenerateRay
//! for depth in ray_depth..=0:
//!     [GenerateFlags ScanBlocks ScanBlockSums AddBlockOffsets CompactPaths]   (compaction only)
//!     ComputeIntersections
//!     Integrate
//! FinalGather   (read current image, write the other)
//! ```

mod schedule;

pub use schedule::{Dispatch, DispatchSize, FramePlan, FrameScheduler, Step};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};

/// 2D workgroup edge for per-pixel image passes.
pub const PIXEL_WORKGROUP: u32 = 8;
/// 1D workgroup width for per-path passes.
pub const PATH_WORKGROUP: u32 = 256;
/// Elements scanned per workgroup; one element per invocation.
pub const SCAN_BLOCK: u32 = PATH_WORKGROUP;
/// Dynamic-offset stride between `StepParams` slots.
pub const PARAMS_STRIDE: u64 = 256;
/// Upper bound on `ray_depth`.
pub const MAX_RAY_DEPTH: u32 = 64;
/// Upper bound on `samples_per_frame`.
pub const MAX_SAMPLES_PER_FRAME: u32 = 64;
/// WebGPU default for `max_compute_workgroups_per_dimension`.
pub const DEFAULT_MAX_WORKGROUPS: u32 = 65_535;

/// Execution strategy. Both produce the same estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Intersect and integrate over every pixel each bounce.
    #[default]
    FullGrid,
    /// Compact live paths into a dense list before each bounce and run
    /// intersect/integrate indirectly over that list.
    StreamCompaction,
}

impl PipelineVariant {
    pub fn compacts(self) -> bool {
        self == PipelineVariant::StreamCompaction
    }
}

/// Per-dispatch parameters (16 bytes), one slot per [`PARAMS_STRIDE`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct StepParams {
    /// Hash seed for this sample.
    pub seed: u32,
    /// Bounce index, counting down to 0.
    pub depth: i32,
    pub sample_index: u32,
    /// Gathers completed before this sample.
    pub frames_before: u32,
}

/// Everything the scheduler needs to lay out one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub variant: PipelineVariant,
    pub width: u32,
    pub height: u32,
    /// Bounces after the primary hit; `ray_depth + 1` intersect rounds.
    pub ray_depth: u32,
    pub samples_per_frame: u32,
    pub seed: u64,
    /// Device limit per dispatch dimension.
    pub max_workgroups: u32,
}

impl PipelineConfig {
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    pub fn image_workgroups(&self) -> [u32; 3] {
        [
            self.width.div_ceil(PIXEL_WORKGROUP),
            self.height.div_ceil(PIXEL_WORKGROUP),
            1,
        ]
    }

    pub fn path_workgroups(&self) -> [u32; 3] {
        [self.pixel_count().div_ceil(PATH_WORKGROUP), 1, 1]
    }

    /// Number of scan blocks; also the length of the block-sum array.
    pub fn scan_blocks(&self) -> u32 {
        self.pixel_count().div_ceil(SCAN_BLOCK)
    }

    /// Parameter slots a frame can use: one for the frame itself, then per
    /// sample one for generate/gather and one per bounce.
    pub fn param_slots(&self) -> u32 {
        1 + self.samples_per_frame * (self.ray_depth + 2)
    }

    /// Size of the dynamic-offset uniform array.
    pub fn params_buffer_size(&self) -> u64 {
        self.param_slots() as u64 * PARAMS_STRIDE
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config(format!(
                "resolution {}x{} has a zero dimension",
                self.width, self.height
            )));
        }
        if self.ray_depth > MAX_RAY_DEPTH {
            return Err(Error::config(format!(
                "ray_depth {} exceeds {MAX_RAY_DEPTH}",
                self.ray_depth
            )));
        }
        if self.samples_per_frame == 0 || self.samples_per_frame > MAX_SAMPLES_PER_FRAME {
            return Err(Error::config(format!(
                "samples_per_frame {} outside 1..={MAX_SAMPLES_PER_FRAME}",
                self.samples_per_frame
            )));
        }
        let image = self.image_workgroups();
        let path = self.path_workgroups();
        let widest = image[0].max(image[1]).max(path[0]);
        if widest > self.max_workgroups {
            return Err(Error::capacity(
                "workgroups per dimension",
                widest as usize,
                self.max_workgroups as usize,
            ));
        }
        // One workgroup walks every block sum.
        if self.variant.compacts() && self.scan_blocks() > SCAN_BLOCK * SCAN_BLOCK {
            return Err(Error::capacity(
                "scan blocks",
                self.scan_blocks() as usize,
                (SCAN_BLOCK * SCAN_BLOCK) as usize,
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: PipelineVariant::FullGrid,
            width: 1280,
            height: 720,
            ray_depth: 8,
            samples_per_frame: 1,
            seed: 0x5eed,
            max_workgroups: DEFAULT_MAX_WORKGROUPS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_params_size() {
        assert_eq!(std::mem::size_of::<StepParams>(), 16);
        assert!(PARAMS_STRIDE >= 16);
    }

    #[test]
    fn test_workgroup_counts() {
        let c = PipelineConfig {
            width: 17,
            height: 9,
            ..Default::default()
        };
        assert_eq!(c.image_workgroups(), [3, 2, 1]);
        assert_eq!(c.path_workgroups(), [1, 1, 1]);
        assert_eq!(c.scan_blocks(), 1);
        let c = PipelineConfig {
            width: 1920,
            height: 1080,
            ..Default::default()
        };
        assert_eq!(c.path_workgroups()[0], 8100);
    }

    #[test]
    fn test_validate_limits() {
        assert!(PipelineConfig::default().validate().is_ok());
        let bad = PipelineConfig {
            width: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PipelineConfig {
            samples_per_frame: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PipelineConfig {
            width: 8192,
            height: 8192,
            max_workgroups: 65_535,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::CapacityExceeded { .. })));
    }

    #[test]
    fn test_param_slots() {
        let c = PipelineConfig {
            ray_depth: 3,
            samples_per_frame: 2,
            ..Default::default()
        };
        assert_eq!(c.param_slots(), 11);
        assert_eq!(c.params_buffer_size(), 11 * 256);
    }

    #[test]
    fn test_variant_serde() {
        let json = serde_json::to_string(&PipelineVariant::StreamCompaction).unwrap();
        assert_eq!(json, "\"stream_compaction\"");
    }
}
