use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use super::{PipelineConfig, StepParams};
use crate::accumulation::{FrameStart, RadianceBuffer};
use crate::util::{Error, Result};

/// One compute pass kind with the indices it runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// Zero both radiance images.
    Clear,
    GenerateRay { sample: u32 },
    GenerateFlags { sample: u32, depth: u32 },
    ScanBlocks { sample: u32, depth: u32 },
    ScanBlockSums { sample: u32, depth: u32 },
    AddBlockOffsets { sample: u32, depth: u32 },
    CompactPaths { sample: u32, depth: u32 },
    ComputeIntersections { sample: u32, depth: u32 },
    Integrate { sample: u32, depth: u32 },
    /// Blend the sample into `read`'s average, writing `read.other()`.
    FinalGather { sample: u32, read: RadianceBuffer },
}

impl Dispatch {
    pub fn label(&self) -> &'static str {
        match self {
            Dispatch::Clear => "clear_radiance",
            Dispatch::GenerateRay { .. } => "generate_ray",
            Dispatch::GenerateFlags { .. } => "generate_flags",
            Dispatch::ScanBlocks { .. } => "scan_blocks",
            Dispatch::ScanBlockSums { .. } => "scan_block_sums",
            Dispatch::AddBlockOffsets { .. } => "add_block_offsets",
            Dispatch::CompactPaths { .. } => "compact_paths",
            Dispatch::ComputeIntersections { .. } => "compute_intersections",
            Dispatch::Integrate { .. } => "integrate",
            Dispatch::FinalGather { .. } => "final_gather",
        }
    }

    pub fn is_compaction(&self) -> bool {
        matches!(
            self,
            Dispatch::GenerateFlags { .. }
                | Dispatch::ScanBlocks { .. }
                | Dispatch::ScanBlockSums { .. }
                | Dispatch::AddBlockOffsets { .. }
                | Dispatch::CompactPaths { .. }
        )
    }
}

/// Grid size of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSize {
    Direct([u32; 3]),
    /// Read from the indirect-args buffer written by `CompactPaths`.
    Indirect,
}

/// One planned dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub dispatch: Dispatch,
    pub size: DispatchSize,
    /// Index into [`FramePlan::params`].
    pub params_slot: u32,
}

impl Step {
    /// Byte offset of this step's parameters in the uniform array.
    pub fn params_offset(&self) -> u32 {
        self.params_slot * super::PARAMS_STRIDE as u32
    }
}

/// Ordered dispatches for one displayed frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramePlan {
    pub steps: Vec<Step>,
    /// Uploaded once per frame; step `i` reads `params[steps[i].params_slot]`.
    pub params: Vec<StepParams>,
    /// Final gathers in this plan.
    pub gathers: u32,
    /// Image holding the newest average once the plan has run.
    pub display: RadianceBuffer,
}

impl FramePlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parameter array as bytes at [`PARAMS_STRIDE`](super::PARAMS_STRIDE).
    pub fn params_bytes(&self) -> Vec<u8> {
        let stride = super::PARAMS_STRIDE as usize;
        let mut out = vec![0u8; self.params.len() * stride];
        for (i, p) in self.params.iter().enumerate() {
            out[i * stride..i * stride + 16].copy_from_slice(bytemuck::bytes_of(p));
        }
        out
    }

    /// Fail if the parameter array would overrun a buffer of `capacity_bytes`.
    pub fn params_fit(&self, capacity_bytes: u64) -> Result<()> {
        let slots = (capacity_bytes / super::PARAMS_STRIDE) as usize;
        if self.params.len() > slots {
            return Err(Error::capacity("step params", self.params.len(), slots));
        }
        Ok(())
    }
}

/// Turns accumulation decisions into dispatch lists.
///
/// Seeds come from a `SmallRng` seeded once, so a given config and frame
/// sequence always produces the same plans.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    config: PipelineConfig,
    rng: SmallRng,
}

impl FrameScheduler {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            rng: SmallRng::seed_from_u64(config.seed),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Swap config (resize, depth, variant). The RNG stream continues.
    pub fn set_config(&mut self, config: PipelineConfig) {
        self.config = config;
    }

    pub fn plan(&mut self, start: FrameStart) -> FramePlan {
        let c = self.config;
        let image = DispatchSize::Direct(c.image_workgroups());
        let paths = DispatchSize::Direct(c.path_workgroups());
        let bounce = if c.variant.compacts() {
            DispatchSize::Indirect
        } else {
            paths
        };

        let mut plan = FramePlan {
            display: RadianceBuffer::after_gathers(start.frames_before),
            ..Default::default()
        };
        if start.samples == 0 && !start.clear {
            return plan;
        }

        plan.params.push(StepParams {
            seed: 0,
            depth: c.ray_depth as i32,
            sample_index: 0,
            frames_before: start.frames_before,
        });
        if start.clear {
            plan.steps.push(Step {
                dispatch: Dispatch::Clear,
                size: image,
                params_slot: 0,
            });
        }

        for sample in 0..start.samples {
            let seed = self.rng.next_u32();
            let frames_before = start.frames_before + sample;
            let sample_slot = plan.params.len() as u32;
            plan.params.push(StepParams {
                seed,
                depth: c.ray_depth as i32,
                sample_index: sample,
                frames_before,
            });
            plan.steps.push(Step {
                dispatch: Dispatch::GenerateRay { sample },
                size: image,
                params_slot: sample_slot,
            });

            for depth in (0..=c.ray_depth).rev() {
                let slot = plan.params.len() as u32;
                plan.params.push(StepParams {
                    seed,
                    depth: depth as i32,
                    sample_index: sample,
                    frames_before,
                });
                let mut push = |dispatch, size| {
                    plan.steps.push(Step {
                        dispatch,
                        size,
                        params_slot: slot,
                    })
                };
                if c.variant.compacts() {
                    push(Dispatch::GenerateFlags { sample, depth }, paths);
                    push(Dispatch::ScanBlocks { sample, depth }, paths);
                    let single = DispatchSize::Direct([1, 1, 1]);
                    push(Dispatch::ScanBlockSums { sample, depth }, single);
                    push(Dispatch::AddBlockOffsets { sample, depth }, paths);
                    push(Dispatch::CompactPaths { sample, depth }, paths);
                }
                push(Dispatch::ComputeIntersections { sample, depth }, bounce);
                push(Dispatch::Integrate { sample, depth }, bounce);
            }

            plan.steps.push(Step {
                dispatch: Dispatch::FinalGather {
                    sample,
                    read: RadianceBuffer::after_gathers(frames_before),
                },
                size: image,
                params_slot: sample_slot,
            });
            plan.gathers += 1;
        }

        plan.display = RadianceBuffer::after_gathers(start.frames_before + plan.gathers);
        debug_assert!(plan.params.len() as u32 <= c.param_slots());
        plan
    }
}
