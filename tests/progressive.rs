//! Frame planning and accumulation driven end to end on the CPU.
//!
//! `Emulator` replays a plan's Clear and FinalGather steps against two
//! single-pixel "images", exactly as the GPU gather pass would.

use pathtracer::accumulation::{blend, AccumulationController, RadianceBuffer, ResetReason};
use pathtracer::pipeline::{
    Dispatch, FramePlan, FrameScheduler, PipelineConfig, PipelineVariant, DEFAULT_MAX_WORKGROUPS,
};
use pathtracer::settings::RenderSettings;
use pathtracer::util::Vec4;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use test_case::test_case;

fn config(variant: PipelineVariant, samples_per_frame: u32, ray_depth: u32) -> PipelineConfig {
    let settings = RenderSettings {
        width: 64,
        height: 48,
        variant,
        samples_per_frame,
        ray_depth,
        ..RenderSettings::default()
    };
    settings.pipeline_config(DEFAULT_MAX_WORKGROUPS)
}

struct Emulator {
    images: [Vec4; 2],
}

impl Emulator {
    fn new() -> Self {
        Self {
            images: [Vec4::splat(f32::NAN); 2],
        }
    }

    fn run(&mut self, plan: &FramePlan, mut sample: impl FnMut() -> f32) {
        for step in &plan.steps {
            match step.dispatch {
                Dispatch::Clear => self.images = [Vec4::ZERO; 2],
                Dispatch::FinalGather { read, .. } => {
                    let p = plan.params[step.params_slot as usize];
                    let s = Vec4::splat(sample());
                    let prev = self.images[read.index()];
                    self.images[read.other().index()] = blend(prev, s, p.frames_before);
                }
                _ => {}
            }
        }
    }

    fn display(&self, buffer: RadianceBuffer) -> f32 {
        self.images[buffer.index()].x
    }
}

/// Fraction of cosine-weighted directions from a point that hit a coaxial
/// disk of radius `r` at height `h`. Exact value: r² / (r² + h²).
fn disk_hit(rng: &mut SmallRng, r: f32, h: f32) -> f32 {
    let u1: f32 = rng.random();
    let u2: f32 = rng.random();
    let s = u1.sqrt();
    let phi = std::f32::consts::TAU * u2;
    let (x, y, z) = (s * phi.cos(), s * phi.sin(), (1.0 - u1).sqrt());
    if z <= 0.0 {
        return 0.0;
    }
    let t = h / z;
    if (x * t).hypot(y * t) <= r {
        1.0
    } else {
        0.0
    }
}

#[test_case(PipelineVariant::FullGrid, 1 ; "full grid one sample")]
#[test_case(PipelineVariant::FullGrid, 3 ; "full grid three samples")]
#[test_case(PipelineVariant::StreamCompaction, 4 ; "compaction four samples")]
fn test_converges_to_disk_form_factor(variant: PipelineVariant, spf: u32) {
    let (r, h) = (1.0f32, 1.5f32);
    let exact = r * r / (r * r + h * h);

    let mut scheduler = FrameScheduler::new(config(variant, spf, 2));
    let mut acc = AccumulationController::new(0);
    let mut emu = Emulator::new();
    let mut rng = SmallRng::seed_from_u64(7);

    while acc.frames_accumulated() < 40_000 {
        let plan = scheduler.plan(acc.begin_frame(spf));
        emu.run(&plan, || disk_hit(&mut rng, r, h));
        acc.complete_gathers(plan.gathers);
        assert_eq!(plan.display, acc.display_buffer());
    }
    let estimate = emu.display(acc.display_buffer());
    assert!((estimate - exact).abs() < 0.01, "estimate {estimate} vs {exact}");
}

#[test]
fn test_variance_shrinks_with_frames() {
    let (r, h) = (1.0f32, 1.5f32);
    let checkpoints = [1u32, 4, 16, 64];
    let seeds = 256u64;
    let mut estimates = vec![Vec::new(); checkpoints.len()];

    for seed in 0..seeds {
        let mut scheduler = FrameScheduler::new(config(PipelineVariant::FullGrid, 1, 1));
        let mut acc = AccumulationController::new(0);
        let mut emu = Emulator::new();
        let mut rng = SmallRng::seed_from_u64(seed);
        for _ in 0..64 {
            let plan = scheduler.plan(acc.begin_frame(1));
            emu.run(&plan, || disk_hit(&mut rng, r, h));
            acc.complete_gathers(plan.gathers);
            let frames = acc.frames_accumulated();
            if let Some(k) = checkpoints.iter().position(|&c| c == frames) {
                estimates[k].push(emu.display(acc.display_buffer()) as f64);
            }
        }
    }

    let variance = |xs: &[f64]| {
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    };
    let variances: Vec<f64> = estimates
        .iter()
        .map(|e| {
            assert_eq!(e.len() as u64, seeds);
            variance(e)
        })
        .collect();
    assert!(variances[0] > 0.0);
    for w in variances.windows(2) {
        assert!(w[1] <= w[0], "variance grew: {variances:?}");
    }
}

#[test]
fn test_display_holds_exact_mean() {
    let mut scheduler = FrameScheduler::new(config(PipelineVariant::FullGrid, 3, 1));
    let mut acc = AccumulationController::new(0);
    let mut emu = Emulator::new();
    let mut next = 0.0f32;

    for _ in 0..5 {
        let plan = scheduler.plan(acc.begin_frame(3));
        emu.run(&plan, || {
            next += 1.0;
            next
        });
        acc.complete_gathers(plan.gathers);
    }
    // Samples 1..=15.
    assert_eq!(acc.frames_accumulated(), 15);
    assert_eq!(acc.display_buffer(), RadianceBuffer::B);
    assert!((emu.display(acc.display_buffer()) - 8.0).abs() < 1e-4);
}

#[test]
fn test_reset_restarts_average() {
    let mut scheduler = FrameScheduler::new(config(PipelineVariant::FullGrid, 2, 1));
    let mut acc = AccumulationController::new(0);
    let mut emu = Emulator::new();

    for _ in 0..4 {
        let plan = scheduler.plan(acc.begin_frame(2));
        emu.run(&plan, || 10.0);
        acc.complete_gathers(plan.gathers);
    }
    acc.request_reset(ResetReason::CameraMoved);

    let plan = scheduler.plan(acc.begin_frame(2));
    assert_eq!(plan.steps[0].dispatch, Dispatch::Clear);
    emu.run(&plan, || 2.0);
    acc.complete_gathers(plan.gathers);

    assert_eq!(acc.frames_accumulated(), 2);
    assert_eq!(emu.display(acc.display_buffer()), 2.0);
}

#[test]
fn test_parity_across_odd_frames() {
    let mut scheduler = FrameScheduler::new(config(PipelineVariant::StreamCompaction, 3, 2));
    let mut acc = AccumulationController::new(0);
    let mut total = 0;
    for _ in 0..7 {
        let plan = scheduler.plan(acc.begin_frame(3));
        acc.complete_gathers(plan.gathers);
        total += plan.gathers;
        let expected = if total % 2 == 0 {
            RadianceBuffer::A
        } else {
            RadianceBuffer::B
        };
        assert_eq!(plan.display, expected);
        assert_eq!(acc.display_buffer(), expected);
    }
}

#[test]
fn test_max_samples_stops_planning() {
    let mut scheduler = FrameScheduler::new(config(PipelineVariant::FullGrid, 4, 1));
    let mut acc = AccumulationController::new(10);
    let mut gathers = Vec::new();
    for _ in 0..5 {
        let plan = scheduler.plan(acc.begin_frame(4));
        acc.complete_gathers(plan.gathers);
        gathers.push(plan.gathers);
    }
    assert_eq!(gathers, vec![4, 4, 2, 0, 0]);
    assert!(acc.is_converged());
}

#[test_case(PipelineVariant::FullGrid ; "full grid")]
#[test_case(PipelineVariant::StreamCompaction ; "stream compaction")]
fn test_dispatch_order(variant: PipelineVariant) {
    let depth = 3;
    let spf = 2;
    let cfg = config(variant, spf, depth);
    let mut scheduler = FrameScheduler::new(cfg);
    let mut acc = AccumulationController::new(0);
    let plan = scheduler.plan(acc.begin_frame(spf));

    assert_eq!(plan.steps[0].dispatch, Dispatch::Clear);
    assert!(plan.params.len() as u32 <= cfg.param_slots());
    assert!(plan.params_bytes().len() as u64 <= cfg.params_buffer_size());
    assert!(plan.steps.iter().all(|s| (s.params_slot as usize) < plan.params.len()));

    for sample in 0..spf {
        let pos = |d: Dispatch| {
            plan.steps
                .iter()
                .position(|s| s.dispatch == d)
                .unwrap_or_else(|| panic!("{d:?} missing"))
        };
        let generate = pos(Dispatch::GenerateRay { sample });
        let gather = plan
            .steps
            .iter()
            .position(|s| {
                matches!(s.dispatch, Dispatch::FinalGather { sample: g, .. } if g == sample)
            })
            .unwrap();

        let mut last = generate;
        for d in (0..=depth).rev() {
            let intersect = pos(Dispatch::ComputeIntersections { sample, depth: d });
            let integrate = pos(Dispatch::Integrate { sample, depth: d });
            assert!(last < intersect && intersect < integrate);
            if variant == PipelineVariant::StreamCompaction {
                let compact = pos(Dispatch::CompactPaths { sample, depth: d });
                let flags = pos(Dispatch::GenerateFlags { sample, depth: d });
                assert!(last < flags && flags < compact && compact < intersect);
            }
            last = integrate;
        }
        assert!(last < gather);
    }

    let gathers: Vec<u32> = plan
        .steps
        .iter()
        .filter_map(|s| match s.dispatch {
            Dispatch::FinalGather { sample, .. } => Some(sample),
            _ => None,
        })
        .collect();
    assert_eq!(gathers, (0..spf).collect::<Vec<_>>());

    let compaction_steps = plan.steps.iter().filter(|s| s.dispatch.is_compaction()).count();
    if variant.compacts() {
        assert_eq!(compaction_steps as u32, spf * (depth + 1) * 5);
    } else {
        assert_eq!(compaction_steps, 0);
    }
}

#[test]
fn test_plans_are_reproducible() {
    let cfg = config(PipelineVariant::FullGrid, 2, 2);
    let run = || {
        let mut scheduler = FrameScheduler::new(cfg);
        let mut acc = AccumulationController::new(0);
        (0..3)
            .map(|_| {
                let plan = scheduler.plan(acc.begin_frame(2));
                acc.complete_gathers(plan.gathers);
                plan
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}
