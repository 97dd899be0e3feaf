//! pt-render - headless progressive path tracer.
//!
//! Renders a procedural scene for a number of frames into an offscreen
//! image and writes it to disk.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use pathtracer::camera::FlyCamera;
use pathtracer::gpu::{GpuContext, PathTracer};
use pathtracer::pipeline::PipelineVariant;
use pathtracer::scene::procedural::{cornell_box, ClothGrid};
use pathtracer::scene::{GeomId, Material, Scene};
use pathtracer::settings::RenderSettings;
use pathtracer::util::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SceneKind {
    Cornell,
    Cloth,
}

#[derive(Debug)]
struct Options {
    level: &'static str,
    scene: SceneKind,
    frames: u32,
    output: PathBuf,
    settings: Option<PathBuf>,
    size: Option<(u32, u32)>,
    variant: Option<PipelineVariant>,
    samples_per_frame: Option<u32>,
    ray_depth: Option<u32>,
    bvh: Option<bool>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            level: "info",
            scene: SceneKind::Cornell,
            frames: 64,
            output: PathBuf::from("render.png"),
            settings: None,
            size: None,
            variant: None,
            samples_per_frame: None,
            ray_depth: None,
            bvh: None,
        }
    }
}

fn print_usage(prog: &str) {
    println!(
        "pt-render {} - headless progressive path tracer (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("PATHTRACER_BUILD_STAMP")
    );
    println!();
    println!("Usage: {} [options]", prog);
    println!();
    println!("Options:");
    println!("  -s, --scene <cornell|cloth>   Scene to render (default cornell)");
    println!("  -n, --frames <N>              Frames to accumulate (default 64)");
    println!("  -o, --output <file>           Output image: .png, .hdr or .exr");
    println!("  -c, --settings <file.json>    Load render settings");
    println!("      --size <WxH>              Resolution");
    println!("      --variant <full|compact>  Pipeline variant");
    println!("      --spp <N>                 Samples per frame");
    println!("      --depth <N>               Ray depth");
    println!("      --no-bvh                  Brute-force triangle tests");
    println!("  -v, --verbose                 Debug output");
    println!("  -vv, --trace                  Trace output (very verbose)");
    println!("  -q, --quiet                   Warnings only");
    println!("  -h, --help                    Show this help");
    println!();
    println!("Set PATHTRACER_TRACE=1 to write a Chrome trace to trace.json.");
}

fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s.split_once('x').context("size must look like 1280x720")?;
    Ok((w.parse()?, h.parse()?))
}

fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut opts = Options::default();
    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
        let mut value = || it.next().with_context(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "-v" | "--verbose" => opts.level = "debug",
            "-vv" | "--trace" => opts.level = "trace",
            "-q" | "--quiet" => opts.level = "warn",
            "-h" | "--help" => return Ok(None),
            "-s" | "--scene" => {
                opts.scene = match value()?.as_str() {
                    "cornell" => SceneKind::Cornell,
                    "cloth" => SceneKind::Cloth,
                    other => bail!("unknown scene `{other}`"),
                }
            }
            "-n" | "--frames" => opts.frames = value()?.parse()?,
            "-o" | "--output" => opts.output = PathBuf::from(value()?),
            "-c" | "--settings" => opts.settings = Some(PathBuf::from(value()?)),
            "--size" => opts.size = Some(parse_size(value()?)?),
            "--variant" => {
                opts.variant = Some(match value()?.as_str() {
                    "full" | "full_grid" => PipelineVariant::FullGrid,
                    "compact" | "stream_compaction" => PipelineVariant::StreamCompaction,
                    other => bail!("unknown variant `{other}`"),
                })
            }
            "--spp" => opts.samples_per_frame = Some(value()?.parse()?),
            "--depth" => opts.ray_depth = Some(value()?.parse()?),
            "--no-bvh" => opts.bvh = Some(false),
            other => bail!("unknown argument `{other}`"),
        }
    }
    Ok(Some(opts))
}

fn init_tracing(level: &str) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt = tracing_subscriber::fmt::layer().with_target(false);

    if env::var("PATHTRACER_TRACE").ok().as_deref() == Some("1") {
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .file("trace.json")
            .build();
        let subscriber = tracing_subscriber::registry().with(filter).with(fmt).with(chrome_layer);
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return None;
        }
        return Some(guard);
    }

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt);
    let _ = tracing::subscriber::set_global_default(subscriber);
    None
}

fn load_settings(opts: &Options) -> Result<RenderSettings> {
    let mut settings = match &opts.settings {
        Some(path) => RenderSettings::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RenderSettings::default(),
    };
    if let Some((w, h)) = opts.size {
        settings.width = w;
        settings.height = h;
    }
    if let Some(v) = opts.variant {
        settings.variant = v;
    }
    if let Some(n) = opts.samples_per_frame {
        settings.samples_per_frame = n;
    }
    if let Some(d) = opts.ray_depth {
        settings.ray_depth = d;
    }
    if let Some(b) = opts.bvh {
        settings.enable_bvh = b;
    }
    settings.validate()?;
    Ok(settings)
}

struct Cloth {
    grid: ClothGrid,
    transform: Mat4,
    id: GeomId,
}

impl Cloth {
    fn wave(&self, time: f32) -> Vec<pathtracer::scene::Vertex> {
        self.grid.displaced_world(self.transform, |uv| {
            0.15 * ((uv.x * 8.0 + time).sin() + (uv.y * 6.0 + time * 1.3).cos())
        })
    }
}

fn build_scene(settings: &RenderSettings, kind: SceneKind) -> Result<(Scene, Option<Cloth>)> {
    let mut scene = Scene::new(settings.capacity, settings.bvh_settings());
    cornell_box(&mut scene)?;
    let cloth = match kind {
        SceneKind::Cornell => None,
        SceneKind::Cloth => {
            let grid = ClothGrid::new(6.0, 6.0, 48, 48);
            let transform = Mat4::from_translation(Vec3::new(0.0, 6.0, 0.0));
            let material = Material::diffuse(Vec3::new(0.2, 0.3, 0.8));
            let id = grid.append_to(&mut scene, material, transform)?;
            Some(Cloth { grid, transform, id })
        }
    };
    scene.rebuild_bvh()?;
    scene.validate()?;
    tracing::info!(
        geoms = scene.geoms().len(),
        triangles = scene.triangles().len(),
        bvh_nodes = scene.bvh_nodes().len(),
        "scene built"
    );
    Ok((scene, cloth))
}

fn write_image(path: &Path, width: u32, height: u32, texels: &[[f32; 4]]) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "hdr" | "exr" => {
            let data: Vec<f32> = texels.iter().flat_map(|t| [t[0], t[1], t[2]]).collect();
            let img = image::Rgb32FImage::from_raw(width, height, data)
                .context("image size mismatch")?;
            image::DynamicImage::ImageRgb32F(img).save(path)?;
        }
        _ => {
            // Reinhard + sRGB, matching the present pass.
            let encode = |c: f32| {
                let t = c.max(0.0) / (c.max(0.0) + 1.0);
                let s = if t <= 0.003_130_8 {
                    t * 12.92
                } else {
                    1.055 * t.powf(1.0 / 2.4) - 0.055
                };
                (s.clamp(0.0, 1.0) * 255.0).round() as u8
            };
            let data: Vec<u8> = texels
                .iter()
                .flat_map(|t| [encode(t[0]), encode(t[1]), encode(t[2]), 255])
                .collect();
            let img =
                image::RgbaImage::from_raw(width, height, data).context("image size mismatch")?;
            img.save(path)?;
        }
    }
    Ok(())
}

fn run(opts: Options) -> Result<()> {
    let settings = load_settings(&opts)?;
    let (mut scene, cloth) = build_scene(&settings, opts.scene)?;

    let ctx = GpuContext::headless()?;
    let mut pt = PathTracer::new(ctx, settings, &scene)?;
    let mut camera = FlyCamera::default();
    pt.update_camera(&mut camera);

    let start = std::time::Instant::now();
    for frame in 0..opts.frames {
        if let Some(c) = &cloth {
            scene.replace_vertex_range(c.id, &c.wave(frame as f32 * 0.05))?;
            pt.upload_scene(&scene)?;
        }
        let report = pt.render_frame()?;
        tracing::debug!(
            frame,
            gathers = report.gathers,
            total = report.frames_accumulated,
            "frame"
        );
        if pt.is_converged() {
            tracing::info!(frame, "converged");
            break;
        }
    }

    // Round-trip the deformed cloth through the device.
    if let Some(c) = &cloth {
        let bytes = pt.read_vertices(&scene, c.id)?.wait(&pt.context().device)?;
        scene.apply_vertex_readback(c.id, bytes)?;
        pt.upload_scene(&scene)?;
        pt.render_frame()?;
    }

    let readback = pt.read_display();
    let (width, height) = (readback.width(), readback.height());
    let texels = readback.wait(&pt.context().device)?;
    tracing::info!(
        frames = pt.frames_accumulated(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "render finished"
    );

    write_image(&opts.output, width, height, &texels)
        .with_context(|| format!("writing {}", opts.output.display()))?;
    tracing::info!(path = %opts.output.display(), "image written");
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let Some(opts) = parse_args(&args)? else {
        print_usage(&args[0]);
        return Ok(());
    };
    let _trace_guard = init_tracing(opts.level);
    run(opts)
}
