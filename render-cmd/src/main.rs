use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use glam::{Vec3, Vec4, uvec2};
use rand::{SeedableRng, rngs::StdRng};
use render::{
    CapacityPolicy, FrameOutput, Renderer, RendererConfig,
    camera::{AutoRotate, Camera, focal_to_fov, fov_to_focal},
    gaussian_splats::{RandomSplatsConfig, SplatScene},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Grow,
    Skip,
}

impl From<Policy> for CapacityPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Grow => CapacityPolicy::Grow,
            Policy::Skip => CapacityPolicy::SkipFrame,
        }
    }
}

/// Renders a random splat cloud for a number of frames and saves the last one.
#[derive(Parser)]
struct Args {
    /// Number of random splats
    #[arg(short, long, default_value_t = 10_000)]
    splats: usize,

    #[arg(long, default_value_t = 0)]
    sh_degree: u32,

    #[arg(long, default_value_t = 512)]
    width: u32,

    #[arg(long, default_value_t = 512)]
    height: u32,

    #[arg(short, long, default_value_t = 60)]
    frames: u32,

    #[arg(long, default_value_t = 2)]
    frames_in_flight: usize,

    /// What to do when a frame needs more instances than the arena holds
    #[arg(long, value_enum, default_value_t = Policy::Grow)]
    policy: Policy,

    /// Turntable speed, 0 to disable
    #[arg(long, default_value_t = 1.0)]
    degrees_per_frame: f32,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Read back every frame and check the binning invariants
    #[arg(long)]
    validate: bool,

    /// PNG written with the last rendered frame
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn save_png(renderer: &Renderer, output: &FrameOutput, path: &PathBuf) -> anyhow::Result<()> {
    let pixels = renderer.read_output(output)?;
    let bytes: Vec<u8> = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
    let size = output.img_size();
    let img = image::RgbaImage::from_raw(size.x, size.y, bytes)
        .context("Output buffer doesn't match the image size")?;
    img.save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Saved frame {} to {}", output.frame(), path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (device, queue) = pollster::block_on(kernel::request_device("render-cmd"))?;

    let config = RendererConfig::new()
        .with_frames_in_flight(args.frames_in_flight)
        .with_capacity_policy(args.policy.into());
    let mut renderer = Renderer::new(device, queue, config, uvec2(args.width, args.height))?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let scene_config = RandomSplatsConfig::new()
        .with_init_count(args.splats)
        .with_sh_degree(args.sh_degree);
    let scene = SplatScene::from_random_config(&scene_config, &mut rng);
    renderer.set_scene(&scene)?;

    let fov_x = std::f64::consts::FRAC_PI_3;
    let fov_y = focal_to_fov(fov_to_focal(fov_x, args.width), args.height);
    // Frame the whole scene, clipped to the sphere around its bounds.
    let (min, max) = scene
        .estimate_bounds()
        .unwrap_or((Vec3::splat(-1.0), Vec3::splat(1.0)));
    let center = (min + max) * 0.5;
    let radius = ((max - min).length() * 0.5).max(0.5);
    let distance = 2.0 * radius;
    let camera = Camera::look_at(center - Vec3::Y * distance, center, Vec3::Z, fov_x, fov_y)
        .with_clip(0.01, distance + 2.0 * radius);
    let background = Vec4::new(0.05, 0.05, 0.08, 1.0);
    let mut rotate = AutoRotate::new(args.degrees_per_frame);

    let mut last = None;
    let mut skipped = 0;
    for _ in 0..args.frames {
        let state = rotate.next_frame(camera, background);
        match renderer.render_frame(state) {
            Ok(output) => {
                if args.validate {
                    let aux = renderer.read_aux(&output)?;
                    aux.validate()
                        .with_context(|| format!("Frame {} is malformed", output.frame()))?;
                }
                last = Some(output);
            }
            Err(err) if !err.is_fatal() => {
                tracing::warn!("Frame skipped: {err}");
                skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    renderer.drain()?;

    if let Some(output) = last {
        tracing::info!(
            frames = args.frames,
            skipped,
            instances = output.stats.num_instances,
            capacity = output.stats.instance_capacity,
            "Done"
        );
        if let Some(path) = &args.output {
            save_png(&renderer, &output, path)?;
        }
    } else {
        tracing::warn!("No frame was rendered");
    }

    Ok(())
}
