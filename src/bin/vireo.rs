use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use vireo::{
    GradientSampler, LinearRgba, RenderSession, Resolution, Sampler, SessionOpts, SolidSampler,
};

#[derive(Parser, Debug)]
#[command(name = "vireo", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one progressive render pass and save the result as a PNG.
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Frame width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Use a uniform "r,g,b,a" color (floats in 0..=1) instead of the
    /// built-in gradient sampler.
    #[arg(long)]
    solid: Option<String>,

    /// Poll interval of the composite loop, in milliseconds.
    #[arg(long, default_value_t = 5)]
    poll_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let resolution = Resolution::new(args.width, args.height)?;

    let sampler: Arc<dyn Sampler> = match &args.solid {
        Some(spec) => Arc::new(SolidSampler {
            color: parse_solid(spec)?,
            depth: 1.0,
        }),
        None => Arc::new(GradientSampler::new(resolution)),
    };

    let mut session = RenderSession::new(sampler, SessionOpts::default());
    let adapter = session.display_adapter();
    session.start(resolution)?;

    // Stand-in for the host compositor: one acquire/composite/release cycle
    // per poll tick, counting the rows each cycle picked up.
    let mut composited_rows = 0u64;
    while session.is_running() {
        if let Some(view) = adapter.acquire_for_read() {
            for range in view.dirty_rows() {
                composited_rows += u64::from(range.len());
            }
        }
        std::thread::sleep(Duration::from_millis(args.poll_ms));
    }

    let image = {
        let view = adapter
            .acquire_for_read()
            .context("no frame buffer was published")?;
        for range in view.dirty_rows() {
            composited_rows += u64::from(range.len());
        }
        view.frame().color_to_rgba8()?
    };
    let completed = session.is_completed();

    eprintln!(
        "pass {}: composited {composited_rows} rows",
        if completed { "completed" } else { "ended early" }
    );

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &image.data,
        image.width,
        image.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());

    // A failed pass keeps its partial image on disk; the recorded sampler
    // error still surfaces here.
    session.stop()?;
    Ok(())
}

fn parse_solid(spec: &str) -> anyhow::Result<LinearRgba> {
    let parts: Vec<f32> = spec
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("parse solid color '{spec}'"))?;
    let [r, g, b, a] = parts.as_slice() else {
        anyhow::bail!("solid color must have exactly 4 components, got {}", parts.len());
    };
    Ok(LinearRgba::new(*r, *g, *b, *a))
}
