//! CLI command implementations

pub mod backends;
pub mod blur;
pub mod compare;
pub mod life;
pub mod map;

use anyhow::{Context, Result, bail};
use tessera_compute::pattern;
use tessera_compute::{Backend, ImageBuffer, Processor, RunReport, WorkgroupShape};

use crate::{Globals, PatternArgs, PatternKind, TileArgs};

/// Build a processor for the global backend options and optional tiling.
pub fn build_processor(globals: &Globals, tiling: Option<&TileArgs>) -> Result<Processor> {
    let backend: Backend = globals
        .backend
        .parse()
        .with_context(|| format!("Invalid backend: {}", globals.backend))?;

    let mut builder = Processor::builder().backend(backend);
    if let Some(mb) = globals.mem_mb {
        builder = builder.memory_budget_mb(mb);
    }
    if let Some(tiling) = tiling {
        if let Some(tile) = &tiling.tile {
            builder = builder.tile(parse_tile(tile)?);
        }
        if let Some(lanes) = tiling.lanes {
            builder = builder.lanes(lanes);
        }
    }
    let proc = builder.build().context("Failed to create compute device")?;

    if globals.verbose > 0 {
        println!("Backend: {}", proc.backend_name());
    }
    Ok(proc)
}

/// Parse `WxH` (or a single number for a square tile).
pub fn parse_tile(s: &str) -> Result<WorkgroupShape> {
    if let Some(shape) = WorkgroupShape::parse(s) {
        return Ok(shape);
    }
    match s.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(WorkgroupShape::new(n, n)),
        _ => bail!("Invalid tile '{}': expected WxH, e.g. 16x16", s),
    }
}

/// Generate the input image.
pub fn make_input(args: &PatternArgs) -> Result<ImageBuffer> {
    if args.width == 0 || args.height == 0 {
        bail!("Image size must be non-zero, got {}x{}", args.width, args.height);
    }
    let (w, h) = (args.width, args.height);
    Ok(match args.pattern {
        PatternKind::Checkerboard => pattern::checkerboard(w, h, args.cell),
        PatternKind::Gradient => pattern::gradient(w, h),
        PatternKind::Noise => pattern::noise(w, h, args.seed),
        PatternKind::Random => pattern::random_cells(w, h, args.density, args.seed),
        PatternKind::Glider => pattern::seeded(w, h, 1, 1, &pattern::GLIDER),
    })
}

/// Print the run report and a short summary of the output.
pub fn print_report(report: &RunReport, image: &ImageBuffer) {
    println!("{report}");
    let data = image.data();
    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / data.len().max(1) as f64;
    println!(
        "  {}x{}x{}: min {:.4}, max {:.4}, mean {:.4}",
        image.width, image.height, image.channels, min, max, mean
    );
}
