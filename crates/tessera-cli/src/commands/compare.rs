//! Compare command
//!
//! Runs the naive and tiled blur on the same input and reports the largest
//! per-sample difference (like idiff).

use anyhow::{Context, Result, bail};
use tessera_compute::BlurStrategy;
use tracing::{info, trace, warn};

use crate::{CompareArgs, Globals};

pub fn run(args: CompareArgs, globals: &Globals) -> Result<()> {
    trace!(radius = args.radius, tolerance = args.tolerance, "compare::run");

    let proc = super::build_processor(globals, Some(&args.tiling))?;
    let image = super::make_input(&args.input)?;

    let naive = proc
        .blur_with(&image, args.radius, BlurStrategy::Naive)
        .context("Naive blur failed")?;
    let tiled = proc
        .blur_with(&image, args.radius, BlurStrategy::Tiled)
        .context("Tiled blur failed")?;

    super::print_report(&naive.report, &naive.image);
    super::print_report(&tiled.report, &tiled.image);

    let diff = naive.image.max_abs_diff(&tiled.image)?;
    let speedup = naive.report.timings.dispatch.as_secs_f64()
        / tiled.report.timings.dispatch.as_secs_f64().max(f64::EPSILON);
    info!(diff, speedup, "Compare done");

    println!("Max abs difference: {diff:e}");
    println!("Tiled dispatch speedup: {speedup:.2}x");

    if diff > args.tolerance {
        warn!(diff, tolerance = args.tolerance, "outputs differ");
        bail!("Naive and tiled blur differ by {} (tolerance {})", diff, args.tolerance);
    }
    Ok(())
}
