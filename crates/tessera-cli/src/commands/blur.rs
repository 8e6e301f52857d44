//! Blur command
//!
//! Clamp-to-edge box blur with an explicit or automatic kernel strategy.

use anyhow::{Context, Result};
use tessera_compute::BlurStrategy;
use tracing::{info, trace};

use crate::{BlurArgs, Globals};

pub fn run(args: BlurArgs, globals: &Globals) -> Result<()> {
    trace!(radius = args.radius, strategy = %args.strategy, "blur::run");

    let strategy: BlurStrategy = args
        .strategy
        .parse()
        .with_context(|| format!("Invalid strategy: {}", args.strategy))?;
    let proc = super::build_processor(globals, Some(&args.tiling))?;
    let image = super::make_input(&args.input)?;

    let kernel = proc.blur_kernel(strategy, args.radius, image.channels)?;
    info!(%strategy, %kernel, radius = args.radius, w = image.width, h = image.height, "Applying blur");
    if globals.verbose > 0 {
        println!(
            "Blur radius {} with {} (tile {})",
            args.radius,
            kernel,
            proc.config().tile
        );
    }

    let out = proc
        .blur_with(&image, args.radius, strategy)
        .context("Blur failed")?;
    super::print_report(&out.report, &out.image);

    Ok(())
}
