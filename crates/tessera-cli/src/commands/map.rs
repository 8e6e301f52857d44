//! Map command
//!
//! Doubles every element, optionally several times in a row.

use anyhow::{Context, Result};
use tracing::{info, trace};

use crate::{Globals, MapArgs};

pub fn run(args: MapArgs, globals: &Globals) -> Result<()> {
    trace!(width = args.input.width, height = args.input.height, repeat = args.repeat, "map::run");

    let proc = super::build_processor(globals, None)?;
    let mut image = super::make_input(&args.input)?;

    info!(w = image.width, h = image.height, repeat = args.repeat, "Applying map");
    for i in 0..args.repeat.max(1) {
        let out = proc
            .double(&image)
            .with_context(|| format!("Map pass {} failed", i + 1))?;
        if globals.verbose > 0 || i + 1 == args.repeat.max(1) {
            super::print_report(&out.report, &out.image);
        }
        image = out.image;
    }

    Ok(())
}
