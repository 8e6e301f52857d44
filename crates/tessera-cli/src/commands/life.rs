//! Life command
//!
//! Runs Conway's Game of Life for a number of generations.

use anyhow::{Context, Result};
use tessera_compute::pattern::live_cells;
use tracing::{info, trace};

use crate::{Globals, LifeArgs};

pub fn run(args: LifeArgs, globals: &Globals) -> Result<()> {
    trace!(steps = args.steps, "life::run");

    let proc = super::build_processor(globals, None)?;
    let board = super::make_input(&args.input)?;
    let before = live_cells(&board).len();

    info!(steps = args.steps, w = board.width, h = board.height, "Running life");
    let out = proc.life(&board, args.steps).context("Life run failed")?;
    super::print_report(&out.report, &out.image);

    let after = live_cells(&out.image).len();
    println!("  live cells: {before} -> {after}");
    if args.steps > 0 && globals.verbose > 0 {
        let per_step = out.report.timings.dispatch / args.steps;
        println!("  {per_step:.2?} per generation");
    }

    Ok(())
}
