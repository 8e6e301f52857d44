//! Backends command
//!
//! Lists compute backends and the limits of the selected one.

use anyhow::Result;
use tessera_compute::backend::memory::format_bytes;
use tessera_compute::{describe_backends, select_best_backend};

use crate::Globals;

pub fn run(globals: &Globals) -> Result<()> {
    print!("{}", describe_backends());
    println!("Best: {}", select_best_backend());

    let proc = super::build_processor(globals, None)?;
    let limits = proc.limits();
    let caps = proc.capabilities();
    println!("Selected: {}", proc.backend_name());
    println!("  max buffer:        {}", format_bytes(limits.max_buffer_bytes));
    println!("  available memory:  {}", format_bytes(limits.available_memory));
    println!("  workgroup limit:   {} invocations", limits.max_invocations_per_workgroup);
    println!("  shared memory:     {}", format_bytes(caps.max_workgroup_storage_bytes as u64));
    println!(
        "  tiling:            {}",
        if caps.shared_memory_tiling { "yes" } else { "no" }
    );
    if globals.verbose > 0 {
        println!("  detected limits:   {}", limits.detected);
        println!("  tile:              {}", proc.config().tile);
    }

    Ok(())
}
