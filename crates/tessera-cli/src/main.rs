//! tessera - compute kernel driver
//!
//! Runs the map, blur and Game of Life workloads on a generated pattern and
//! reports per-phase timings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about = "Tiled compute kernels on CPU and GPU")]
#[command(long_about = "
Drives the tessera compute kernels over generated input patterns.

Examples:
  tessera map -W 1024 -H 1024              # Element-wise x2
  tessera blur -r 4 --strategy tiled       # Halo-staged box blur
  tessera life --steps 500 --pattern random
  tessera compare -r 3 --tile 8x8          # Naive vs tiled difference
  tessera --backend cpu -j 4 blur -r 2
  tessera backends                         # List compute backends
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,

    /// Compute backend: auto, cpu, wgpu
    #[arg(short, long, global = true, default_value = "auto")]
    backend: String,

    /// Device memory budget in MB (default: device estimate)
    #[arg(long, global = true)]
    mem_mb: Option<u64>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Multiply every element by two
    Map(MapArgs),

    /// Clamp-to-edge box blur
    Blur(BlurArgs),

    /// Conway's Game of Life with ping-pong buffers
    Life(LifeArgs),

    /// Run naive and tiled blur and report the difference
    #[command(visible_alias = "cmp")]
    Compare(CompareArgs),

    /// List available compute backends
    Backends,
}

/// Input pattern kinds.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PatternKind {
    Checkerboard,
    Gradient,
    Noise,
    Random,
    Glider,
}

#[derive(Args, Clone)]
pub struct PatternArgs {
    /// Image width
    #[arg(short = 'W', long, default_value = "512")]
    pub width: u32,

    /// Image height
    #[arg(short = 'H', long, default_value = "512")]
    pub height: u32,

    /// Input pattern
    #[arg(short, long, value_enum, default_value = "checkerboard")]
    pub pattern: PatternKind,

    /// Checkerboard cell size in pixels
    #[arg(long, default_value = "8")]
    pub cell: u32,

    /// Seed for random patterns
    #[arg(long, default_value = "1")]
    pub seed: u64,

    /// Fraction of live cells for the random pattern
    #[arg(long, default_value = "0.3")]
    pub density: f64,
}

#[derive(Args, Clone)]
pub struct TileArgs {
    /// Tiled blur output tile, WxH (e.g. 16x16)
    #[arg(long)]
    pub tile: Option<String>,

    /// Lanes per simulated CPU workgroup
    #[arg(long)]
    pub lanes: Option<usize>,
}

#[derive(Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub input: PatternArgs,

    /// Apply the map this many times
    #[arg(short, long, default_value = "1")]
    pub repeat: u32,
}

#[derive(Args)]
pub struct BlurArgs {
    #[command(flatten)]
    pub input: PatternArgs,

    #[command(flatten)]
    pub tiling: TileArgs,

    /// Blur radius in pixels
    #[arg(short, long, default_value = "2")]
    pub radius: u32,

    /// Kernel strategy: auto, naive, tiled
    #[arg(short, long, default_value = "auto")]
    pub strategy: String,
}

#[derive(Args)]
pub struct LifeArgs {
    #[command(flatten)]
    pub input: PatternArgs,

    /// Generations to run
    #[arg(short = 'n', long, default_value = "100")]
    pub steps: u32,
}

#[derive(Args)]
pub struct CompareArgs {
    #[command(flatten)]
    pub input: PatternArgs,

    #[command(flatten)]
    pub tiling: TileArgs,

    /// Blur radius in pixels
    #[arg(short, long, default_value = "2")]
    pub radius: u32,

    /// Largest acceptable absolute difference
    #[arg(short, long, default_value = "1e-5")]
    pub tolerance: f32,
}

/// Options shared by every workload.
pub struct Globals {
    pub verbose: u8,
    pub backend: String,
    pub mem_mb: Option<u64>,
}

fn init_logging(verbose: u8, log: Option<&PathBuf>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let (file_layer, guard) = match log {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path
                .file_name()
                .context("Log path has no file name")?;
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| std::path::Path::new(".")),
                name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to install logger")?;
    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log.as_ref())?;

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let globals = Globals {
        verbose: cli.verbose,
        backend: cli.backend,
        mem_mb: cli.mem_mb,
    };

    match cli.command {
        Commands::Map(args) => commands::map::run(args, &globals),
        Commands::Blur(args) => commands::blur::run(args, &globals),
        Commands::Life(args) => commands::life::run(args, &globals),
        Commands::Compare(args) => commands::compare::run(args, &globals),
        Commands::Backends => commands::backends::run(&globals),
    }
}
