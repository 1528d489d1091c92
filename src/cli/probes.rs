use clap::Parser;
use sesmesh::ses::settings::DEFAULT_PROBE_RADIUS;
use sesmesh::{load_spheres, probe_positions, run_with_threads, write_probe_dump, Settings, SurfaceError};
use std::path::PathBuf;
use tracing::{info, trace};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub(crate) struct Args {
    /// Path to the PDB or mmCIF file to be analyzed
    #[arg(short, long)]
    input: PathBuf,

    /// Output file with one `x y z r` line per probe
    #[arg(short, long)]
    output: PathBuf,

    /// Model number to analyze (default: 0, the first model)
    #[arg(short = 'm', long = "model", default_value_t = 0)]
    model_num: usize,

    /// Probe radius
    #[arg(short = 'r', long = "probe-radius", default_value_t = DEFAULT_PROBE_RADIUS)]
    probe_radius: f64,

    /// Number of threads to use for parallel processing (0 for all cores)
    #[arg(short = 'j', long = "num-threads", default_value_t = 0)]
    num_threads: usize,
}

pub(crate) fn run(args: &Args) -> Result<(), SurfaceError> {
    trace!("{args:?}");

    let input_path = args.input.canonicalize()?;
    let spheres = load_spheres(&input_path, args.model_num)?;
    let settings = Settings {
        probe_radius: args.probe_radius,
        ..Default::default()
    };

    let positions = run_with_threads(args.num_threads, || probe_positions(&spheres, &settings))?;
    write_probe_dump(&args.output, &positions, settings.probe_radius)?;
    info!("Wrote {} probes to {}", positions.len(), args.output.display());
    Ok(())
}
