use clap::Parser;
use sesmesh::ses::settings::{DEFAULT_PROBE_RADIUS, DEFAULT_SUBDIVISION_DEPTH};
use sesmesh::{
    build_surface, load_spheres, run_with_threads, write_df_to_file, DataFrameFileType, Quality, Settings, Strategy,
    SurfaceError,
};
use std::path::PathBuf;
use tracing::{debug, info, trace, warn};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub(crate) struct Args {
    /// Path to the PDB or mmCIF file to be meshed
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for points, triangles and the run report
    #[arg(short, long)]
    output: PathBuf,

    /// Model number to mesh (default: 0, the first model)
    #[arg(short = 'm', long = "model", default_value_t = 0)]
    model_num: usize,

    /// Probe radius (smaller radii follow the atoms more closely)
    #[arg(short = 'r', long = "probe-radius", default_value_t = DEFAULT_PROBE_RADIUS)]
    probe_radius: f64,

    /// Target triangle size
    #[arg(short = 'q', long, value_enum, default_value_t = Quality::Medium)]
    quality: Quality,

    /// Icosahedron subdivision depth of the sphere template (0-5)
    #[arg(short = 'd', long = "depth", default_value_t = DEFAULT_SUBDIVISION_DEPTH)]
    depth: u32,

    /// Triangulate the whole surface at once or one atom at a time
    #[arg(long, value_enum, default_value_t = Strategy::Whole)]
    strategy: Strategy,

    /// Output file type for the point, triangle and report tables
    #[arg(short = 't', long = "output-format", value_enum, default_value_t = DataFrameFileType::Csv)]
    output_format: DataFrameFileType,

    /// Also write the mesh as `surface.obj`
    #[arg(long)]
    obj: bool,

    /// Write the probe positions to this file
    #[arg(long)]
    probes: Option<PathBuf>,

    /// Number of threads to use for parallel processing (0 for all cores)
    #[arg(short = 'j', long = "num-threads", default_value_t = 0)]
    num_threads: usize,
}

pub(crate) fn run(args: &Args) -> Result<(), SurfaceError> {
    trace!("{args:?}");

    // Make sure `input` exists
    let input_path = args.input.canonicalize()?;
    std::fs::create_dir_all(&args.output)?;
    debug!("Results will be saved to {}", args.output.display());

    let spheres = load_spheres(&input_path, args.model_num)?;
    info!("Loaded {} atoms from {}", spheres.len(), input_path.display());

    let settings = Settings {
        probe_radius: args.probe_radius,
        subdivision_depth: args.depth,
        probe_dump: args.probes.clone(),
        ..Default::default()
    }
    .with_quality(args.quality)
    .with_strategy(args.strategy);
    settings.validate()?;

    let (mesh, report) = run_with_threads(args.num_threads, || build_surface(&spheres, &settings))?;
    if !report.is_clean() {
        warn!(
            "Surface has {} open and {} overused edges, {} diagnostics",
            report.open_edges,
            report.overused_edges,
            report.diagnostics.len()
        );
    }

    let mut df_report = report.to_dataframe()?;
    info!("Construction report\n{df_report}");

    // Save results
    write_df_to_file(&mut mesh.points_dataframe()?, &args.output.join("points"), args.output_format)?;
    write_df_to_file(&mut mesh.triangles_dataframe()?, &args.output.join("triangles"), args.output_format)?;
    write_df_to_file(&mut df_report, &args.output.join("report"), args.output_format)?;
    if args.obj {
        let file = std::fs::File::create(args.output.join("surface.obj"))?;
        mesh.write_obj(std::io::BufWriter::new(file))?;
    }
    if let Some((min, max)) = mesh.bounds()? {
        debug!("Mesh bounds: {:?} to {:?}", min.as_slice(), max.as_slice());
    }

    Ok(())
}
