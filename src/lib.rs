#![doc = include_str!("../README.md")]

//! # sesmesh Library
//!
//! This library builds closed triangle meshes of the solvent-excluded
//! (Connolly) surface of a set of spheres, usually the atoms of a PDB or
//! mmCIF structure.
//!
//! Mesh points and triangles can be returned as Polars DataFrames, which can
//! be written to CSV, Parquet or JSON, or exported as Wavefront OBJ.

mod error;
pub mod mesh;
pub mod ses;
mod utils;

// Re-export key public types
pub use error::SurfaceError;
pub use mesh::{write_probe_dump, Component, EdgeAudit, TriangleMesh};
pub use ses::{
    build_surface, probe_positions, Diagnostic, FaceKind, Quality, Settings, Sphere, Strategy, SurfaceReport, Vec3,
};
pub use utils::{
    element_color, load_model, load_spheres, run_with_threads, spheres_from_model, write_df_to_file,
    DataFrameFileType,
};

use pdbtbx::PDB;
use tracing::debug;

/// Build the solvent-excluded surface of one model of a PDB structure.
///
/// # Arguments
///
/// * `pdb` - Reference to a PDB structure
/// * `model_num` - Model number to mesh (0 for the first model)
/// * `settings` - Probe radius, tessellation density and strategy
///
/// # Returns
///
/// The triangle mesh and the construction report. Hydrogens and waters are
/// not part of the surface.
///
/// # Example
///
/// ```no_run
/// use sesmesh::{get_surface, load_model, Settings};
/// use std::path::Path;
///
/// let (pdb, _errors) = load_model(Path::new("path/to/structure.pdb")).unwrap();
/// let (mesh, report) = get_surface(&pdb, 0, &Settings::default()).unwrap();
/// println!("{} triangles, {} diagnostics", mesh.triangle_count(), report.diagnostics.len());
/// ```
pub fn get_surface(
    pdb: &PDB,
    model_num: usize,
    settings: &Settings,
) -> Result<(TriangleMesh, SurfaceReport), SurfaceError> {
    let spheres = spheres_from_model(pdb, model_num);
    debug!("Meshing {} atoms with probe radius {}", spheres.len(), settings.probe_radius);
    build_surface(&spheres, settings)
}
