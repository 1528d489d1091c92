//! Analytical solvent-excluded surface (SES) construction.
//!
//! Follows Connolly's decomposition of the molecular surface into convex
//! patches on the spheres, saddle faces swept by a probe rolling over two
//! spheres, and concave triangles where the probe touches three spheres at
//! once. Each part is tessellated separately and the parts share their
//! boundary vertices, so the emitted mesh is closed where the surface is.
//!
//! Based on Connolly, "Analytical molecular surface calculation",
//! J. Appl. Cryst. 16 (1983).

pub mod builder;
pub mod geometry;
pub mod graph;
pub mod neighbours;
pub mod patch;
pub mod probes;
pub mod report;
pub mod saddle;
pub mod settings;
pub mod sphere_template;
pub mod tori;
pub mod types;

pub use builder::{build_surface, probe_positions};
pub use geometry::Vec3;
pub use report::{Diagnostic, FaceCounts, SurfaceReport};
pub use settings::{Quality, Settings, Strategy};
pub use types::{FaceKind, Sphere, DEFAULT_COLOR};
