use crate::ses::{Sphere, DEFAULT_COLOR};
use crate::SurfaceError;
use pdbtbx::*;
use polars::prelude::*;
use std::path::Path;
use tracing::warn;

/// Fallback radius for elements without a tabulated van der Waals radius.
const FALLBACK_RADIUS: f64 = 1.5;

/// Residue names treated as solvent and dropped before surfacing.
const SOLVENT: [&str; 3] = ["HOH", "WAT", "DOD"];

/// Open an atomic data file with [`pdbtbx::ReadOptions`] and remove residues without a name.
pub fn load_model(input_file: &Path) -> Result<(PDB, Vec<PDBError>), SurfaceError> {
    let path = input_file.to_string_lossy().to_string();
    let (mut pdb, errors) = pdbtbx::ReadOptions::default()
        .set_only_atomic_coords(true)
        .set_level(pdbtbx::StrictnessLevel::Loose)
        .read(&path)
        .map_err(|errors| SurfaceError::Structure {
            path: path.clone(),
            message: errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "),
        })?;

    pdb.remove_residues_by(|res| res.name().is_none());

    Ok((pdb, errors))
}

/// CPK colour of an element as `0x00RRGGBB`.
pub fn element_color(element: Option<&Element>) -> u32 {
    match element {
        Some(Element::C) => 0x0090_9090,
        Some(Element::N) => 0x0030_50F8,
        Some(Element::O) => 0x00FF_0D0D,
        Some(Element::S) => 0x00FF_FF30,
        Some(Element::P) => 0x00FF_8000,
        Some(Element::H) => 0x00FF_FFFF,
        _ => DEFAULT_COLOR,
    }
}

/// Turn the heavy atoms of one model into spheres with van der Waals radii.
///
/// Hydrogens and waters are skipped. `model_num` 0 selects the first model.
pub fn spheres_from_model(pdb: &PDB, model_num: usize) -> Vec<Sphere> {
    let model_num = if model_num == 0 {
        pdb.models().next().map_or(0, |m| m.serial_number())
    } else {
        model_num
    };

    pdb.atoms_with_hierarchy()
        .filter(|x| x.model().serial_number() == model_num)
        .filter(|x| x.atom().element() != Some(&Element::H))
        .filter(|x| !x.residue().name().is_some_and(|name| SOLVENT.contains(&name)))
        .map(|x| {
            let element = x.atom().element();
            let radius = element
                .and_then(|e| e.atomic_radius().van_der_waals)
                .unwrap_or_else(|| {
                    warn!("No van der Waals radius for atom {}, using {FALLBACK_RADIUS}", x.atom().serial_number());
                    FALLBACK_RADIUS
                });
            let (px, py, pz) = x.atom().pos();
            Sphere::new(px, py, pz, radius).with_color(element_color(element))
        })
        .collect()
}

/// Load a PDB/mmCIF file straight into spheres, logging parser warnings.
pub fn load_spheres(input_file: &Path, model_num: usize) -> Result<Vec<Sphere>, SurfaceError> {
    let (pdb, pdb_warnings) = load_model(input_file)?;
    pdb_warnings.iter().for_each(|e| warn!("{e}"));
    Ok(spheres_from_model(&pdb, model_num))
}

/// Run `op` inside a dedicated rayon pool of `num_threads` threads (0 for all
/// cores). Falls back to the global pool if the pool cannot be built.
pub fn run_with_threads<T, F>(num_threads: usize, op: F) -> T
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(num_threads).build() {
        Ok(pool) => pool.install(op),
        Err(e) => {
            warn!("Could not build a pool of {num_threads} threads: {e}");
            op()
        }
    }
}

/// Write a DataFrame next to `file_path`, with the extension of `file_type`.
pub fn write_df_to_file(df: &mut DataFrame, file_path: &Path, file_type: DataFrameFileType) -> PolarsResult<()> {
    let file_suffix = file_type.to_string();
    let mut file = std::fs::File::create(file_path.with_extension(file_suffix))?;
    match file_type {
        DataFrameFileType::Csv => {
            CsvWriter::new(&mut file).finish(df)?;
        }
        DataFrameFileType::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
        DataFrameFileType::Json => {
            JsonWriter::new(&mut file)
                .with_json_format(JsonFormat::Json)
                .finish(df)?;
        }
        DataFrameFileType::NDJson => {
            JsonWriter::new(&mut file)
                .with_json_format(JsonFormat::JsonLines)
                .finish(df)?;
        }
    }
    Ok(())
}

/// File format for writing DataFrames.
#[derive(clap::ValueEnum, Clone, Debug, Copy, Default, PartialEq, Eq)]
pub enum DataFrameFileType {
    /// Comma-separated values
    #[default]
    Csv,
    /// Parquet columnar storage
    Parquet,
    /// Standard JSON
    Json,
    /// Newline-delimited JSON
    NDJson,
}

impl std::fmt::Display for DataFrameFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DataFrameFileType::Csv => write!(f, "csv"),
            DataFrameFileType::Parquet => write!(f, "parquet"),
            DataFrameFileType::Json => write!(f, "json"),
            DataFrameFileType::NDJson => write!(f, "ndjson"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom_line(record: &str, serial: usize, name: &str, resn: &str, resi: usize, pos: (f64, f64, f64), element: &str) -> String {
        format!(
            "{record:<6}{serial:>5} {name:<4} {resn:>3} A{resi:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {element:>2}",
            pos.0, pos.1, pos.2, 1.0, 0.0
        )
    }

    fn write_structure(dir: &Path) -> std::path::PathBuf {
        let lines = [
            atom_line("ATOM", 1, " N", "ALA", 1, (0.0, 0.0, 0.0), "N"),
            atom_line("ATOM", 2, " CA", "ALA", 1, (1.458, 0.0, 0.0), "C"),
            atom_line("ATOM", 3, " C", "ALA", 1, (2.009, 1.420, 0.0), "C"),
            atom_line("ATOM", 4, " H", "ALA", 1, (-0.5, 0.8, 0.0), "H"),
            atom_line("HETATM", 5, " O", "HOH", 2, (8.0, 8.0, 8.0), "O"),
            "END".to_string(),
        ];
        let path = dir.join("tiny.pdb");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    #[test]
    fn test_load_spheres_drops_hydrogens_and_water() {
        let dir = std::env::temp_dir().join(format!("sesmesh-load-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_structure(&dir);

        let spheres = load_spheres(&path, 0).unwrap();
        assert_eq!(spheres.len(), 3);
        assert_eq!(spheres[0].color, Some(0x0030_50F8));
        assert_eq!(spheres[1].color, Some(0x0090_9090));
        assert!(spheres.iter().all(|s| s.radius > 1.0 && s.visible));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_structure() {
        let result = load_model(Path::new("/nonexistent/structure.pdb"));
        assert!(matches!(result, Err(SurfaceError::Structure { .. })));
    }

    #[test]
    fn test_element_colors() {
        assert_eq!(element_color(Some(&Element::O)), 0x00FF_0D0D);
        assert_eq!(element_color(Some(&Element::Fe)), DEFAULT_COLOR);
        assert_eq!(element_color(None), DEFAULT_COLOR);
    }

    #[test]
    fn test_write_df_formats() {
        let dir = std::env::temp_dir().join(format!("sesmesh-df-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut df = df!("statistic" => ["probes", "tori"], "value" => [4u64, 6]).unwrap();
        for file_type in [DataFrameFileType::Csv, DataFrameFileType::NDJson] {
            write_df_to_file(&mut df, &dir.join("report"), file_type).unwrap();
        }
        let csv = std::fs::read_to_string(dir.join("report.csv")).unwrap();
        assert_eq!(csv.lines().next(), Some("statistic,value"));
        assert_eq!(std::fs::read_to_string(dir.join("report.ndjson")).unwrap().lines().count(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_with_threads() {
        assert_eq!(run_with_threads(3, rayon::current_num_threads), 3);
    }
}
