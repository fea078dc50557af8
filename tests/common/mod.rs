//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use b2rio::nifti;
use b2rio::Params;
use nalgebra::Matrix4;
use ndarray::Array4;

/// Edge length of the cubic test grid (1mm voxels, world == voxel index).
pub const GRID: usize = 24;

/// Writes a map on the identity grid. `values` are (x, y, z, t, value); rank 4
/// maps get `nt` volumes.
pub fn write_map(dir: &Path, name: &str, rank: usize, nt: usize, values: &[(usize, usize, usize, usize, f64)]) -> PathBuf {
    let mut data = Array4::<f64>::zeros((GRID, GRID, GRID, nt));
    for &(x, y, z, t, v) in values {
        data[[x, y, z, t]] = v;
    }
    let path = dir.join(name);
    nifti::write(&path, &data, rank, &Matrix4::identity()).unwrap();
    path
}

/// Writes a peak table; coordinates are in mm.
pub fn write_peaks(dir: &Path, peaks: &[(u64, f64, f64, f64)]) -> PathBuf {
    let mut text = String::from("id\tx\ty\tz\tspace\n");
    for (id, x, y, z) in peaks {
        text.push_str(&format!("{}\t{}\t{}\t{}\tMNI\n", id, x, y, z));
    }
    let path = dir.join("database.txt");
    fs::write(&path, text).unwrap();
    path
}

/// Writes a long `id`/`term` association table.
pub fn write_terms(dir: &Path, terms: &[(u64, &str)]) -> PathBuf {
    let mut text = String::from("id\tterm\n");
    for (id, term) in terms {
        text.push_str(&format!("{}\t{}\n", id, term));
    }
    let path = dir.join("terms.tsv");
    fs::write(&path, text).unwrap();
    path
}

pub fn write_ontology(dir: &Path, pairs: &[(&str, &str)]) -> PathBuf {
    let mut text = String::from("label\ttopConcept\n");
    for (label, concept) in pairs {
        text.push_str(&format!("{}\t{}\n", label, concept));
    }
    let path = dir.join("cogat.tsv");
    fs::write(&path, text).unwrap();
    path
}

/// Parameters for a run on the test grid: the map doubles as the template.
pub fn params(dir: &Path, map: &Path, peaks: &Path, terms: &Path) -> Params {
    let mut params = Params::new(map, dir.join("out").to_string_lossy().into_owned());
    params.template = Some(map.to_path_buf());
    params.coordinates = peaks.to_path_buf();
    params.features = terms.to_path_buf();
    params
}

/// Reads an output table as (term, fold, bf, topConcept) rows. Empty bf cells
/// read as NaN.
pub fn read_results(path: &Path) -> Vec<(String, usize, f64, String)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["term", "fold", "bf", "topConcept"]);
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (
                r[0].to_string(),
                r[1].parse().unwrap(),
                if r[2].is_empty() { f64::NAN } else { r[2].parse().unwrap() },
                r[3].to_string(),
            )
        })
        .collect()
}
