//! Region extraction: non-zero voxels of a map grouped by region.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::info;

use crate::coords::Voxel;
use crate::error::{Error, Result};
use crate::grid::VoxelSource;

pub type RegionLabel = i64;

/// How voxel values of the input map are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMode {
    /// 4D values are integer region labels; 3D maps are one region.
    Deterministic,
    /// Values are membership probabilities; the region is the index on the
    /// last axis (or 1 for 3D maps).
    Probabilistic,
}

impl fmt::Display for RegionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegionMode::Deterministic => write!(f, "deterministic"),
            RegionMode::Probabilistic => write!(f, "probabilistic"),
        }
    }
}

/// Every region voxel of the map, each with its membership probability
/// (always 1 in deterministic mode).
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: BTreeMap<RegionLabel, HashMap<Voxel, f64>>,
}

impl RegionMap {
    pub fn insert(&mut self, label: RegionLabel, voxel: Voxel, probability: f64) {
        self.regions.entry(label).or_default().insert(voxel, probability);
    }

    pub fn labels(&self) -> Vec<RegionLabel> {
        self.regions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn voxels(&self, label: RegionLabel) -> Option<&HashMap<Voxel, f64>> {
        self.regions.get(&label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegionLabel, &HashMap<Voxel, f64>)> {
        self.regions.iter().map(|(label, voxels)| (*label, voxels))
    }
}

/// Scans `source` and groups its non-zero voxels by region.
pub fn extract<S: VoxelSource>(source: &S, mode: RegionMode) -> Result<RegionMap> {
    let rank = source.rank();
    if rank != 3 && rank != 4 {
        return Err(Error::InputShape(rank));
    }

    let mut map = RegionMap::default();
    let mut invalid: Option<(Voxel, f64)> = None;
    source.for_each_nonzero(|voxel, t, value| {
        match (mode, rank) {
            (RegionMode::Deterministic, 3) => map.insert(1, voxel, 1.0),
            (RegionMode::Deterministic, _) => map.insert(value as RegionLabel, voxel, 1.0),
            (RegionMode::Probabilistic, _) => {
                if !(0.0..=1.0).contains(&value) {
                    invalid.get_or_insert((voxel, value));
                    return;
                }
                let label = if rank == 3 { 1 } else { t as RegionLabel };
                map.insert(label, voxel, value);
            }
        }
    });

    if let Some((voxel, value)) = invalid {
        return Err(Error::input(format!(
            "voxel ({}, {}, {}) holds {} which is not a probability in [0, 1]",
            voxel.x, voxel.y, voxel.z, value
        )));
    }

    info!(
        "Extracted {} {} region(s) from a {}D map",
        map.len(),
        mode,
        rank
    );
    Ok(map)
}
