//! Which studies land in a region: activations strictly within `radius`
//! of a region voxel.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::coords::Voxel;
use crate::corpus::{Activation, StudyId};

/// Landed probability per study. Studies that cannot land are absent.
pub type Landed = HashMap<StudyId, f64>;

//Balls larger than this are not materialized; regions are scanned instead
const MAX_OFFSETS: f64 = 1.0e6;

/// Integer offsets whose Euclidean length is strictly below `radius`.
///
/// Activations and region voxels both live on the integer grid, so probing these
/// offsets around an activation finds every region voxel in range without
/// scanning the region. When the ball outgrows the region, or is too large to
/// build at all, the region voxels are scanned by distance instead.
#[derive(Debug, Clone)]
pub struct Neighbourhood {
    radius: f64,
    offsets: Option<Vec<(i32, i32, i32)>>,
}

impl Neighbourhood {
    pub fn new(radius: f64) -> Neighbourhood {
        if !(radius > 0.0) {
            return Neighbourhood {
                radius,
                offsets: Some(Vec::new()),
            };
        }
        let ball = 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3);
        if ball > MAX_OFFSETS {
            debug!("Radius {} is too large for an offset ball, regions will be scanned", radius);
            return Neighbourhood { radius, offsets: None };
        }

        let reach = radius.ceil() as i32;
        let mut offsets = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let d2 = (dx as i64).pow(2) + (dy as i64).pow(2) + (dz as i64).pow(2);
                    if (d2 as f64).sqrt() < radius {
                        offsets.push((dx, dy, dz));
                    }
                }
            }
        }
        Neighbourhood {
            radius,
            offsets: Some(offsets),
        }
    }

    //None when regions are always scanned
    pub fn ball_size(&self) -> Option<usize> {
        self.offsets.as_ref().map(Vec::len)
    }

    /// Calls `f` for every region voxel within range of `center`.
    pub fn for_each_hit<F>(&self, center: Voxel, region: &HashMap<Voxel, f64>, mut f: F)
    where
        F: FnMut(Voxel, f64),
    {
        match &self.offsets {
            Some(offsets) if offsets.len() <= region.len() => {
                for &(dx, dy, dz) in offsets {
                    //Probes past the index range cannot hit a region voxel
                    let Some(voxel) = center.offset(dx, dy, dz) else {
                        continue;
                    };
                    if let Some(p) = region.get(&voxel) {
                        f(voxel, *p);
                    }
                }
            }
            _ => {
                for (voxel, p) in region {
                    if center.distance(voxel) < self.radius {
                        f(*voxel, *p);
                    }
                }
            }
        }
    }
}

/// Landed probability of every study with an activation near `region`.
///
/// Each region voxel is an independent fact holding with its membership
/// probability, so a study lands with the noisy-OR of the distinct voxels its
/// activations reach: 1 - prod(1 - p). With deterministic regions every
/// probability is 1 and a landed study gets exactly 1.
pub fn landed_studies(
    activations: &[Activation],
    region: &HashMap<Voxel, f64>,
    neighbourhood: &Neighbourhood,
) -> Landed {
    let mut reached: HashMap<StudyId, HashMap<Voxel, f64>> = HashMap::new();
    for activation in activations {
        neighbourhood.for_each_hit(activation.voxel, region, |voxel, p| {
            reached.entry(activation.study).or_default().insert(voxel, p);
        });
    }

    reached
        .into_iter()
        .filter_map(|(study, voxels)| {
            let missed: f64 = voxels.values().map(|p| 1.0 - p).product();
            let p = 1.0 - missed;
            if p > 0.0 {
                Some((study, p))
            } else {
                None
            }
        })
        .collect()
}

pub fn certain(landed: &Landed) -> HashSet<StudyId> {
    landed
        .iter()
        .filter(|(_, p)| **p >= 1.0)
        .map(|(study, _)| *study)
        .collect()
}
