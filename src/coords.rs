//! World (mm) to voxel index mapping for study activation peaks.

use nalgebra::{Matrix4, Vector4};

use crate::error::{Error, Result};

/// Integer voxel index on the reference grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Voxel {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Voxel {
    pub fn new(x: i32, y: i32, z: i32) -> Voxel {
        Voxel { x, y, z }
    }

    /// `None` when the shifted index leaves the `i32` range.
    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Option<Voxel> {
        Some(Voxel::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    pub fn distance(&self, other: &Voxel) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        let dz = self.z as f64 - other.z as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Maps world coordinates into the voxel space of a reference affine.
///
/// Indices are truncated toward zero and never bounds checked: a peak outside
/// the grid keeps its out-of-range index and simply never matches a region voxel.
/// Indices beyond the `i32` range saturate.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    inverse: Matrix4<f64>,
}

impl CoordinateMapper {
    pub fn new(affine: &Matrix4<f64>) -> Result<CoordinateMapper> {
        let inverse = affine
            .try_inverse()
            .ok_or_else(|| Error::input("reference affine is not invertible"))?;
        Ok(CoordinateMapper { inverse })
    }

    pub fn to_continuous(&self, world: [f64; 3]) -> [f64; 3] {
        let v = self.inverse * Vector4::new(world[0], world[1], world[2], 1.0);
        [v.x, v.y, v.z]
    }

    pub fn to_voxel(&self, world: [f64; 3]) -> Voxel {
        let [i, j, k] = self.to_continuous(world);
        Voxel::new(i.trunc() as i32, j.trunc() as i32, k.trunc() as i32)
    }
}
