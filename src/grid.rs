//! Reference voxel grid and nearest-neighbour resampling onto it.

use log::debug;
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::coords::Voxel;
use crate::error::{Error, Result};
use crate::nifti::Volume;

/// Shape of the ICBM152 2009 template at 1mm.
const MNI152_2009_SHAPE: [usize; 3] = [197, 233, 189];
/// World position of voxel (0, 0, 0) of the ICBM152 2009 template.
const MNI152_2009_ORIGIN: [f64; 3] = [-98.0, -134.0, -72.0];

/// A 3D voxel grid placed in world space by a voxel-to-world affine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGrid {
    pub affine: Matrix4<f64>,
    pub shape: [usize; 3],
}

impl ReferenceGrid {
    /// The 1mm ICBM152 2009 template grid.
    pub fn mni152_2009() -> ReferenceGrid {
        let mut affine = Matrix4::identity();
        for axis in 0..3 {
            affine[(axis, 3)] = MNI152_2009_ORIGIN[axis];
        }
        ReferenceGrid {
            affine,
            shape: MNI152_2009_SHAPE,
        }
    }

    pub fn from_volume(volume: &Volume) -> ReferenceGrid {
        ReferenceGrid {
            affine: volume.affine(),
            shape: volume.spatial_shape(),
        }
    }

    /// Grid with isotropic `factor` mm voxels covering the same world bounding box.
    pub fn resampled(&self, factor: f64) -> Result<ReferenceGrid> {
        if !(factor > 0.0) {
            return Err(Error::config(format!("resample factor must be positive, got {}", factor)));
        }
        let target = Matrix3::from_diagonal_element(factor);
        let to_target = target
            .try_inverse()
            .ok_or_else(|| Error::config("resample factor produced a singular affine"))?;

        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        for corner in 0..8 {
            let ijk = Vector4::new(
                if corner & 1 == 0 { 0.0 } else { (self.shape[0] - 1) as f64 },
                if corner & 2 == 0 { 0.0 } else { (self.shape[1] - 1) as f64 },
                if corner & 4 == 0 { 0.0 } else { (self.shape[2] - 1) as f64 },
                1.0,
            );
            let world = self.affine * ijk;
            let p = to_target * Vector3::new(world.x, world.y, world.z);
            lo = lo.inf(&p);
            hi = hi.sup(&p);
        }

        let mut shape = [0usize; 3];
        for axis in 0..3 {
            //Tolerance so that exact multiples do not gain a voxel through rounding noise
            shape[axis] = ((hi[axis] - lo[axis]) - 1e-6).ceil().max(0.0) as usize + 1;
        }
        let offset = target * lo;
        let mut affine = Matrix4::identity();
        affine.fixed_view_mut::<3, 3>(0, 0).copy_from(&target);
        affine[(0, 3)] = offset.x;
        affine[(1, 3)] = offset.y;
        affine[(2, 3)] = offset.z;

        debug!("Resampled reference grid by {}: shape {:?}", factor, shape);
        Ok(ReferenceGrid { affine, shape })
    }

    pub fn contains(&self, voxel: &Voxel) -> bool {
        voxel.x >= 0
            && voxel.y >= 0
            && voxel.z >= 0
            && (voxel.x as usize) < self.shape[0]
            && (voxel.y as usize) < self.shape[1]
            && (voxel.z as usize) < self.shape[2]
    }
}

/// Something that can enumerate its non-zero voxels on a fixed grid.
pub trait VoxelSource {
    /// Declared dimensionality of the image (3 or 4 for usable maps).
    fn rank(&self) -> usize;

    /// Calls `f(voxel, t, value)` for every non-zero value, in grid order
    /// with t varying fastest.
    fn for_each_nonzero<F: FnMut(Voxel, usize, f64)>(&self, f: F);
}

impl VoxelSource for Volume {
    fn rank(&self) -> usize {
        self.rank
    }

    fn for_each_nonzero<F: FnMut(Voxel, usize, f64)>(&self, mut f: F) {
        let (nx, ny, nz, nt) = self.data.dim();
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    for t in 0..nt {
                        let value = self.data[[x, y, z, t]];
                        if value != 0.0 {
                            f(Voxel::new(x as i32, y as i32, z as i32), t, value);
                        }
                    }
                }
            }
        }
    }
}

/// A volume seen through nearest-neighbour interpolation on another grid.
/// Grid voxels that fall outside the source read as zero.
pub struct Resampled<'a> {
    source: &'a Volume,
    grid: &'a ReferenceGrid,
    grid_to_source: Matrix4<f64>,
}

impl<'a> Resampled<'a> {
    pub fn new(source: &'a Volume, grid: &'a ReferenceGrid) -> Result<Resampled<'a>> {
        let source_inverse = source
            .affine()
            .try_inverse()
            .ok_or_else(|| Error::input("input image affine is not invertible"))?;
        Ok(Resampled {
            source,
            grid,
            grid_to_source: source_inverse * grid.affine,
        })
    }

    fn source_index(&self, voxel: &Voxel) -> Option<[usize; 3]> {
        let p = self.grid_to_source
            * Vector4::new(voxel.x as f64, voxel.y as f64, voxel.z as f64, 1.0);
        let shape = self.source.spatial_shape();
        let mut index = [0usize; 3];
        for (axis, coord) in [p.x, p.y, p.z].iter().enumerate() {
            let rounded = coord.round();
            if rounded < 0.0 || rounded >= shape[axis] as f64 {
                return None;
            }
            index[axis] = rounded as usize;
        }
        Some(index)
    }
}

impl<'a> VoxelSource for Resampled<'a> {
    fn rank(&self) -> usize {
        self.source.rank
    }

    fn for_each_nonzero<F: FnMut(Voxel, usize, f64)>(&self, mut f: F) {
        let nt = self.source.data.dim().3;
        let [nx, ny, nz] = self.grid.shape;
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let voxel = Voxel::new(x as i32, y as i32, z as i32);
                    if let Some([i, j, k]) = self.source_index(&voxel) {
                        for t in 0..nt {
                            let value = self.source.data[[i, j, k, t]];
                            if value != 0.0 {
                                f(voxel, t, value);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::NIfTI1Header;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    fn volume(data: Array4<f64>, rank: usize, affine: &Matrix4<f64>) -> Volume {
        let (nx, ny, nz, nt) = data.dim();
        let shape = [nx, ny, nz, nt];
        Volume {
            header: NIfTI1Header::for_shape(&shape[..rank], affine),
            data,
            rank,
        }
    }

    #[test]
    fn unit_resample_keeps_template() {
        let grid = ReferenceGrid::mni152_2009();
        let same = grid.resampled(1.0).unwrap();
        assert_eq!(same.shape, [197, 233, 189]);
        assert_relative_eq!(same.affine, grid.affine, epsilon = 1e-9);
    }

    #[test]
    fn coarser_resample_shrinks_shape() {
        let grid = ReferenceGrid::mni152_2009().resampled(2.0).unwrap();
        assert_eq!(grid.shape, [99, 117, 95]);
        assert_relative_eq!(grid.affine[(0, 0)], 2.0);
        assert_relative_eq!(grid.affine[(0, 3)], -98.0);
        assert_relative_eq!(grid.affine[(2, 3)], -72.0);
    }

    #[test]
    fn non_positive_factor_is_rejected() {
        assert!(ReferenceGrid::mni152_2009().resampled(0.0).is_err());
    }

    #[test]
    fn identical_grid_resample_is_identity() {
        let mut data = Array4::<f64>::zeros((4, 4, 4, 1));
        data[[1, 2, 3, 0]] = 5.0;
        let vol = volume(data, 3, &Matrix4::identity());
        let grid = ReferenceGrid::from_volume(&vol);
        let view = Resampled::new(&vol, &grid).unwrap();

        let mut seen = Vec::new();
        view.for_each_nonzero(|v, t, value| seen.push((v, t, value)));
        assert_eq!(seen, vec![(Voxel::new(1, 2, 3), 0, 5.0)]);
    }

    #[test]
    fn shifted_grid_moves_voxels_and_drops_outside() {
        let mut data = Array4::<f64>::zeros((3, 3, 3, 2));
        data[[0, 0, 0, 1]] = 2.0;
        data[[2, 2, 2, 0]] = 1.0;
        let vol = volume(data, 4, &Matrix4::identity());
        //Grid shifted by +1mm along every axis: source (2,2,2) becomes (1,1,1),
        //source (0,0,0) lies before the grid start
        let mut affine = Matrix4::identity();
        affine[(0, 3)] = 1.0;
        affine[(1, 3)] = 1.0;
        affine[(2, 3)] = 1.0;
        let grid = ReferenceGrid { affine, shape: [3, 3, 3] };
        let view = Resampled::new(&vol, &grid).unwrap();

        let mut seen = Vec::new();
        view.for_each_nonzero(|v, t, value| seen.push((v, t, value)));
        assert_eq!(seen, vec![(Voxel::new(1, 1, 1), 0, 1.0)]);
        assert_eq!(view.rank(), 4);
    }

    #[test]
    fn contains_checks_bounds() {
        let grid = ReferenceGrid { affine: Matrix4::identity(), shape: [2, 2, 2] };
        assert!(grid.contains(&Voxel::new(1, 1, 1)));
        assert!(!grid.contains(&Voxel::new(2, 0, 0)));
        assert!(!grid.contains(&Voxel::new(-1, 0, 0)));
    }
}
