//Reading and writing of single file NIfTI-1 images (.nii and .nii.gz)
use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use nalgebra::{Matrix3, Matrix4, Vector3};
use ndarray::{Array4, ShapeBuilder};

use crate::error::{Error, Result};

const HEADER_SIZE: usize = 348;
const DATA_OFFSET: usize = 352;

pub const DT_UINT8: i16 = 2;
pub const DT_INT16: i16 = 4;
pub const DT_INT32: i16 = 8;
pub const DT_FLOAT32: i16 = 16;
pub const DT_FLOAT64: i16 = 64;
pub const DT_INT8: i16 = 256;
pub const DT_UINT16: i16 = 512;
pub const DT_UINT32: i16 = 768;

/// The parts of the NIfTI-1 header the pipeline needs. Offsets are byte offsets
/// into the 348 byte header.
#[derive(Debug, Clone, PartialEq)]
pub struct NIfTI1Header {
    pub sizeof_hdr: i32,       //0   Size of the header. Must be 348 (bytes).
    pub dim_info: u8,          //39  Encoding directions (phase, frequency, slice).
    pub dim: [i16; 8],         //40  Data array dimensions.
    pub intent_code: i16,      //68  nifti intent.
    pub datatype: i16,         //70  Data type.
    pub bitpix: i16,           //72  Number of bits per voxel.
    pub pixdim: [f32; 8],      //76  Grid spacings (unit per dimension).
    pub vox_offset: f32,       //108 Offset into a .nii file.
    pub scl_slope: f32,        //112 Data scaling, slope.
    pub scl_inter: f32,        //116 Data scaling, offset.
    pub xyzt_units: u8,        //123 Units of pixdim[1..4].
    pub descrip: String,       //148 Any text.
    pub qform_code: i16,       //252 Use the quaternion fields.
    pub sform_code: i16,       //254 Use of the affine fields.
    pub quatern_b: f32,        //256 Quaternion b parameter.
    pub quatern_c: f32,        //260 Quaternion c parameter.
    pub quatern_d: f32,        //264 Quaternion d parameter.
    pub qoffset_x: f32,        //268 Quaternion x shift.
    pub qoffset_y: f32,        //272 Quaternion y shift.
    pub qoffset_z: f32,        //276 Quaternion z shift.
    pub srow_x: [f32; 4],      //280 1st row affine transform
    pub srow_y: [f32; 4],      //296 2nd row affine transform
    pub srow_z: [f32; 4],      //312 3rd row affine transform
    pub magic: [u8; 4],        //344 Magic string.
}

/// A decoded image: data is indexed (x, y, z, t) and `rank` is the
/// dimensionality declared by the header.
#[derive(Debug, Clone)]
pub struct Volume {
    pub header: NIfTI1Header,
    pub data: Array4<f64>,
    pub rank: usize,
}

impl Volume {
    pub fn affine(&self) -> Matrix4<f64> {
        self.header.affine()
    }

    pub fn spatial_shape(&self) -> [usize; 3] {
        let (nx, ny, nz, _) = self.data.dim();
        [nx, ny, nz]
    }
}

//Byte view over the raw header, honouring the detected byte order
struct HeaderBytes<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl<'a> HeaderBytes<'a> {
    fn take<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        if self.big_endian {
            out.reverse();
        }
        out
    }

    fn i16_at(&self, offset: usize) -> i16 {
        i16::from_le_bytes(self.take(offset))
    }

    fn i32_at(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.take(offset))
    }

    fn f32_at(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.take(offset))
    }
}

impl NIfTI1Header {
    fn parse(bytes: &[u8], display: &str) -> Result<(NIfTI1Header, bool)> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::nifti(
                display,
                format!("file too small ({} bytes, need at least {})", bytes.len(), HEADER_SIZE),
            ));
        }

        //Determine the byte order from the header size field
        let mut view = HeaderBytes { bytes, big_endian: false };
        if view.i32_at(0) != HEADER_SIZE as i32 {
            view.big_endian = true;
            if view.i32_at(0) != HEADER_SIZE as i32 {
                return Err(Error::nifti(display, "wrong header size"));
            }
        }

        let mut dim = [0i16; 8];
        for (i, d) in dim.iter_mut().enumerate() {
            *d = view.i16_at(40 + 2 * i);
        }
        let mut pixdim = [0f32; 8];
        for (i, p) in pixdim.iter_mut().enumerate() {
            *p = view.f32_at(76 + 4 * i);
        }
        let row = |offset: usize| -> [f32; 4] {
            [
                view.f32_at(offset),
                view.f32_at(offset + 4),
                view.f32_at(offset + 8),
                view.f32_at(offset + 12),
            ]
        };

        let descrip_raw = &bytes[148..228];
        let end = descrip_raw.iter().position(|&b| b == 0).unwrap_or(descrip_raw.len());
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[344..348]);

        let header = NIfTI1Header {
            sizeof_hdr: HEADER_SIZE as i32,
            dim_info: bytes[39],
            dim,
            intent_code: view.i16_at(68),
            datatype: view.i16_at(70),
            bitpix: view.i16_at(72),
            pixdim,
            vox_offset: view.f32_at(108),
            scl_slope: view.f32_at(112),
            scl_inter: view.f32_at(116),
            xyzt_units: bytes[123],
            descrip: String::from_utf8_lossy(&descrip_raw[..end]).into_owned(),
            qform_code: view.i16_at(252),
            sform_code: view.i16_at(254),
            quatern_b: view.f32_at(256),
            quatern_c: view.f32_at(260),
            quatern_d: view.f32_at(264),
            qoffset_x: view.f32_at(268),
            qoffset_y: view.f32_at(272),
            qoffset_z: view.f32_at(276),
            srow_x: row(280),
            srow_y: row(296),
            srow_z: row(312),
            magic,
        };

        if &header.magic != b"n+1\0" {
            return Err(Error::nifti(
                display,
                "only single file NIfTI-1 images (magic 'n+1') are supported",
            ));
        }
        Ok((header, view.big_endian))
    }

    /// Header for a float32 image of the given shape and voxel-to-world affine.
    pub fn for_shape(shape: &[usize], affine: &Matrix4<f64>) -> NIfTI1Header {
        let mut dim = [1i16; 8];
        dim[0] = shape.len() as i16;
        for (i, s) in shape.iter().enumerate() {
            dim[i + 1] = *s as i16;
        }
        let mut pixdim = [1f32; 8];
        for axis in 0..3 {
            let column = affine.fixed_view::<3, 1>(0, axis);
            pixdim[axis + 1] = column.norm() as f32;
        }
        let row = |r: usize| -> [f32; 4] {
            [
                affine[(r, 0)] as f32,
                affine[(r, 1)] as f32,
                affine[(r, 2)] as f32,
                affine[(r, 3)] as f32,
            ]
        };
        NIfTI1Header {
            sizeof_hdr: HEADER_SIZE as i32,
            dim_info: 0,
            dim,
            intent_code: 0,
            datatype: DT_FLOAT32,
            bitpix: 32,
            pixdim,
            vox_offset: DATA_OFFSET as f32,
            scl_slope: 1.0,
            scl_inter: 0.0,
            xyzt_units: 2,
            descrip: String::new(),
            qform_code: 0,
            sform_code: 1,
            quatern_b: 0.0,
            quatern_c: 0.0,
            quatern_d: 0.0,
            qoffset_x: 0.0,
            qoffset_y: 0.0,
            qoffset_z: 0.0,
            srow_x: row(0),
            srow_y: row(1),
            srow_z: row(2),
            magic: *b"n+1\0",
        }
    }

    /// Voxel to world transform: sform if present, else qform, else pixdim scaling.
    pub fn affine(&self) -> Matrix4<f64> {
        if self.sform_code > 0 {
            let mut m = Matrix4::identity();
            for (r, srow) in [self.srow_x, self.srow_y, self.srow_z].iter().enumerate() {
                for c in 0..4 {
                    m[(r, c)] = srow[c] as f64;
                }
            }
            return m;
        }

        let scale = Vector3::new(
            self.pixdim[1] as f64,
            self.pixdim[2] as f64,
            self.pixdim[3] as f64,
        );
        if self.qform_code > 0 {
            let (b, c, d) = (
                self.quatern_b as f64,
                self.quatern_c as f64,
                self.quatern_d as f64,
            );
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let rotation = Matrix3::new(
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - c * c - b * b,
            );
            let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let zooms = Matrix3::from_diagonal(&Vector3::new(scale.x, scale.y, scale.z * qfac));
            let mut m = Matrix4::identity();
            m.fixed_view_mut::<3, 3>(0, 0).copy_from(&(rotation * zooms));
            m[(0, 3)] = self.qoffset_x as f64;
            m[(1, 3)] = self.qoffset_y as f64;
            m[(2, 3)] = self.qoffset_z as f64;
            return m;
        }

        let mut m = Matrix4::identity();
        for axis in 0..3 {
            m[(axis, axis)] = if scale[axis] == 0.0 { 1.0 } else { scale[axis] };
        }
        m
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut put = |offset: usize, bytes: &[u8]| {
            out[offset..offset + bytes.len()].copy_from_slice(bytes);
        };
        put(0, &self.sizeof_hdr.to_le_bytes());
        put(38, &[b'r']);
        put(39, &[self.dim_info]);
        for (i, d) in self.dim.iter().enumerate() {
            put(40 + 2 * i, &d.to_le_bytes());
        }
        put(68, &self.intent_code.to_le_bytes());
        put(70, &self.datatype.to_le_bytes());
        put(72, &self.bitpix.to_le_bytes());
        for (i, p) in self.pixdim.iter().enumerate() {
            put(76 + 4 * i, &p.to_le_bytes());
        }
        put(108, &self.vox_offset.to_le_bytes());
        put(112, &self.scl_slope.to_le_bytes());
        put(116, &self.scl_inter.to_le_bytes());
        put(123, &[self.xyzt_units]);
        let descrip = self.descrip.as_bytes();
        put(148, &descrip[..descrip.len().min(79)]);
        put(252, &self.qform_code.to_le_bytes());
        put(254, &self.sform_code.to_le_bytes());
        put(256, &self.quatern_b.to_le_bytes());
        put(260, &self.quatern_c.to_le_bytes());
        put(264, &self.quatern_d.to_le_bytes());
        put(268, &self.qoffset_x.to_le_bytes());
        put(272, &self.qoffset_y.to_le_bytes());
        put(276, &self.qoffset_z.to_le_bytes());
        for (r, srow) in [self.srow_x, self.srow_y, self.srow_z].iter().enumerate() {
            for (c, v) in srow.iter().enumerate() {
                put(280 + 16 * r + 4 * c, &v.to_le_bytes());
            }
        }
        put(344, &self.magic);
        out
    }
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

//Decode one voxel of the given datatype
fn decode(chunk: &[u8], datatype: i16, big_endian: bool) -> f64 {
    let mut raw = [0u8; 8];
    let n = chunk.len();
    raw[..n].copy_from_slice(chunk);
    if big_endian {
        raw[..n].reverse();
    }
    match datatype {
        DT_UINT8 => raw[0] as f64,
        DT_INT8 => raw[0] as i8 as f64,
        DT_INT16 => i16::from_le_bytes([raw[0], raw[1]]) as f64,
        DT_UINT16 => u16::from_le_bytes([raw[0], raw[1]]) as f64,
        DT_INT32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        DT_UINT32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        DT_FLOAT32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        _ => f64::from_le_bytes(raw),
    }
}

fn bytes_per_voxel(datatype: i16) -> Option<usize> {
    match datatype {
        DT_UINT8 | DT_INT8 => Some(1),
        DT_INT16 | DT_UINT16 => Some(2),
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => Some(4),
        DT_FLOAT64 => Some(8),
        _ => None,
    }
}

/// Reads a NIfTI-1 image, gzip compressed or not.
pub fn read<P: AsRef<Path>>(file_name: P) -> Result<Volume> {
    let path = file_name.as_ref();
    let display = path.display().to_string();

    //Read the whole file, decompressing when needed
    let mut raw: Vec<u8> = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;
    let bytes = if is_gzip(&raw) {
        let mut decompressed = Vec::new();
        GzDecoder::new(&raw[..]).read_to_end(&mut decompressed)?;
        decompressed
    } else {
        raw
    };

    let (header, big_endian) = NIfTI1Header::parse(&bytes, &display)?;

    let rank = header.dim[0];
    if !(1..=7).contains(&rank) {
        return Err(Error::nifti(&display, format!("invalid dim[0] = {}", rank)));
    }
    let rank = rank as usize;
    let extent = |axis: usize| -> usize {
        if axis <= rank {
            header.dim[axis].max(1) as usize
        } else {
            1
        }
    };
    let (nx, ny, nz) = (extent(1), extent(2), extent(3));
    //Everything past the third axis is folded into t
    let nt: usize = (4..=7).map(extent).product();

    let width = bytes_per_voxel(header.datatype).ok_or_else(|| {
        Error::nifti(&display, format!("unsupported datatype {}", header.datatype))
    })?;
    let offset = (header.vox_offset as usize).max(DATA_OFFSET);
    let count = nx * ny * nz * nt;
    if bytes.len() < offset + count * width {
        return Err(Error::nifti(
            &display,
            format!(
                "truncated data: expected {} voxels of {} bytes after offset {}, file has {} bytes",
                count,
                width,
                offset,
                bytes.len()
            ),
        ));
    }

    let (slope, inter) = if header.scl_slope != 0.0 && header.scl_slope.is_finite() {
        (header.scl_slope as f64, header.scl_inter as f64)
    } else {
        (1.0, 0.0)
    };

    //Data is stored with x varying fastest
    let values: Vec<f64> = bytes[offset..offset + count * width]
        .chunks_exact(width)
        .map(|chunk| decode(chunk, header.datatype, big_endian) * slope + inter)
        .collect();
    let data = Array4::from_shape_vec((nx, ny, nz, nt).f(), values)
        .map_err(|e| Error::nifti(&display, e.to_string()))?;

    debug!(
        "Read {}: shape {:?}, rank {}, datatype {}",
        display,
        data.dim(),
        rank,
        header.datatype
    );

    Ok(Volume { header, data, rank })
}

/// Writes `data` as a float32 NIfTI-1 image. Only the first `rank` axes are
/// declared in the header; a `.gz` extension selects gzip compression.
pub fn write<P: AsRef<Path>>(
    file_name: P,
    data: &Array4<f64>,
    rank: usize,
    affine: &Matrix4<f64>,
) -> Result<()> {
    let path = file_name.as_ref();
    let (nx, ny, nz, nt) = data.dim();
    let shape: Vec<usize> = [nx, ny, nz, nt].iter().take(rank.clamp(3, 4)).copied().collect();
    let header = NIfTI1Header::for_shape(&shape, affine);

    let mut buffer: Vec<u8> = Vec::with_capacity(DATA_OFFSET + data.len() * 4);
    buffer.extend_from_slice(&header.to_bytes());
    //Empty extension block between header and data
    buffer.extend_from_slice(&[0u8; DATA_OFFSET - HEADER_SIZE]);
    for t in 0..nt {
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    buffer.extend_from_slice(&(data[[x, y, z, t]] as f32).to_le_bytes());
                }
            }
        }
    }

    let file = BufWriter::new(File::create(path)?);
    let gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&buffer)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        file.write_all(&buffer)?;
        file.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn mni_like_affine() -> Matrix4<f64> {
        Matrix4::new(
            2.0, 0.0, 0.0, -90.0, //
            0.0, 2.0, 0.0, -126.0, //
            0.0, 0.0, 2.0, -72.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    #[test]
    fn write_then_read_keeps_values_and_affine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol.nii");
        let mut data = Array4::<f64>::zeros((4, 3, 2, 1));
        data[[3, 1, 0, 0]] = 7.5;
        data[[0, 2, 1, 0]] = -1.0;

        write(&path, &data, 3, &mni_like_affine()).unwrap();
        let vol = read(&path).unwrap();

        assert_eq!(vol.rank, 3);
        assert_eq!(vol.data.dim(), (4, 3, 2, 1));
        assert_relative_eq!(vol.data[[3, 1, 0, 0]], 7.5);
        assert_relative_eq!(vol.data[[0, 2, 1, 0]], -1.0);
        assert_relative_eq!(vol.affine(), mni_like_affine());
    }

    #[test]
    fn gzip_images_are_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol.nii.gz");
        let mut data = Array4::<f64>::zeros((2, 2, 2, 3));
        data[[1, 1, 1, 2]] = 0.25;

        write(&path, &data, 4, &Matrix4::identity()).unwrap();
        let vol = read(&path).unwrap();

        assert_eq!(vol.rank, 4);
        assert_eq!(vol.data.dim(), (2, 2, 2, 3));
        assert_relative_eq!(vol.data[[1, 1, 1, 2]], 0.25);
    }

    #[test]
    fn qform_is_used_without_sform() {
        let mut header = NIfTI1Header::for_shape(&[2, 2, 2], &Matrix4::identity());
        header.sform_code = 0;
        header.qform_code = 1;
        header.pixdim = [1.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0];
        header.qoffset_x = -10.0;
        header.qoffset_y = 5.0;
        header.qoffset_z = 1.0;

        let m = header.affine();
        assert_relative_eq!(m[(0, 0)], 2.0);
        assert_relative_eq!(m[(2, 2)], 2.0);
        assert_relative_eq!(m[(0, 3)], -10.0);
        assert_relative_eq!(m[(1, 3)], 5.0);
    }

    #[test]
    fn rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.nii");
        std::fs::write(&path, vec![0u8; 400]).unwrap();
        assert!(matches!(read(&path), Err(Error::Nifti { .. })));
    }

    #[test]
    fn truncated_data_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.nii");
        let data = Array4::<f64>::zeros((3, 3, 3, 1));
        write(&path, &data, 3, &Matrix4::identity()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(read(&path), Err(Error::Nifti { .. })));
    }
}
