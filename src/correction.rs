//! Applying a fitted transform to images and to point coordinates
//!
//! Both paths share the same unit handling: voxel indices are scaled to nm,
//! the polynomial is evaluated in nm, and the result is scaled back to voxels.
//!
//! Images are pull-back resampled: every output voxel `p` takes the source
//! value at `T(p)`, so warping the shifted channel with the forward
//! (reference → shifted) transform lands it in the reference frame.

use rayon::prelude::*;
use tracing::debug;

use crate::calibration::CalibrationRecord;
use crate::error::{Error, Result};
use crate::transform::PolynomialTransform;
use crate::units::{PixelPoint, VoxelIndex, VoxelSize};

/// Default absolute tolerance when comparing voxel sizes, in nm
pub const VOXEL_SIZE_TOLERANCE_NM: f64 = 1e-6;

/// Dense 3D image, row-major in zyx order
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl Volume {
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(Error::invalid(format!(
                "volume of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Single-plane image (nz = 1)
    pub fn planar(height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        Self::new([1, height, width], data)
    }

    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.iter().product()],
        }
    }

    pub fn from_fn(shape: [usize; 3], mut f: impl FnMut(usize, usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(shape.iter().product());
        for z in 0..shape[0] {
            for y in 0..shape[1] {
                for x in 0..shape[2] {
                    data.push(f(z, y, x));
                }
            }
        }
        Self { shape, data }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, z: usize, y: usize, x: usize) -> f32 {
        self.data[(z * self.shape[1] + y) * self.shape[2] + x]
    }

    /// Trilinear sample at a voxel-unit position, reflecting outside the volume.
    /// An empty volume samples as 0.
    pub fn sample(&self, p: &PixelPoint) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let [nz, ny, nx] = self.shape;
        let (z0, z1, fz) = neighbours(p.z, nz);
        let (y0, y1, fy) = neighbours(p.y, ny);
        let (x0, x1, fx) = neighbours(p.x, nx);

        let lerp = |a: f32, b: f32, t: f32| a + t * (b - a);
        let plane = |z: usize| {
            let top = lerp(self.get(z, y0, x0), self.get(z, y0, x1), fx);
            let bottom = lerp(self.get(z, y1, x0), self.get(z, y1, x1), fx);
            lerp(top, bottom, fy)
        };
        if fz == 0.0 {
            plane(z0)
        } else {
            lerp(plane(z0), plane(z1), fz)
        }
    }
}

/// Fold a coordinate into `[-0.5, n - 0.5]` by half-sample symmetric
/// reflection (`d c b a | a b c d | d c b a`)
#[inline]
fn reflect(c: f64, n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let period = 2.0 * n as f64;
    let mut t = (c + 0.5).rem_euclid(period);
    if t >= n as f64 {
        t = period - t;
    }
    t - 0.5
}

/// Two interpolation indices and the weight of the second one
#[inline]
fn neighbours(c: f64, n: usize) -> (usize, usize, f32) {
    let t = reflect(c, n);
    let base = t.floor();
    let last = n.saturating_sub(1) as i64;
    let i0 = (base as i64).clamp(0, last) as usize;
    let i1 = (base as i64 + 1).clamp(0, last) as usize;
    (i0, i1, (t - base) as f32)
}

/// Resample `image` through `transform`; output has the input's shape.
pub fn warp_image(
    image: &Volume,
    transform: &PolynomialTransform,
    voxel_size: &VoxelSize,
) -> Result<Volume> {
    let [nz, ny, nx] = image.shape();
    let mut out = Volume::zeros(image.shape());
    if image.is_empty() {
        return Ok(out);
    }

    debug!(
        "Warping {}x{}x{} volume with degree {} transform",
        nz,
        ny,
        nx,
        transform.degree()
    );

    out.data
        .par_chunks_mut(ny * nx)
        .enumerate()
        .for_each(|(z, slice)| {
            let mut scratch = Vec::with_capacity(transform.features().len());
            for y in 0..ny {
                for x in 0..nx {
                    let nm = PixelPoint::new(z as f64, y as f64, x as f64).to_physical(voxel_size);
                    let src = transform.apply_with(&nm, &mut scratch).to_pixels(voxel_size);
                    slice[y * nx + x] = image.sample(&src);
                }
            }
        });

    Ok(out)
}

/// Map sub-voxel positions through `transform`
pub fn transform_points(
    points: &[PixelPoint],
    transform: &PolynomialTransform,
    voxel_size: &VoxelSize,
) -> Vec<PixelPoint> {
    let mut scratch = Vec::with_capacity(transform.features().len());
    points
        .iter()
        .map(|p| {
            transform
                .apply_with(&p.to_physical(voxel_size), &mut scratch)
                .to_pixels(voxel_size)
        })
        .collect()
}

/// Map integer voxel positions through `transform`, rounding to the nearest voxel
pub fn warp_points(
    points: &[VoxelIndex],
    transform: &PolynomialTransform,
    voxel_size: &VoxelSize,
) -> Vec<VoxelIndex> {
    let mut scratch = Vec::with_capacity(transform.features().len());
    points
        .iter()
        .map(|p| {
            transform
                .apply_with(&p.to_pixel_point().to_physical(voxel_size), &mut scratch)
                .to_pixels(voxel_size)
                .round()
        })
        .collect()
}

impl CalibrationRecord {
    /// Fail unless `voxel_size` matches the sampling the calibration was fit at
    pub fn check_voxel_size(&self, voxel_size: &VoxelSize, tolerance: f64) -> Result<()> {
        if self.voxel_size.approx_eq(voxel_size, tolerance) {
            Ok(())
        } else {
            Err(Error::VoxelSizeMismatch {
                reference: self.reference_wavelength,
                corrected: self.corrected_wavelength,
                data: *voxel_size,
                calibration: self.voxel_size,
            })
        }
    }

    /// Bring an image of the corrected channel into the reference frame
    pub fn correct_image(&self, image: &Volume, voxel_size: &VoxelSize) -> Result<Volume> {
        self.check_voxel_size(voxel_size, VOXEL_SIZE_TOLERANCE_NM)?;
        warp_image(image, &self.forward, voxel_size)
    }

    /// Bring spot coordinates of the corrected channel into the reference frame
    pub fn correct_points(
        &self,
        points: &[VoxelIndex],
        voxel_size: &VoxelSize,
    ) -> Result<Vec<VoxelIndex>> {
        self.check_voxel_size(voxel_size, VOXEL_SIZE_TOLERANCE_NM)?;
        Ok(warp_points(points, &self.inverse, voxel_size))
    }
}
