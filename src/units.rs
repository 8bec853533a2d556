//! Coordinate types for pixel and physical (nanometre) space
//!
//! Pixel and physical points are distinct types so a coordinate can never be
//! fed to a fit or a transform in the wrong unit. All triples are in zyx order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Physical size of one voxel in nanometres (zyx)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 3]", into = "[f64; 3]")]
pub struct VoxelSize {
    z: f64,
    y: f64,
    x: f64,
}

impl VoxelSize {
    /// Create a voxel size, rejecting non-finite or non-positive components
    pub fn new(z: f64, y: f64, x: f64) -> Result<Self> {
        for (axis, v) in [("z", z), ("y", y), ("x", x)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::invalid(format!(
                    "voxel size along {} must be positive, got {}",
                    axis, v
                )));
            }
        }
        Ok(Self { z, y, x })
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.z, self.y, self.x]
    }

    /// Largest of the three dimensions
    pub fn max_dimension(&self) -> f64 {
        self.z.max(self.y).max(self.x)
    }

    /// Component-wise comparison with an absolute tolerance in nm
    pub fn approx_eq(&self, other: &VoxelSize, tolerance: f64) -> bool {
        (self.z - other.z).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.x - other.x).abs() <= tolerance
    }
}

impl TryFrom<[f64; 3]> for VoxelSize {
    type Error = Error;

    fn try_from(v: [f64; 3]) -> Result<Self> {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<VoxelSize> for [f64; 3] {
    fn from(v: VoxelSize) -> Self {
        v.as_array()
    }
}

impl fmt::Display for VoxelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.z, self.y, self.x)
    }
}

/// A position in voxel index units (sub-voxel precision allowed)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct PixelPoint {
    pub z: f64,
    pub y: f64,
    pub x: f64,
}

impl PixelPoint {
    pub fn new(z: f64, y: f64, x: f64) -> Self {
        Self { z, y, x }
    }

    /// Convert to nanometres
    pub fn to_physical(&self, voxel_size: &VoxelSize) -> PhysicalPoint {
        PhysicalPoint {
            z: self.z * voxel_size.z,
            y: self.y * voxel_size.y,
            x: self.x * voxel_size.x,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.z.is_finite() && self.y.is_finite() && self.x.is_finite()
    }

    /// Nearest integer voxel
    pub fn round(&self) -> VoxelIndex {
        VoxelIndex {
            z: self.z.round() as i64,
            y: self.y.round() as i64,
            x: self.x.round() as i64,
        }
    }
}

impl From<[f64; 3]> for PixelPoint {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<PixelPoint> for [f64; 3] {
    fn from(p: PixelPoint) -> Self {
        [p.z, p.y, p.x]
    }
}

/// A position in nanometres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct PhysicalPoint {
    pub z: f64,
    pub y: f64,
    pub x: f64,
}

impl PhysicalPoint {
    pub fn new(z: f64, y: f64, x: f64) -> Self {
        Self { z, y, x }
    }

    /// Convert back to voxel index units
    pub fn to_pixels(&self, voxel_size: &VoxelSize) -> PixelPoint {
        PixelPoint {
            z: self.z / voxel_size.z,
            y: self.y / voxel_size.y,
            x: self.x / voxel_size.x,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.z.is_finite() && self.y.is_finite() && self.x.is_finite()
    }

    pub fn distance_squared(&self, other: &PhysicalPoint) -> f64 {
        let dz = self.z - other.z;
        let dy = self.y - other.y;
        let dx = self.x - other.x;
        dz * dz + dy * dy + dx * dx
    }

    pub fn distance(&self, other: &PhysicalPoint) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl From<[f64; 3]> for PhysicalPoint {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<PhysicalPoint> for [f64; 3] {
    fn from(p: PhysicalPoint) -> Self {
        [p.z, p.y, p.x]
    }
}

/// Integer voxel position, as stored for detected spots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 3]", into = "[i64; 3]")]
pub struct VoxelIndex {
    pub z: i64,
    pub y: i64,
    pub x: i64,
}

impl VoxelIndex {
    pub fn new(z: i64, y: i64, x: i64) -> Self {
        Self { z, y, x }
    }

    pub fn to_pixel_point(&self) -> PixelPoint {
        PixelPoint::new(self.z as f64, self.y as f64, self.x as f64)
    }
}

impl From<[i64; 3]> for VoxelIndex {
    fn from(v: [i64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<VoxelIndex> for [i64; 3] {
    fn from(v: VoxelIndex) -> Self {
        [v.z, v.y, v.x]
    }
}
