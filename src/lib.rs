//! chromacal - chromatic aberration calibration and correction
//!
//! Fluorescent beads imaged in two wavelength channels give point
//! correspondences; a polynomial warp fitted to them (in nm, per axis) is
//! stored per wavelength pair and later applied to images or spot coordinates.

pub mod calibration;
pub mod config;
pub mod correction;
pub mod error;
pub mod fit;
pub mod kdtree;
pub mod matching;
pub mod polynomial;
pub mod spots;
pub mod store;
pub mod transform;
pub mod units;

pub use calibration::{BeadSet, CalibrationRecord, CalibrationSession, CalibrationSettings};
pub use correction::{transform_points, warp_image, warp_points, Volume};
pub use error::{Error, Result};
pub use fit::{fit_transform, fit_transform_pair, FitReport};
pub use matching::{match_beads, Correspondences};
pub use spots::{correct_spots, Detection, Spot, SpotTable};
pub use store::{CalibrationKey, CalibrationStore};
pub use transform::{AxisModels, Dimensionality, PolynomialTransform, TransformPair};
pub use units::{PhysicalPoint, PixelPoint, VoxelIndex, VoxelSize};
