//! Calibration sessions and persisted calibration records
//!
//! A session turns two bead detections (reference and shifted channel) into a
//! pair of fitted transforms. It is a plain value: nothing is kept between
//! fits, and saving takes the session explicitly.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::fit::{fit_transform_pair, min_correspondences, FitReport};
use crate::matching::{default_max_distance, match_beads, DEFAULT_MAX_DISTANCE_FACTOR};
use crate::transform::{Dimensionality, PolynomialTransform, TransformPair};
use crate::units::{PixelPoint, VoxelSize};

/// Timestamp layout used in records and calibration file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Parameters of a calibration fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Polynomial degree of the warp
    pub degree: u32,
    /// Bead match cutoff as a multiple of the largest voxel dimension
    pub max_distance_factor: f64,
    /// Whether z is modelled or passed through
    #[serde(default)]
    pub dimensionality: Dimensionality,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            degree: 2,
            max_distance_factor: DEFAULT_MAX_DISTANCE_FACTOR,
            dimensionality: Dimensionality::Volumetric,
        }
    }
}

/// Bead detections for one channel, as produced by the external detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadSet {
    pub voxel_size: VoxelSize,
    /// Bead centres in voxel units (zyx)
    pub coordinates: Vec<PixelPoint>,
}

/// Result of one calibration fit, ready to be saved
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    pub transforms: TransformPair,
    pub voxel_size: VoxelSize,
    pub degree: u32,
    pub timestamp: String,
    pub report: FitReport,
}

impl CalibrationSession {
    /// Match beads between the two channels and fit forward and inverse warps.
    ///
    /// Bead coordinates are given in voxels and converted to nm before
    /// matching and fitting.
    pub fn fit(
        reference_beads: &[PixelPoint],
        shifted_beads: &[PixelPoint],
        voxel_size: VoxelSize,
        settings: &CalibrationSettings,
    ) -> Result<Self> {
        if !settings.max_distance_factor.is_finite() || settings.max_distance_factor <= 0.0 {
            return Err(Error::invalid(format!(
                "max_distance_factor must be positive, got {}",
                settings.max_distance_factor
            )));
        }

        if let Some(p) = reference_beads
            .iter()
            .chain(shifted_beads)
            .find(|p| !p.is_finite())
        {
            return Err(Error::invalid(format!(
                "non-finite bead coordinate: {:?}",
                p
            )));
        }

        let reference: Vec<_> = reference_beads
            .iter()
            .map(|p| p.to_physical(&voxel_size))
            .collect();
        let shifted: Vec<_> = shifted_beads
            .iter()
            .map(|p| p.to_physical(&voxel_size))
            .collect();

        let max_distance = default_max_distance(&voxel_size, settings.max_distance_factor);
        let pairs = match_beads(&reference, &shifted, max_distance)?;

        info!(
            "Matched {} bead pairs ({} reference, {} shifted, cutoff {:.0} nm)",
            pairs.len(),
            reference.len(),
            shifted.len(),
            max_distance
        );

        if pairs.is_empty() {
            return Err(Error::InsufficientCorrespondences {
                found: 0,
                required: min_correspondences(settings.degree.max(1), settings.dimensionality),
            });
        }

        let (transforms, report) =
            fit_transform_pair(&pairs, settings.degree, settings.dimensionality)?;

        info!(
            "Fit degree {}: RMS {:.1} nm uncorrected, {:.1} nm forward, {:.1} nm inverse",
            settings.degree,
            report.rmse_uncorrected_nm,
            report.rmse_forward_nm,
            report.rmse_inverse_nm
        );

        Ok(Self {
            transforms,
            voxel_size,
            degree: settings.degree,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            report,
        })
    }

    /// Fit from two bead sets, which must share a voxel size
    pub fn fit_bead_sets(
        reference: &BeadSet,
        shifted: &BeadSet,
        settings: &CalibrationSettings,
    ) -> Result<Self> {
        if reference.voxel_size != shifted.voxel_size {
            return Err(Error::invalid(format!(
                "bead sets have different voxel sizes: {} vs {}",
                reference.voxel_size, shifted.voxel_size
            )));
        }
        Self::fit(
            &reference.coordinates,
            &shifted.coordinates,
            reference.voxel_size,
            settings,
        )
    }

    /// Attach wavelengths to produce a storable record
    pub fn into_record(
        self,
        reference_wavelength: u32,
        corrected_wavelength: u32,
    ) -> CalibrationRecord {
        CalibrationRecord {
            reference_wavelength,
            corrected_wavelength,
            forward: self.transforms.forward,
            inverse: self.transforms.inverse,
            voxel_size: self.voxel_size,
            degree: self.degree,
            timestamp: self.timestamp,
            report: Some(self.report),
        }
    }
}

/// A saved calibration for one (reference, corrected) wavelength pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub reference_wavelength: u32,
    pub corrected_wavelength: u32,
    /// Reference channel nm → corrected channel nm
    pub forward: PolynomialTransform,
    /// Corrected channel nm → reference channel nm
    pub inverse: PolynomialTransform,
    pub voxel_size: VoxelSize,
    pub degree: u32,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<FitReport>,
}

impl CalibrationRecord {
    /// The same fit seen from the other channel: wavelengths and the
    /// forward/inverse roles swap
    pub fn reversed(&self) -> Self {
        Self {
            reference_wavelength: self.corrected_wavelength,
            corrected_wavelength: self.reference_wavelength,
            forward: self.inverse.clone(),
            inverse: self.forward.clone(),
            voxel_size: self.voxel_size,
            degree: self.degree,
            timestamp: self.timestamp.clone(),
            report: self.report.clone().map(|r| FitReport {
                rmse_forward_nm: r.rmse_inverse_nm,
                rmse_inverse_nm: r.rmse_forward_nm,
                ..r
            }),
        }
    }
}
