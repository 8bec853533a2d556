//! Bulk chromatic correction of detected spot coordinates
//!
//! Detections group spots by acquisition (wavelength + voxel size); spots
//! carry integer voxel coordinates. Every channel other than the reference is
//! mapped into the reference frame with its calibration's inverse transform.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::correction::{warp_points, VOXEL_SIZE_TOLERANCE_NM};
use crate::error::{Error, Result};
use crate::store::CalibrationStore;
use crate::units::{VoxelIndex, VoxelSize};

/// One detection run: the wavelength it was acquired at and its sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub detection_id: u64,
    pub wavelength: u32,
    pub voxel_size: VoxelSize,
}

/// A detected spot belonging to one detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub detection_id: u64,
    pub coordinates: VoxelIndex,
}

impl Spot {
    pub fn z(&self) -> i64 {
        self.coordinates.z
    }

    pub fn y(&self) -> i64 {
        self.coordinates.y
    }

    pub fn x(&self) -> i64 {
        self.coordinates.x
    }
}

/// Detections and spots as exchanged with the detection pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotTable {
    pub detections: Vec<Detection>,
    pub spots: Vec<Spot>,
}

/// What a correction run touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionSummary {
    /// Spots rewritten, per corrected wavelength
    pub corrected: BTreeMap<u32, usize>,
    /// Spots left in place because they belong to the reference wavelength
    pub untouched: usize,
}

impl CorrectionSummary {
    pub fn total_corrected(&self) -> usize {
        self.corrected.values().sum()
    }
}

/// Correct spot coordinates in place with the default voxel size tolerance.
pub fn correct_spots(
    detections: &[Detection],
    spots: &mut [Spot],
    reference_wavelength: u32,
    store: &CalibrationStore,
) -> Result<CorrectionSummary> {
    correct_spots_with_tolerance(
        detections,
        spots,
        reference_wavelength,
        store,
        VOXEL_SIZE_TOLERANCE_NM,
    )
}

/// Correct spot coordinates in place.
///
/// All calibrations are checked before anything is computed, and coordinates
/// are only written once every channel has been corrected successfully.
/// Spots whose detection is at the reference wavelength are left untouched.
pub fn correct_spots_with_tolerance(
    detections: &[Detection],
    spots: &mut [Spot],
    reference_wavelength: u32,
    store: &CalibrationStore,
    voxel_tolerance_nm: f64,
) -> Result<CorrectionSummary> {
    let mut wavelength_of: HashMap<u64, u32> = HashMap::with_capacity(detections.len());
    for det in detections {
        if let Some(previous) = wavelength_of.insert(det.detection_id, det.wavelength) {
            return Err(Error::invalid(format!(
                "detection id {} appears more than once ({}nm and {}nm)",
                det.detection_id, previous, det.wavelength
            )));
        }
    }

    // Detections grouped by wavelength, in order of first appearance
    let mut channels: Vec<(u32, Vec<&Detection>)> = Vec::new();
    for det in detections {
        match channels.iter_mut().find(|(wv, _)| *wv == det.wavelength) {
            Some((_, dets)) => dets.push(det),
            None => channels.push((det.wavelength, vec![det])),
        }
    }

    for (wavelength, _) in &channels {
        if *wavelength != reference_wavelength
            && !store.exists(reference_wavelength, *wavelength)?
        {
            return Err(Error::NotFound {
                reference: reference_wavelength,
                corrected: *wavelength,
            });
        }
    }

    let mut summary = CorrectionSummary::default();
    let mut updates: Vec<(usize, VoxelIndex)> = Vec::new();

    for (wavelength, dets) in &channels {
        if *wavelength == reference_wavelength {
            continue;
        }

        let voxel_size = channel_voxel_size(*wavelength, dets)?;
        let calibration = store.load(reference_wavelength, *wavelength)?;
        calibration.check_voxel_size(&voxel_size, voxel_tolerance_nm)?;

        let indices: Vec<usize> = spots
            .iter()
            .enumerate()
            .filter(|(_, s)| wavelength_of.get(&s.detection_id) == Some(wavelength))
            .map(|(i, _)| i)
            .collect();
        let coordinates: Vec<VoxelIndex> = indices.iter().map(|&i| spots[i].coordinates).collect();

        let corrected = warp_points(&coordinates, &calibration.inverse, &voxel_size);
        debug!(
            "Corrected {} spots at {}nm against {}nm",
            corrected.len(),
            wavelength,
            reference_wavelength
        );

        summary.corrected.insert(*wavelength, corrected.len());
        updates.extend(indices.into_iter().zip(corrected));
    }

    for (i, coordinates) in updates {
        spots[i].coordinates = coordinates;
    }

    summary.untouched = spots
        .iter()
        .filter(|s| wavelength_of.get(&s.detection_id) == Some(&reference_wavelength))
        .count();

    info!(
        "Chromatic correction: {} spots corrected across {} channel(s), {} reference spots untouched",
        summary.total_corrected(),
        summary.corrected.len(),
        summary.untouched
    );

    Ok(summary)
}

/// All detections of a channel must share one voxel size
fn channel_voxel_size(wavelength: u32, detections: &[&Detection]) -> Result<VoxelSize> {
    let first = detections[0].voxel_size;
    if let Some(other) = detections.iter().find(|d| d.voxel_size != first) {
        return Err(Error::invalid(format!(
            "detections at {}nm have different voxel sizes: {} and {}",
            wavelength, first, other.voxel_size
        )));
    }
    Ok(first)
}
