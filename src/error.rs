//! Error taxonomy for calibration and correction
//!
//! None of these are transient: they describe logic errors against persisted
//! calibrations or input data and are never retried.

use std::path::PathBuf;

use crate::units::VoxelSize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No calibration is indexed for the wavelength pair
    #[error(
        "No calibration found for reference wavelength {reference}nm and corrected wavelength {corrected}nm. \
         Run `chromacal calibrate --reference {reference} --corrected {corrected}` to create one."
    )]
    NotFound { reference: u32, corrected: u32 },

    /// Data was sampled at a different voxel size than the calibration
    #[error(
        "Different voxel size for spot detection and calibration: spots {data} ; calibration {calibration} \
         for reference wavelength {reference}nm and corrected wavelength {corrected}nm"
    )]
    VoxelSizeMismatch {
        reference: u32,
        corrected: u32,
        data: VoxelSize,
        calibration: VoxelSize,
    },

    #[error("Insufficient correspondences: found {found}, need at least {required}")]
    InsufficientCorrespondences { found: usize, required: usize },

    /// Design matrix is rank deficient (e.g. beads lying on a plane)
    #[error("Degenerate fit: design matrix rank {rank} < {features} polynomial features")]
    DegenerateFit { rank: usize, features: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize {path:?}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}
