//! Polynomial spatial transform between two wavelength channels
//!
//! A transform maps physical (nm) coordinates in one channel onto physical
//! coordinates in another. Each output axis has its own regression over a
//! shared polynomial expansion of the input coordinates.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::polynomial::{LinearModel, PolynomialFeatures};
use crate::units::PhysicalPoint;

/// Whether the transform also models the z axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dimensionality {
    /// 2D: features over (y, x), z passed through unchanged
    Planar,
    /// 3D: features over (z, y, x), z regressed like y and x
    #[default]
    Volumetric,
}

impl Dimensionality {
    /// Number of polynomial inputs
    pub fn inputs(&self) -> usize {
        match self {
            Dimensionality::Planar => 2,
            Dimensionality::Volumetric => 3,
        }
    }
}

/// One regression per modelled output axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AxisModels {
    Planar {
        y: LinearModel,
        x: LinearModel,
    },
    Volumetric {
        z: LinearModel,
        y: LinearModel,
        x: LinearModel,
    },
}

impl AxisModels {
    pub fn dimensionality(&self) -> Dimensionality {
        match self {
            AxisModels::Planar { .. } => Dimensionality::Planar,
            AxisModels::Volumetric { .. } => Dimensionality::Volumetric,
        }
    }

    fn coefficient_lengths(&self) -> Vec<usize> {
        match self {
            AxisModels::Planar { y, x } => vec![y.coefficients.len(), x.coefficients.len()],
            AxisModels::Volumetric { z, y, x } => vec![
                z.coefficients.len(),
                y.coefficients.len(),
                x.coefficients.len(),
            ],
        }
    }
}

/// Fitted polynomial warp in physical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTransform")]
pub struct PolynomialTransform {
    features: PolynomialFeatures,
    models: AxisModels,
}

#[derive(Deserialize)]
struct RawTransform {
    features: PolynomialFeatures,
    models: AxisModels,
}

impl TryFrom<RawTransform> for PolynomialTransform {
    type Error = Error;

    fn try_from(raw: RawTransform) -> Result<Self> {
        Self::new(raw.features, raw.models)
    }
}

impl PolynomialTransform {
    /// Assemble a transform, checking the models agree with the feature expansion
    pub fn new(features: PolynomialFeatures, models: AxisModels) -> Result<Self> {
        let inputs = models.dimensionality().inputs();
        if features.inputs() != inputs {
            return Err(Error::invalid(format!(
                "{:?} models need {} polynomial inputs, features have {}",
                models.dimensionality(),
                inputs,
                features.inputs()
            )));
        }
        if models
            .coefficient_lengths()
            .iter()
            .any(|&n| n != features.len())
        {
            return Err(Error::invalid(format!(
                "axis models must have {} coefficients",
                features.len()
            )));
        }
        Ok(Self { features, models })
    }

    pub fn features(&self) -> &PolynomialFeatures {
        &self.features
    }

    pub fn models(&self) -> &AxisModels {
        &self.models
    }

    pub fn degree(&self) -> u32 {
        self.features.degree()
    }

    pub fn dimensionality(&self) -> Dimensionality {
        self.models.dimensionality()
    }

    pub fn is_volumetric(&self) -> bool {
        self.dimensionality() == Dimensionality::Volumetric
    }

    /// Map a point, reusing `scratch` for the feature vector
    #[inline]
    pub fn apply_with(&self, p: &PhysicalPoint, scratch: &mut Vec<f64>) -> PhysicalPoint {
        match &self.models {
            AxisModels::Planar { y, x } => {
                self.features.transform_into(&[p.y, p.x], scratch);
                PhysicalPoint::new(p.z, y.predict(scratch), x.predict(scratch))
            }
            AxisModels::Volumetric { z, y, x } => {
                self.features.transform_into(&[p.z, p.y, p.x], scratch);
                PhysicalPoint::new(z.predict(scratch), y.predict(scratch), x.predict(scratch))
            }
        }
    }

    /// Map a single point
    pub fn apply(&self, p: &PhysicalPoint) -> PhysicalPoint {
        let mut scratch = Vec::with_capacity(self.features.len());
        self.apply_with(p, &mut scratch)
    }

    /// Map a batch of points
    pub fn apply_all(&self, points: &[PhysicalPoint]) -> Vec<PhysicalPoint> {
        let mut scratch = Vec::with_capacity(self.features.len());
        points.iter().map(|p| self.apply_with(p, &mut scratch)).collect()
    }
}

/// Forward (reference → corrected) and inverse (corrected → reference)
/// transforms, fitted independently from the same bead pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformPair {
    pub forward: PolynomialTransform,
    pub inverse: PolynomialTransform,
}
