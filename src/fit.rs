//! Least-squares fitting of polynomial transforms from bead pairs
//!
//! Each output axis is an independent ordinary least-squares regression over
//! one shared polynomial expansion of the source coordinates. The inverse
//! transform is a second regression with source and destination swapped.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::matching::Correspondences;
use crate::polynomial::{feature_count, LinearModel, PolynomialFeatures};
use crate::transform::{AxisModels, Dimensionality, PolynomialTransform, TransformPair};
use crate::units::PhysicalPoint;

/// Residual statistics of a forward/inverse fit, all in nm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Number of bead pairs used
    pub matched: usize,
    /// Polynomial feature count per axis
    pub features: usize,
    /// RMS distance between paired beads before correction
    pub rmse_uncorrected_nm: f64,
    /// RMS residual of forward(reference) against shifted
    pub rmse_forward_nm: f64,
    /// RMS residual of inverse(shifted) against reference
    pub rmse_inverse_nm: f64,
}

/// Iteration cap for the SVD
const SVD_MAX_ITERATIONS: usize = 1000;

/// Minimum number of correspondences to fit a polynomial of `degree`
pub fn min_correspondences(degree: u32, dimensionality: Dimensionality) -> usize {
    feature_count(degree, dimensionality.inputs())
}

/// Fit a polynomial transform mapping `src` onto `dst` (both in nm).
pub fn fit_transform(
    src: &[PhysicalPoint],
    dst: &[PhysicalPoint],
    degree: u32,
    dimensionality: Dimensionality,
) -> Result<PolynomialTransform> {
    if src.len() != dst.len() {
        return Err(Error::invalid(format!(
            "source and destination point counts differ ({} vs {})",
            src.len(),
            dst.len()
        )));
    }

    if let Some(p) = src.iter().chain(dst).find(|p| !p.is_finite()) {
        return Err(Error::invalid(format!(
            "non-finite coordinate in fit input: {:?}",
            p
        )));
    }

    let features = PolynomialFeatures::new(degree, dimensionality.inputs())?;
    let n_features = features.len();
    let n = src.len();

    if n < n_features {
        return Err(Error::InsufficientCorrespondences {
            found: n,
            required: n_features,
        });
    }
    if n < 2 * n_features {
        warn!(
            "Only {} correspondences for {} polynomial features (degree {}), fit may be unstable",
            n, n_features, degree
        );
    }

    // Design matrix, one row of monomials per source point
    let mut design = DMatrix::<f64>::zeros(n, n_features);
    let mut row = Vec::with_capacity(n_features);
    for (i, p) in src.iter().enumerate() {
        match dimensionality {
            Dimensionality::Planar => features.transform_into(&[p.y, p.x], &mut row),
            Dimensionality::Volumetric => features.transform_into(&[p.z, p.y, p.x], &mut row),
        }
        for (j, v) in row.iter().enumerate() {
            design[(i, j)] = *v;
        }
    }

    if design.iter().any(|v| !v.is_finite()) {
        return Err(Error::invalid(format!(
            "polynomial features of degree {} overflow for the given coordinates",
            degree
        )));
    }

    // Nanometre monomials span many orders of magnitude; scale columns to unit max
    let scales: Vec<f64> = (0..n_features)
        .map(|j| {
            let m = design.column(j).amax();
            if m > 0.0 {
                m
            } else {
                1.0
            }
        })
        .collect();
    for (j, s) in scales.iter().enumerate() {
        design.column_mut(j).scale_mut(1.0 / s);
    }

    let svd = design
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or(Error::DegenerateFit {
            rank: 0,
            features: n_features,
        })?;
    let sigma_max = svd.singular_values.max();
    let tolerance = sigma_max * n.max(n_features) as f64 * f64::EPSILON;
    let rank = svd.rank(tolerance);
    if rank < n_features {
        return Err(Error::DegenerateFit {
            rank,
            features: n_features,
        });
    }

    let solve_axis = |target: DVector<f64>| -> Result<LinearModel> {
        let solution = svd.solve(&target, tolerance).map_err(|_| Error::DegenerateFit {
            rank,
            features: n_features,
        })?;
        let coefficients = solution
            .iter()
            .zip(&scales)
            .map(|(c, s)| c / s)
            .collect();
        Ok(LinearModel::new(coefficients))
    };

    let column = |f: fn(&PhysicalPoint) -> f64| DVector::from_iterator(n, dst.iter().map(f));

    let models = match dimensionality {
        Dimensionality::Planar => AxisModels::Planar {
            y: solve_axis(column(|p| p.y))?,
            x: solve_axis(column(|p| p.x))?,
        },
        Dimensionality::Volumetric => AxisModels::Volumetric {
            z: solve_axis(column(|p| p.z))?,
            y: solve_axis(column(|p| p.y))?,
            x: solve_axis(column(|p| p.x))?,
        },
    };

    debug!(
        "Fitted degree {} {:?} transform from {} points ({} features)",
        degree, dimensionality, n, n_features
    );

    PolynomialTransform::new(features, models)
}

/// Fit forward (reference → shifted) and inverse (shifted → reference)
/// transforms independently from the same bead pairs.
pub fn fit_transform_pair(
    pairs: &Correspondences,
    degree: u32,
    dimensionality: Dimensionality,
) -> Result<(TransformPair, FitReport)> {
    let forward = fit_transform(&pairs.reference, &pairs.shifted, degree, dimensionality)?;
    let inverse = fit_transform(&pairs.shifted, &pairs.reference, degree, dimensionality)?;

    let report = FitReport {
        matched: pairs.len(),
        features: forward.features().len(),
        rmse_uncorrected_nm: pairs.rms_displacement(),
        rmse_forward_nm: rms_residual(&forward, &pairs.reference, &pairs.shifted),
        rmse_inverse_nm: rms_residual(&inverse, &pairs.shifted, &pairs.reference),
    };

    Ok((TransformPair { forward, inverse }, report))
}

fn rms_residual(
    transform: &PolynomialTransform,
    src: &[PhysicalPoint],
    dst: &[PhysicalPoint],
) -> f64 {
    if src.is_empty() {
        return 0.0;
    }
    let sum: f64 = transform
        .apply_all(src)
        .iter()
        .zip(dst)
        .map(|(p, q)| p.distance_squared(q))
        .sum();
    (sum / src.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Irregular bead lattice in nm spanning ~20 µm x 20 µm x 4 µm
    fn beads() -> Vec<PhysicalPoint> {
        let mut points = Vec::new();
        for z in 0..4 {
            for y in 0..6 {
                for x in 0..6 {
                    let jitter = ((x * 7 + y * 13 + z * 29) % 11) as f64 * 37.0;
                    points.push(PhysicalPoint::new(
                        z as f64 * 1000.0 + jitter * 0.3,
                        y as f64 * 3500.0 + jitter,
                        x as f64 * 3500.0 - jitter * 0.5,
                    ));
                }
            }
        }
        points
    }

    /// Smooth quadratic warp resembling lateral chromatic magnification
    fn warp(p: &PhysicalPoint) -> PhysicalPoint {
        PhysicalPoint::new(
            p.z + 150.0 + 0.002 * p.y,
            p.y * 1.001 - 40.0 + 1.0e-7 * p.x * p.y,
            p.x * 0.999 + 25.0 + 2.0e-7 * p.y * p.y,
        )
    }

    #[test]
    fn test_recovers_translation() {
        let src = beads();
        let dst: Vec<_> = src
            .iter()
            .map(|p| PhysicalPoint::new(p.z + 200.0, p.y - 120.0, p.x + 75.0))
            .collect();

        let t = fit_transform(&src, &dst, 1, Dimensionality::Volumetric).unwrap();
        for (p, q) in src.iter().zip(&dst) {
            assert!(t.apply(p).distance(q) < 1e-6);
        }
    }

    #[test]
    fn test_quadratic_fit_is_exact() {
        let src = beads();
        let dst: Vec<_> = src.iter().map(warp).collect();

        let t = fit_transform(&src, &dst, 2, Dimensionality::Volumetric).unwrap();
        let query = PhysicalPoint::new(1500.0, 9000.0, 11000.0);
        assert!(t.apply(&query).distance(&warp(&query)) < 1e-4);
    }

    #[test]
    fn test_round_trip_near_identity() {
        let src = beads();
        let pairs = Correspondences {
            shifted: src.iter().map(warp).collect(),
            reference: src,
        };

        let (pair, report) = fit_transform_pair(&pairs, 2, Dimensionality::Volumetric).unwrap();
        assert_eq!(report.matched, pairs.len());
        assert!(report.rmse_forward_nm < 1e-3);
        // The inverse of a quadratic is not quadratic, only approximately so
        assert!(report.rmse_inverse_nm < 5.0);
        assert!(report.rmse_uncorrected_nm > 100.0);

        let query = PhysicalPoint::new(2000.0, 8000.0, 6000.0);
        let back = pair.inverse.apply(&pair.forward.apply(&query));
        assert!(back.distance(&query) < 5.0, "round trip error {}", back.distance(&query));
    }

    #[test]
    fn test_planar_fit() {
        let src: Vec<_> = beads().into_iter().filter(|p| p.z < 500.0).collect();
        let src: Vec<_> = src
            .iter()
            .map(|p| PhysicalPoint::new(0.0, p.y, p.x))
            .collect();
        let dst: Vec<_> = src
            .iter()
            .map(|p| PhysicalPoint::new(0.0, p.y + 50.0, p.x - 30.0))
            .collect();

        let t = fit_transform(&src, &dst, 2, Dimensionality::Planar).unwrap();
        assert!(!t.is_volumetric());
        let out = t.apply(&PhysicalPoint::new(700.0, 1000.0, 2000.0));
        assert_eq!(out.z, 700.0);
        assert!((out.y - 1050.0).abs() < 1e-6);
        assert!((out.x - 1970.0).abs() < 1e-6);
    }

    #[test]
    fn test_insufficient_correspondences() {
        let src: Vec<_> = beads().into_iter().take(9).collect();
        let err = fit_transform(&src, &src, 2, Dimensionality::Volumetric).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCorrespondences {
                found: 9,
                required: 10
            }
        ));

        let empty = Correspondences::default();
        assert!(matches!(
            fit_transform_pair(&empty, 1, Dimensionality::Volumetric),
            Err(Error::InsufficientCorrespondences { found: 0, .. })
        ));
    }

    #[test]
    fn test_coplanar_beads_are_degenerate_in_3d() {
        // Enough points, but all at one z: z monomials are collinear with the bias
        let src: Vec<_> = beads()
            .iter()
            .map(|p| PhysicalPoint::new(500.0, p.y, p.x))
            .collect();
        let err = fit_transform(&src, &src, 1, Dimensionality::Volumetric).unwrap_err();
        assert!(matches!(err, Error::DegenerateFit { features: 4, .. }));
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let mut src = beads();
        src[3] = PhysicalPoint::new(f64::NAN, 100.0, 100.0);
        let dst = beads();
        assert!(matches!(
            fit_transform(&src, &dst, 2, Dimensionality::Volumetric),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            fit_transform(&dst, &src, 2, Dimensionality::Volumetric),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_overflowing_features_rejected() {
        // Finite input whose squared monomials overflow to inf
        let mut src = beads();
        src[0] = PhysicalPoint::new(1e200, 1e200, 1e200);
        assert!(matches!(
            fit_transform(&src, &src, 2, Dimensionality::Volumetric),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let src = beads();
        assert!(matches!(
            fit_transform(&src, &src[1..], 1, Dimensionality::Volumetric),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_min_correspondences() {
        assert_eq!(min_correspondences(2, Dimensionality::Volumetric), 10);
        assert_eq!(min_correspondences(2, Dimensionality::Planar), 6);
    }
}
