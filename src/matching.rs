//! Nearest-neighbour bead correspondence between two channels

use tracing::debug;

use crate::error::{Error, Result};
use crate::kdtree::KdTree;
use crate::units::{PhysicalPoint, VoxelSize};

/// Default multiple of the largest voxel dimension used as match cutoff
pub const DEFAULT_MAX_DISTANCE_FACTOR: f64 = 4.0;

/// Index-aligned bead pairs: `reference[i]` and `shifted[i]` are the same bead
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    pub reference: Vec<PhysicalPoint>,
    pub shifted: Vec<PhysicalPoint>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// RMS displacement between paired beads in nm
    pub fn rms_displacement(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .reference
            .iter()
            .zip(&self.shifted)
            .map(|(a, b)| a.distance_squared(b))
            .sum();
        (sum / self.len() as f64).sqrt()
    }
}

/// Match cutoff scaled to the sampling of the data
pub fn default_max_distance(voxel_size: &VoxelSize, factor: f64) -> f64 {
    voxel_size.max_dimension() * factor
}

/// Pair every reference bead with its nearest shifted bead.
///
/// Pairs are kept only when their distance is strictly below `max_distance`.
/// Output order follows `reference`. A shifted bead may be the nearest
/// neighbour of several reference beads.
pub fn match_beads(
    reference: &[PhysicalPoint],
    shifted: &[PhysicalPoint],
    max_distance: f64,
) -> Result<Correspondences> {
    if !max_distance.is_finite() || max_distance < 0.0 {
        return Err(Error::invalid(format!(
            "match distance must be a non-negative number, got {}",
            max_distance
        )));
    }

    if let Some(p) = reference.iter().chain(shifted).find(|p| !p.is_finite()) {
        return Err(Error::invalid(format!(
            "non-finite bead coordinate: {:?}",
            p
        )));
    }

    let mut matches = Correspondences::default();
    let tree = match KdTree::build(shifted) {
        Some(tree) => tree,
        None => return Ok(matches),
    };

    let max_sq = max_distance * max_distance;
    for a in reference {
        let (idx, dist_sq) = tree.nearest(a);
        if dist_sq < max_sq {
            matches.reference.push(*a);
            matches.shifted.push(shifted[idx]);
        }
    }

    debug!(
        "Matched {}/{} reference beads against {} shifted beads (cutoff {:.1} nm)",
        matches.len(),
        reference.len(),
        shifted.len(),
        max_distance
    );

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(spacing: f64) -> Vec<PhysicalPoint> {
        let mut points = Vec::new();
        for z in 0..3 {
            for y in 0..4 {
                for x in 0..4 {
                    points.push(PhysicalPoint::new(
                        z as f64 * spacing,
                        y as f64 * spacing,
                        x as f64 * spacing,
                    ));
                }
            }
        }
        points
    }

    #[test]
    fn test_exact_pairing() {
        let a = grid(5000.0);
        // Reverse b so pairing has to be found, not assumed
        let mut b: Vec<_> = a
            .iter()
            .map(|p| PhysicalPoint::new(p.z + 30.0, p.y - 40.0, p.x))
            .collect();
        b.reverse();

        let m = match_beads(&a, &b, 100.0).unwrap();
        assert_eq!(m.len(), a.len());
        for (ra, sb) in m.reference.iter().zip(&m.shifted) {
            assert!((ra.distance(sb) - 50.0).abs() < 1e-9);
        }
        assert_eq!(m.reference, a);
    }

    #[test]
    fn test_threshold_is_strict() {
        let a = vec![PhysicalPoint::new(0.0, 0.0, 0.0)];
        let b = vec![PhysicalPoint::new(0.0, 0.0, 100.0)];
        assert!(match_beads(&a, &b, 100.0).unwrap().is_empty());
        assert_eq!(match_beads(&a, &b, 100.5).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_inputs() {
        let a = grid(1000.0);
        let m = match_beads(&a, &[], 500.0).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.shifted.len(), 0);

        let far = vec![PhysicalPoint::new(1e6, 1e6, 1e6)];
        assert!(match_beads(&a, &far, 500.0).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_monotonic() {
        let a = grid(800.0);
        let b: Vec<_> = a
            .iter()
            .enumerate()
            .map(|(i, p)| PhysicalPoint::new(p.z, p.y + (i % 7) as f64 * 60.0, p.x))
            .collect();

        let mut previous = 0;
        for cutoff in [0.0, 50.0, 100.0, 200.0, 300.0, 500.0, 1000.0] {
            let n = match_beads(&a, &b, cutoff).unwrap().len();
            assert!(n >= previous, "cutoff {} matched {} < {}", cutoff, n, previous);
            previous = n;
        }
        assert_eq!(previous, a.len());
    }

    #[test]
    fn test_negative_distance_rejected() {
        let a = grid(1000.0);
        assert!(matches!(
            match_beads(&a, &a, -1.0),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_non_finite_bead_rejected() {
        let a = grid(1000.0);
        let mut b = a.clone();
        b[2] = PhysicalPoint::new(0.0, f64::NAN, 0.0);
        assert!(matches!(
            match_beads(&a, &b, 500.0),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_shared_nearest_neighbour() {
        // Both reference beads pick the single shifted bead
        let a = vec![
            PhysicalPoint::new(0.0, 0.0, -100.0),
            PhysicalPoint::new(0.0, 0.0, 100.0),
        ];
        let b = vec![PhysicalPoint::new(0.0, 0.0, 0.0)];
        let m = match_beads(&a, &b, 200.0).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.shifted, vec![b[0], b[0]]);
    }

    #[test]
    fn test_default_max_distance() {
        let voxel = VoxelSize::new(300.0, 100.0, 100.0).unwrap();
        assert_eq!(default_max_distance(&voxel, DEFAULT_MAX_DISTANCE_FACTOR), 1200.0);
    }
}
