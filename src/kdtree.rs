//! 3D k-d tree for nearest-neighbour bead lookups

use crate::units::PhysicalPoint;

/// Balanced k-d tree over a fixed set of points, built once and queried many times
#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<[f64; 3]>,
}

#[derive(Debug, Clone)]
struct KdNode {
    /// Index into the points array
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    /// Split axis (0 = z, 1 = y, 2 = x)
    split_dim: usize,
}

impl KdTree {
    /// Build from a point set; `None` if it is empty.
    ///
    /// Coordinates are expected to be finite.
    pub fn build(points: &[PhysicalPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let points: Vec<[f64; 3]> = points.iter().map(|p| [p.z, p.y, p.x]).collect();
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        Self::build_recursive(&points, &mut indices, 0, &mut nodes);

        Some(Self { nodes, points })
    }

    fn build_recursive(
        points: &[[f64; 3]],
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }

        let split_dim = depth % 3;
        indices.sort_by(|&a, &b| points[a][split_dim].total_cmp(&points[b][split_dim]));

        let median = indices.len() / 2;
        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx: indices[median],
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let left = Self::build_recursive(points, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, &mut right_part[1..], depth + 1, nodes);

        nodes[node_idx].left = left;
        nodes[node_idx].right = right;

        Some(node_idx)
    }

    /// Index and squared distance of the point nearest to `query`.
    ///
    /// Equidistant points resolve to the lowest index.
    pub fn nearest(&self, query: &PhysicalPoint) -> (usize, f64) {
        let query = [query.z, query.y, query.x];
        let mut best = (usize::MAX, f64::INFINITY);
        self.nearest_recursive(0, &query, &mut best);
        best
    }

    fn nearest_recursive(&self, node_idx: usize, query: &[f64; 3], best: &mut (usize, f64)) {
        let node = &self.nodes[node_idx];
        let point = &self.points[node.point_idx];

        let dist_sq = distance_squared(query, point);
        if dist_sq < best.1 || (dist_sq == best.1 && node.point_idx < best.0) {
            *best = (node.point_idx, dist_sq);
        }

        let diff = query[node.split_dim] - point[node.split_dim];
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(first_idx) = first {
            self.nearest_recursive(first_idx, query, best);
        }

        // Ties count: a lower-index point at equal distance may be on the far side
        if let Some(second_idx) = second {
            if diff * diff <= best.1 {
                self.nearest_recursive(second_idx, query, best);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[inline]
fn distance_squared(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dz = a[0] - b[0];
    let dy = a[1] - b[1];
    let dx = a[2] - b[2];
    dz * dz + dy * dy + dx * dx
}
