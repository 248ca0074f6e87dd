//! 2D k-d tree for planar nearest-feature queries.
//!
//! Built once per near layer and queried once per input feature, which
//! replaces an O(n·m) scan over every near feature.

use geo::Point;

/// A 2D k-d tree over near-feature locations.
#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    /// Points in input order; node and result indices refer to this list.
    points: Vec<Point<f64>>,
}

#[derive(Debug)]
struct KdNode {
    /// Index into `points`
    point_idx: usize,
    /// Split dimension: 0 = x, 1 = y
    split_dim: u8,
    left: Option<usize>,
    right: Option<usize>,
}

/// Result of a nearest-neighbor query.
#[derive(Debug, Clone, Copy)]
pub struct NearestResult {
    pub distance_sq: f64,
    /// Position of the point in the slice the tree was built from.
    pub index: usize,
}

impl KdTree {
    /// Build a k-d tree from points using median-of-coordinate splitting.
    pub fn build(points: &[Point<f64>]) -> Self {
        if points.is_empty() {
            return Self {
                nodes: Vec::new(),
                points: Vec::new(),
            };
        }

        let mut indices: Vec<usize> = (0..points.len()).collect();
        let stored_points: Vec<Point<f64>> = points.to_vec();
        let mut nodes = Vec::with_capacity(points.len());

        build_recursive(&stored_points, &mut indices, 0, &mut nodes);

        Self {
            nodes,
            points: stored_points,
        }
    }

    /// Find the nearest point to (qx, qy).
    ///
    /// Ties go to the point that came first in the input. Returns `None`
    /// if the tree is empty.
    pub fn nearest(&self, qx: f64, qy: f64) -> Option<NearestResult> {
        if self.nodes.is_empty() {
            return None;
        }

        let mut best_dist_sq = f64::INFINITY;
        let mut best_idx = usize::MAX;

        self.nearest_recursive(0, qx, qy, &mut best_dist_sq, &mut best_idx);

        Some(NearestResult {
            distance_sq: best_dist_sq,
            index: best_idx,
        })
    }

    fn nearest_recursive(
        &self,
        node_idx: usize,
        qx: f64,
        qy: f64,
        best_dist_sq: &mut f64,
        best_idx: &mut usize,
    ) {
        let node = &self.nodes[node_idx];
        let p = &self.points[node.point_idx];

        let dx = qx - p.x();
        let dy = qy - p.y();
        let dist_sq = dx * dx + dy * dy;

        // The first node visited always wins, even when the squared distance
        // overflows to infinity.
        if *best_idx == usize::MAX
            || dist_sq < *best_dist_sq
            || (dist_sq == *best_dist_sq && node.point_idx < *best_idx)
        {
            *best_dist_sq = dist_sq;
            *best_idx = node.point_idx;
        }

        let diff = if node.split_dim == 0 { dx } else { dy };
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(child) = first {
            self.nearest_recursive(child, qx, qy, best_dist_sq, best_idx);
        }

        // `<=` keeps equidistant points on the far side reachable for tie-breaking.
        if diff * diff <= *best_dist_sq {
            if let Some(child) = second {
                self.nearest_recursive(child, qx, qy, best_dist_sq, best_idx);
            }
        }
    }
}

fn build_recursive(
    points: &[Point<f64>],
    indices: &mut [usize],
    depth: usize,
    nodes: &mut Vec<KdNode>,
) -> usize {
    let n = indices.len();
    let split_dim = (depth % 2) as u8;

    let coord = |i: usize| {
        if split_dim == 0 {
            points[i].x()
        } else {
            points[i].y()
        }
    };
    indices.sort_by(|&a, &b| coord(a).total_cmp(&coord(b)));

    let median = n / 2;
    let point_idx = indices[median];

    let node_idx = nodes.len();
    nodes.push(KdNode {
        point_idx,
        split_dim,
        left: None,
        right: None,
    });

    if median > 0 {
        let mut left_indices = indices[..median].to_vec();
        let left_idx = build_recursive(points, &mut left_indices, depth + 1, nodes);
        nodes[node_idx].left = Some(left_idx);
    }

    if median + 1 < n {
        let mut right_indices = indices[median + 1..].to_vec();
        let right_idx = build_recursive(points, &mut right_indices, depth + 1, nodes);
        nodes[node_idx].right = Some(right_idx);
    }

    node_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist_sq(p: &Point<f64>, qx: f64, qy: f64) -> f64 {
        (p.x() - qx).powi(2) + (p.y() - qy).powi(2)
    }

    fn sample_points() -> Vec<Point<f64>> {
        vec![
            Point::new(2.0, 3.0),
            Point::new(5.0, 4.0),
            Point::new(9.0, 6.0),
            Point::new(4.0, 7.0),
            Point::new(8.0, 1.0),
            Point::new(7.0, 2.0),
            Point::new(1.0, 8.0),
            Point::new(6.0, 5.0),
        ]
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::build(&[]);
        assert!(tree.nearest(0.0, 0.0).is_none());
    }

    #[test]
    fn test_nearest_exact() {
        let tree = KdTree::build(&sample_points());

        let result = tree.nearest(5.0, 4.0).unwrap();
        assert!(result.distance_sq < 1e-10);
        assert_eq!(result.index, 1);
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let pts = sample_points();
        let tree = KdTree::build(&pts);

        for qx in 0..10 {
            for qy in 0..10 {
                let qx = qx as f64 + 0.5;
                let qy = qy as f64 + 0.5;

                let tree_result = tree.nearest(qx, qy).unwrap();
                let bf = pts
                    .iter()
                    .map(|p| dist_sq(p, qx, qy))
                    .fold(f64::MAX, f64::min);

                assert!(
                    (tree_result.distance_sq - bf).abs() < 1e-10,
                    "Mismatch at ({}, {}): tree={:.4}, bf={:.4}",
                    qx,
                    qy,
                    tree_result.distance_sq,
                    bf
                );
            }
        }
    }

    #[test]
    fn test_overflowing_distance_still_finds_a_point() {
        let tree = KdTree::build(&[Point::new(1e200, 0.0)]);

        let result = tree.nearest(0.0, 0.0).unwrap();
        assert_eq!(result.index, 0);
        assert!(result.distance_sq.is_infinite());

        let tree = KdTree::build(&[Point::new(1e200, 0.0), Point::new(-1e200, 5.0)]);
        let result = tree.nearest(0.0, 0.0).unwrap();
        assert_eq!(result.index, 0);
    }

    #[test]
    fn test_ties_prefer_first_input() {
        let pts = vec![
            Point::new(1.0, 0.0),
            Point::new(-1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        let tree = KdTree::build(&pts);

        let result = tree.nearest(0.0, 0.0).unwrap();
        assert_eq!(result.index, 0);
    }

    #[test]
    fn test_large_dataset() {
        let pts: Vec<Point<f64>> = (0..1000)
            .map(|i| {
                let x = ((i * 7 + 13) % 100) as f64;
                let y = ((i * 11 + 37) % 100) as f64;
                Point::new(x, y)
            })
            .collect();
        let tree = KdTree::build(&pts);

        let result = tree.nearest(50.3, 49.8).unwrap();
        let bf = pts
            .iter()
            .map(|p| dist_sq(p, 50.3, 49.8))
            .fold(f64::MAX, f64::min);
        assert!((result.distance_sq - bf).abs() < 1e-10);
    }
}
