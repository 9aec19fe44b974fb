//! Evenly resampled, normal-aware path polylines

use navgraph_common::{slerp_unit, Error, Result, Vec3};
use serde::{Deserialize, Serialize};

/// A waypoint polyline with a unit up-vector per waypoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathFindingPath {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl PathFindingPath {
    /// Creates a path from parallel position and normal sequences
    ///
    /// Normals are renormalized; zero normals become `+Y`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the sequences differ in length or a
    /// non-empty path has fewer than two points.
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>) -> Result<Self> {
        if positions.len() != normals.len() {
            return Err(Error::InvalidPath(format!(
                "{} positions but {} normals",
                positions.len(),
                normals.len()
            )));
        }
        if positions.len() == 1 {
            return Err(Error::InvalidPath(
                "a path needs at least 2 points".to_string(),
            ));
        }

        let normals = normals
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
            .collect();
        Ok(Self { positions, normals })
    }

    /// Creates a path whose normals all point up
    pub fn from_points(positions: Vec<Vec3>) -> Result<Self> {
        let normals = vec![Vec3::Y; positions.len()];
        Self::new(positions, normals)
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Iterates `(position, normal)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
        self.positions.iter().copied().zip(self.normals.iter().copied())
    }

    /// Total arc length
    pub fn length(&self) -> f32 {
        self.positions
            .windows(2)
            .map(|w| w[0].distance(w[1]))
            .sum()
    }

    /// Resamples the path at roughly `delta` spacing along its segments
    ///
    /// Every original segment is split into `max(1, round(len / delta))`
    /// equal parts. Positions are interpolated linearly and normals
    /// spherically. The original first and last points are kept exactly.
    /// A non-positive `delta` or a path with fewer than two points is left
    /// unchanged.
    pub fn refine_path(&mut self, delta: f32) {
        if !(delta > 0.0) || self.positions.len() < 2 {
            return;
        }

        let mut positions = Vec::with_capacity(self.positions.len());
        let mut normals = Vec::with_capacity(self.normals.len());

        for i in 0..self.positions.len() - 1 {
            let (p0, p1) = (self.positions[i], self.positions[i + 1]);
            let (n0, n1) = (self.normals[i], self.normals[i + 1]);

            let steps = ((p0.distance(p1) / delta).round() as usize).max(1);
            for k in 0..steps {
                if k == 0 {
                    positions.push(p0);
                    normals.push(n0);
                    continue;
                }
                let t = k as f32 / steps as f32;
                positions.push(p0.lerp(p1, t));
                normals.push(slerp_unit(n0, n1, t));
            }
        }

        let last = self.positions.len() - 1;
        positions.push(self.positions[last]);
        normals.push(self.normals[last]);

        log::debug!(
            "Refined path from {} to {} points (delta {})",
            self.positions.len(),
            positions.len(),
            delta
        );

        self.positions = positions;
        self.normals = normals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit_normals(path: &PathFindingPath) {
        for n in path.normals() {
            assert!((n.length() - 1.0).abs() < 1e-4, "normal {:?} is not unit", n);
        }
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(matches!(
            PathFindingPath::new(vec![Vec3::ZERO, Vec3::X], vec![Vec3::Y]),
            Err(Error::InvalidPath(_))
        ));
        assert!(PathFindingPath::from_points(vec![Vec3::ZERO]).is_err());
        assert!(PathFindingPath::from_points(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_refine_preserves_endpoints() {
        let start = Vec3::new(0.1, 0.0, 0.3);
        let end = Vec3::new(7.3, 1.2, -4.9);
        let mut path = PathFindingPath::new(
            vec![start, Vec3::new(3.0, 0.5, 0.0), end],
            vec![Vec3::Y, Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 1.0)],
        )
        .unwrap();

        for delta in [0.1, 0.37, 1.0, 25.0] {
            let mut refined = path.clone();
            refined.refine_path(delta);
            assert_eq!(refined.positions()[0], start);
            assert_eq!(*refined.positions().last().unwrap(), end);
            assert_eq!(refined.positions().len(), refined.normals().len());
            assert!(refined.len() >= path.len());
            assert_unit_normals(&refined);
        }

        path.refine_path(0.5);
        assert!(path.len() > 3);
    }

    #[test]
    fn test_refine_spacing() {
        let mut path =
            PathFindingPath::from_points(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)]).unwrap();
        path.refine_path(1.0);

        assert_eq!(path.len(), 11);
        for w in path.positions().windows(2) {
            assert!((w[0].distance(w[1]) - 1.0).abs() < 1e-4);
        }
        assert!((path.length() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_refine_interpolates_opposite_normals() {
        let mut path = PathFindingPath::new(
            vec![Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)],
            vec![Vec3::Y, -Vec3::Y],
        )
        .unwrap();
        path.refine_path(1.0);
        assert_eq!(path.len(), 5);
        assert_unit_normals(&path);
    }

    #[test]
    fn test_refine_noop_cases() {
        let original =
            PathFindingPath::from_points(vec![Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0)]).unwrap();

        let mut path = original.clone();
        path.refine_path(0.0);
        assert_eq!(path, original);

        path.refine_path(-1.0);
        assert_eq!(path, original);

        let mut empty = PathFindingPath::default();
        empty.refine_path(1.0);
        assert!(empty.is_empty());
    }
}
