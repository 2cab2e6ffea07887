//! Ghost replication for a periodic cubic box.
//!
//! Every real galaxy gets translated copies just outside the opposite faces of
//! `[0, L)^3`, so a plain box query near a face also sees galaxies that are close
//! across the boundary. Ghosts share the `subfind_id` of their real galaxy.

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::error::{GalcoreError, Result};
use crate::spatial::index::{GridIndex, SpatialIndex};
use crate::spatial::point::{BoundingBox, Point};
use crate::SubfindId;

/// A galaxy as seen by the spatial search: position plus back-reference to the
/// originating subhalo.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Galaxy {
    pub position: Point,
    pub subfind_id: SubfindId,
    pub ghost: bool,
}

/// Which periodic images to create.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSet {
    /// One image per axis (at most 3 ghosts), pairs across edges and corners are missed.
    #[default]
    Faces,
    /// Face, edge and corner images (at most 7 ghosts).
    All,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GhostPolicy {
    /// Only replicate along an axis if the galaxy lies within this distance of a
    /// face on that axis. `None` replicates unconditionally.
    pub margin: Option<f64>,
    pub images: ImageSet,
}

impl GhostPolicy {
    /// Ghosts restricted to `margin` of a face, e.g. the maximum query radius.
    pub fn with_margin(margin: f64) -> Self {
        GhostPolicy { margin: Some(margin), images: ImageSet::Faces }
    }

    /// Translation of `x` into its nearest periodic image along one axis, or
    /// `None` when the policy does not replicate along that axis.
    #[inline]
    fn shift(&self, x: f64, box_size: f64) -> Option<f64> {
        if let Some(m) = self.margin {
            if x.min(box_size - x) >= m {
                return None;
            }
        }
        Some(-box_size.copysign(x - 0.5 * box_size))
    }

    /// Ghost positions for a real galaxy at `pos`.
    pub fn ghost_positions(&self, pos: &Point, box_size: f64) -> Vec<Point> {
        let shifts = [
            self.shift(pos.x, box_size),
            self.shift(pos.y, box_size),
            self.shift(pos.z, box_size),
        ];

        match self.images {
            ImageSet::Faces => shifts
                .iter()
                .enumerate()
                .filter_map(|(axis, s)| {
                    s.map(|s| {
                        let mut g = *pos;
                        g[axis] += s;
                        g
                    })
                })
                .collect(),
            ImageSet::All => (1u8..8)
                .filter_map(|mask| {
                    let mut g = *pos;
                    for (axis, s) in shifts.iter().enumerate() {
                        if mask & (1 << axis) != 0 {
                            g[axis] += (*s)?;
                        }
                    }
                    Some(g)
                })
                .collect(),
        }
    }
}

/// Galaxies of one snapshot plus their ghosts, indexed for box queries.
///
/// Real galaxies occupy `galaxies[..n_real]` in input order; ghosts follow.
pub struct PeriodicPointIndex<I: SpatialIndex = GridIndex> {
    box_size: f64,
    n_real: usize,
    galaxies: Vec<Galaxy>,
    index: I,
}

impl<I: SpatialIndex> PeriodicPointIndex<I> {
    /// Builds the index from per-subhalo positions, `positions[i]` belongs to
    /// `subfind_id == i`.
    ///
    /// # Arguments
    ///
    /// * `box_size` - side length `L` of the periodic box.
    /// * `positions` - real galaxy positions, expected inside `[0, L)^3`.
    /// * `policy` - ghost generation policy.
    /// * `cell_size` - resolution hint for the underlying spatial index.
    pub fn build(box_size: f64, positions: &[Point], policy: GhostPolicy, cell_size: f64) -> Result<Self> {
        if !(box_size.is_finite() && box_size > 0.0) {
            return Err(GalcoreError::config(format!("box size must be positive, got {}", box_size)));
        }
        if let Some(m) = policy.margin {
            if !(m >= 0.0) {
                return Err(GalcoreError::config(format!("ghost margin must be non-negative, got {}", m)));
            }
        }
        let _span = info_span!("PeriodicPointIndex::build", n_real = positions.len()).entered();

        let mut galaxies: Vec<Galaxy> = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Galaxy { position, subfind_id: i as SubfindId, ghost: false })
            .collect();

        for (i, pos) in positions.iter().enumerate() {
            for position in policy.ghost_positions(pos, box_size) {
                galaxies.push(Galaxy { position, subfind_id: i as SubfindId, ghost: true });
            }
        }
        debug!(n_real = positions.len(), n_ghosts = galaxies.len() - positions.len(), "created ghost galaxies");

        let index = I::from_points(galaxies.iter().map(|g| g.position).collect(), cell_size);

        Ok(PeriodicPointIndex { box_size, n_real: positions.len(), galaxies, index })
    }

    pub fn box_size(&self) -> f64 {
        self.box_size
    }

    pub fn n_real(&self) -> usize {
        self.n_real
    }

    pub fn n_ghosts(&self) -> usize {
        self.galaxies.len() - self.n_real
    }

    /// The real galaxy with `subfind_id == i`.
    pub fn real(&self, i: usize) -> &Galaxy {
        &self.galaxies[i]
    }

    pub fn galaxies(&self) -> &[Galaxy] {
        &self.galaxies
    }

    /// All galaxies, real or ghost, inside `bb`.
    pub fn query(&self, bb: &BoundingBox) -> Vec<&Galaxy> {
        self.index.query(bb).into_iter().map(|i| &self.galaxies[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::index::LinearIndex;

    #[test]
    fn test_face_ghosts_per_axis() {
        let policy = GhostPolicy::default();
        let ghosts = policy.ghost_positions(&Point::new(999.0, 500.0, 10.0), 1000.0);
        assert_eq!(ghosts.len(), 3);
        assert_eq!(ghosts[0], Point::new(-1.0, 500.0, 10.0));
        // exact midpoint goes to the lower side
        assert_eq!(ghosts[1], Point::new(999.0, -500.0, 10.0));
        assert_eq!(ghosts[2], Point::new(999.0, 500.0, 1010.0));
    }

    #[test]
    fn test_all_images_cover_corners() {
        let policy = GhostPolicy { margin: None, images: ImageSet::All };
        let ghosts = policy.ghost_positions(&Point::new(1.0, 1.0, 1.0), 100.0);
        assert_eq!(ghosts.len(), 7);
        assert!(ghosts.contains(&Point::new(101.0, 101.0, 101.0)));
        assert!(ghosts.contains(&Point::new(101.0, 1.0, 101.0)));
    }

    #[test]
    fn test_margin_restricts_ghosts() {
        let policy = GhostPolicy::with_margin(10.0);
        assert!(policy.ghost_positions(&Point::new(500.0, 500.0, 500.0), 1000.0).is_empty());

        let ghosts = policy.ghost_positions(&Point::new(995.0, 500.0, 3.0), 1000.0);
        assert_eq!(ghosts, vec![Point::new(-5.0, 500.0, 3.0), Point::new(995.0, 500.0, 1003.0)]);

        let all = GhostPolicy { margin: Some(10.0), images: ImageSet::All };
        assert_eq!(all.ghost_positions(&Point::new(995.0, 500.0, 3.0), 1000.0).len(), 3);
    }

    #[test]
    fn test_index_layout_and_query() {
        let positions = vec![Point::new(999.0, 500.0, 500.0), Point::new(1.0, 500.0, 500.0)];
        let index: PeriodicPointIndex<LinearIndex> =
            PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 10.0).unwrap();

        assert_eq!(index.n_real(), 2);
        assert_eq!(index.n_ghosts(), 6);
        assert!(!index.real(0).ghost);
        assert_eq!(index.real(1).subfind_id, 1);

        let bb = BoundingBox::around(&Point::new(1.0, 500.0, 500.0), &Point::new(5.0, 5.0, 5.0));
        let hits = index.query(&bb);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|g| g.subfind_id == 0 && g.ghost && g.position.x == -1.0));
        assert!(hits.iter().any(|g| g.subfind_id == 1 && !g.ghost));
    }

    #[test]
    fn test_invalid_box_size() {
        let res: Result<PeriodicPointIndex> = PeriodicPointIndex::build(0.0, &[], GhostPolicy::default(), 1.0);
        assert!(matches!(res, Err(GalcoreError::Config { .. })));
    }
}
