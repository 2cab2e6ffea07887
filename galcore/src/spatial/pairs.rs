use std::sync::atomic::{AtomicUsize, Ordering};

use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::error::{GalcoreError, Result};
use crate::spatial::index::{GridIndex, SpatialIndex};
use crate::spatial::periodic::{Galaxy, PeriodicPointIndex};
use crate::spatial::point::{planar_norm, BoundingBox, Point};
use crate::{SnapNum, SubfindId};

const PROGRESS_EVERY: usize = 10_000;

/// How the separation between two galaxies is measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeparationMetric {
    /// Distance in the x-y plane, z is treated as the line of sight.
    #[default]
    Projected,
    /// Full 3D Euclidean distance.
    Spatial,
}

impl SeparationMetric {
    #[inline]
    pub fn distance(&self, a: &Point, b: &Point) -> f64 {
        match self {
            SeparationMetric::Projected => planar_norm(&(b - a)),
            SeparationMetric::Spatial => (b - a).norm(),
        }
    }

    /// Candidate box around `center` that contains every point closer than `r`.
    pub fn candidate_box(&self, center: &Point, r: f64) -> BoundingBox {
        match self {
            SeparationMetric::Projected => BoundingBox::around(center, &Point::new(r, r, f64::INFINITY)),
            SeparationMetric::Spatial => BoundingBox::around(center, &Point::repeat(r)),
        }
    }
}

/// Every indexed galaxy (real or ghost) whose distance `d` from `center` satisfies
/// `rmin <= d < rmax`.
pub fn annulus_query<'a, I: SpatialIndex>(
    index: &'a PeriodicPointIndex<I>,
    center: &Point,
    rmin: f64,
    rmax: f64,
    metric: SeparationMetric,
) -> Vec<&'a Galaxy> {
    index
        .query(&metric.candidate_box(center, rmax))
        .into_iter()
        .filter(|g| {
            let d = metric.distance(center, &g.position);
            d >= rmin && d < rmax
        })
        .collect()
}

/// Every indexed galaxy within 3D distance `epsilon` of `center`.
pub fn sphere_query<'a, I: SpatialIndex>(
    index: &'a PeriodicPointIndex<I>,
    center: &Point,
    epsilon: f64,
) -> Vec<&'a Galaxy> {
    index
        .query(&BoundingBox::around(center, &Point::repeat(epsilon)))
        .into_iter()
        .filter(|g| (g.position - center).norm() < epsilon)
        .collect()
}

/// Pair search parameters, radii in the units of the catalog positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairSearchOpts {
    pub rmin: f64,
    pub rmax: f64,
    /// Subjects need at least this stellar mass.
    pub mstar_min: f32,
    pub metric: SeparationMetric,
    pub parallel: bool,
}

impl Default for PairSearchOpts {
    fn default() -> Self {
        Self {
            // kpc/h
            rmin: 5.0,
            rmax: 20.0,
            // 10^10 Msun/h
            mstar_min: 0.704,
            metric: SeparationMetric::Projected,
            parallel: true,
        }
    }
}

impl PairSearchOpts {
    pub fn validate(&self) -> Result<()> {
        if !(self.rmin.is_finite() && self.rmin >= 0.0) {
            return Err(GalcoreError::config(format!("rmin must be finite and >= 0, got {}", self.rmin)));
        }
        if !(self.rmax.is_finite() && self.rmax >= self.rmin) {
            return Err(GalcoreError::config(format!(
                "rmax must be finite and >= rmin ({}), got {}",
                self.rmin, self.rmax
            )));
        }
        if self.mstar_min.is_nan() {
            return Err(GalcoreError::config("mstar_min is NaN"));
        }
        Ok(())
    }
}

/// One neighbour found around one subject. A pair may appear twice, once from
/// each side.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub snapnum: SnapNum,
    pub subject_id: SubfindId,
    pub neighbor_id: SubfindId,
    pub separation: f64,
    /// The neighbour was found through a periodic image.
    pub via_ghost: bool,
}

/// Keep one record per unordered pair, the first one in input order wins.
pub fn unique_unordered(pairs: &[CandidatePair]) -> Vec<CandidatePair> {
    pairs
        .iter()
        .copied()
        .unique_by(|p| {
            (
                p.snapnum,
                p.subject_id.min(p.neighbor_id),
                p.subject_id.max(p.neighbor_id),
            )
        })
        .collect()
}

pub struct PairFinder<'a, I: SpatialIndex = GridIndex> {
    index: &'a PeriodicPointIndex<I>,
    opts: &'a PairSearchOpts,
    snapnum: SnapNum,
}

impl<'a, I: SpatialIndex + Sync> PairFinder<'a, I> {
    pub fn new(index: &'a PeriodicPointIndex<I>, opts: &'a PairSearchOpts, snapnum: SnapNum) -> Result<Self> {
        opts.validate()?;
        Ok(PairFinder { index, opts, snapnum })
    }

    #[inline]
    fn is_subject(&self, mstar: f32) -> bool {
        mstar > 0.0 && mstar >= self.opts.mstar_min
    }

    /// Candidate pairs from an annulus query around every real galaxy above the
    /// stellar mass threshold. `stellar_mass[i]` belongs to `subfind_id == i`.
    pub fn find_pairs(&self, stellar_mass: &[f32]) -> Result<Vec<CandidatePair>> {
        let _span = info_span!("PairFinder::find_pairs", snapnum = self.snapnum).entered();
        let (rmin, rmax, metric) = (self.opts.rmin, self.opts.rmax, self.opts.metric);
        self.run(stellar_mass, |center| {
            annulus_query(self.index, center, rmin, rmax, metric)
                .into_iter()
                .map(|g| (g, metric.distance(center, &g.position)))
                .collect()
        })
    }

    /// Candidate pairs from a 3D sphere query of radius `epsilon`, used to flag
    /// galaxies sharing a centre.
    pub fn find_sphere_pairs(&self, stellar_mass: &[f32], epsilon: f64) -> Result<Vec<CandidatePair>> {
        if !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(GalcoreError::config(format!("epsilon must be finite and >= 0, got {}", epsilon)));
        }
        let _span = info_span!("PairFinder::find_sphere_pairs", snapnum = self.snapnum).entered();
        self.run(stellar_mass, |center| {
            sphere_query(self.index, center, epsilon)
                .into_iter()
                .map(|g| (g, (g.position - center).norm()))
                .collect()
        })
    }

    fn run<F>(&self, stellar_mass: &[f32], query: F) -> Result<Vec<CandidatePair>>
    where
        F: Fn(&Point) -> Vec<(&'a Galaxy, f64)> + Sync,
    {
        let n_real = self.index.n_real();
        if stellar_mass.len() != n_real {
            return Err(GalcoreError::invalid_data(format!(
                "got {} stellar masses for {} galaxies",
                stellar_mass.len(),
                n_real
            )));
        }

        let subjects: Vec<usize> = (0..n_real).filter(|&i| self.is_subject(stellar_mass[i])).collect();
        debug!(n_subjects = subjects.len(), n_real, "selected subjects");

        let processed = AtomicUsize::new(0);
        let per_subject = |&i: &usize| {
            let pairs = self.neighbors_of(i, query(&self.index.real(i).position));
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_EVERY == 0 {
                info!("Already processed {} galaxies.", done);
            }
            pairs
        };

        let mut pairs: Vec<CandidatePair> = if self.opts.parallel {
            subjects.par_iter().flat_map_iter(per_subject).collect()
        } else {
            subjects.iter().flat_map(per_subject).collect()
        };
        pairs.sort_unstable_by_key(|p| (p.subject_id, p.neighbor_id));
        Ok(pairs)
    }

    /// Map hits around subject `i` back to real ids, dropping the subject itself and
    /// keeping the closest image of every neighbour. The real galaxy wins a tie.
    fn neighbors_of(&self, i: usize, hits: Vec<(&Galaxy, f64)>) -> Vec<CandidatePair> {
        let subject_id = i as SubfindId;
        hits.into_iter()
            .filter(|(g, _)| g.subfind_id != subject_id)
            .sorted_by(|a, b| {
                a.0.subfind_id
                    .cmp(&b.0.subfind_id)
                    .then(a.1.total_cmp(&b.1))
                    .then(a.0.ghost.cmp(&b.0.ghost))
            })
            .dedup_by(|a, b| a.0.subfind_id == b.0.subfind_id)
            .map(|(g, d)| CandidatePair {
                snapnum: self.snapnum,
                subject_id,
                neighbor_id: g.subfind_id,
                separation: d,
                via_ghost: g.ghost,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::index::LinearIndex;
    use crate::spatial::periodic::{GhostPolicy, ImageSet};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn key(g: &Galaxy) -> (SubfindId, u64, u64, u64) {
        (g.subfind_id, g.position.x.to_bits(), g.position.y.to_bits(), g.position.z.to_bits())
    }

    #[test]
    fn test_annulus_across_periodic_face() {
        let positions = vec![Point::new(999.0, 500.0, 500.0)];
        let index: PeriodicPointIndex = PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 50.0).unwrap();

        let hits = annulus_query(&index, &Point::new(1.0, 500.0, 500.0), 0.0, 10.0, SeparationMetric::Projected);
        assert!(hits.iter().any(|g| g.subfind_id == 0 && g.ghost && g.position.x == -1.0));

        let hits = annulus_query(&index, &Point::new(1.0, 500.0, 500.0), 0.0, 10.0, SeparationMetric::Spatial);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].ghost);
    }

    #[test]
    fn test_annulus_bounds() {
        let positions = vec![Point::new(100.0, 100.0, 100.0), Point::new(200.0, 100.0, 100.0)];
        let index: PeriodicPointIndex = PeriodicPointIndex::build(75000.0, &positions, GhostPolicy::default(), 500.0).unwrap();
        let first = index.real(0).position;

        let hits = annulus_query(&index, &first, 50.0, 150.0, SeparationMetric::Projected);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|g| g.subfind_id == 1));
        assert!(hits.iter().any(|g| !g.ghost));

        assert!(annulus_query(&index, &first, 150.0, 200.0, SeparationMetric::Projected).is_empty());
        // lower bound is inclusive, upper bound exclusive
        assert!(annulus_query(&index, &first, 100.0, 150.0, SeparationMetric::Spatial).iter().any(|g| g.subfind_id == 1));
        assert!(annulus_query(&index, &first, 50.0, 100.0, SeparationMetric::Spatial).is_empty());
    }

    #[test]
    fn test_annulus_monotonic_in_rmin() {
        let mut rng = StdRng::seed_from_u64(7);
        let positions: Vec<Point> = (0..500)
            .map(|_| Point::new(rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)))
            .collect();
        let index: PeriodicPointIndex = PeriodicPointIndex::build(200.0, &positions, GhostPolicy::default(), 10.0).unwrap();

        for _ in 0..50 {
            let c = index.real(rng.gen_range(0..positions.len())).position;
            let rmax = rng.gen_range(1.0..40.0);
            let rmin = rng.gen_range(0.0..rmax);
            for metric in [SeparationMetric::Projected, SeparationMetric::Spatial] {
                let full: HashSet<_> = annulus_query(&index, &c, 0.0, rmax, metric).iter().map(|g| key(g)).collect();
                let ring: HashSet<_> = annulus_query(&index, &c, rmin, rmax, metric).iter().map(|g| key(g)).collect();
                assert!(ring.is_subset(&full));
            }
        }
    }

    #[test]
    fn test_projected_ignores_line_of_sight() {
        let positions = vec![Point::new(50.0, 50.0, 10.0), Point::new(53.0, 54.0, 90.0)];
        let index: PeriodicPointIndex<LinearIndex> =
            PeriodicPointIndex::build(100.0, &positions, GhostPolicy::default(), 0.0).unwrap();
        let c = index.real(0).position;

        assert!(annulus_query(&index, &c, 4.0, 6.0, SeparationMetric::Projected).iter().any(|g| g.subfind_id == 1));
        assert!(annulus_query(&index, &c, 4.0, 6.0, SeparationMetric::Spatial).is_empty());
    }

    #[test]
    fn test_sphere_query() {
        let positions = vec![Point::new(10.0, 10.0, 10.0), Point::new(10.5, 10.0, 10.0), Point::new(10.0, 10.0, 12.0)];
        let index: PeriodicPointIndex = PeriodicPointIndex::build(100.0, &positions, GhostPolicy::default(), 1.0).unwrap();
        let ids: HashSet<SubfindId> = sphere_query(&index, &positions[0], 1.0).iter().map(|g| g.subfind_id).collect();
        assert_eq!(ids, HashSet::from([0, 1]));
    }

    #[test]
    fn test_find_pairs_thresholds_and_self() {
        let positions = vec![
            Point::new(10.0, 10.0, 10.0),
            Point::new(20.0, 10.0, 10.0),
            Point::new(10.0, 22.0, 10.0),
            Point::new(60.0, 60.0, 60.0),
        ];
        let index: PeriodicPointIndex = PeriodicPointIndex::build(100.0, &positions, GhostPolicy::default(), 5.0).unwrap();
        let opts = PairSearchOpts { rmin: 5.0, rmax: 20.0, mstar_min: 1.0, metric: SeparationMetric::Spatial, parallel: false };
        let finder = PairFinder::new(&index, &opts, 42).unwrap();

        // galaxy 2 is below threshold, galaxy 3 has no stars
        let pairs = finder.find_pairs(&[2.0, 1.5, 0.5, 0.0]).unwrap();
        let ids: Vec<(SubfindId, SubfindId)> = pairs.iter().map(|p| (p.subject_id, p.neighbor_id)).collect();
        assert_eq!(ids, vec![(0, 1), (0, 2), (1, 0), (1, 2)]);
        assert!(pairs.iter().all(|p| p.snapnum == 42 && !p.via_ghost));
        assert!((pairs[0].separation - 10.0).abs() < 1e-12);

        assert_eq!(unique_unordered(&pairs).len(), 3);
        assert!(finder.find_pairs(&[1.0]).is_err());
    }

    #[test]
    fn test_find_pairs_keeps_closest_image() {
        // box small enough that the real neighbour and its ghost both fall in range
        let positions = vec![Point::new(2.0, 5.0, 5.0), Point::new(8.0, 5.0, 5.0)];
        let index: PeriodicPointIndex = PeriodicPointIndex::build(10.0, &positions, GhostPolicy::default(), 1.0).unwrap();
        let opts = PairSearchOpts { rmin: 0.0, rmax: 7.0, mstar_min: 0.0, metric: SeparationMetric::Spatial, parallel: false };
        let pairs = PairFinder::new(&index, &opts, 0).unwrap().find_pairs(&[1.0, 0.0]).unwrap();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].neighbor_id, 1);
        assert!(pairs[0].via_ghost);
        assert!((pairs[0].separation - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 1500;
        let positions: Vec<Point> = (0..n)
            .map(|_| Point::new(rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0)))
            .collect();
        let mstar: Vec<f32> = (0..n).map(|_| rng.gen_range(0.0..2.0)).collect();
        let index: PeriodicPointIndex = PeriodicPointIndex::build(500.0, &positions, GhostPolicy::default(), 20.0).unwrap();

        let seq = PairSearchOpts { parallel: false, ..PairSearchOpts::default() };
        let par = PairSearchOpts { parallel: true, ..PairSearchOpts::default() };
        let a = PairFinder::new(&index, &seq, 1).unwrap().find_pairs(&mstar).unwrap();
        let b = PairFinder::new(&index, &par, 1).unwrap().find_pairs(&mstar).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_projected_tie_prefers_real_image() {
        // the z ghost of galaxy 1 projects onto the real one
        let positions = vec![Point::new(100.0, 100.0, 600.0), Point::new(105.0, 100.0, 600.0)];
        let opts = PairSearchOpts { parallel: false, ..PairSearchOpts::default() };

        let grid: PeriodicPointIndex = PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 20.0).unwrap();
        let linear: PeriodicPointIndex<LinearIndex> =
            PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 0.0).unwrap();
        let a = PairFinder::new(&grid, &opts, 0).unwrap().find_pairs(&[1.0, 1.0]).unwrap();
        let b = PairFinder::new(&linear, &opts, 0).unwrap().find_pairs(&[1.0, 1.0]).unwrap();

        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|p| !p.via_ghost && (p.separation - 5.0).abs() < 1e-12));
        assert_eq!(a, b);
    }

    #[test]
    fn test_find_sphere_pairs() {
        let positions = vec![
            Point::new(999.0, 500.0, 500.0),
            Point::new(2.0, 500.0, 500.0),
            Point::new(996.0, 500.0, 500.0),
            Point::new(300.0, 300.0, 300.0),
        ];
        let index: PeriodicPointIndex = PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 10.0).unwrap();
        let opts = PairSearchOpts { parallel: false, ..PairSearchOpts::default() };
        let finder = PairFinder::new(&index, &opts, 3).unwrap();

        let pairs = finder.find_sphere_pairs(&[1.0, 1.0, 0.0, 1.0], 5.0).unwrap();
        let ids: Vec<(SubfindId, SubfindId)> = pairs.iter().map(|p| (p.subject_id, p.neighbor_id)).collect();
        // galaxy 2 is no subject but still a neighbour, it lies 6 from galaxy 1
        assert_eq!(ids, vec![(0, 1), (0, 2), (1, 0)]);
        assert!(pairs.iter().all(|p| p.subject_id != p.neighbor_id && p.separation < 5.0));
        assert!(pairs[0].via_ghost && pairs[2].via_ghost);
        assert!(!pairs[1].via_ghost);
        assert!((pairs[0].separation - 3.0).abs() < 1e-12);

        assert!(finder.find_sphere_pairs(&[1.0, 1.0, 0.0, 1.0], 0.0).unwrap().is_empty());
        for eps in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(finder.find_sphere_pairs(&[1.0, 1.0, 0.0, 1.0], eps), Err(GalcoreError::Config { .. })));
        }
    }

    #[test]
    fn test_corner_pair_needs_all_images() {
        let positions = vec![Point::new(997.0, 997.0, 500.0), Point::new(2.0, 2.0, 500.0)];
        let opts = PairSearchOpts { metric: SeparationMetric::Spatial, parallel: false, ..PairSearchOpts::default() };

        let faces: PeriodicPointIndex = PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 20.0).unwrap();
        assert!(PairFinder::new(&faces, &opts, 0).unwrap().find_pairs(&[1.0, 1.0]).unwrap().is_empty());

        let policy = GhostPolicy { margin: None, images: ImageSet::All };
        let all: PeriodicPointIndex = PeriodicPointIndex::build(1000.0, &positions, policy, 20.0).unwrap();
        let pairs = PairFinder::new(&all, &opts, 0).unwrap().find_pairs(&[1.0, 1.0]).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.via_ghost && (p.separation - 50f64.sqrt()).abs() < 1e-9));
    }

    #[test]
    fn test_margin_keeps_face_pairs() {
        let positions = vec![Point::new(995.0, 500.0, 500.0), Point::new(3.0, 500.0, 500.0), Point::new(500.0, 500.0, 500.0)];
        let opts = PairSearchOpts { metric: SeparationMetric::Spatial, parallel: false, ..PairSearchOpts::default() };

        let full: PeriodicPointIndex = PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::default(), 20.0).unwrap();
        let restricted: PeriodicPointIndex =
            PeriodicPointIndex::build(1000.0, &positions, GhostPolicy::with_margin(opts.rmax), 20.0).unwrap();
        assert_eq!(full.n_ghosts(), 9);
        assert_eq!(restricted.n_ghosts(), 2);

        let a = PairFinder::new(&full, &opts, 0).unwrap().find_pairs(&[1.0, 1.0, 1.0]).unwrap();
        let b = PairFinder::new(&restricted, &opts, 0).unwrap().find_pairs(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(a, b);
        let ids: Vec<(SubfindId, SubfindId)> = b.iter().map(|p| (p.subject_id, p.neighbor_id)).collect();
        assert_eq!(ids, vec![(0, 1), (1, 0)]);
        assert!(b.iter().all(|p| p.via_ghost && (p.separation - 8.0).abs() < 1e-12));
    }

    #[test]
    fn test_opts_validation() {
        assert!(PairSearchOpts::default().validate().is_ok());
        assert!(PairSearchOpts { rmin: 30.0, ..PairSearchOpts::default() }.validate().is_err());
        assert!(PairSearchOpts { rmin: -1.0, ..PairSearchOpts::default() }.validate().is_err());
        assert!(PairSearchOpts { rmax: f64::INFINITY, ..PairSearchOpts::default() }.validate().is_err());
    }
}
