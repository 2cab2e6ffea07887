//! Bounding-box range queries over 3D points.
//!
//! The periodic layer only relies on the [`SpatialIndex`] contract: every point
//! inside a closed box is returned, in no particular order.

use crate::spatial::point::{BoundingBox, Point};

/// Upper bound on the total number of grid cells; the cell size grows until the
/// grid fits.
const MAX_CELLS: usize = 1 << 21;

pub trait SpatialIndex {
    /// Build the index over `points`; `cell_size` is a resolution hint that
    /// implementations may ignore.
    fn from_points(points: Vec<Point>, cell_size: f64) -> Self
    where
        Self: Sized;

    /// Indices (into the build vector) of all points inside `bb`.
    fn query(&self, bb: &BoundingBox) -> Vec<usize>;

    fn point(&self, index: usize) -> &Point;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force index, every query scans all points.
#[derive(Clone, Debug, Default)]
pub struct LinearIndex {
    points: Vec<Point>,
}

impl SpatialIndex for LinearIndex {
    fn from_points(points: Vec<Point>, _cell_size: f64) -> Self {
        LinearIndex { points }
    }

    fn query(&self, bb: &BoundingBox) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| bb.contains(p))
            .map(|(i, _)| i)
            .collect()
    }

    fn point(&self, index: usize) -> &Point {
        &self.points[index]
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

/// Uniform bucket grid with compressed-row storage.
///
/// `sorted[cell_starts[c]..cell_starts[c + 1]]` holds the ids of the points whose
/// cell has linear index `c = cx + nx * (cy + ny * cz)`.
#[derive(Clone, Debug)]
pub struct GridIndex {
    points: Vec<Point>,
    lo: Point,
    inv_cell: f64,
    dims: [usize; 3],
    cell_starts: Vec<usize>,
    sorted: Vec<usize>,
}

impl GridIndex {
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    fn axis_cell(&self, x: f64, axis: usize) -> usize {
        let n = self.dims[axis];
        let t = (x - self.lo[axis]) * self.inv_cell;
        // also catches NaN
        if !(t > 0.0) {
            return 0;
        }
        let c = t.floor();
        if c >= (n - 1) as f64 {
            n - 1
        } else {
            c as usize
        }
    }

    #[inline]
    fn linear(&self, cx: usize, cy: usize, cz: usize) -> usize {
        cx + self.dims[0] * (cy + self.dims[1] * cz)
    }
}

fn grid_dims(lo: &Point, hi: &Point, cell: f64) -> [usize; 3] {
    let mut dims = [1usize; 3];
    for (axis, d) in dims.iter_mut().enumerate() {
        *d = (((hi[axis] - lo[axis]) / cell).floor() as usize).saturating_add(1);
    }
    dims
}

impl SpatialIndex for GridIndex {
    fn from_points(points: Vec<Point>, cell_size: f64) -> Self {
        let mut lo = Point::repeat(f64::INFINITY);
        let mut hi = Point::repeat(f64::NEG_INFINITY);
        for p in points.iter().filter(|p| p.iter().all(|x| x.is_finite())) {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        if !lo.iter().all(|x| x.is_finite()) {
            lo = Point::zeros();
            hi = Point::zeros();
        }

        let extent = (hi - lo).max();
        let mut cell = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            extent.max(1.0)
        };
        let mut dims = grid_dims(&lo, &hi, cell);
        while dims.iter().fold(1usize, |n, &d| n.saturating_mul(d)) > MAX_CELLS {
            cell *= 2.0;
            dims = grid_dims(&lo, &hi, cell);
        }
        let inv_cell = 1.0 / cell;

        let mut grid = GridIndex {
            points,
            lo,
            inv_cell,
            dims,
            cell_starts: Vec::new(),
            sorted: Vec::new(),
        };

        // counting sort of point ids by cell
        let n_cells = dims[0] * dims[1] * dims[2];
        let cell_of: Vec<usize> = grid
            .points
            .iter()
            .map(|p| {
                grid.linear(
                    grid.axis_cell(p.x, 0),
                    grid.axis_cell(p.y, 1),
                    grid.axis_cell(p.z, 2),
                )
            })
            .collect();

        let mut cell_starts = vec![0usize; n_cells + 1];
        for &c in &cell_of {
            cell_starts[c + 1] += 1;
        }
        for c in 0..n_cells {
            cell_starts[c + 1] += cell_starts[c];
        }

        let mut fill = cell_starts.clone();
        let mut sorted = vec![0usize; cell_of.len()];
        for (i, &c) in cell_of.iter().enumerate() {
            sorted[fill[c]] = i;
            fill[c] += 1;
        }

        grid.cell_starts = cell_starts;
        grid.sorted = sorted;
        grid
    }

    fn query(&self, bb: &BoundingBox) -> Vec<usize> {
        let mut out = Vec::new();
        if self.points.is_empty() {
            return out;
        }
        let (x0, x1) = (self.axis_cell(bb.min.x, 0), self.axis_cell(bb.max.x, 0));
        let (y0, y1) = (self.axis_cell(bb.min.y, 1), self.axis_cell(bb.max.y, 1));
        let (z0, z1) = (self.axis_cell(bb.min.z, 2), self.axis_cell(bb.max.z, 2));

        for cz in z0..=z1 {
            for cy in y0..=y1 {
                for cx in x0..=x1 {
                    let c = self.linear(cx, cy, cz);
                    for &i in &self.sorted[self.cell_starts[c]..self.cell_starts[c + 1]] {
                        if bb.contains(&self.points[i]) {
                            out.push(i);
                        }
                    }
                }
            }
        }
        out
    }

    fn point(&self, index: usize) -> &Point {
        &self.points[index]
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(rng: &mut StdRng, n: usize, size: f64) -> Vec<Point> {
        (0..n)
            .map(|_| Point::new(rng.gen_range(0.0..size), rng.gen_range(0.0..size), rng.gen_range(0.0..size)))
            .collect()
    }

    #[test]
    fn test_grid_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(42);
        let points = random_points(&mut rng, 2000, 100.0);
        let grid = GridIndex::from_points(points.clone(), 7.5);
        let linear = LinearIndex::from_points(points, 0.0);

        for _ in 0..200 {
            let center = Point::new(rng.gen_range(-10.0..110.0), rng.gen_range(-10.0..110.0), rng.gen_range(-10.0..110.0));
            let half = Point::new(rng.gen_range(0.0..20.0), rng.gen_range(0.0..20.0), rng.gen_range(0.0..20.0));
            let bb = BoundingBox::around(&center, &half);

            let mut a = grid.query(&bb);
            let mut b = linear.query(&bb);
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_grid_unbounded_query() {
        let points = vec![
            Point::new(0.0, 0.0, -500.0),
            Point::new(0.0, 0.0, 500.0),
            Point::new(50.0, 0.0, 0.0),
        ];
        let grid = GridIndex::from_points(points, 10.0);
        let bb = BoundingBox::around(&Point::new(0.0, 0.0, 0.0), &Point::new(1.0, 1.0, f64::INFINITY));
        let mut hits = grid.query(&bb);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn test_grid_degenerate_inputs() {
        let empty = GridIndex::from_points(Vec::new(), 1.0);
        assert!(empty.is_empty());
        assert!(empty.query(&BoundingBox::around(&Point::zeros(), &Point::repeat(1.0))).is_empty());

        // non-positive cell size falls back to a single cell
        let single = GridIndex::from_points(vec![Point::new(1.0, 2.0, 3.0)], 0.0);
        assert_eq!(single.dims(), [1, 1, 1]);
        assert_eq!(single.query(&BoundingBox::around(&Point::new(1.0, 2.0, 3.0), &Point::zeros())), vec![0]);
    }

    #[test]
    fn test_grid_caps_cell_count() {
        let points = vec![Point::zeros(), Point::repeat(1e9)];
        let grid = GridIndex::from_points(points, 1.0);
        assert!(grid.dims().iter().product::<usize>() <= MAX_CELLS);
        assert_eq!(grid.query(&BoundingBox::around(&Point::repeat(1e9), &Point::repeat(1.0))), vec![1]);
    }
}
