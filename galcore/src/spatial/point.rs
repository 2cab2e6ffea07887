use nalgebra::Vector3;

/// A position in the simulation volume.
pub type Point = Vector3<f64>;

/// Distance in the x-y plane, the third coordinate is ignored.
#[inline]
pub fn planar_norm(p: &Point) -> f64 {
    (p.x * p.x + p.y * p.y).sqrt()
}

/// Closed axis-aligned box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    /// Creates a new `BoundingBox` from two corners, sorting the bounds per axis.
    ///
    /// # Examples
    ///
    /// ```
    /// use galcore::spatial::point::{BoundingBox, Point};
    ///
    /// let bb = BoundingBox::new(Point::new(1.0, 0.0, 0.0), Point::new(0.0, 1.0, 1.0));
    /// assert!(bb.contains(&Point::new(0.5, 0.5, 0.5)));
    /// ```
    pub fn new(a: Point, b: Point) -> Self {
        BoundingBox {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Box centred on `center` extending `half_widths` along each axis.
    pub fn around(center: &Point, half_widths: &Point) -> Self {
        let h = half_widths.abs();
        BoundingBox {
            min: center - h,
            max: center + h,
        }
    }

    #[inline]
    pub fn contains(&self, p: &Point) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }
}
