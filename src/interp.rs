//! Regular-grid interpolation tables (§4.2).
//!
//! A small value type recording `(min, max, nodes)` plus the sampled function
//! values, built once per shell/R iteration from the post-filter field
//! range (with small safety pads), used read-only inside a per-cell
//! parallel region, and dropped at the end of the iteration. Lookups
//! outside the declared bounds are reported as
//! [`crate::Error::TableEvaluation`] rather than silently extrapolated.

use crate::error::{Error, Result};
use ndarray::Array2;

/// A 1-D regular-grid lookup table, linearly interpolated.
#[derive(Clone, Debug)]
pub struct Table1D {
    min: f64,
    max: f64,
    values: Vec<f64>,
}

impl Table1D {
    /// Builds a table over `[min, max]` by sampling `f` at `nodes`
    /// evenly spaced points (`nodes >= 2`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableGeneration`] if any sampled value is
    /// non-finite.
    pub fn build(min: f64, max: f64, nodes: usize, f: impl Fn(f64) -> f64) -> Result<Self> {
        assert!(nodes >= 2, "a 1-D table needs at least two nodes");
        assert!(max >= min, "table max must be >= min");
        let step = (max - min) / crate::convert::f64_from_usize(nodes - 1);
        let values: Vec<f64> = (0..nodes)
            .map(|i| f(min + crate::convert::f64_from_usize(i) * step))
            .collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::TableGeneration(
                "Table1D::build produced a non-finite entry".to_string(),
            ));
        }
        Ok(Self { min, max, values })
    }

    /// Returns the table's declared bounds.
    #[must_use]
    pub const fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Linearly interpolates the table at `x`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableEvaluation`] if `x` lies outside `[min, max]`.
    pub fn lookup(&self, x: f64) -> Result<f64> {
        if x < self.min || x > self.max {
            return Err(Error::TableEvaluation(format!(
                "x = {x} outside table bounds [{}, {}]",
                self.min, self.max
            )));
        }
        let n = self.values.len();
        if n == 1 {
            return Ok(self.values[0]);
        }
        let step = (self.max - self.min) / crate::convert::f64_from_usize(n - 1);
        let pos = (x - self.min) / step;
        let idx = crate::convert::usize_from_f64(pos).min(n - 2);
        let frac = pos - crate::convert::f64_from_usize(idx);
        Ok(self.values[idx] + frac * (self.values[idx + 1] - self.values[idx]))
    }
}

/// A 2-D regular-grid lookup table, bilinearly interpolated.
#[derive(Clone, Debug)]
pub struct Table2D {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    values: Array2<f64>,
}

impl Table2D {
    /// Builds a table over `[x_min, x_max] x [y_min, y_max]` sampling `f`
    /// on an `x_nodes * y_nodes` regular grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableGeneration`] if any sampled value is
    /// non-finite.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        x_min: f64,
        x_max: f64,
        x_nodes: usize,
        y_min: f64,
        y_max: f64,
        y_nodes: usize,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self> {
        assert!(x_nodes >= 2 && y_nodes >= 2);
        assert!(x_max >= x_min && y_max >= y_min);
        let dx = (x_max - x_min) / crate::convert::f64_from_usize(x_nodes - 1);
        let dy = (y_max - y_min) / crate::convert::f64_from_usize(y_nodes - 1);
        let mut values = Array2::zeros((x_nodes, y_nodes));
        for i in 0..x_nodes {
            let x = x_min + crate::convert::f64_from_usize(i) * dx;
            for j in 0..y_nodes {
                let y = y_min + crate::convert::f64_from_usize(j) * dy;
                values[[i, j]] = f(x, y);
            }
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::TableGeneration(
                "Table2D::build produced a non-finite entry".to_string(),
            ));
        }
        Ok(Self {
            x_min,
            x_max,
            y_min,
            y_max,
            values,
        })
    }

    /// Bilinearly interpolates the table at `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableEvaluation`] if `(x, y)` lies outside the
    /// table's declared bounds.
    pub fn lookup(&self, x: f64, y: f64) -> Result<f64> {
        if x < self.x_min || x > self.x_max || y < self.y_min || y > self.y_max {
            return Err(Error::TableEvaluation(format!(
                "(x, y) = ({x}, {y}) outside table bounds [{}, {}] x [{}, {}]",
                self.x_min, self.x_max, self.y_min, self.y_max
            )));
        }
        let (nx, ny) = self.values.dim();
        let dx = (self.x_max - self.x_min) / crate::convert::f64_from_usize(nx - 1);
        let dy = (self.y_max - self.y_min) / crate::convert::f64_from_usize(ny - 1);

        let px = (x - self.x_min) / dx;
        let py = (y - self.y_min) / dy;
        let ix = crate::convert::usize_from_f64(px).min(nx - 2);
        let iy = crate::convert::usize_from_f64(py).min(ny - 2);
        let fx = px - crate::convert::f64_from_usize(ix);
        let fy = py - crate::convert::f64_from_usize(iy);

        let v00 = self.values[[ix, iy]];
        let v10 = self.values[[ix + 1, iy]];
        let v01 = self.values[[ix, iy + 1]];
        let v11 = self.values[[ix + 1, iy + 1]];

        let v0 = v00 + fx * (v10 - v00);
        let v1 = v01 + fx * (v11 - v01);
        Ok(v0 + fy * (v1 - v0))
    }

    /// Returns the table's declared bounds as `(x_min, x_max, y_min, y_max)`.
    #[must_use]
    pub const fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.x_min, self.x_max, self.y_min, self.y_max)
    }
}

/// A small relative pad applied to post-filter field ranges before
/// building an interpolation table, so that a value exactly at the
/// observed extremum is never rejected by floating-point round-off.
#[must_use]
pub fn pad_range(min: f64, max: f64, relative_pad: f64) -> (f64, f64) {
    let span = (max - min).abs().max(1.0e-12);
    (min - relative_pad * span, max + relative_pad * span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn table1d_reproduces_linear_function_exactly() {
        let table = Table1D::build(0.0, 10.0, 11, |x| 2.0 * x + 1.0).unwrap();
        for x in [0.0, 2.5, 5.0, 7.25, 10.0] {
            assert_approx_eq!(f64, table.lookup(x).unwrap(), 2.0 * x + 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn table1d_rejects_out_of_bounds() {
        let table = Table1D::build(0.0, 1.0, 4, |x| x).unwrap();
        assert!(table.lookup(-0.1).is_err());
        assert!(table.lookup(1.1).is_err());
    }

    #[test]
    fn table2d_reproduces_bilinear_function_exactly() {
        let table = Table2D::build(0.0, 1.0, 5, 0.0, 2.0, 7, |x, y| 3.0 * x + 5.0 * y).unwrap();
        assert_approx_eq!(
            f64,
            table.lookup(0.3, 1.2).unwrap(),
            3.0 * 0.3 + 5.0 * 1.2,
            epsilon = 1e-9
        );
    }

    #[test]
    fn pad_range_widens_symmetrically() {
        let (lo, hi) = pad_range(1.0, 3.0, 0.01);
        assert!(lo < 1.0 && hi > 3.0);
    }
}
