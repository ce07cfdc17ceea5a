//! Excursion-set filter radius schedule (§3, §4.6).
//!
//! The ionisation solver scans filter radii from the box-scale down to
//! single-cell resolution, shrinking geometrically so that roughly the
//! same number of steps covers a box of any size (`R_DELTA` per §3).

/// The excursion-set radius ratio between successive steps.
pub const R_DELTA: f64 = 1.1;

/// Builds the descending radius schedule from `r_max` down to (but not
/// below) `r_cell`, inclusive of both endpoints.
#[must_use]
pub fn radius_schedule(r_max: f64, r_cell: f64) -> Vec<f64> {
    assert!(r_max >= r_cell, "r_max must be >= r_cell");
    let mut radii = Vec::new();
    let mut r = r_max;
    while r > r_cell {
        radii.push(r);
        r /= R_DELTA;
    }
    radii.push(r_cell);
    radii
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_strictly_decreasing() {
        let radii = radius_schedule(50.0, 1.0);
        for pair in radii.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn schedule_ends_at_cell_radius() {
        let radii = radius_schedule(50.0, 1.0);
        assert_eq!(*radii.last().unwrap(), 1.0);
        assert_eq!(radii[0], 50.0);
    }

    #[test]
    fn degenerate_schedule_is_a_single_step() {
        let radii = radius_schedule(1.0, 1.0);
        assert_eq!(radii, vec![1.0]);
    }
}
