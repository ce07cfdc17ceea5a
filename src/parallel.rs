//! Parallel-map/reduction abstraction (§5, §9 Design Notes).
//!
//! Per-cell loops whose body only reads the current cell's slice of the
//! input grids (the halo gridder's CMF path, the spin-temperature
//! backward-difference step) go through these helpers rather than
//! reaching for `rayon` directly, so the commutative/associative-reduction
//! contract is enforced in one place. Loops with a same-pass sequential
//! dependency across cells (the ionisation R-loop's first-crossing
//! paint, which mutates a shared `x_h` grid read by later cells in the
//! same step) stay serial rather than forcing that dependency through an
//! unsafe parallel aliasing pattern.

use rayon::prelude::*;

/// Runs `body` for every index in `0..len` in parallel and folds the
/// results with `reduce`, which must be commutative and associative
/// (e.g. `f64::add`, `f64::min`, `f64::max`).
pub fn parallel_reduce<T: Send>(
    len: usize,
    identity: impl Fn() -> T + Sync + Send,
    body: impl Fn(usize) -> T + Sync,
    reduce: impl Fn(T, T) -> T + Sync + Send,
) -> T {
    (0..len)
        .into_par_iter()
        .map(body)
        .reduce(identity, reduce)
}

/// Commutative sum reduction over `0..len`.
pub fn parallel_sum(len: usize, body: impl Fn(usize) -> f64 + Sync) -> f64 {
    parallel_reduce(len, || 0.0, body, |a, b| a + b)
}

/// Commutative min/max reduction over `0..len`.
pub fn parallel_min_max(len: usize, body: impl Fn(usize) -> f64 + Sync) -> (f64, f64) {
    parallel_reduce(
        len,
        || (f64::INFINITY, f64::NEG_INFINITY),
        |i| {
            let v = body(i);
            (v, v)
        },
        |a, b| (a.0.min(b.0), a.1.max(b.1)),
    )
}

/// Runs `body` for every index in `0..len` in parallel, collecting the
/// results in order. Used by per-cell loops whose outputs are independent
/// (no cell's computation reads another cell's output from the same
/// pass), so the writeback into the owning grid can stay a plain serial
/// zip without any shared mutable state crossing thread boundaries.
pub fn parallel_map<T: Send>(len: usize, body: impl Fn(usize) -> T + Sync) -> Vec<T> {
    (0..len).into_par_iter().map(body).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_matches_serial() {
        let values: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let expected: f64 = values.iter().sum();
        let got = parallel_sum(values.len(), |i| values[i]);
        assert!((got - expected).abs() < 1e-6);
    }

    #[test]
    fn min_max_matches_serial() {
        let values: Vec<f64> = vec![3.0, -1.0, 7.0, 2.0];
        let (min, max) = parallel_min_max(values.len(), |i| values[i]);
        assert_eq!(min, -1.0);
        assert_eq!(max, 7.0);
    }

    #[test]
    fn map_preserves_order() {
        let out = parallel_map(5, |i| i * i);
        assert_eq!(out, vec![0, 1, 4, 9, 16]);
    }
}
