//! Grid / FFT substrate (§4.1): 3-D real↔complex transforms and the
//! tophat/Gaussian/annulus/exponential k-space filters used by the
//! spin-temperature and ionisation components.
//!
//! The forward transform is built from three 1-D passes: a real-to-complex
//! pass along the innermost axis (`realfft`) followed by two
//! complex-to-complex passes along the remaining axes (`rustfft`, the
//! kernel `realfft` itself is built on), exactly as a separable 3-D FFT
//! is assembled from 1-D transforms. A [`KGrid`] owns both the complex
//! buffer and the dimensions needed to invert it, and forbids
//! constructing one by any path other than [`fft_forward`].

use crate::error::{Error, Result};
use ndarray::Array3;
use realfft::num_complex::Complex64;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// A real-space lattice of shape `(n, n, n_z)`.
pub type RealGrid = Array3<f64>;

/// The canonical real-to-complex k-space layout: shape
/// `(n, n, n_z / 2 + 1)`. Only [`fft_forward`] constructs one; callers
/// never pun between the real and complex interpretation of the
/// underlying memory outside this module's accessors.
#[derive(Clone, Debug)]
pub struct KGrid {
    data: Array3<Complex64>,
    /// Real-space shape this k-grid corresponds to.
    real_shape: (usize, usize, usize),
    /// Comoving box size along each axis (same units as filter radii).
    box_size: (f64, f64, f64),
}

impl KGrid {
    /// Returns the complex amplitude at k-space index `(i, j, m)`.
    #[must_use]
    pub fn complex(&self, i: usize, j: usize, m: usize) -> Complex64 {
        self.data[[i, j, m]]
    }

    /// Returns the real-space shape this k-grid was transformed from.
    #[must_use]
    pub const fn real_shape(&self) -> (usize, usize, usize) {
        self.real_shape
    }

    fn k_component(index: usize, n: usize, box_len: f64) -> f64 {
        let dk = 2.0 * PI / box_len;
        let signed = if index <= n / 2 {
            crate::convert::f64_from_usize(index)
        } else {
            crate::convert::f64_from_usize(index) - crate::convert::f64_from_usize(n)
        };
        signed * dk
    }

    /// Returns the wavevector magnitude `|k|` at k-space index `(i, j, m)`.
    #[must_use]
    pub fn k_magnitude(&self, i: usize, j: usize, m: usize) -> f64 {
        let (nx, ny, nz) = self.real_shape;
        let (lx, ly, lz) = self.box_size;
        let kx = Self::k_component(i, nx, lx);
        let ky = Self::k_component(j, ny, ly);
        // The real-to-complex axis never wraps: m directly indexes
        // non-negative frequencies in [0, nz/2].
        let kz = crate::convert::f64_from_usize(m) * 2.0 * PI / lz;
        let _ = nz;
        (kx * kx + ky * ky + kz * kz).sqrt()
    }

    /// Multiplies every mode by `kernel(|k|)`, returning a new [`KGrid`].
    #[must_use]
    pub fn map_modes(&self, kernel: impl Fn(f64) -> f64 + Sync + Send) -> Self {
        let mut out = self.data.clone();
        let (nx, ny, nz) = self.data.dim();
        for i in 0..nx {
            for j in 0..ny {
                for m in 0..nz {
                    let k = self.k_magnitude(i, j, m);
                    out[[i, j, m]] *= kernel(k);
                }
            }
        }
        Self {
            data: out,
            real_shape: self.real_shape,
            box_size: self.box_size,
        }
    }
}

/// The kind of Fourier-space filter applied by [`filter`].
#[derive(Clone, Copy, Debug)]
pub enum FilterSpec {
    /// Spherical tophat of radius `r`, analytic Fourier kernel.
    TophatReal(f64),
    /// Sharp-k (k-space) tophat: unity for `k <= 1/r`, zero above.
    TophatK(f64),
    /// Gaussian smoothing with scale radius `r`.
    Gaussian(f64),
    /// Spherical annulus between `r_in` and `r_out` (tophat(r_out) minus
    /// tophat(r_in), renormalised by shell volume). Used by the
    /// spin-temperature engine to isolate a single shell's contribution.
    Annulus(f64, f64),
    /// Exponential-decay attenuation with scale `arg`.
    Exp(f64),
}

fn tophat_real_kernel(k: f64, r: f64) -> f64 {
    let kr = k * r;
    if kr < 1.0e-4 {
        1.0
    } else {
        3.0 * (kr.sin() - kr * kr.cos()) / kr.powi(3)
    }
}

fn gaussian_kernel(k: f64, r: f64) -> f64 {
    (-0.5 * k * k * r * r).exp()
}

fn exp_kernel(k: f64, scale: f64) -> f64 {
    // Fourier transform of a spherically symmetric exponential profile
    // exp(-x/scale): 1 / (1 + (k*scale)^2)^2.
    1.0 / (1.0 + (k * scale).powi(2)).powi(2)
}

fn annulus_kernel(k: f64, r_in: f64, r_out: f64) -> f64 {
    let vol_out = r_out.powi(3);
    let vol_in = r_in.powi(3);
    let denom = vol_out - vol_in;
    if denom.abs() < 1.0e-300 {
        return 0.0;
    }
    (vol_out * tophat_real_kernel(k, r_out) - vol_in * tophat_real_kernel(k, r_in)) / denom
}

/// Multiplies `k_grid` by the kernel corresponding to `spec`. A filter
/// whose characteristic radius is smaller than a resolved cell is a
/// no-op (the kernel evaluates to ~1 everywhere that matters).
#[must_use]
pub fn filter(k_grid: &KGrid, spec: FilterSpec) -> KGrid {
    match spec {
        FilterSpec::TophatReal(r) => k_grid.map_modes(move |k| tophat_real_kernel(k, r)),
        FilterSpec::TophatK(r) => {
            let k_cut = 1.0 / r;
            k_grid.map_modes(move |k| if k <= k_cut { 1.0 } else { 0.0 })
        }
        FilterSpec::Gaussian(r) => k_grid.map_modes(move |k| gaussian_kernel(k, r)),
        FilterSpec::Annulus(r_in, r_out) => {
            k_grid.map_modes(move |k| annulus_kernel(k, r_in, r_out))
        }
        FilterSpec::Exp(scale) => k_grid.map_modes(move |k| exp_kernel(k, scale)),
    }
}

/// Owns the (re-usable) FFT plans for a fixed lattice shape. Building this
/// once per snapshot and sharing it across every `fft_forward`/
/// `fft_inverse` call avoids re-planning on every shell/R iteration.
pub struct FftEngine {
    shape: (usize, usize, usize),
    box_size: (f64, f64, f64),
    r2c: Arc<dyn RealToComplex<f64>>,
    c2r: Arc<dyn ComplexToReal<f64>>,
    cfft_x_fwd: Arc<dyn Fft<f64>>,
    cfft_x_inv: Arc<dyn Fft<f64>>,
    cfft_y_fwd: Arc<dyn Fft<f64>>,
    cfft_y_inv: Arc<dyn Fft<f64>>,
}

impl FftEngine {
    /// Builds an engine for lattices of shape `(n, n, n_z)` inside a box
    /// of comoving size `box_size` (same units along all three axes,
    /// though they need not be numerically equal when `n_z != n`).
    #[must_use]
    pub fn new(n: usize, n_z: usize, box_size: (f64, f64, f64)) -> Self {
        let mut real_planner = RealFftPlanner::<f64>::new();
        let r2c = real_planner.plan_fft_forward(n_z);
        let c2r = real_planner.plan_fft_inverse(n_z);

        let mut complex_planner = FftPlanner::<f64>::new();
        let cfft_x_fwd = complex_planner.plan_fft_forward(n);
        let cfft_x_inv = complex_planner.plan_fft_inverse(n);
        let cfft_y_fwd = complex_planner.plan_fft_forward(n);
        let cfft_y_inv = complex_planner.plan_fft_inverse(n);

        Self {
            shape: (n, n, n_z),
            box_size,
            r2c,
            c2r,
            cfft_x_fwd,
            cfft_x_inv,
            cfft_y_fwd,
            cfft_y_inv,
        }
    }

    /// Forward real-to-complex transform. Divides by the total cell count
    /// so that `inverse(forward(x)) = x` to floating precision (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Value`] if `real.dim()` does not match the shape
    /// this engine was built for.
    pub fn fft_forward(&self, real: &RealGrid) -> Result<KGrid> {
        let (nx, ny, nz) = real.dim();
        if (nx, ny, nz) != self.shape {
            return Err(Error::Value(format!(
                "fft_forward: grid shape {:?} does not match engine shape {:?}",
                (nx, ny, nz),
                self.shape
            )));
        }

        let n_freq = nz / 2 + 1;
        let mut spectrum = Array3::<Complex64>::zeros((nx, ny, n_freq));

        // Step 1: real-to-complex along the innermost (contiguous) axis.
        let mut in_buf = self.r2c.make_input_vec();
        let mut out_buf = self.r2c.make_output_vec();
        for i in 0..nx {
            for j in 0..ny {
                in_buf.copy_from_slice(real.index_axis(ndarray::Axis(0), i).row(j).as_slice().unwrap());
                self.r2c
                    .process(&mut in_buf, &mut out_buf)
                    .map_err(|e| Error::Value(format!("r2c plan failed: {e}")))?;
                for m in 0..n_freq {
                    spectrum[[i, j, m]] = out_buf[m];
                }
            }
        }

        // Step 2: complex-to-complex along the second axis.
        let mut lane = vec![Complex64::default(); ny];
        for i in 0..nx {
            for m in 0..n_freq {
                for j in 0..ny {
                    lane[j] = spectrum[[i, j, m]];
                }
                self.cfft_y_fwd.process(&mut lane);
                for j in 0..ny {
                    spectrum[[i, j, m]] = lane[j];
                }
            }
        }

        // Step 3: complex-to-complex along the outermost axis.
        let mut lane = vec![Complex64::default(); nx];
        for j in 0..ny {
            for m in 0..n_freq {
                for i in 0..nx {
                    lane[i] = spectrum[[i, j, m]];
                }
                self.cfft_x_fwd.process(&mut lane);
                for i in 0..nx {
                    spectrum[[i, j, m]] = lane[i];
                }
            }
        }

        let norm = crate::convert::f64_from_usize(nx * ny * nz);
        spectrum.mapv_inplace(|c| c / norm);

        Ok(KGrid {
            data: spectrum,
            real_shape: (nx, ny, nz),
            box_size: self.box_size,
        })
    }

    /// Inverse complex-to-real transform.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Value`] if `k_grid`'s real shape does not match
    /// the shape this engine was built for.
    pub fn fft_inverse(&self, k_grid: &KGrid) -> Result<RealGrid> {
        if k_grid.real_shape != self.shape {
            return Err(Error::Value(format!(
                "fft_inverse: grid shape {:?} does not match engine shape {:?}",
                k_grid.real_shape, self.shape
            )));
        }
        let (nx, ny, nz) = self.shape;
        let n_freq = nz / 2 + 1;
        let mut spectrum = k_grid.data.clone();

        // Inverse of step 3.
        let mut lane = vec![Complex64::default(); nx];
        for j in 0..ny {
            for m in 0..n_freq {
                for i in 0..nx {
                    lane[i] = spectrum[[i, j, m]];
                }
                self.cfft_x_inv.process(&mut lane);
                for i in 0..nx {
                    spectrum[[i, j, m]] = lane[i];
                }
            }
        }

        // Inverse of step 2.
        let mut lane = vec![Complex64::default(); ny];
        for i in 0..nx {
            for m in 0..n_freq {
                for j in 0..ny {
                    lane[j] = spectrum[[i, j, m]];
                }
                self.cfft_y_inv.process(&mut lane);
                for j in 0..ny {
                    spectrum[[i, j, m]] = lane[j];
                }
            }
        }

        // Inverse of step 1: complex-to-real along the innermost axis.
        let mut out = RealGrid::zeros((nx, ny, nz));
        let mut in_buf = self.c2r.make_input_vec();
        let mut out_buf = self.c2r.make_output_vec();
        for i in 0..nx {
            for j in 0..ny {
                for m in 0..n_freq {
                    in_buf[m] = spectrum[[i, j, m]];
                }
                self.c2r
                    .process(&mut in_buf, &mut out_buf)
                    .map_err(|e| Error::Value(format!("c2r plan failed: {e}")))?;
                for (z, &v) in out_buf.iter().enumerate() {
                    out[[i, j, z]] = v;
                }
            }
        }

        Ok(out)
    }
}

/// Clips `grid` in place to `[lo, hi]` and returns the post-clip
/// `(min, max)`.
pub fn clip_and_extrema(grid: &mut RealGrid, lo: f64, hi: f64) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    grid.mapv_inplace(|v| {
        let clipped = v.clamp(lo, hi);
        if clipped < min {
            min = clipped;
        }
        if clipped > max {
            max = clipped;
        }
        clipped
    });
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn fft_round_trip() {
        let n = 8;
        let engine = FftEngine::new(n, n, (n as f64, n as f64, n as f64));
        let mut real = RealGrid::zeros((n, n, n));
        let mut counter = 0.0;
        real.mapv_inplace(|_| {
            counter += 1.0;
            (counter * 0.37).sin()
        });

        let k = engine.fft_forward(&real).unwrap();
        let back = engine.fft_inverse(&k).unwrap();

        for (a, b) in real.iter().zip(back.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn tophat_is_unity_at_zero_k() {
        assert_approx_eq!(f64, tophat_real_kernel(0.0, 2.0), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn clip_and_extrema_clamps_density_floor() {
        let mut grid = RealGrid::from_elem((2, 2, 2), -2.0);
        let (min, max) = clip_and_extrema(&mut grid, -1.0 + 1e-6, 1.0e6);
        assert_approx_eq!(f64, min, -1.0 + 1e-6, epsilon = 1e-12);
        assert_approx_eq!(f64, max, -1.0 + 1e-6, epsilon = 1e-12);
        assert!(grid.iter().all(|&v| v >= -1.0));
    }
}
