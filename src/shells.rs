//! Lyman-series shell schedule (§4.3).
//!
//! The spin-temperature engine sums the Wouthuysen-Field coupling and
//! X-ray heating contributions of each Lyman-n band over a shell of
//! comoving radii bounded by the redshift at which a photon emitted at
//! the rest-frame Lyman-n frequency has redshifted past the Lyman limit
//! (`nu_tau_one`, §4.7). Each shell is filtered out of the source field
//! with [`crate::grid::FilterSpec::Annulus`].

use crate::cosmology;
use crate::frequency;
use crate::params::CosmoParams;
use arrayvec::ArrayVec;

/// Upper bound on the number of shells a schedule can hold, sized for
/// [`N_LYMAN_MAX`] Lyman series members.
const MAX_SHELLS: usize = 32;

/// Highest Lyman series member considered before recycling contributions
/// become negligible (§4.3).
pub const N_LYMAN_MAX: u32 = 23;

/// One Lyman-n shell: the comoving radius interval sourced by photons
/// redshifting through the `[nu_n, nu_(n+1))` band.
#[derive(Clone, Copy, Debug)]
pub struct Shell {
    /// Lyman series member this shell sources.
    pub n: u32,
    /// Source redshift at the shell's near (larger) radius.
    pub z_near: f64,
    /// Source redshift at the shell's far (smaller) radius, i.e. the
    /// horizon redshift beyond which the photon has already redshifted
    /// into the Lyman limit.
    pub z_far: f64,
    /// Comoving radius of the shell's inner edge.
    pub r_inner: f64,
    /// Comoving radius of the shell's outer edge.
    pub r_outer: f64,
    /// Fractional coverage of the shell's outer edge that lies inside
    /// the valid horizon, `1.0` unless truncated by `z_heat_max` and
    /// [`crate::params::SimulationFlags::partial_volume_weighting`] is
    /// set (§9 Open Question).
    pub edge_weight: f64,
}

/// Comoving distance (Mpc) travelled between redshifts `z_lo < z_hi`,
/// `c * integral_{z_lo}^{z_hi} dz' / H(z')`, by Simpson's rule.
#[must_use]
fn comoving_distance(cosmo: &CosmoParams, z_lo: f64, z_hi: f64) -> f64 {
    const C_KM_S: f64 = 2.9979e5;
    const C_MPC_PER_S: f64 = C_KM_S * 3.2408e-20;
    let n = 16;
    let h = (z_hi - z_lo) / crate::convert::f64_from_usize(n);
    let integrand = |z: f64| 1.0 / cosmology::hubble(cosmo, z);
    let mut sum = integrand(z_lo) + integrand(z_hi);
    for i in 1..n {
        let z = z_lo + crate::convert::f64_from_usize(i) * h;
        let weight = if i % 2 == 0 { 2.0 } else { 4.0 };
        sum += weight * integrand(z);
    }
    C_MPC_PER_S * sum * h / 3.0
}

/// Builds the shell schedule for a source at redshift `z`, truncated at
/// `z_heat_max` (beyond which the closed-form Recfast initial conditions
/// apply instead of a further integration, §4.5).
#[must_use]
pub fn build_shell_schedule(
    cosmo: &CosmoParams,
    z: f64,
    z_heat_max: f64,
    partial_volume_weighting: bool,
) -> ArrayVec<Shell, MAX_SHELLS> {
    let mut shells = ArrayVec::new();
    for n in 2..N_LYMAN_MAX {
        let z_near = frequency::nu_tau_one(z, frequency::nu_n(n));
        let mut z_far = frequency::nu_tau_one(z, frequency::nu_n(n + 1));
        if z_near <= z {
            // The band's near edge has already redshifted past the
            // observer; no shell to source from this n.
            continue;
        }
        let mut edge_weight = 1.0;
        if z_far > z_heat_max {
            if !partial_volume_weighting {
                break;
            }
            // Truncate the far edge at z_heat_max and weight the shell
            // by the fraction of its comoving volume that survives.
            let full_span = comoving_distance(cosmo, z, z_far);
            let truncated_span = comoving_distance(cosmo, z, z_heat_max.min(z_far));
            edge_weight = (truncated_span / full_span).clamp(0.0, 1.0);
            z_far = z_heat_max.min(z_far);
        }
        let r_inner = comoving_distance(cosmo, z, z_near);
        let r_outer = comoving_distance(cosmo, z, z_far);
        shells.push(Shell {
            n,
            z_near,
            z_far,
            r_inner,
            r_outer,
            edge_weight,
        });
        if z_far >= z_heat_max {
            break;
        }
    }
    shells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CosmoParams;

    #[test]
    fn shells_have_increasing_radius_with_n() {
        let cosmo = CosmoParams::default();
        let shells = build_shell_schedule(&cosmo, 8.0, 35.0, true);
        assert!(shells.len() > 1);
        for pair in shells.windows(2) {
            assert!(pair[1].r_inner >= pair[0].r_inner);
        }
    }

    #[test]
    fn shell_radii_are_nonnegative_and_ordered() {
        let cosmo = CosmoParams::default();
        let shells = build_shell_schedule(&cosmo, 8.0, 35.0, true);
        for shell in &shells {
            assert!(shell.r_outer >= shell.r_inner);
            assert!(shell.r_inner >= 0.0);
            assert!((0.0..=1.0).contains(&shell.edge_weight));
        }
    }

    #[test]
    fn disabling_partial_volume_weighting_truncates_schedule() {
        let cosmo = CosmoParams::default();
        let with_weighting = build_shell_schedule(&cosmo, 8.0, 35.0, true);
        let without_weighting = build_shell_schedule(&cosmo, 8.0, 35.0, false);
        assert!(without_weighting.len() <= with_weighting.len());
    }
}
