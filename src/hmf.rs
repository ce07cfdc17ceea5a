//! Conditional & unconditional mass-function kernels (§4.2, §4.7).
//!
//! Implements the excursion-set closed forms (Press & Schechter / Lacey &
//! Cole conditional collapsed fraction) used to build the regular-grid
//! [`crate::interp::Table1D`]/[`crate::interp::Table2D`] tables consumed
//! by the halo-box gridder and the ionisation solver. These are
//! simplified, literature-grounded forms (§4.7), not a byte-exact port of
//! a specific external HMF package.

use crate::cosmology;
use crate::params::CosmoParams;
use itertools::Itertools;
use libm::erfc;

/// The critical linear overdensity for spherical collapse.
pub const DELTA_CRIT: f64 = 1.686;

/// Conditional collapsed fraction of mass above `m_min`, in a region of
/// mean density contrast `delta0` and variance `sigma0^2` (the variance
/// of the smoothing scale the region was filtered at), using the Lacey &
/// Cole (1993) excursion-set closed form.
///
/// `growth` is `D(z)`; `delta0` and `sigma0` are evaluated at `z = 0`
/// (the growth factor brings the barrier to the correct epoch), matching
/// the convention used throughout §4.4/§4.6 where the perturbed density
/// field and its variance are stored at `z=0` and grown forward.
#[must_use]
pub fn collapsed_fraction_conditional(
    cosmo: &CosmoParams,
    delta0: f64,
    sigma0: f64,
    m_min: f64,
    growth: f64,
) -> f64 {
    let sigma_min = cosmology::sigma(cosmo, m_min);
    let variance_diff = sigma_min.mul_add(sigma_min, -(sigma0 * sigma0));
    if variance_diff <= 0.0 {
        return if delta0 >= DELTA_CRIT / growth { 1.0 } else { 0.0 };
    }
    let barrier = DELTA_CRIT / growth - delta0;
    if barrier <= 0.0 {
        return 1.0;
    }
    let arg = barrier / (2.0 * variance_diff).sqrt();
    erfc(arg).clamp(0.0, 1.0)
}

/// Unconditional collapsed fraction above `m_min` at redshift `z`
/// (Press & Schechter 1974).
#[must_use]
pub fn fcoll_general(cosmo: &CosmoParams, z: f64, m_min: f64) -> f64 {
    let sigma_min = cosmology::sigma(cosmo, m_min);
    let growth = cosmology::growth(cosmo, z);
    let arg = DELTA_CRIT / (growth * sigma_min * std::f64::consts::SQRT_2);
    erfc(arg).clamp(0.0, 1.0)
}

/// The ionising-photon-weighted collapsed fraction (`Nion_General`,
/// §4.2/§6): `Fcoll` weighted by the mass-dependent stellar/escape
/// fraction power laws, evaluated via an upper-mass turnover-corrected
/// mean. `m_turn` suppresses collapse below the turnover mass with the
/// usual `exp(-m_turn/m)` duty-cycle factor, approximated here by
/// evaluating the turnover at the effective collapsing mass scale
/// `m_min` itself (a standard mean-field substitute for the full mass
/// integral).
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn nion_general(
    cosmo: &CosmoParams,
    z: f64,
    m_min: f64,
    m_max: f64,
    m_turn: f64,
    alpha_star: f64,
    alpha_esc: f64,
    f_star10: f64,
    f_esc10: f64,
) -> f64 {
    let n_samples = 64;
    let ln_min = m_min.max(1.0).ln();
    let ln_max = m_max.max(m_min * 1.0001).ln();
    let dln = (ln_max - ln_min) / crate::convert::f64_from_usize(n_samples - 1);
    let growth = cosmology::growth(cosmo, z);

    let samples: Vec<(f64, f64)> = (0..n_samples)
        .map(|i| {
            let ln_m = ln_min + crate::convert::f64_from_usize(i) * dln;
            let m = ln_m.exp();
            (m, cosmology::sigma(cosmo, m))
        })
        .collect();

    // dln(sigma)/dln(M) via a central difference between neighbouring
    // samples (itertools::tuple_windows pairs each sample with the next).
    let mut total = 0.0;
    for (i, ((m, sigma_m), (m_next, sigma_next))) in samples.iter().copied().tuple_windows().enumerate() {
        let dln_sigma_dln_m = ((sigma_next / sigma_m).ln() / (m_next / m).ln()).abs().max(1.0e-3);

        let nu = DELTA_CRIT / (growth * sigma_m);
        let multiplicity =
            (2.0 / std::f64::consts::PI).sqrt() * nu * (-0.5 * nu * nu).exp() * dln_sigma_dln_m;

        let f_star = (f_star10 * (m / 1.0e10).powf(alpha_star)).min(1.0) * (-m_turn / m).exp();
        let f_esc = (f_esc10 * (m / 1.0e10).powf(alpha_esc)).min(1.0);

        let weight = if i == 0 || i == samples.len() - 2 { 0.5 } else { 1.0 };
        total += weight * multiplicity * f_star * f_esc * dln;
    }
    total.max(0.0)
}

/// Unconditional star-formation-rate density (`SFRD_General`), the
/// `Fcoll`-weighted star-formation efficiency divided by a fiducial
/// timescale.
#[must_use]
pub fn sfrd_general(
    cosmo: &CosmoParams,
    z: f64,
    m_min: f64,
    m_turn: f64,
    alpha_star: f64,
    f_star10: f64,
) -> f64 {
    nion_general(cosmo, z, m_min, 1.0e16, m_turn, alpha_star, 0.0, f_star10, 1.0)
}

/// Conditional `Nion` on a (δ, log10 M_turn) cell, used to build the
/// [`crate::interp::Table2D`] consumed inside the ionisation R-loop
/// (§4.6 step 3).
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn nion_conditional(
    cosmo: &CosmoParams,
    delta: f64,
    log10_m_turn: f64,
    growth: f64,
    m_min: f64,
    m_max: f64,
    sigma_max: f64,
    alpha_star: f64,
    alpha_esc: f64,
    f_star10: f64,
    f_esc10: f64,
) -> f64 {
    let m_turn = 10f64.powf(log10_m_turn);
    let fcoll = collapsed_fraction_conditional(cosmo, delta, sigma_max, m_min.max(m_turn * 0.1), growth);
    let m_eff = (m_min * m_max).sqrt().max(m_turn);
    let f_star = (f_star10 * (m_eff / 1.0e10).powf(alpha_star)).min(1.0) * (-m_turn / m_eff).exp();
    let f_esc = (f_esc10 * (m_eff / 1.0e10).powf(alpha_esc)).min(1.0);
    (fcoll * f_star * f_esc).max(0.0)
}

/// Conditional SFRD analog of [`nion_conditional`] (no escape fraction).
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn sfrd_conditional(
    cosmo: &CosmoParams,
    delta: f64,
    log10_m_turn: f64,
    growth: f64,
    m_min: f64,
    m_max: f64,
    sigma_max: f64,
    alpha_star: f64,
    f_star10: f64,
) -> f64 {
    nion_conditional(
        cosmo,
        delta,
        log10_m_turn,
        growth,
        m_min,
        m_max,
        sigma_max,
        alpha_star,
        0.0,
        f_star10,
        1.0,
    )
}

/// The non-mass-dependent-ζ path: collapsed fraction above a fixed
/// turnover, as a function of `delta` alone (§4.3/§9 Open Question on
/// `calculate_sfrd_from_grid`).
#[must_use]
pub fn fcoll_delta(cosmo: &CosmoParams, delta: f64, sigma0: f64, m_min: f64, growth: f64) -> f64 {
    collapsed_fraction_conditional(cosmo, delta, sigma0, m_min, growth)
}

/// Bisects for the halo mass at which `sigma(M) = target_sigma`,
/// the closed-set-lookup analog of `Mass_limit_bisection` (§6): used to
/// translate a turnover mass threshold into a consistent mass-function
/// integration limit.
#[must_use]
pub fn mass_limit_bisection(
    cosmo: &CosmoParams,
    mut lo: f64,
    mut hi: f64,
    target_sigma: f64,
) -> f64 {
    // sigma(M) is monotonically decreasing in M.
    for _ in 0..64 {
        let mid = (lo * hi).sqrt();
        if cosmology::sigma(cosmo, mid) > target_sigma {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo * hi).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn fcoll_general_increases_toward_low_redshift() {
        let cosmo = CosmoParams::default();
        let low_z = fcoll_general(&cosmo, 6.0, 1.0e8);
        let high_z = fcoll_general(&cosmo, 15.0, 1.0e8);
        assert!(low_z > high_z);
    }

    #[test]
    fn collapsed_fraction_is_bounded() {
        let cosmo = CosmoParams::default();
        let growth = cosmology::growth(&cosmo, 8.0);
        let sigma0 = cosmology::sigma(&cosmo, 1.0e11);
        for delta in [-0.9, -0.2, 0.0, 0.5, 2.0, 5.0] {
            let f = collapsed_fraction_conditional(&cosmo, delta, sigma0, 1.0e8, growth);
            assert!((0.0..=1.0).contains(&f));
        }
    }

    #[test]
    fn collapsed_fraction_increases_with_delta() {
        let cosmo = CosmoParams::default();
        let growth = cosmology::growth(&cosmo, 8.0);
        let sigma0 = cosmology::sigma(&cosmo, 1.0e11);
        let f_low = collapsed_fraction_conditional(&cosmo, -0.5, sigma0, 1.0e8, growth);
        let f_high = collapsed_fraction_conditional(&cosmo, 2.0, sigma0, 1.0e8, growth);
        assert!(f_high >= f_low);
    }

    #[test]
    fn nion_general_is_nonnegative_and_finite() {
        let cosmo = CosmoParams::default();
        let n = nion_general(&cosmo, 8.0, 1.0e8, 1.0e14, 1.0e9, 0.5, -0.5, 0.05, 0.1);
        assert!(n.is_finite());
        assert!(n >= 0.0);
    }

    #[test]
    fn mass_limit_bisection_converges() {
        let cosmo = CosmoParams::default();
        let target = cosmology::sigma(&cosmo, 5.0e9);
        let m = mass_limit_bisection(&cosmo, 1.0e6, 1.0e14, target);
        assert_approx_eq!(f64, m, 5.0e9, epsilon = 5.0e9 * 1.0e-3);
    }
}
