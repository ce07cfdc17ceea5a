//! Lyman-series frequency-integral kernels (§4.3, §4.7).
//!
//! These provide the spectral pieces consumed while building a shell's
//! source table: the stellar spectrum integrated over a Lyman-n
//! sub-band, the recycling fraction into Lyman-alpha, and the photon
//! horizon (`nu_tau_one`) used to cap each shell's outer frequency.

use crate::cosmology;
use crate::params::CosmoParams;

/// Rest-frame frequency of the Lyman limit, in Hz.
pub const NU_LL: f64 = 3.288e15;

/// Rest-frame frequency of Lyman-alpha, in Hz.
pub const NU_LYA: f64 = 2.466e15;

/// Rest-frame frequency of the Lyman-Werner band's lower edge (11.2 eV),
/// below which photodissociating H2 is no longer possible.
pub const NU_LW_MIN: f64 = NU_LL * (11.2 / 13.6);

/// Planck constant times the ionisation energy of hydrogen, used only as
/// a labelled constant for documentation purposes in callers.
pub const E_LL_EV: f64 = 13.6;

/// The rest-frame frequency of the Lyman-n line, via the hydrogen Rydberg
/// series `nu_n = nu_LL * (1 - 1/n^2)`.
#[must_use]
pub fn nu_n(n: u32) -> f64 {
    let n = f64::from(n);
    NU_LL * (1.0 - 1.0 / (n * n))
}

/// Recycling fraction of photons emitted between Lyman-n and Lyman-(n+1)
/// that cascade down to Lyman-alpha (Pritchard & Furlanetto 2006 fitting
/// values for `n = 2..=23`, extended by the `n=2` value beyond).
#[must_use]
pub fn frecycle(n: u32) -> f64 {
    const TABLE: [f64; 22] = [
        1.0000, 0.2609, 0.3078, 0.3259, 0.3353, 0.3410, 0.3448, 0.3476, 0.3496, 0.3512, 0.3524,
        0.3535, 0.3543, 0.3550, 0.3556, 0.3561, 0.3565, 0.3569, 0.3572, 0.3575, 0.3578, 0.3580,
    ];
    let idx = n.saturating_sub(2) as usize;
    TABLE.get(idx).copied().unwrap_or(0.3580)
}

/// The stellar emissivity spectrum, photons per baryon per unit
/// frequency, using the Pop II/Pop III power-law continuum of Barkana &
/// Loeb (2005): `~ nu^{alpha}` normalised so the integral from Lyman-alpha
/// to the Lyman limit gives `pop_ion` photons per stellar baryon.
#[must_use]
pub fn spectral_emissivity(nu: f64, pop_ion: f64, is_mini: bool) -> f64 {
    let alpha = if is_mini { 1.29 } else { 0.14 };
    let norm = pop_ion * (alpha + 1.0) / (NU_LL.powf(alpha + 1.0) - NU_LYA.powf(alpha + 1.0));
    norm * nu.powf(alpha)
}

/// Integrates the stellar spectrum between `nu_lo` and `nu_hi` using
/// Simpson's rule on `n_samples` (odd) points.
#[must_use]
pub fn integrate_over_nu(
    nu_lo: f64,
    nu_hi: f64,
    pop_ion: f64,
    is_mini: bool,
    n_samples: usize,
) -> f64 {
    let n_samples = if n_samples % 2 == 0 { n_samples + 1 } else { n_samples }.max(3);
    let h = (nu_hi - nu_lo) / crate::convert::f64_from_usize(n_samples - 1);
    let mut sum = spectral_emissivity(nu_lo, pop_ion, is_mini)
        + spectral_emissivity(nu_hi, pop_ion, is_mini);
    for i in 1..n_samples - 1 {
        let nu = nu_lo + crate::convert::f64_from_usize(i) * h;
        let weight = if i % 2 == 0 { 2.0 } else { 4.0 };
        sum += weight * spectral_emissivity(nu, pop_ion, is_mini);
    }
    sum * h / 3.0
}

/// The Gunn-Peterson optical depth to Lyman-alpha scattering at redshift
/// `z` for a fully-neutral IGM at the cosmic mean density, used as the
/// saturation floor of the Wouthuysen-Field coupling term.
#[must_use]
pub fn taugp(cosmo: &CosmoParams, z: f64) -> f64 {
    const TAU_GP_COEFF: f64 = 3.0e5; // dimensionless prefactor, literature-standard order of magnitude
    TAU_GP_COEFF * cosmo.omega_b() * cosmo.hubble_h() / cosmology::e_of_z(cosmo, z).max(1.0e-6)
        * ((1.0 + z) / 10.0).powf(1.5)
}

/// The redshift at which a photon emitted at `nu_rest` from a source at
/// `z_source` redshifts into the Lyman limit (`nu_tau_one`, the horizon
/// beyond which the IGM is opaque to that photon and it cannot
/// contribute to the current shell).
#[must_use]
pub fn nu_tau_one(z_source: f64, nu_rest: f64) -> f64 {
    (1.0 + z_source) * nu_rest / NU_LL - 1.0
}

/// Normalised X-ray continuum shape, `dN/dnu`, a power law
/// `nu^{-(alpha_x+1)}` between `nu_min` and `nu_max` (§4.5 step 2),
/// distinct from [`spectral_emissivity`]'s stellar Lyman-continuum
/// spectrum: the X-ray SED is sourced by HMXBs/ULXs, not massive stars,
/// and is normalised over the full X-ray band rather than the
/// Lyman-alpha-to-Lyman-limit stellar window.
#[must_use]
pub fn xray_spectral_shape(nu: f64, alpha_x: f64, nu_min: f64, nu_max: f64) -> f64 {
    let exponent = -(alpha_x + 1.0);
    if (exponent + 1.0).abs() < 1.0e-8 {
        1.0 / (nu * (nu_max / nu_min).ln())
    } else {
        let norm = (exponent + 1.0) / (nu_max.powf(exponent + 1.0) - nu_min.powf(exponent + 1.0));
        norm * nu.powf(exponent)
    }
}

/// Integrates [`xray_spectral_shape`] between `nu_lo` and `nu_hi` by
/// Simpson's rule, optionally weighting by `nu` (`energy_weighted`) to
/// get the heating integral rather than the bare photon-number integral
/// (§4.5 step 2).
#[must_use]
pub fn integrate_xray_band(
    nu_lo: f64,
    nu_hi: f64,
    alpha_x: f64,
    nu_min: f64,
    nu_max: f64,
    energy_weighted: bool,
    n_samples: usize,
) -> f64 {
    if nu_hi <= nu_lo {
        return 0.0;
    }
    let integrand = |nu: f64| {
        let shape = xray_spectral_shape(nu, alpha_x, nu_min, nu_max);
        if energy_weighted {
            shape * nu
        } else {
            shape
        }
    };
    let n_samples = if n_samples % 2 == 0 { n_samples + 1 } else { n_samples }.max(3);
    let h = (nu_hi - nu_lo) / crate::convert::f64_from_usize(n_samples - 1);
    let mut sum = integrand(nu_lo) + integrand(nu_hi);
    for i in 1..n_samples - 1 {
        let nu = nu_lo + crate::convert::f64_from_usize(i) * h;
        let weight = if i % 2 == 0 { 2.0 } else { 4.0 };
        sum += weight * integrand(nu);
    }
    sum * h / 3.0
}

/// The frequency at which the residual-neutral IGM between the source at
/// `z` and the observer reaches photoelectric optical depth unity to
/// hydrogen-ionising photons (§4.5 step 2's `max(nu_tau_one(...),
/// NU_X_THRESH)` lower integration limit), given the free-electron
/// fraction `x_e`. Uses the `sigma(nu) = sigma_HI * (nu/NU_LL)^-3`
/// power-law scaling of the hydrogen photoionisation cross-section
/// (Osterbrock & Ferland 2006) through a path length of one Hubble
/// radius of residual-neutral gas at the cosmic mean density.
#[must_use]
pub fn nu_xray_tau_one(cosmo: &CosmoParams, z: f64, x_e: f64) -> f64 {
    const SIGMA_HI_LL_CM2: f64 = 6.3e-18;
    const N_H0_CM3: f64 = 1.98e-7;
    const C_CM_S: f64 = 2.9979e10;
    let n_h = N_H0_CM3 * (1.0 + z).powi(3);
    let r_horizon_cm = C_CM_S / cosmology::hubble(cosmo, z).max(1.0e-30);
    let column = (1.0 - x_e).clamp(0.0, 1.0) * n_h * r_horizon_cm;
    NU_LL * (SIGMA_HI_LL_CM2 * column.max(1.0e-300)).cbrt()
}

/// Converts a continuum-photon heating rate at Lyman-alpha into an
/// effective heating-energy-per-baryon term (§4.5 `use_lya_heating`),
/// following the Meiksin (2006)/Mittal & Kulkarni (2020) `0.3 * E_Lya`
/// approximation for the fraction of absorbed Lyman-alpha energy that
/// thermalises rather than re-emitting.
#[must_use]
pub fn energy_lya_heating(flux_lya: f64) -> f64 {
    const THERMALISED_FRACTION: f64 = 0.3;
    THERMALISED_FRACTION * flux_lya
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn nu_n_converges_to_lyman_limit() {
        assert!(nu_n(30) < NU_LL);
        assert!(nu_n(30) > nu_n(10));
    }

    #[test]
    fn nu_2_is_lyman_alpha() {
        assert_approx_eq!(f64, nu_n(2), NU_LYA, epsilon = NU_LYA * 1.0e-3);
    }

    #[test]
    fn frecycle_is_bounded() {
        for n in 2..30 {
            let f = frecycle(n);
            assert!((0.0..=1.0).contains(&f));
        }
    }

    #[test]
    fn integral_is_positive_and_finite() {
        let value = integrate_over_nu(NU_LYA, NU_LL, 5000.0, false, 33);
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn nu_tau_one_returns_lower_redshift_for_bluer_photons() {
        let z_lya = nu_tau_one(10.0, NU_LYA);
        let z_lyb = nu_tau_one(10.0, nu_n(3));
        assert!(z_lyb < z_lya);
    }

    #[test]
    fn xray_band_integral_is_positive_and_finite() {
        let value = integrate_xray_band(NU_LL, NU_LL * 20.0, 1.0, NU_LL, NU_LL * 100.0, false, 17);
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn xray_band_integral_is_empty_for_degenerate_range() {
        let value = integrate_xray_band(NU_LL * 10.0, NU_LL * 10.0, 1.0, NU_LL, NU_LL * 100.0, false, 17);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn xray_tau_one_threshold_increases_with_redshift() {
        let cosmo = CosmoParams::default();
        let nu_low_z = nu_xray_tau_one(&cosmo, 6.0, 1.0e-3);
        let nu_high_z = nu_xray_tau_one(&cosmo, 15.0, 1.0e-3);
        assert!(nu_high_z > nu_low_z);
    }

    #[test]
    fn xray_tau_one_threshold_decreases_with_ionisation() {
        let cosmo = CosmoParams::default();
        let mostly_neutral = nu_xray_tau_one(&cosmo, 8.0, 1.0e-4);
        let mostly_ionised = nu_xray_tau_one(&cosmo, 8.0, 0.999);
        assert!(mostly_ionised < mostly_neutral);
    }
}
