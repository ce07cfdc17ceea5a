//! Thermal and ionisation-state kinetics (§4.5, §4.7).
//!
//! Recombination/collisional coefficients, the 21-cm spin-temperature
//! coupling coefficients, and the two closed-form temperature update
//! paths used by the spin-temperature engine on partially- versus
//! fully-ionised cells.

/// Spontaneous emission rate of the 21-cm hyperfine transition, in `s^-1`.
pub const A10_HYPERFINE: f64 = 2.85e-15;

/// Rest-frame 21-cm line frequency, in Hz.
pub const NU_21CM: f64 = 1.4204e9;

/// Temperature equivalent of the 21-cm transition energy, in Kelvin.
pub const T_STAR_21CM: f64 = 0.0628;

/// Case-A recombination coefficient for hydrogen (cm^3/s), a power-law
/// fit valid for `1 K <= T <= 1e9 K` (Hui & Gnedin 1997 form).
#[must_use]
pub fn alpha_a(t: f64) -> f64 {
    let lambda = 315_614.0 / t;
    1.269e-13 * lambda.powf(1.503)
        / (1.0 + (lambda / 0.522).powf(0.470)).powf(1.923)
}

/// Case-B recombination coefficient for hydrogen (cm^3/s).
#[must_use]
pub fn alpha_b(t: f64) -> f64 {
    let lambda = 315_614.0 / t;
    2.753e-14 * lambda.powf(1.5)
        / (1.0 + (lambda / 2.74).powf(0.407)).powf(2.242)
}

/// Collisional (HI-HI) de-excitation coefficient for the 21-cm
/// transition, `kappa_10^HH` (cm^3/s), Zygelman (2005) fitting form.
#[must_use]
pub fn kappa_10_hh(tk: f64) -> f64 {
    let t = tk.clamp(1.0, 1.0e4);
    let log_t = t.ln();
    (-3.322e1 + 2.857_2 * log_t
        - 2.027_9 * log_t.powi(2)
        + 0.424_87 * log_t.powi(3)
        - 3.199_2e-2 * log_t.powi(4))
    .exp()
    .min(1.0e-8)
}

/// Collisional (electron-HI) de-excitation coefficient for the 21-cm
/// transition, `kappa_10^eH` (cm^3/s).
#[must_use]
pub fn kappa_10_eh(tk: f64) -> f64 {
    let t = tk.clamp(1.0, 1.0e4);
    if t < 10.0 {
        (-9.607 + 0.5 * t.ln()) .exp()
    } else {
        let log_t = t.ln();
        (-9.607 + 0.5 * log_t - (-log_t).exp() / 1.843e2).exp()
    }
}

/// The spin temperature `Ts` given the CMB temperature `tgam`, the
/// kinetic temperature `tk`, and the total collisional + Wouthuysen-Field
/// coupling coefficient `x_coll_plus_alpha`: the standard three-level
/// harmonic average `Ts^-1 = (Tgam^-1 + x * Tk^-1) / (1 + x)`.
#[must_use]
pub fn t21(tgam: f64, tk: f64, x_coupling: f64) -> f64 {
    let inv = (1.0 / tgam + x_coupling / tk) / (1.0 + x_coupling);
    1.0 / inv
}

/// Molecular-hydrogen cooling floor, below which Pop III star formation
/// in minihalos is assumed to be fully suppressed by photodissociation
/// feedback, in Kelvin-equivalent virial temperature terms (expressed as
/// a minihalo turnover mass in Msun at redshift `z`).
#[must_use]
pub fn lyman_werner_threshold(j_lw_21: f64) -> f64 {
    // Machacek, Bryan & Abel (2001)-style scaling of the minihalo
    // turnover mass with the LW background intensity J_21.
    const M_TURN_MCG_0: f64 = 5.0e5;
    M_TURN_MCG_0 * (1.0 + 6.96 * (4.0 * std::f64::consts::PI * j_lw_21).powf(0.47))
}

/// Atomic-cooling threshold: the halo mass at which the virial
/// temperature reaches `1e4 K` (Lyman-alpha cooling floor for ACG star
/// formation), as a function of redshift (Barkana & Loeb 2001 scaling).
#[must_use]
pub fn atomic_cooling_threshold(z: f64) -> f64 {
    const M_ATOMIC_0: f64 = 1.0e8;
    M_ATOMIC_0 * (10.0 / (1.0 + z)).powf(1.5)
}

/// Molecular-hydrogen cooling threshold in the absence of any LW
/// feedback, the unsuppressed minihalo turnover mass.
#[must_use]
pub fn molecular_cooling_threshold(z: f64) -> f64 {
    const M_MOL_0: f64 = 2.5e5;
    M_MOL_0 * (10.0 / (1.0 + z)).powf(1.5)
}

/// Reionisation (Jeans-mass) feedback suppression of the minihalo
/// turnover mass in a patch with ionised fraction `x_hii` and local
/// sound-crossing-limited Jeans mass `m_jeans` (Sobacchi & Mesinger 2013
/// parametrisation).
#[must_use]
pub fn reionization_feedback(m_turn_mcg: f64, x_hii: f64, m_jeans: f64) -> f64 {
    m_turn_mcg.max(x_hii * m_jeans)
}

/// Updates `(Tk, x_e)` for a partially-ionised cell over the step
/// `[z + dz, z]` using a first-order backward-difference integrator: the
/// adiabatic cooling term, Compton heating against the CMB (gated by
/// `use_cmb_heating`), X-ray heating `eps_x`, Lyman-alpha continuum
/// heating `eps_lya` (both erg/s/cm^3, already filtered and
/// shell-summed) and recombination/collisional-ionisation balance.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn compute_partially_ionized_temperature(
    cosmo: &crate::params::CosmoParams,
    tk_prev: f64,
    x_e_prev: f64,
    z: f64,
    dz: f64,
    eps_x_per_nb: f64,
    eps_lya_per_nb: f64,
    n_baryon_cm3: f64,
    use_cmb_heating: bool,
) -> (f64, f64) {
    let dt = -crate::cosmology::dtdz(cosmo, z) * dz;

    let adiabatic = -crate::cosmology::ct_approx(z) * tk_prev * dz.abs();
    let t_cmb = crate::cosmology::t_cmb(z);
    let compton = if use_cmb_heating {
        let compton_rate = 1.017e-37 * (1.0 + z).powi(4) * (t_cmb - tk_prev);
        compton_rate * dt / (1.5 * n_baryon_cm3.max(1.0e-20))
    } else {
        0.0
    };
    let xray = (2.0 / 3.0) * eps_x_per_nb * dt / n_baryon_cm3.max(1.0e-20);
    let lya_heat = (2.0 / 3.0) * eps_lya_per_nb * dt / n_baryon_cm3.max(1.0e-20);

    let tk_new =
        (tk_prev + adiabatic + compton + xray + lya_heat).max(crate::cosmology::t_cmb(1000.0).min(1.0));

    let ionisation_rate = alpha_b(tk_prev) * n_baryon_cm3 * x_e_prev;
    let x_e_new = (x_e_prev - ionisation_rate * dt).clamp(0.0, 1.0);

    (tk_new.max(1.0e-2), x_e_new)
}

/// Updates `Tk` for a fully-ionised cell: the IGM is assumed to track
/// the photo-heating equilibrium temperature directly rather than being
/// integrated through the collisional network, following the standard
/// simplification that fully-ionised gas re-heats on a timescale much
/// shorter than a snapshot step.
#[must_use]
pub fn compute_fully_ionized_temperature(t_re_equilibrium: f64, tk_prev: f64, z: f64, z_re: f64) -> f64 {
    if z >= z_re {
        tk_prev
    } else {
        t_re_equilibrium * ((1.0 + z) / (1.0 + z_re)).powi(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CosmoParams;
    use float_cmp::assert_approx_eq;

    #[test]
    fn alpha_b_decreases_with_temperature() {
        assert!(alpha_b(1.0e4) < alpha_b(1.0e2));
    }

    #[test]
    fn t21_reduces_to_tgam_at_zero_coupling() {
        assert_approx_eq!(f64, t21(10.0, 100.0, 0.0), 10.0, epsilon = 1.0e-9);
    }

    #[test]
    fn t21_reduces_to_tk_at_large_coupling() {
        let t = t21(10.0, 100.0, 1.0e6);
        assert_approx_eq!(f64, t, 100.0, epsilon = 0.1);
    }

    #[test]
    fn kappa_10_is_positive() {
        for t in [2.0, 20.0, 200.0, 2000.0] {
            assert!(kappa_10_hh(t) > 0.0);
            assert!(kappa_10_eh(t) > 0.0);
        }
    }

    #[test]
    fn partially_ionized_update_stays_finite() {
        let cosmo = CosmoParams::default();
        let (tk, xe) =
            compute_partially_ionized_temperature(&cosmo, 50.0, 2.0e-4, 20.0, 0.1, 1.0e-28, 1.0e-29, 1.0e-4, true);
        assert!(tk.is_finite() && tk > 0.0);
        assert!((0.0..=1.0).contains(&xe));
    }

    #[test]
    fn cmb_heating_flag_changes_the_outcome() {
        let cosmo = CosmoParams::default();
        let (tk_with, _) =
            compute_partially_ionized_temperature(&cosmo, 50.0, 2.0e-4, 20.0, 0.1, 1.0e-28, 0.0, 1.0e-4, true);
        let (tk_without, _) =
            compute_partially_ionized_temperature(&cosmo, 50.0, 2.0e-4, 20.0, 0.1, 1.0e-28, 0.0, 1.0e-4, false);
        assert!((tk_with - tk_without).abs() > 0.0);
    }

    #[test]
    fn fully_ionized_temperature_freezes_before_reionisation() {
        let t = compute_fully_ionized_temperature(2.0e4, 500.0, 12.0, 10.0);
        assert_approx_eq!(f64, t, 500.0, epsilon = 1.0e-9);
    }

    #[test]
    fn cooling_thresholds_decrease_with_redshift() {
        assert!(atomic_cooling_threshold(15.0) < atomic_cooling_threshold(6.0));
        assert!(molecular_cooling_threshold(15.0) < molecular_cooling_threshold(6.0));
    }
}
