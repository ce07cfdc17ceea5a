//! Cosmology kernels (§6 external collaborators, §4.7): growth factor,
//! Hubble expansion, comoving-mass/variance mappings and Recfast-style
//! closed-form initial conditions.
//!
//! These are simplified, literature-grounded fitting functions, not a
//! byte-exact port of any specific external package (§4.7): they exist so
//! that the components in §4.4–§4.6 are independently testable.

use crate::params::CosmoParams;

/// Redshift above which the spin-temperature engine falls back to the
/// closed-form Recfast initialiser instead of integrating forward from a
/// previous snapshot.
pub const Z_HEAT_MAX: f64 = 35.0;

/// CMB temperature today, in Kelvin.
pub const T_CMB0: f64 = 2.728;

/// Seconds per Julian year.
pub const SEC_PER_YEAR: f64 = 3.1557e7;

/// Hubble constant today in `s^-1`, for `H0 = 100 h` km/s/Mpc.
fn hubble0_per_sec(cosmo: &CosmoParams) -> f64 {
    // 1 km/s/Mpc = 3.2408e-20 s^-1.
    cosmo.hubble_h() * 100.0 * 3.2408e-20
}

/// CMB temperature at redshift `z`.
#[must_use]
pub fn t_cmb(z: f64) -> f64 {
    T_CMB0 * (1.0 + z)
}

/// The (flat/curved) ΛCDM dimensionless expansion rate `E(z) = H(z)/H0`.
#[must_use]
pub fn e_of_z(cosmo: &CosmoParams, z: f64) -> f64 {
    let a = 1.0 + z;
    (cosmo.omega_m() * a.powi(3) + cosmo.omega_k() * a.powi(2) + cosmo.omega_l()).sqrt()
}

/// The Hubble parameter `H(z)` in `s^-1`.
#[must_use]
pub fn hubble(cosmo: &CosmoParams, z: f64) -> f64 {
    hubble0_per_sec(cosmo) * e_of_z(cosmo, z)
}

/// The Hubble time `1/H(z)` in seconds.
#[must_use]
pub fn t_hubble(cosmo: &CosmoParams, z: f64) -> f64 {
    1.0 / hubble(cosmo, z)
}

/// `dt/dz` in seconds, for a matter+curvature+Λ background.
#[must_use]
pub fn dtdz(cosmo: &CosmoParams, z: f64) -> f64 {
    -1.0 / ((1.0 + z) * hubble(cosmo, z))
}

/// Linear growth factor `D(z)`, normalised to `D(0) = 1`, using the
/// Carroll, Press & Turner (1992) fitting formula.
#[must_use]
pub fn growth(cosmo: &CosmoParams, z: f64) -> f64 {
    fn d_unnormalised(omega_m: f64, omega_l: f64) -> f64 {
        let omega_k = 1.0 - omega_m - omega_l;
        let denom = omega_m.powf(4.0 / 7.0) - omega_l
            + (1.0 + omega_m / 2.0) * (1.0 + omega_l / 70.0);
        let _ = omega_k;
        2.5 * omega_m / denom.max(1.0e-12)
    }

    let a = 1.0 / (1.0 + z);
    let e2 = cosmo.omega_m() / a.powi(3) + cosmo.omega_k() / a.powi(2) + cosmo.omega_l();
    let omega_m_z = cosmo.omega_m() / (a.powi(3) * e2);
    let omega_l_z = cosmo.omega_l() / e2;

    let e2_0 = cosmo.omega_m() + cosmo.omega_k() + cosmo.omega_l();
    let omega_m_0 = cosmo.omega_m() / e2_0;
    let omega_l_0 = cosmo.omega_l() / e2_0;

    let d_z = a * d_unnormalised(omega_m_z, omega_l_z);
    let d_0 = d_unnormalised(omega_m_0, omega_l_0);
    d_z / d_0
}

/// Converts a spherical-tophat smoothing radius (comoving Mpc) into the
/// mass it encloses at the mean cosmic density (`Msun`).
#[must_use]
pub fn r_to_m(cosmo: &CosmoParams, r: f64) -> f64 {
    const RHO_CRIT_0_MSUN_PER_MPC3: f64 = 2.775e11; // h^2 Msun / Mpc^3
    let rho_m = cosmo.omega_m() * RHO_CRIT_0_MSUN_PER_MPC3 * cosmo.hubble_h().powi(2);
    (4.0 / 3.0) * std::f64::consts::PI * r.powi(3) * rho_m
}

/// Inverse of [`r_to_m`]: the tophat radius enclosing mass `m`.
#[must_use]
pub fn m_to_r(cosmo: &CosmoParams, m: f64) -> f64 {
    const RHO_CRIT_0_MSUN_PER_MPC3: f64 = 2.775e11;
    let rho_m = cosmo.omega_m() * RHO_CRIT_0_MSUN_PER_MPC3 * cosmo.hubble_h().powi(2);
    (m / ((4.0 / 3.0) * std::f64::consts::PI * rho_m)).cbrt()
}

/// The (z=0) rms density-fluctuation amplitude on mass scale `m`, using an
/// Eisenstein & Hu (1998)-style power-law approximation anchored on `σ8`.
#[must_use]
pub fn sigma(cosmo: &CosmoParams, m: f64) -> f64 {
    // Effective slope of the power spectrum on cluster/galaxy scales;
    // sigma(M) ~ M^{-(ns+3)/6} is the standard small-scale scaling.
    let m8 = r_to_m(cosmo, 8.0 / cosmo.hubble_h());
    let slope = -(cosmo.ns() + 3.0) / 6.0;
    cosmo.sigma8() * (m / m8).powf(slope)
}

/// Recfast-style closed-form kinetic temperature at high redshift
/// (`z >= Z_HEAT_MAX`), in Kelvin: tight Compton coupling to the CMB with
/// a small adiabatic-decoupling correction.
#[must_use]
pub fn t_recfast(z: f64) -> f64 {
    let z_dec = 130.0;
    if z > z_dec {
        t_cmb(z)
    } else {
        t_cmb(z_dec) * ((1.0 + z) / (1.0 + z_dec)).powi(2)
    }
}

/// Recfast-style closed-form free-electron fraction at high redshift.
#[must_use]
pub fn xion_recfast(z: f64) -> f64 {
    // Asymptotes to the residual post-recombination ionisation fraction.
    let x_residual = 2.0e-4;
    let x_full = 1.0;
    let z_transition = 900.0;
    let width = 60.0;
    x_residual + (x_full - x_residual) / (1.0 + ((z - z_transition) / width).exp())
}

/// The adiabatic-index approximation `cT(z)` used in the Tk adiabatic
/// cooling term (§4.5): returns `2/(1+z)`, the standard matter-dominated
/// adiabatic cooling rate `d ln Tk / d ln a = -2`.
#[must_use]
pub fn ct_approx(z: f64) -> f64 {
    2.0 / (1.0 + z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn growth_is_unity_today() {
        let cosmo = CosmoParams::default();
        assert_approx_eq!(f64, growth(&cosmo, 0.0), 1.0, epsilon = 1e-8);
    }

    #[test]
    fn growth_decreases_with_redshift() {
        let cosmo = CosmoParams::default();
        assert!(growth(&cosmo, 10.0) < growth(&cosmo, 1.0));
        assert!(growth(&cosmo, 1.0) < growth(&cosmo, 0.0));
    }

    #[test]
    fn r_to_m_and_m_to_r_round_trip() {
        let cosmo = CosmoParams::default();
        let m = r_to_m(&cosmo, 3.0);
        assert_approx_eq!(f64, m_to_r(&cosmo, m), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn xion_recfast_is_bounded() {
        for z in [50.0, 200.0, 900.0, 1200.0, 2000.0] {
            let x = xion_recfast(z);
            assert!((0.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn hubble_increases_with_redshift() {
        let cosmo = CosmoParams::default();
        assert!(hubble(&cosmo, 10.0) > hubble(&cosmo, 0.0));
    }
}
