//! Configuration value types: cosmology, astrophysics knobs and the closed
//! set of simulation flags (§6, §9).
//!
//! Plain `serde`-derived data with `Default` impls giving fiducial values,
//! `#[must_use]` const getters and plain setters, built once per run and
//! passed around by shared reference.

use serde::{Deserialize, Serialize};

/// Background cosmology.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CosmoParams {
    hubble_h: f64,
    omega_m: f64,
    omega_b: f64,
    omega_k: f64,
    sigma8: f64,
    ns: f64,
}

impl Default for CosmoParams {
    fn default() -> Self {
        Self {
            hubble_h: 0.6736,
            omega_m: 0.3153,
            omega_b: 0.0493,
            omega_k: 0.0,
            sigma8: 0.8111,
            ns: 0.9649,
        }
    }
}

impl CosmoParams {
    /// Returns the dimensionless Hubble parameter `h`.
    #[must_use]
    pub const fn hubble_h(&self) -> f64 {
        self.hubble_h
    }

    /// Returns the total matter density parameter.
    #[must_use]
    pub const fn omega_m(&self) -> f64 {
        self.omega_m
    }

    /// Returns the baryon density parameter.
    #[must_use]
    pub const fn omega_b(&self) -> f64 {
        self.omega_b
    }

    /// Returns the curvature density parameter.
    #[must_use]
    pub const fn omega_k(&self) -> f64 {
        self.omega_k
    }

    /// Returns the dark-energy density parameter, `1 - Ωm - Ωk`.
    #[must_use]
    pub fn omega_l(&self) -> f64 {
        1.0 - self.omega_m - self.omega_k
    }

    /// Returns the cosmic baryon fraction `Ωb / Ωm`.
    #[must_use]
    pub fn baryon_fraction(&self) -> f64 {
        self.omega_b / self.omega_m
    }

    /// Returns `σ8`.
    #[must_use]
    pub const fn sigma8(&self) -> f64 {
        self.sigma8
    }

    /// Returns the scalar spectral index.
    #[must_use]
    pub const fn ns(&self) -> f64 {
        self.ns
    }

    /// Sets the dimensionless Hubble parameter.
    pub fn set_hubble_h(&mut self, h: f64) {
        self.hubble_h = h;
    }

    /// Sets the total matter density parameter.
    pub fn set_omega_m(&mut self, omega_m: f64) {
        self.omega_m = omega_m;
    }

    /// Sets the baryon density parameter.
    pub fn set_omega_b(&mut self, omega_b: f64) {
        self.omega_b = omega_b;
    }
}

/// Astrophysical source-model parameters (§4.4, §4.5, §4.6).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AstroParams {
    /// ACG star-formation efficiency normalisation at `M = 1e10 Msun`.
    pub f_star10: f64,
    /// ACG star-formation efficiency power-law index.
    pub alpha_star: f64,
    /// MCG star-formation efficiency normalisation at `M = 1e7 Msun`.
    pub f_star7_mini: f64,
    /// MCG star-formation efficiency power-law index.
    pub alpha_star_mini: f64,
    /// Escape fraction normalisation at `M = 1e10 Msun`.
    pub f_esc10: f64,
    /// Escape fraction power-law index.
    pub alpha_esc: f64,
    /// MCG escape fraction normalisation.
    pub f_esc7_mini: f64,
    /// Star-formation timescale in units of the Hubble time.
    pub t_star: f64,
    /// Lognormal scatter on `f_*` (ACG).
    pub sigma_star: f64,
    /// Lognormal scatter floor on the SFR.
    pub sigma_sfr_lim: f64,
    /// Slope of the mass-dependent SFR scatter.
    pub sigma_sfr_idx: f64,
    /// Lognormal scatter on `L_X/SFR`.
    pub sigma_lx: f64,
    /// `L_X/SFR` normalisation at solar metallicity (erg/s per Msun/yr).
    pub l_x_sfr_norm: f64,
    /// X-ray spectral index used in `(1+z)^{-alpha_x}` attenuation.
    pub alpha_x: f64,
    /// Minimum ever-allowed turnover mass (Msun).
    pub m_turn_floor: f64,
    /// Population-II ionising photon number per stellar baryon.
    pub pop2_ion: f64,
    /// Population-III (MINI) ionising photon number per stellar baryon.
    pub pop3_ion: f64,
    /// Configured redshift shift applied by
    /// [`PhotonConsType::ZShift`] (§9 Open Question #3): a fixed
    /// calibration constant rather than a run-tracked cumulative photon
    /// deficit, since `adjust_redshifts_for_photoncons` is a pure
    /// function of `z` in this crate's reduced scope.
    pub photon_cons_delta_z: f64,
}

impl Default for AstroParams {
    fn default() -> Self {
        Self {
            f_star10: 0.05,
            alpha_star: 0.5,
            f_star7_mini: 0.05,
            alpha_star_mini: 0.0,
            f_esc10: 0.1,
            alpha_esc: -0.5,
            f_esc7_mini: 0.1,
            t_star: 0.5,
            sigma_star: 0.25,
            sigma_sfr_lim: 0.19,
            sigma_sfr_idx: -0.12,
            sigma_lx: 0.5,
            l_x_sfr_norm: 3.0e40,
            alpha_x: 1.0,
            m_turn_floor: 5.0e8,
            pop2_ion: 5000.0,
            pop3_ion: 44000.0,
            photon_cons_delta_z: 0.0,
        }
    }
}

/// Which excursion-set ionised-region painting rule to use.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub enum BubbleAlgorithm {
    /// Paint every cell inside the sphere of radius `R`.
    Sphere,
    /// Paint only the centre cell.
    Center,
}

/// Which Fourier-space filter to apply to source/absorber fields.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub enum FilterKind {
    /// Real-space (spherical) tophat, transformed analytically to k-space.
    TophatReal,
    /// k-space tophat (sharp-k).
    TophatK,
    /// Gaussian smoothing.
    Gaussian,
    /// Exponential-decay attenuation with scale `arg` (requires
    /// [`SimulationFlags::use_exp_filter`]).
    Exp,
}

/// Which photon-conservation remap to apply (§6, §9 Open Questions).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub enum PhotonConsType {
    /// No remap.
    None,
    /// Shift the effective redshift used for ionisation by a constant.
    ZShift,
    /// Refit `alpha_esc` against the photon budget (unimplemented hook).
    AlphaEscFit,
    /// Refit `f_esc` against the photon budget (unimplemented hook).
    FEscFit,
}

/// The closed set of boolean/enum knobs described in §6.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SimulationFlags {
    /// Source inputs come from a halo catalogue rather than CMF integrals.
    pub use_halo_field: bool,
    /// Add MCG (minihalo) sources with LW-feedback turnover.
    pub use_minihalos: bool,
    /// Use the mass-dependent `f_*`/`f_esc` parametrisation.
    pub use_mass_dependent_zeta: bool,
    /// Couple ionisation to `x_e` fluctuations from the spin-temperature
    /// stage.
    pub use_ts_fluct: bool,
    /// Include Lyman-α continuum + injected heating in the `Tk` update.
    pub use_lya_heating: bool,
    /// Include Meiksin+21-style CMB heating.
    pub use_cmb_heating: bool,
    /// Track `dN_rec` per cell and use it in the ionisation criterion.
    pub inhomo_reco: bool,
    /// Use unfiltered `δ` for the recombination budget (central cell
    /// only).
    pub cell_recomb: bool,
    /// Use the exponential filter for ionisation source fields.
    pub use_exp_filter: bool,
    /// Filter per `R` on demand rather than pre-filtering every `R`.
    pub minimize_memory: bool,
    /// Replace the `v_cb` field with its global average.
    pub fix_vcb_avg: bool,
    /// Combine the CMF fixed-grid with the halo sampler at `M_sampler`.
    pub avg_below_sampler: bool,
    /// Replace all stochastic draws by their expectation values.
    pub no_rng: bool,
    /// Excursion-set painting rule.
    pub bubble_algorithm: BubbleAlgorithm,
    /// Source-field filter.
    pub filter: FilterKind,
    /// Photon-conservation remap.
    pub photon_cons_type: PhotonConsType,
    /// Whether the Lyman-series shell-edge partial-volume weighting
    /// (§4.3, §9 Open Question) is applied. Defaults to `true`, matching
    /// the literature behaviour.
    pub partial_volume_weighting: bool,
}

impl Default for SimulationFlags {
    fn default() -> Self {
        Self {
            use_halo_field: false,
            use_minihalos: false,
            use_mass_dependent_zeta: true,
            use_ts_fluct: true,
            use_lya_heating: true,
            use_cmb_heating: false,
            inhomo_reco: false,
            cell_recomb: false,
            use_exp_filter: false,
            minimize_memory: false,
            fix_vcb_avg: false,
            avg_below_sampler: false,
            no_rng: false,
            bubble_algorithm: BubbleAlgorithm::Sphere,
            filter: FilterKind::TophatReal,
            photon_cons_type: PhotonConsType::None,
            partial_volume_weighting: true,
        }
    }
}

impl SimulationFlags {
    /// Validates the flag combination, returning [`crate::Error::Value`]
    /// if inconsistent (e.g. the exponential filter requested without
    /// [`Self::use_exp_filter`]).
    pub fn validate(&self) -> crate::Result<()> {
        if self.filter == FilterKind::Exp && !self.use_exp_filter {
            return Err(crate::Error::Value(
                "FilterKind::Exp selected without use_exp_filter".to_string(),
            ));
        }
        if matches!(
            self.photon_cons_type,
            PhotonConsType::AlphaEscFit | PhotonConsType::FEscFit
        ) {
            return Err(crate::Error::Value(
                "alpha_esc_fit/f_esc_fit photon conservation require an external photon-budget \
                 integrator outside this crate's scope"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_validate() {
        assert!(SimulationFlags::default().validate().is_ok());
    }

    #[test]
    fn exp_filter_without_flag_is_invalid() {
        let mut flags = SimulationFlags::default();
        flags.filter = FilterKind::Exp;
        assert!(flags.validate().is_err());
    }

    #[test]
    fn baryon_fraction_matches_ratio() {
        let cosmo = CosmoParams::default();
        assert!((cosmo.baryon_fraction() - cosmo.omega_b() / cosmo.omega_m()).abs() < 1e-12);
    }
}
