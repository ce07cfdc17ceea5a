//! Spin-Temperature Engine (§4.5).
//!
//! Per snapshot: build the shell schedule (§4.3), sum each shell's
//! X-ray heating/ionisation and Lyman-alpha contribution into per-cell
//! accumulators via annular k-space filtering of the halo-box emissivity
//! grids, then advance `(Tk, x_e, Ts)` per cell with a backward-difference
//! step in redshift.
//!
//! The per-shell source history this component ideally reads (§2.5: "a
//! pre-built `XraySourceBox`" sampling each shell at its own retarded
//! redshift) is compressed here into the current snapshot's halo-box
//! grids, re-filtered at each shell radius; a genuinely time-resolved
//! source box would require carrying forward several snapshots' worth of
//! emissivity history, which is outside this reduced core's data model.
//! This is noted as a simplification, not a missing feature (DESIGN.md).

use crate::cosmology;
use crate::error::{require_finite, Error, Result};
use crate::frequency;
use crate::grid::{FftEngine, FilterSpec, RealGrid};
use crate::halo::{mean_fix_to_target, HaloBox};
use crate::hmf;
use crate::interp::Table1D;
use crate::params::{AstroParams, CosmoParams, SimulationFlags};
use crate::shells::{self, Shell};
use crate::snapshot::PerturbedField;
use crate::thermochem;

/// Soft X-ray threshold frequency (~0.3 keV), below which photons are
/// assumed fully absorbed by the residual neutral IGM.
const NU_X_THRESH: f64 = 7.25e16;
/// Hard cutoff of the X-ray SED considered (~2 keV).
const NU_X_MAX: f64 = 4.84e17;
/// Mean cosmic hydrogen number density today, cm^-3 (for `h = 0.6736`,
/// `Omega_b h^2 = 0.0224`).
const N_H0_CM3: f64 = 1.98e-7;
/// Wouthuysen-Field coupling normalisation constant (cm^3 s, Hirata 2006
/// order-of-magnitude fit folded into a single proportionality constant
/// for this simplified treatment).
const X_ALPHA_NORM: f64 = 1.81e11;

/// Per-cell spin-temperature state populated by
/// [`compute_spin_temperature`] (§4.5, §6).
#[derive(Clone, Debug)]
pub struct TsBox {
    /// Spin temperature, Kelvin.
    pub ts: RealGrid,
    /// Kinetic temperature, Kelvin.
    pub tk: RealGrid,
    /// Free-electron fraction, `[0, 1]`.
    pub x_e: RealGrid,
    /// Lyman-Werner flux proxy, used by the halo gridder's MCG turnover.
    pub j_lw: RealGrid,
}

impl TsBox {
    fn zeros(shape: (usize, usize, usize)) -> Self {
        Self {
            ts: RealGrid::zeros(shape),
            tk: RealGrid::zeros(shape),
            x_e: RealGrid::zeros(shape),
            j_lw: RealGrid::zeros(shape),
        }
    }
}

/// Closed-form Recfast initial conditions (§4.5 "Above-`Z_HEAT_MAX`
/// initialiser"), used whenever `z >= Z_HEAT_MAX` or no previous
/// snapshot is available.
fn recfast_init(cosmo: &CosmoParams, z: f64, perturb: &PerturbedField) -> TsBox {
    let shape = perturb.shape();
    let tk = cosmology::t_recfast(z);
    let x_e = cosmology::xion_recfast(z);
    let tgam = cosmology::t_cmb(z);
    let n_h = N_H0_CM3 * (1.0 + z).powi(3);

    let mut out = TsBox::zeros(shape);
    out.tk.fill(tk);
    out.x_e.fill(x_e);
    for ((ix, iy, iz), &delta) in perturb.density.indexed_iter() {
        let n_b = n_h * (1.0 + delta).max(1.0e-6);
        let x_coll = (thermochem::kappa_10_hh(tk) * n_b * (1.0 - x_e)
            + thermochem::kappa_10_eh(tk) * n_b * x_e)
            * thermochem::T_STAR_21CM
            / (thermochem::A10_HYPERFINE * tgam);
        out.ts[[ix, iy, iz]] = thermochem::t21(tgam, tk, x_coll);
    }
    out
}

/// Builds the `x_e`-indexed frequency-integral tables used to attenuate
/// the X-ray heating/ionisation rate by the local ionisation state (§4.5
/// step 2), over the X-ray continuum (`frequency::xray_spectral_shape`,
/// sourced by HMXBs/ULXs) rather than the stellar Lyman-continuum
/// spectrum. The lower integration limit is `nu_xray_tau_one(z, x_e)`:
/// below that frequency the residual-neutral IGM along the line of sight
/// has already absorbed the photon, so only the harder tail above it
/// reaches the cell. One table pair is shared by every shell, since the
/// absorbing column depends on the snapshot's `(z, x_e)`, not on the
/// shell's source redshift.
fn build_frequency_tables(cosmo: &CosmoParams, astro: &AstroParams, z: f64) -> Result<(Table1D, Table1D)> {
    let heat = Table1D::build(0.0, 1.0, 32, |x_e| {
        let nu_lo = frequency::nu_xray_tau_one(cosmo, z, x_e).min(NU_X_MAX * 0.999);
        frequency::integrate_xray_band(nu_lo, NU_X_MAX, astro.alpha_x, NU_X_THRESH, NU_X_MAX, true, 17)
    })?;
    let ion = Table1D::build(0.0, 1.0, 32, |x_e| {
        let nu_lo = frequency::nu_xray_tau_one(cosmo, z, x_e).min(NU_X_MAX * 0.999);
        frequency::integrate_xray_band(nu_lo, NU_X_MAX, astro.alpha_x, NU_X_THRESH, NU_X_MAX, false, 17) / NU_X_THRESH
    })?;
    Ok((heat, ion))
}

/// Advances the spin-temperature field from `z_prev` to `z` (§4.5).
///
/// `source_box` supplies the emissivity grids (SFR, X-ray luminosity)
/// this component's shells filter from; `prev_ts` is the previous
/// snapshot's state, or `None` to synthesise it from the closed-form
/// Recfast initial conditions at `z_prev`.
///
/// # Errors
///
/// Returns [`Error::TableGeneration`]/[`Error::TableEvaluation`] if a
/// frequency table is malformed, or [`Error::InfinityOrNaN`] if any
/// output cell is non-finite.
pub fn compute_spin_temperature(
    cosmo: &CosmoParams,
    astro: &AstroParams,
    flags: &SimulationFlags,
    z: f64,
    z_prev: f64,
    perturb: &PerturbedField,
    prev_ts: Option<&TsBox>,
    source_box: &HaloBox,
) -> Result<TsBox> {
    flags.validate()?;

    if z >= cosmology::Z_HEAT_MAX {
        return Ok(recfast_init(cosmo, z, perturb));
    }

    let shape = perturb.shape();
    let baseline = recfast_init(cosmo, z_prev, perturb);
    let prev = prev_ts.unwrap_or(&baseline);

    let shell_schedule = shells::build_shell_schedule(cosmo, z, cosmology::Z_HEAT_MAX, flags.partial_volume_weighting);
    if shell_schedule.is_empty() {
        return Err(Error::Value("spin-temperature shell schedule is empty".to_string()));
    }
    let (heat_table, ion_table) = build_frequency_tables(cosmo, astro, z)?;

    let m_turn_acg_now = thermochem::atomic_cooling_threshold(z).max(astro.m_turn_floor);
    let m_min = astro.m_turn_floor * 1.0e-2;
    let m_cell_mean = cosmology::r_to_m(cosmo, 1.0);

    let engine = FftEngine::new(shape.0, shape.2, perturb.box_size);
    let mut d_xheat = RealGrid::zeros(shape);
    let mut d_xion = RealGrid::zeros(shape);
    let mut d_lya = RealGrid::zeros(shape);

    for shell in shell_schedule.iter() {
        let lx_k = engine.fft_forward(&source_box.l_x)?;
        let lx_shell_k = crate::grid::filter(&lx_k, FilterSpec::Annulus(shell.r_inner.max(1.0e-6), shell.r_outer.max(shell.r_inner + 1.0e-6)));
        let lx_shell = engine.fft_inverse(&lx_shell_k)?;

        let sfr_k = engine.fft_forward(&source_box.sfr)?;
        let sfr_shell_k = crate::grid::filter(&sfr_k, FilterSpec::Annulus(shell.r_inner.max(1.0e-6), shell.r_outer.max(shell.r_inner + 1.0e-6)));
        let mut sfr_shell = engine.fft_inverse(&sfr_shell_k)?;

        // §4.5 step 3: rescale this shell's filtered SFR to the global
        // unconditional expectation at the shell's source redshift,
        // the SFRD analog of the ionisation solver's f_coll mean-fix.
        let target_sfr_mean =
            hmf::sfrd_general(cosmo, shell.z_near, m_min, m_turn_acg_now, astro.alpha_star, astro.f_star10)
                * m_cell_mean;
        mean_fix_to_target(&mut sfr_shell, target_sfr_mean);

        let dt_dz = cosmology::dtdz(cosmo, shell.z_near).abs();
        let dz_shell = (shell.z_near - shell.z_far).abs().max(1.0e-6);
        let z_edge_factor = dz_shell * dt_dz;
        let lya_prefactor = (1.0 + z).powi(2) * (1.0 + shell.z_near) * frequency::frecycle(shell.n);

        for ((ix, iy, iz), &lx) in lx_shell.indexed_iter() {
            let x_e_prev = prev.x_e[[ix, iy, iz]].clamp(0.0, 1.0);
            let heat = heat_table.lookup(x_e_prev)?;
            let ion = ion_table.lookup(x_e_prev)?;
            let lx_cell = lx.max(0.0);

            d_xheat[[ix, iy, iz]] += lx_cell * heat * shell.edge_weight * z_edge_factor;
            d_xion[[ix, iy, iz]] += lx_cell * ion * shell.edge_weight * z_edge_factor;

            if flags.use_lya_heating {
                let sfr_cell = sfr_shell[[ix, iy, iz]].max(0.0);
                d_lya[[ix, iy, iz]] += sfr_cell * lya_prefactor * shell.edge_weight * z_edge_factor;
            }
        }
    }

    let dz = z_prev - z;
    let dt = -cosmology::dtdz(cosmo, z) * dz;
    let tgam = cosmology::t_cmb(z);
    let mut out = TsBox::zeros(shape);
    let (nx, ny, nz) = shape;

    // The backward-difference step for one cell only reads that cell's
    // own previous state and shell accumulators, so every cell can be
    // solved independently (§5) before the results are zipped back in.
    let solved = crate::parallel::parallel_map(nx * ny * nz, |flat| {
        let ix = flat / (ny * nz);
        let iy = (flat / nz) % ny;
        let iz = flat % nz;

        let delta = perturb.density[[ix, iy, iz]];
        let n_b = N_H0_CM3 * (1.0 + z).powi(3) * (1.0 + delta).max(1.0e-6);
        let tk_prev = prev.tk[[ix, iy, iz]];
        let xe_prev = prev.x_e[[ix, iy, iz]].clamp(0.0, 1.0);
        let j_alpha = d_lya[[ix, iy, iz]];

        let (tk_new, xe_base) = thermochem::compute_partially_ionized_temperature(
            cosmo,
            tk_prev,
            xe_prev,
            z,
            dz,
            d_xheat[[ix, iy, iz]],
            frequency::energy_lya_heating(j_alpha),
            n_b,
            flags.use_cmb_heating,
        );
        let xe_new = (xe_base + d_xion[[ix, iy, iz]] * dt).clamp(0.0, 1.0);

        let x_coll = (thermochem::kappa_10_hh(tk_new) * n_b * (1.0 - xe_new)
            + thermochem::kappa_10_eh(tk_new) * n_b * xe_new)
            * thermochem::T_STAR_21CM
            / (thermochem::A10_HYPERFINE * tgam);

        let ts = if j_alpha < 1.0e-20 {
            thermochem::t21(tgam, tk_new, x_coll)
        } else {
            // The Wouthuysen-Field coupling cannot exceed the Gunn-Peterson
            // optical depth: beyond that the IGM is fully scattering and
            // x_alpha saturates (frequency::taugp, §4.7).
            let x_alpha = (X_ALPHA_NORM * j_alpha).min(frequency::taugp(cosmo, z));
            thermochem::t21(tgam, tk_new, x_coll + x_alpha)
        };

        (ix, iy, iz, tk_new, xe_new, ts.abs(), j_alpha * 1.0e-21)
    });

    for (ix, iy, iz, tk_new, xe_new, ts, j_lw) in solved {
        out.tk[[ix, iy, iz]] = tk_new;
        out.x_e[[ix, iy, iz]] = xe_new;
        out.ts[[ix, iy, iz]] = ts;
        out.j_lw[[ix, iy, iz]] = j_lw;
    }

    require_finite("ts_box.ts", out.ts.iter().copied())?;
    require_finite("ts_box.tk", out.tk.iter().copied())?;
    require_finite("ts_box.x_e", out.x_e.iter().copied())?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::halo::HaloBox;
    use crate::params::{AstroParams, CosmoParams, SimulationFlags};

    fn flat_perturb(n: usize, nz: usize) -> PerturbedField {
        PerturbedField {
            density: RealGrid::zeros((n, n, nz)),
            velocity_cb: RealGrid::zeros((n, n, nz)),
            box_size: (n as f64, n as f64, nz as f64),
        }
    }

    fn flat_source(n: usize, nz: usize, sfr: f64, lx: f64) -> HaloBox {
        HaloBox {
            stellar_mass: RealGrid::zeros((n, n, nz)),
            stellar_mass_mini: RealGrid::zeros((n, n, nz)),
            sfr: RealGrid::from_elem((n, n, nz), sfr),
            sfr_mini: RealGrid::zeros((n, n, nz)),
            n_ion: RealGrid::zeros((n, n, nz)),
            l_x: RealGrid::from_elem((n, n, nz), lx),
            mean_turn_acg: 1.0e8,
            mean_turn_mcg: 1.0e6,
            mean_turn_reion: 0.0,
        }
    }

    #[test]
    fn above_z_heat_max_reproduces_recfast() {
        let cosmo = CosmoParams::default();
        let astro = AstroParams::default();
        let flags = SimulationFlags::default();
        let perturb = flat_perturb(4, 4);
        let source = flat_source(4, 4, 0.0, 0.0);

        let ts_box =
            compute_spin_temperature(&cosmo, &astro, &flags, 40.0, 41.0, &perturb, None, &source).unwrap();

        let expected_tk = cosmology::t_recfast(40.0);
        for &tk in ts_box.tk.iter() {
            assert!((tk - expected_tk).abs() < 1.0e-6);
        }
    }

    #[test]
    fn below_z_heat_max_stays_finite_and_bounded() {
        let cosmo = CosmoParams::default();
        let astro = AstroParams::default();
        let flags = SimulationFlags::default();
        let perturb = flat_perturb(4, 4);
        let source = flat_source(4, 4, 1.0e-3, 1.0e38);

        let ts_box =
            compute_spin_temperature(&cosmo, &astro, &flags, 20.0, 21.0, &perturb, None, &source).unwrap();

        for &x_e in ts_box.x_e.iter() {
            assert!((0.0..=1.0).contains(&x_e));
        }
        for &tk in ts_box.tk.iter() {
            assert!(tk > 0.0 && tk.is_finite());
        }
        for &ts in ts_box.ts.iter() {
            assert!(ts > 0.0 && ts.is_finite());
        }
    }

    #[test]
    fn uniform_input_gives_spatially_uniform_output() {
        let cosmo = CosmoParams::default();
        let astro = AstroParams::default();
        let flags = SimulationFlags::default();
        let perturb = flat_perturb(4, 4);
        let source = flat_source(4, 4, 1.0e-4, 1.0e37);

        let ts_box =
            compute_spin_temperature(&cosmo, &astro, &flags, 20.0, 21.0, &perturb, None, &source).unwrap();

        let first = ts_box.ts[[0, 0, 0]];
        for &ts in ts_box.ts.iter() {
            assert!((ts - first).abs() < 1.0e-6 * first.abs().max(1.0));
        }
    }
}
