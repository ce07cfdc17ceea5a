//! Ionisation Excursion-Set Solver (§4.6).
//!
//! Scans the radius schedule from box-scale down to cell-scale,
//! filtering source/absorber fields in k-space at each radius and
//! applying the local ionisation criterion; the first radius that
//! ionises a cell fixes its photoionisation rate and mean free path.

use crate::cosmology;
use crate::error::{require_finite, Result};
use crate::grid::{FftEngine, FilterSpec, RealGrid};
use crate::halo::{mean_fix_to_target, HaloBox};
use crate::hmf;
use crate::interp::{pad_range, Table1D};
use crate::params::{AstroParams, BubbleAlgorithm, CosmoParams, FilterKind, SimulationFlags};
use crate::photon_cons;
use crate::radius;
use crate::recombination;
use crate::snapshot::PerturbedField;
use crate::spintemp::TsBox;
use crate::thermochem;
use rand::Rng;
use rand_distr::{Distribution, Poisson};

/// Ionised fraction floor below which the whole box is declared neutral
/// without running the R-loop.
const HII_ROUND_ERR: f64 = 1.0e-5;
/// Maximum excursion-set filter radius, comoving Mpc.
const R_BUBBLE_MAX: f64 = 50.0;
/// Equilibrium temperature of freshly ionised gas, Kelvin.
const T_RE_EQUILIBRIUM: f64 = 2.0e4;
/// Expected halo count per cell below which partial ionisation is
/// Poisson-rounded rather than taken at face value (§4.6 step 7).
const N_POISSON: f64 = 20.0;
/// Small floor applied to the filtered density so the collapsed-fraction
/// table never receives a cell density below the spherical-collapse
/// floor (`delta >= -1 + eps`).
const DELTA_FLOOR_EPS: f64 = 1.0e-6;

/// Per-cell ionisation-field state populated by [`compute_ionised_box`]
/// (§4.6, §6).
#[derive(Clone, Debug)]
pub struct IonizedBox {
    /// Neutral hydrogen fraction, `[0, 1]`.
    pub x_h: RealGrid,
    /// Redshift at which this cell was first ionised, or `-1` if never.
    pub z_re: RealGrid,
    /// Photoionisation rate at first crossing, `1e-12 s^-1` units.
    pub gamma_12: RealGrid,
    /// Mean free path at first crossing, comoving Mpc.
    pub mfp: RealGrid,
    /// Cumulative recombinations per baryon.
    pub dn_rec: RealGrid,
    /// Kinetic temperature including the post-ionisation update, Kelvin.
    pub tk_all_gas: RealGrid,
    /// Global mean collapsed fraction used for the ACG ionisation
    /// criterion this step.
    pub mean_f_coll: f64,
    /// Global mean collapsed fraction for the MCG (minihalo) population.
    pub mean_f_coll_mini: f64,
}

impl IonizedBox {
    fn neutral(shape: (usize, usize, usize), x_h_value: f64, tk: &RealGrid) -> Self {
        Self {
            x_h: RealGrid::from_elem(shape, x_h_value),
            z_re: RealGrid::from_elem(shape, -1.0),
            gamma_12: RealGrid::zeros(shape),
            mfp: RealGrid::zeros(shape),
            dn_rec: RealGrid::zeros(shape),
            tk_all_gas: tk.clone(),
            mean_f_coll: 0.0,
            mean_f_coll_mini: 0.0,
        }
    }
}

fn filter_kind_spec(kind: FilterKind, r: f64) -> FilterSpec {
    match kind {
        FilterKind::TophatReal => FilterSpec::TophatReal(r),
        FilterKind::TophatK => FilterSpec::TophatK(r),
        FilterKind::Gaussian => FilterSpec::Gaussian(r),
        FilterKind::Exp => FilterSpec::Exp(r),
    }
}

/// Paints `x_h = 0` into every cell within comoving radius `r` of
/// `(cx, cy, cz)` (sphere algorithm), or just the centre cell (centre
/// algorithm).
fn paint(x_h: &mut RealGrid, algorithm: BubbleAlgorithm, cx: usize, cy: usize, cz: usize, r_cells: f64) {
    if algorithm == BubbleAlgorithm::Center {
        x_h[[cx, cy, cz]] = 0.0;
        return;
    }
    let (nx, ny, nz) = x_h.dim();
    let radius_i = r_cells.ceil() as isize;
    for dx in -radius_i..=radius_i {
        for dy in -radius_i..=radius_i {
            for dz in -radius_i..=radius_i {
                let dist2 = crate::convert::f64_from_usize((dx * dx + dy * dy + dz * dz).unsigned_abs());
                if dist2 > r_cells * r_cells {
                    continue;
                }
                let ix = (cx as isize + dx).rem_euclid(nx as isize) as usize;
                let iy = (cy as isize + dy).rem_euclid(ny as isize) as usize;
                let iz = (cz as isize + dz).rem_euclid(nz as isize) as usize;
                x_h[[ix, iy, iz]] = 0.0;
            }
        }
    }
}

/// Populates the ionisation field for one snapshot (§4.6, §6).
///
/// `halo_box` supplies the `n_ion` grid gridded by
/// [`crate::halo::compute_halobox`] for the direct halo-mode source path
/// (§4.6(a)); whenever [`SimulationFlags::use_halo_field`] is set it is
/// filtered at each radius and compared against the local baryon mass
/// instead of the density-conditioned `f_coll` tables used otherwise.
///
/// # Errors
///
/// Returns [`crate::Error::InfinityOrNaN`] if any output cell is
/// non-finite, a table/FFT error if filtering or interpolation fails, or
/// [`crate::Error::PhotonCons`] if the photon-conservation redshift remap
/// produces an invalid value.
#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
pub fn compute_ionised_box(
    cosmo: &CosmoParams,
    astro: &AstroParams,
    flags: &SimulationFlags,
    z: f64,
    z_prev: f64,
    perturb: &PerturbedField,
    halo_box: &HaloBox,
    prev_ion: &IonizedBox,
    ts: &TsBox,
) -> Result<IonizedBox> {
    flags.validate()?;
    let shape = perturb.shape();
    let cell_size = perturb.box_size.0 / crate::convert::f64_from_usize(shape.0);

    // §9 Open Question #3: one remap computed per snapshot, threaded
    // into both the ionisation criterion below and the recombination
    // update after the R-loop, rather than left unused.
    let adj = photon_cons::adjust_redshifts_for_photoncons(flags.photon_cons_type, z, astro.photon_cons_delta_z)?;
    let z_ion = adj.z_adjusted;

    let m_turn_acg = thermochem::atomic_cooling_threshold(z_ion).max(astro.m_turn_floor);
    let m_turn_mcg = thermochem::molecular_cooling_threshold(z_ion).max(astro.m_turn_floor);
    let m_min = astro.m_turn_floor * 1.0e-2;
    let zeta = astro.f_star10 * astro.f_esc10 * astro.pop2_ion;
    let zeta_mini = if flags.use_minihalos {
        astro.f_star7_mini * astro.f_esc7_mini * astro.pop3_ion
    } else {
        0.0
    };

    let mean_f_coll = hmf::fcoll_general(cosmo, z_ion, m_turn_acg);
    let mean_f_coll_mini = if flags.use_minihalos {
        hmf::fcoll_general(cosmo, z_ion, m_turn_mcg)
    } else {
        0.0
    };

    if !flags.use_halo_field && mean_f_coll * zeta + mean_f_coll_mini * zeta_mini < HII_ROUND_ERR {
        let x_h_value = if flags.use_ts_fluct {
            1.0 - ts.x_e.mean().unwrap_or(0.0)
        } else {
            1.0 - cosmology::xion_recfast(z_ion)
        };
        let mut neutral = IonizedBox::neutral(shape, x_h_value.clamp(0.0, 1.0), &ts.tk);
        neutral.mean_f_coll = mean_f_coll;
        neutral.mean_f_coll_mini = mean_f_coll_mini;
        return Ok(neutral);
    }

    let r_max = (perturb.box_size.0 / 2.0).min(R_BUBBLE_MAX).max(cell_size);
    let radii = radius::radius_schedule(r_max, cell_size);
    let growth = cosmology::growth(cosmo, z_ion);
    let engine = FftEngine::new(shape.0, shape.2, perturb.box_size);

    let mut x_h = RealGrid::from_elem(shape, 1.0);
    let mut z_re = prev_ion.z_re.clone();
    let mut gamma_12 = prev_ion.gamma_12.clone();
    let mut mfp = prev_ion.mfp.clone();

    let n_radii = radii.len();
    for (step, &r) in radii.iter().enumerate() {
        let is_last_step = step == n_radii - 1;

        let delta_k = engine.fft_forward(&perturb.density)?;
        let delta_filt_k = crate::grid::filter(&delta_k, filter_kind_spec(flags.filter, r));
        let mut delta_filt = engine.fft_inverse(&delta_filt_k)?;
        crate::grid::clip_and_extrema(&mut delta_filt, -1.0 + DELTA_FLOOR_EPS, 1.0e4);

        let x_e_filt = if flags.use_ts_fluct {
            let x_e_k = engine.fft_forward(&ts.x_e)?;
            let x_e_filt_k = crate::grid::filter(&x_e_k, filter_kind_spec(flags.filter, r));
            let mut field = engine.fft_inverse(&x_e_filt_k)?;
            crate::grid::clip_and_extrema(&mut field, 0.0, 0.999);
            field
        } else {
            RealGrid::zeros(shape)
        };

        let dn_rec_filt = if flags.inhomo_reco && !flags.cell_recomb {
            let dn_k = engine.fft_forward(&prev_ion.dn_rec)?;
            let dn_filt_k = crate::grid::filter(&dn_k, filter_kind_spec(flags.filter, r));
            engine.fft_inverse(&dn_filt_k)?
        } else {
            prev_ion.dn_rec.clone()
        };

        let r_cells = r / cell_size;
        let n_b_cell = 1.0;

        // §4.6(a): halo mode grids N_ion directly and compares the
        // filtered photon budget to the local baryon mass, removing the
        // `(1+delta)` factor from the emissivity; non-halo mode derives
        // `f_coll` from the density-conditioned tables and mean-fixes it
        // against the global unconditional expectation (§4.6 step 5),
        // which halo mode skips entirely.
        let (ionizing_grid, f_coll_for_poisson) = if flags.use_halo_field {
            let n_ion_k = engine.fft_forward(&halo_box.n_ion)?;
            let n_ion_filt_k = crate::grid::filter(&n_ion_k, filter_kind_spec(flags.filter, r));
            let mut n_ion_filt = engine.fft_inverse(&n_ion_filt_k)?;
            crate::grid::clip_and_extrema(&mut n_ion_filt, 0.0, f64::MAX / 2.0);

            let mut ionizing = RealGrid::zeros(shape);
            for ((ix, iy, iz), &delta) in delta_filt.indexed_iter() {
                let baryon_mass =
                    cosmology::r_to_m(cosmo, 1.0) * (1.0 + delta).max(1.0e-6) * cosmo.baryon_fraction();
                ionizing[[ix, iy, iz]] = n_ion_filt[[ix, iy, iz]] / baryon_mass.max(1.0e-300);
            }
            (ionizing, RealGrid::zeros(shape))
        } else {
            let sigma_r = cosmology::sigma(cosmo, cosmology::r_to_m(cosmo, r));
            let (d_lo, d_hi) = pad_range(-1.0 + DELTA_FLOOR_EPS, 3.0, 0.01);
            let table_acg = Table1D::build(d_lo, d_hi, 64, |delta| {
                hmf::fcoll_delta(cosmo, delta, sigma_r, m_min.max(m_turn_acg * 0.1), growth)
            })?;
            let table_mcg = if flags.use_minihalos {
                Some(Table1D::build(d_lo, d_hi, 64, |delta| {
                    hmf::fcoll_delta(cosmo, delta, sigma_r, m_min.max(m_turn_mcg * 0.1), growth)
                })?)
            } else {
                None
            };

            let mut f_coll_acg = RealGrid::zeros(shape);
            let mut f_coll_mcg = RealGrid::zeros(shape);
            for ((ix, iy, iz), &delta) in delta_filt.indexed_iter() {
                let delta_c = delta.clamp(d_lo, d_hi);
                f_coll_acg[[ix, iy, iz]] = table_acg.lookup(delta_c)?;
                if let Some(table) = &table_mcg {
                    f_coll_mcg[[ix, iy, iz]] = table.lookup(delta_c)?;
                }
            }
            mean_fix_to_target(&mut f_coll_acg, mean_f_coll);
            if flags.use_minihalos {
                mean_fix_to_target(&mut f_coll_mcg, mean_f_coll_mini);
            }

            let mut ionizing = RealGrid::zeros(shape);
            for ((ix, iy, iz), &f_acg) in f_coll_acg.indexed_iter() {
                ionizing[[ix, iy, iz]] = f_acg * zeta + f_coll_mcg[[ix, iy, iz]] * zeta_mini;
            }
            (ionizing, f_coll_acg)
        };

        for ((ix, iy, iz), &delta) in delta_filt.indexed_iter() {
            if x_h[[ix, iy, iz]] <= 0.0 {
                continue;
            }

            let x_e_cell = x_e_filt[[ix, iy, iz]];
            let dn_rec_cell = dn_rec_filt[[ix, iy, iz]];
            let threshold = (1.0 - x_e_cell) * (1.0 + dn_rec_cell / n_b_cell);
            let ionizing = ionizing_grid[[ix, iy, iz]];

            if ionizing >= threshold {
                if z_re[[ix, iy, iz]] < 0.0 {
                    z_re[[ix, iy, iz]] = z_ion;
                    let gamma_prefactor = 1.0e-10;
                    gamma_12[[ix, iy, iz]] = r * gamma_prefactor * ionizing / (1.0 + delta).max(1.0e-6);
                    mfp[[ix, iy, iz]] = r;
                }
                paint(&mut x_h, flags.bubble_algorithm, ix, iy, iz, r_cells);
            } else if is_last_step {
                let mut residual = (1.0 - ionizing - x_e_cell).clamp(0.0, 1.0);
                if !flags.use_halo_field {
                    let n_expected = (f_coll_for_poisson[[ix, iy, iz]] * n_b_cell / m_min.max(1.0)).max(0.0);
                    if n_expected < N_POISSON {
                        let drawn = if flags.no_rng {
                            1.0
                        } else {
                            let mut rng = crate::rng::worker_rng(
                                crate::convert::usize_from_f64(z * 1000.0) as u64,
                                crate::convert::f64_from_usize(ix * shape.1 * shape.2 + iy * shape.2 + iz) as u64,
                            );
                            let lambda = n_expected.max(1.0e-6);
                            Poisson::new(lambda)
                                .map(|p| p.sample(&mut rng))
                                .unwrap_or(f64::from(rng.gen::<bool>()))
                        };
                        let scale = (drawn / n_expected.max(1.0e-10)).min(10.0);
                        residual = (1.0 - ionizing * scale - x_e_cell).clamp(0.0, 1.0);
                    }
                }
                x_h[[ix, iy, iz]] = residual;
            }
        }
    }

    let mut tk_all_gas = ts.tk.clone();
    let mut dn_rec = prev_ion.dn_rec.clone();

    let recomb_table = if flags.inhomo_reco {
        Some(recombination::build_recombination_table(5.0, 40.0, 16, 0.0, 20.0, 16)?)
    } else {
        None
    };

    for ((ix, iy, iz), &xh_cell) in x_h.indexed_iter() {
        if xh_cell < 1.0 {
            let zre_cell = z_re[[ix, iy, iz]];
            tk_all_gas[[ix, iy, iz]] =
                thermochem::compute_fully_ionized_temperature(T_RE_EQUILIBRIUM, ts.tk[[ix, iy, iz]], z_ion, zre_cell)
                    .max(ts.tk[[ix, iy, iz]]);
        }

        if let Some(table) = &recomb_table {
            let delta_cell = perturb.density[[ix, iy, iz]];
            let z_eff = (1.0 + z_ion) * (1.0 + delta_cell).max(1.0e-6).cbrt() - 1.0;
            let gamma = gamma_12[[ix, iy, iz]];
            let rate = recombination::splined_recombination_rate(table, z_eff.clamp(5.0, 40.0), gamma.clamp(0.0, 20.0))?;
            let dt_dz = cosmology::dtdz(cosmo, z_ion).abs();
            dn_rec[[ix, iy, iz]] += rate * dt_dz * (z_prev - z) * (1.0 - xh_cell);
        }
    }

    require_finite("ionized_box.x_h", x_h.iter().copied())?;
    require_finite("ionized_box.tk_all_gas", tk_all_gas.iter().copied())?;

    Ok(IonizedBox {
        x_h,
        z_re,
        gamma_12,
        mfp,
        dn_rec,
        tk_all_gas,
        mean_f_coll,
        mean_f_coll_mini,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{AstroParams, CosmoParams, SimulationFlags};

    fn flat_perturb(n: usize) -> PerturbedField {
        PerturbedField {
            density: RealGrid::zeros((n, n, n)),
            velocity_cb: RealGrid::zeros((n, n, n)),
            box_size: (n as f64 * 2.0, n as f64 * 2.0, n as f64 * 2.0),
        }
    }

    fn empty_prev_ion(shape: (usize, usize, usize)) -> IonizedBox {
        IonizedBox {
            x_h: RealGrid::from_elem(shape, 1.0),
            z_re: RealGrid::from_elem(shape, -1.0),
            gamma_12: RealGrid::zeros(shape),
            mfp: RealGrid::zeros(shape),
            dn_rec: RealGrid::zeros(shape),
            tk_all_gas: RealGrid::from_elem(shape, 100.0),
            mean_f_coll: 0.0,
            mean_f_coll_mini: 0.0,
        }
    }

    fn flat_ts(shape: (usize, usize, usize)) -> TsBox {
        TsBox {
            ts: RealGrid::from_elem(shape, 20.0),
            tk: RealGrid::from_elem(shape, 300.0),
            x_e: RealGrid::from_elem(shape, 1.0e-3),
            j_lw: RealGrid::zeros(shape),
        }
    }

    fn flat_halo_box(shape: (usize, usize, usize)) -> HaloBox {
        HaloBox {
            stellar_mass: RealGrid::zeros(shape),
            stellar_mass_mini: RealGrid::zeros(shape),
            sfr: RealGrid::zeros(shape),
            sfr_mini: RealGrid::zeros(shape),
            n_ion: RealGrid::zeros(shape),
            l_x: RealGrid::zeros(shape),
            mean_turn_acg: 0.0,
            mean_turn_mcg: 0.0,
            mean_turn_reion: 0.0,
        }
    }

    #[test]
    fn early_neutral_start_is_fully_neutral() {
        let cosmo = CosmoParams::default();
        let mut astro = AstroParams::default();
        astro.f_esc10 = 1.0e-8;
        let flags = SimulationFlags::default();
        let perturb = flat_perturb(8);
        let shape = perturb.shape();
        let prev_ion = empty_prev_ion(shape);
        let ts = flat_ts(shape);
        let halo_box = flat_halo_box(shape);

        let ionized =
            compute_ionised_box(&cosmo, &astro, &flags, 35.0, 36.0, &perturb, &halo_box, &prev_ion, &ts).unwrap();
        assert!(ionized.x_h.iter().all(|&v| v > 0.99));
    }

    #[test]
    fn outputs_stay_finite_and_bounded() {
        let cosmo = CosmoParams::default();
        let astro = AstroParams::default();
        let flags = SimulationFlags::default();
        let perturb = flat_perturb(8);
        let shape = perturb.shape();
        let prev_ion = empty_prev_ion(shape);
        let ts = flat_ts(shape);
        let halo_box = flat_halo_box(shape);

        let ionized =
            compute_ionised_box(&cosmo, &astro, &flags, 7.0, 8.0, &perturb, &halo_box, &prev_ion, &ts).unwrap();
        for &x_h in ionized.x_h.iter() {
            assert!((0.0..=1.0).contains(&x_h));
        }
        for &mfp in ionized.mfp.iter() {
            assert!(mfp >= 0.0);
        }
    }

    #[test]
    fn halo_mode_uses_n_ion_grid_as_source() {
        let cosmo = CosmoParams::default();
        let astro = AstroParams::default();
        let mut flags = SimulationFlags::default();
        flags.use_halo_field = true;
        let perturb = flat_perturb(8);
        let shape = perturb.shape();
        let prev_ion = empty_prev_ion(shape);
        let ts = flat_ts(shape);
        let mut halo_box = flat_halo_box(shape);
        halo_box.n_ion.fill(1.0e12);

        let ionized =
            compute_ionised_box(&cosmo, &astro, &flags, 7.0, 8.0, &perturb, &halo_box, &prev_ion, &ts).unwrap();
        for &x_h in ionized.x_h.iter() {
            assert!((0.0..=1.0).contains(&x_h));
        }
        assert!(ionized.x_h.iter().any(|&v| v < 1.0));
    }
}
