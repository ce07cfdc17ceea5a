//! Per-snapshot lifecycle orchestrator (§2.7, §6, §9 Design Notes).
//!
//! Sequences the three public entry points ([`compute_halobox`],
//! [`compute_spin_temperature`], [`compute_ionised_box`]) in the fixed
//! order the data flow requires, threading the previous snapshot's
//! outputs in as read-only borrows and returning the new [`Snapshot`]
//! as one owned value.

use crate::error::Result;
use crate::grid::RealGrid;
use crate::halo::{compute_halobox, HaloRecord};
use crate::ionize::{compute_ionised_box, IonizedBox};
use crate::params::{AstroParams, CosmoParams, SimulationFlags};
use crate::snapshot::{PerturbedField, Snapshot};
use crate::spintemp::compute_spin_temperature;

/// Owns the run-wide configuration and drives the snapshot lifecycle.
pub struct Orchestrator {
    cosmo: CosmoParams,
    astro: AstroParams,
    flags: SimulationFlags,
    base_seed: u64,
}

impl Orchestrator {
    /// Builds an orchestrator for a run with the given configuration.
    #[must_use]
    pub const fn new(cosmo: CosmoParams, astro: AstroParams, flags: SimulationFlags, base_seed: u64) -> Self {
        Self {
            cosmo,
            astro,
            flags,
            base_seed,
        }
    }

    /// Returns the cosmology this orchestrator was built with.
    #[must_use]
    pub const fn cosmo(&self) -> &CosmoParams {
        &self.cosmo
    }

    /// Returns the astrophysics parameters this orchestrator was built with.
    #[must_use]
    pub const fn astro(&self) -> &AstroParams {
        &self.astro
    }

    /// Returns the simulation flags this orchestrator was built with.
    #[must_use]
    pub const fn flags(&self) -> &SimulationFlags {
        &self.flags
    }

    fn default_ionized_box(shape: (usize, usize, usize), tk: &RealGrid) -> IonizedBox {
        IonizedBox {
            x_h: RealGrid::from_elem(shape, 1.0),
            z_re: RealGrid::from_elem(shape, -1.0),
            gamma_12: RealGrid::zeros(shape),
            mfp: RealGrid::zeros(shape),
            dn_rec: RealGrid::zeros(shape),
            tk_all_gas: tk.clone(),
            mean_f_coll: 0.0,
            mean_f_coll_mini: 0.0,
        }
    }

    /// Advances from `z_prev` to `z`, running the halo, spin-temperature
    /// and ionisation stages in order.
    ///
    /// `previous` is the prior snapshot, or `None` for the first step of
    /// a run (both the spin-temperature and ionisation stages then fall
    /// back to their closed-form / fully-neutral initial conditions).
    ///
    /// # Errors
    ///
    /// Propagates any error from the three component stages.
    pub fn advance(
        &self,
        z: f64,
        z_prev: f64,
        perturb: &PerturbedField,
        halos: Option<&[HaloRecord]>,
        previous: Option<&Snapshot>,
    ) -> Result<Snapshot> {
        self.flags.validate()?;
        let shape = perturb.shape();

        let zeros = RealGrid::zeros(shape);
        let prev_gamma_12 = previous.map_or(&zeros, |s| &s.ionized_box.gamma_12);
        let never_ionised = RealGrid::from_elem(shape, -1.0);
        let prev_z_re = previous.map_or(&never_ionised, |s| &s.ionized_box.z_re);
        let prev_j_lw = previous.map_or(&zeros, |s| &s.ts_box.j_lw);

        let halo_box = compute_halobox(
            &self.cosmo,
            &self.astro,
            &self.flags,
            z,
            perturb,
            halos,
            prev_gamma_12,
            prev_z_re,
            prev_j_lw,
            self.base_seed,
        )?;

        let prev_ts = previous.map(|s| &s.ts_box);
        let ts_box = compute_spin_temperature(
            &self.cosmo,
            &self.astro,
            &self.flags,
            z,
            z_prev,
            perturb,
            prev_ts,
            &halo_box,
        )?;

        let default_ion = Self::default_ionized_box(shape, &ts_box.tk);
        let prev_ion = previous.map_or(&default_ion, |s| &s.ionized_box);
        let ionized_box = compute_ionised_box(
            &self.cosmo,
            &self.astro,
            &self.flags,
            z,
            z_prev,
            perturb,
            &halo_box,
            prev_ion,
            &ts_box,
        )?;

        Ok(Snapshot {
            z,
            halo_box,
            ts_box,
            ionized_box,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RealGrid;

    #[test]
    fn first_step_runs_without_a_previous_snapshot() {
        let orchestrator = Orchestrator::new(
            CosmoParams::default(),
            AstroParams::default(),
            SimulationFlags::default(),
            7,
        );
        let perturb = PerturbedField {
            density: RealGrid::zeros((8, 8, 8)),
            velocity_cb: RealGrid::zeros((8, 8, 8)),
            box_size: (16.0, 16.0, 16.0),
        };

        let snapshot = orchestrator.advance(35.0, 36.0, &perturb, None, None).unwrap();
        assert_eq!(snapshot.z, 35.0);
        assert!(snapshot.ionized_box.x_h.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn second_step_consumes_the_previous_snapshot() {
        let orchestrator = Orchestrator::new(
            CosmoParams::default(),
            AstroParams::default(),
            SimulationFlags::default(),
            7,
        );
        let perturb = PerturbedField {
            density: RealGrid::zeros((8, 8, 8)),
            velocity_cb: RealGrid::zeros((8, 8, 8)),
            box_size: (16.0, 16.0, 16.0),
        };

        let first = orchestrator.advance(20.0, 21.0, &perturb, None, None).unwrap();
        let second = orchestrator.advance(19.0, 20.0, &perturb, None, Some(&first)).unwrap();
        assert_eq!(second.z, 19.0);
    }
}
