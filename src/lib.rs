//! Computational core of a semi-numerical 21-cm cosmological simulator:
//! the spin-temperature engine, halo-box gridder and ionisation
//! excursion-set solver, plus the cosmology/thermochemistry kernels they
//! are built on.
//!
//! Cosmological initial conditions, perturb-field displacement, halo
//! finding, CLI/IO and photon-conservation calibration are external
//! collaborators (§1, §6); this crate consumes their outputs and
//! produces the three output grids downstream 21-cm brightness
//! calculations need.

#![warn(missing_docs)]

pub mod convert;
pub mod cosmology;
pub mod error;
pub mod frequency;
pub mod grid;
pub mod halo;
pub mod hmf;
pub mod interp;
pub mod ionize;
pub mod orchestrator;
pub mod parallel;
pub mod params;
pub mod photon_cons;
pub mod radius;
pub mod recombination;
pub mod rng;
pub mod shells;
pub mod snapshot;
pub mod spintemp;
pub mod thermochem;

pub use error::{Error, Result};
pub use halo::{compute_halobox, HaloBox, HaloRecord};
pub use ionize::{compute_ionised_box, IonizedBox};
pub use orchestrator::Orchestrator;
pub use params::{AstroParams, CosmoParams, SimulationFlags};
pub use snapshot::{PerturbedField, Snapshot};
pub use spintemp::{compute_spin_temperature, TsBox};
