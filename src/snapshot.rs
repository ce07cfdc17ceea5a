//! Snapshot data model (§3): the perturbed-field input and the
//! double-buffered previous/current snapshot state threaded through the
//! orchestrator (§9 Design Notes).

use crate::grid::RealGrid;
use crate::halo::HaloBox;
use crate::ionize::IonizedBox;
use crate::spintemp::TsBox;

/// The externally-supplied perturbed density/velocity field for one
/// redshift (perturb-field displacement itself is out of scope, §1; this
/// crate only consumes the result).
#[derive(Clone, Debug)]
pub struct PerturbedField {
    /// Density contrast `delta = rho/rho_bar - 1` on the Eulerian lattice.
    pub density: RealGrid,
    /// Relative baryon-dark-matter streaming velocity, km/s.
    pub velocity_cb: RealGrid,
    /// Comoving box size along each axis, Mpc.
    pub box_size: (f64, f64, f64),
}

impl PerturbedField {
    /// The lattice shape `(N, N, N_z)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.density.dim()
    }
}

/// The full per-snapshot output: halo-box emissivities, spin-temperature
/// state and the ionisation field, bundled together so a caller driving
/// [`crate::orchestrator::Orchestrator`] doesn't have to sequence the
/// three component calls itself.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Redshift this snapshot was computed at.
    pub z: f64,
    /// Halo-box emissivity grids (§4.4).
    pub halo_box: HaloBox,
    /// Spin-temperature state (§4.5).
    pub ts_box: TsBox,
    /// Ionisation state (§4.6).
    pub ionized_box: IonizedBox,
}
