//! Typed failures returned from every public entry point of this crate.

use thiserror::Error;

/// Catch-all error for this crate.
///
/// Per-snapshot computations either succeed fully or fail outright; there
/// are no partially populated boxes. A parallel region that detects a
/// non-finite value records the condition and the caller raises the
/// corresponding variant once the region has finished, so that no data
/// race can occur between the detection and the abort.
#[derive(Debug, Error)]
pub enum Error {
    /// A frequency- or mass-function table contained a non-finite entry
    /// right after construction.
    #[error("table generation produced a non-finite entry: {0}")]
    TableGeneration(String),

    /// A table lookup fell outside the table's declared bounds.
    #[error("table evaluation out of bounds: {0}")]
    TableEvaluation(String),

    /// An output cell was non-finite (NaN or infinite) after a step.
    #[error("non-finite value encountered: {0}")]
    InfinityOrNaN(String),

    /// The upstream photon-conservation remap produced a non-finite
    /// redshift.
    #[error("photon conservation adjustment failed: {0}")]
    PhotonCons(String),

    /// An inconsistent combination of flags or parameters was detected at
    /// snapshot entry.
    #[error("invalid configuration: {0}")]
    Value(String),

    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Checks that every entry of `values` is finite, otherwise returns
/// [`Error::InfinityOrNaN`] tagged with `what`.
pub fn require_finite(what: &str, values: impl IntoIterator<Item = f64>) -> Result<()> {
    if values.into_iter().all(f64::is_finite) {
        Ok(())
    } else {
        Err(Error::InfinityOrNaN(what.to_string()))
    }
}
