use thiserror::Error;

use molt_tir::{CfgError, InternalInvariantError, VerifierFailure};

/// Driver-level error kinds, per §7. `CfgInvalid` and `VerifierFailure` are soft by default (the
/// driver reverts to the last verified round and enters the degradation ladder); only
/// `ConvergenceFailure` under `MOLT_MIDEND_HARD_FAIL` and `InternalInvariant` ever propagate out
/// of [crate::pipeline::optimize_function] as an `Err`.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("cfg invalid during round {round}: {source}")]
    CfgInvalid {
        round: u32,
        #[source]
        source: CfgError,
    },

    #[error("definite-assignment verification failed in round {round}: {failures:?}")]
    VerifierFailed {
        round: u32,
        failures: Vec<VerifierFailure>,
    },

    #[error("failed to converge within {max_rounds} round(s)")]
    ConvergenceFailure { max_rounds: u32 },

    /// Dev-tier idempotence check (§4.12) failed: re-running the pipeline on an already-converged
    /// op sequence produced a different one. Always an internal invariant violation, never a soft
    /// degrade — convergence that doesn't hold on the second pass means a pass rewrote something
    /// it had no business touching.
    #[error("pipeline is not idempotent: re-running on the converged sequence changed it")]
    IdempotenceViolation,

    #[error(transparent)]
    InternalInvariant(#[from] InternalInvariantError),
}
