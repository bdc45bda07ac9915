use thiserror::Error;

/// CFG construction / structural validation failures. Corresponds to the `CfgInvalid` error
/// kind of §7: the validator attempts a single repair pass before surfacing these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("op {op_index} references an undefined label target")]
    UnknownLabelTarget { op_index: usize },

    #[error("unbalanced {kind} region starting at op {op_index}")]
    UnbalancedRegion { op_index: usize, kind: &'static str },

    #[error("PHI at op {op_index} has {found} argument(s) but block has {expected} predecessor(s), and no canonical re-permutation exists")]
    PhiArityMismatch {
        op_index: usize,
        found: usize,
        expected: usize,
    },
}

/// A definite-assignment failure discovered by the §4.11 verifier: `(op_index, op_kind,
/// missing_name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierFailure {
    pub op_index: usize,
    pub op_kind: &'static str,
    pub missing_name: String,
}

/// Internal invariant violations: contract violations that survive pre-canonicalization and
/// validation. These are always fatal (§7 `InternalInvariant`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InternalInvariantError {
    #[error("PHI shape mismatch survived pre-canonicalization at op {op_index}")]
    PhiShapeMismatch { op_index: usize },

    #[error("CFG rebuild failed after a round that was reported as changed: {0}")]
    CfgRebuildFailed(#[from] CfgError),
}
