//! Mid-end transform passes: pre-canonicalization, structural validation, GVN/CSE, the guard
//! subsystem, LICM, edge threading, DCE, and the definite-assignment verifier. The fixed-point
//! driver (a separate crate) sequences these into rounds per §4.12.

pub mod dce;
pub mod edge_thread;
pub mod guards;
pub mod gvn_cse;
pub mod licm;
pub mod pre_canonicalize;
pub mod validator;
pub mod verifier;

pub use dce::{can_raise_anywhere, DceStats};
pub use edge_thread::EdgeThreadStats;
pub use guards::GuardStats;
pub use gvn_cse::CseStats;
pub use licm::LicmStats;
pub use validator::ValidationOutcome;

use molt_tir::{CfgError, Op, ValueId, ValueTable, VerifierFailure};
use molt_tir_analysis::{DominatorTree, SccpConfig};
use rustc_hash::FxHashSet;

/// Aggregate telemetry for a single round of every transform pass, per §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundStats {
    pub pre_canonicalize_rewrites: usize,
    pub validation: Option<ValidationOutcomeStats>,
    pub cse: CseStats,
    pub cse_rewrites: usize,
    pub guards: GuardStats,
    pub licm: LicmStats,
    pub edge_thread: EdgeThreadStats,
    pub dce: DceStats,
    /// Summed across this round's two internal SCCP runs (before and after DCE's CFG rebuild).
    pub sccp_iteration_cap_hits: usize,
}

/// A `ValidationOutcome` flattened to telemetry-friendly counters (the outcome itself carries a
/// `Vec`, which doesn't belong on a `Copy` stats struct).
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOutcomeStats {
    pub repaired: bool,
    pub markers_inserted: usize,
}

/// The two per-round feature flags the driver's degradation ladder (§4.12) can turn off for the
/// remainder of a function's optimization run. Both default to enabled.
#[derive(Debug, Clone, Copy)]
pub struct RoundPolicy {
    /// The edge threader (§4.8) threads both loop breaks and try/check-exception ladders across
    /// region boundaries; disabling it skips the whole pass rather than a partial subset, since
    /// there is no cheaper "shallow" variant of what is already a single linear scan.
    pub enable_deep_edge_thread: bool,
    /// GVN/CSE (§4.5) is inherently cross-block (it walks the dominator tree); disabling it
    /// skips the whole pass for the remainder of the run rather than degrading to a
    /// block-local-only mode that doesn't exist in this implementation.
    pub enable_cross_block_const_dedupe: bool,
}

impl Default for RoundPolicy {
    fn default() -> Self {
        Self {
            enable_deep_edge_thread: true,
            enable_cross_block_const_dedupe: true,
        }
    }
}

/// Run one full round of transform passes over `ops`, in the fixed order from §4.12:
/// pre-canonicalize, validate/repair, SCCP, GVN/CSE, guard subsystem, LICM, edge threader,
/// DCE/region prune, then the definite-assignment verifier. Returns the round's telemetry and
/// any verifier failures (the driver decides whether those are fatal or trigger a revert).
///
/// `predefined` is the function's parameters and closure cells (§6), needed by both SCCP (they
/// start at the `Overdefined` lattice point, never `Undefined`) and the verifier (they are
/// defined on every path, before op 0).
pub fn run_round(
    ops: &mut Vec<Op>,
    values: &ValueTable,
    predefined: &FxHashSet<ValueId>,
    sccp_config: SccpConfig,
    policy: RoundPolicy,
) -> Result<(RoundStats, Vec<VerifierFailure>), CfgError> {
    let mut stats = RoundStats::default();

    stats.pre_canonicalize_rewrites = pre_canonicalize::run_to_fixpoint(ops)?;

    let (cfg, outcome) = validator::validate_and_repair(ops)?;
    stats.validation = Some(match &outcome {
        ValidationOutcome::Balanced => ValidationOutcomeStats::default(),
        ValidationOutcome::Repaired { inserted } => ValidationOutcomeStats {
            repaired: true,
            markers_inserted: inserted.len(),
        },
    });

    let mut sccp = molt_tir_analysis::run_sccp(ops, &cfg, values, predefined, sccp_config);
    stats.sccp_iteration_cap_hits += sccp.iteration_cap_hits;
    let dom = DominatorTree::compute(&cfg);

    if policy.enable_cross_block_const_dedupe {
        let (cse_rewrites, cse_stats) = gvn_cse::run(ops, &cfg, &dom);
        stats.cse = cse_stats;
        stats.cse_rewrites = cse_rewrites;
    }

    stats.guards = guards::run(ops, &cfg, &dom, &sccp);
    stats.licm = licm::run(ops, &cfg, &dom, &sccp);
    if policy.enable_deep_edge_thread {
        stats.edge_thread = edge_thread::run(ops, &cfg, &sccp);
    }

    // DCE needs a fresh CFG/SCCP: the guard/LICM/edge-thread passes above may have pruned guards,
    // moved ops across the loop pre-header boundary, or rewritten terminators, all of which shift
    // block boundaries out from under the `cfg`/`sccp` computed before them.
    let cfg = molt_tir::build_cfg(ops)?;
    sccp = molt_tir_analysis::run_sccp(ops, &cfg, values, predefined, sccp_config);
    stats.sccp_iteration_cap_hits += sccp.iteration_cap_hits;
    stats.dce = dce::run(ops, &cfg, &sccp);

    let cfg = molt_tir::build_cfg(ops)?;
    let failures = verifier::run(ops, &cfg, values, predefined);

    Ok((stats, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{Arg, ArgVec, OpKind};

    #[test]
    fn round_on_trivial_function_converges_with_no_failures() {
        let mut values = ValueTable::new();
        let dead = values.intern("dead");
        let live = values.intern("live");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(dead)),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(2), 1), Some(live)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(live), 1), None),
        ];
        let (stats, failures) = run_round(
            &mut ops,
            &values,
            &FxHashSet::default(),
            SccpConfig::default(),
            RoundPolicy::default(),
        )
        .unwrap();
        assert!(failures.is_empty());
        assert_eq!(stats.dce.dce_removed_total, 1);
    }

    #[test]
    fn disabling_cross_block_dedupe_skips_cse_and_edge_thread_skips_its_pass() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let mut ops = vec![
            Op::nullary(OpKind::LoopStart),
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::LoopBreakIfTrue, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::nullary(OpKind::LoopEnd),
            Op::new(OpKind::Label, ArgVec::from_elem(Arg::Label("after".into()), 1), None),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(cond), 1), None),
        ];
        let policy = RoundPolicy {
            enable_deep_edge_thread: false,
            enable_cross_block_const_dedupe: false,
        };
        let (stats, _) = run_round(
            &mut ops,
            &values,
            &FxHashSet::default(),
            SccpConfig::default(),
            policy,
        )
        .unwrap();
        assert_eq!(stats.cse_rewrites, 0);
        assert_eq!(stats.edge_thread.loop_edge_thread_prunes, 0);
        assert!(ops.iter().any(|op| op.kind == OpKind::LoopBreakIfTrue));
    }

    #[test]
    fn round_prunes_statically_dead_else_arm_end_to_end() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let k = values.intern("k");
        let mut ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(11), 1), Some(k)),
            Op::nullary(OpKind::Else),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(99), 1), Some(k)),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        let (stats, failures) = run_round(
            &mut ops,
            &values,
            &FxHashSet::default(),
            SccpConfig::default(),
            RoundPolicy::default(),
        )
        .unwrap();
        assert!(failures.is_empty());
        assert!(stats.dce.cfg_region_prunes > 0);
        assert!(!ops
            .iter()
            .any(|op| op.kind == OpKind::Const && op.args.iter().any(|a| a.as_int() == Some(99))));
    }
}
