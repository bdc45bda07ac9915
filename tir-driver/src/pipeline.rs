use std::collections::{hash_map::DefaultHasher, HashMap};
use std::hash::{Hash, Hasher};
use std::time::Instant;

use rustc_hash::FxHashSet;

use molt_tir::{Arg, Function, Op, OpKind, ValueId};
use molt_tir_analysis::SccpConfig;
use molt_tir_transform::{run_round, RoundPolicy};

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::policy::{resolve_policy, PolicyInput, Profile, Tier};
use crate::telemetry::{FunctionTelemetry, PassTiming, PolicyOutcome};

/// Everything a caller needs from one function's optimization run: the rewritten ops plus the
/// telemetry §6 specifies.
#[derive(Debug)]
pub struct OptimizeOutcome {
    pub ops: Vec<Op>,
    pub stats: FunctionTelemetry,
    pub policy_outcome: PolicyOutcome,
    pub pass_timings: HashMap<&'static str, PassTiming>,
}

/// The public seam the front-end and back-end are expected to call (§A): resolve this
/// function's policy, then drive rounds of `molt_tir_transform::run_round` to a fixed point,
/// honoring the budget/rounds degradation ladder of §4.12.
pub fn optimize_function(
    function: &Function,
    profile: Profile,
    config: &DriverConfig,
) -> Result<OptimizeOutcome, DriverError> {
    let profile_name = match profile {
        Profile::Dev => "dev",
        Profile::Release => "release",
    };
    let block_count = molt_tir::build_cfg(&function.ops).map(|cfg| cfg.num_blocks()).unwrap_or(1);
    let policy = resolve_policy(
        PolicyInput {
            profile,
            op_count: function.op_count(),
            block_count,
        },
        config,
    );
    let dev_tier = matches!(policy.tier, Tier::A) || config.dev_enable;

    let mut telemetry = FunctionTelemetry::default();
    let mut policy_outcome = PolicyOutcome::new(profile_name, policy.tier);
    let mut pass_timings: HashMap<&'static str, PassTiming> = HashMap::new();

    let mut ops = function.ops.clone();
    let mut last_verified = ops.clone();
    let mut round_policy = RoundPolicy::default();
    let sccp_config = SccpConfig {
        max_iters: policy.sccp_iter_cap,
    };

    let mut prev_hash: Option<u64> = None;
    let mut hash_two_back: Option<u64> = None;
    let started = Instant::now();
    let mut round_index = 0u32;

    loop {
        if round_index >= policy.max_rounds {
            policy_outcome.record_degrade_event("accept_last_verified_round", "rounds_exceeded");
            ops = last_verified;
            break;
        }
        let spent_ms = started.elapsed().as_secs_f64() * 1000.0;
        if spent_ms >= policy.budget_ms as f64 {
            policy_outcome.record_degrade_event("accept_last_verified_round", "budget_exceeded");
            ops = last_verified;
            break;
        }

        round_index += 1;
        telemetry.expanded_attempts += 1;

        let round_started = Instant::now();
        let round_result = run_round(
            &mut ops,
            &function.values,
            &function.predefined_value_names,
            sccp_config,
            round_policy,
        );
        let round_ms = round_started.elapsed().as_secs_f64() * 1000.0;

        let (round_stats, failures) = match round_result {
            Ok(v) => v,
            Err(source) => {
                // Soft by default, matching `VerifierFailed` below: a round that left the CFG
                // unbuildable never happened, as far as the caller is concerned. Revert and let
                // the degradation ladder try a more conservative round shape before giving up.
                record_sample(&mut pass_timings, "round", round_ms, true);
                ops = last_verified.clone();
                policy_outcome.record_degrade_event("revert_round", "cfg_invalid");
                telemetry.expanded_fallbacks += 1;
                if !step_degradation_ladder(&mut round_policy, &mut policy_outcome) {
                    if config.hard_fail {
                        return Err(DriverError::CfgInvalid {
                            round: round_index,
                            source,
                        });
                    }
                    break;
                }
                continue;
            }
        };
        record_sample(&mut pass_timings, "round", round_ms, !failures.is_empty());

        if !failures.is_empty() {
            // A round that broke definite-assignment never happened, as far as the caller is
            // concerned: revert to the last verified sequence and degrade for the remainder.
            ops = last_verified.clone();
            policy_outcome.record_degrade_event("revert_round", "verifier_failure");
            telemetry.expanded_fallbacks += 1;
            if !step_degradation_ladder(&mut round_policy, &mut policy_outcome) {
                if config.hard_fail {
                    return Err(DriverError::VerifierFailed {
                        round: round_index,
                        failures,
                    });
                }
                break;
            }
            continue;
        }

        telemetry.accumulate(&round_stats);
        telemetry.expanded_accepted += 1;
        last_verified = ops.clone();

        let hash = structural_hash(&ops);
        if prev_hash == Some(hash) {
            break;
        }
        if hash_two_back == Some(hash) {
            // The sequence is alternating between two states rather than converging: no amount
            // of further rounds will settle it.
            telemetry.fixed_point_fail_fast += 1;
            policy_outcome.record_degrade_event("fixed_point_fail_fast", "oscillation_detected");
            if config.hard_fail {
                return Err(DriverError::ConvergenceFailure {
                    max_rounds: policy.max_rounds,
                });
            }
            break;
        }
        hash_two_back = prev_hash;
        prev_hash = Some(hash);
    }

    policy_outcome.spent_ms = (started.elapsed().as_secs_f64() * 1000.0).round() as u64;

    telemetry.sccp_branch_prunes = count_sccp_branch_prunes(&ops, &function.values, sccp_config);

    check_idempotence(
        &ops,
        function,
        sccp_config,
        dev_tier,
        &mut telemetry,
        &mut pass_timings,
    )?;

    Ok(OptimizeOutcome {
        ops,
        stats: telemetry,
        policy_outcome,
        pass_timings,
    })
}

/// Apply the next untaken step of the §4.12 degradation ladder. Returns `false` once every step
/// short of hard failure has been exhausted this run.
fn step_degradation_ladder(round_policy: &mut RoundPolicy, outcome: &mut PolicyOutcome) -> bool {
    if round_policy.enable_deep_edge_thread {
        round_policy.enable_deep_edge_thread = false;
        outcome.record_degrade_event("disable_deep_edge_thread", "verifier_failure");
        return true;
    }
    if round_policy.enable_cross_block_const_dedupe {
        round_policy.enable_cross_block_const_dedupe = false;
        outcome.record_degrade_event("disable_cross_block_const_dedupe", "verifier_failure");
        return true;
    }
    false
}

/// A structural hash of the op sequence that ignores `LINE` ops, per §9's resolved Open
/// Question: two rounds converge iff they're equal ignoring source-line metadata.
fn structural_hash(ops: &[Op]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for op in ops {
        if op.kind == OpKind::Line {
            continue;
        }
        op.kind.hash(&mut hasher);
        op.result.map(ValueId::as_u32).hash(&mut hasher);
        op.args.len().hash(&mut hasher);
        for arg in &op.args {
            hash_arg(arg, &mut hasher);
        }
    }
    hasher.finish()
}

fn hash_arg(arg: &Arg, hasher: &mut impl Hasher) {
    match arg {
        Arg::Value(v) => {
            0u8.hash(hasher);
            v.as_u32().hash(hasher);
        }
        Arg::ImmInt(i) => {
            1u8.hash(hasher);
            i.hash(hasher);
        }
        Arg::ImmBool(b) => {
            2u8.hash(hasher);
            b.hash(hasher);
        }
        Arg::ImmStr(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Arg::Label(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Arg::None => 5u8.hash(hasher),
    }
}

/// Run a read-only SCCP pass over the converged sequence purely to report `sccp_branch_prunes`
/// (§6): a branch SCCP proved goes only one way. This is deliberately not threaded out of
/// `run_round` itself, since the driver is the only caller that needs it for telemetry rather
/// than for a rewrite decision.
fn count_sccp_branch_prunes(ops: &[Op], values: &molt_tir::ValueTable, sccp_config: SccpConfig) -> usize {
    let Ok(cfg) = molt_tir::build_cfg(ops) else {
        return 0;
    };
    let sccp = molt_tir_analysis::run_sccp(ops, &cfg, values, &FxHashSet::default(), sccp_config);
    sccp.branch_choice
        .values()
        .filter(|choice| !matches!(choice, molt_tir_analysis::BranchChoice::Both))
        .count()
}

/// §4.12's idempotence property: re-running the pipeline on an already-converged sequence must
/// produce an equal sequence within one round. Dev tier treats a violation as fatal; release
/// tier only records it.
fn check_idempotence(
    converged: &[Op],
    function: &Function,
    sccp_config: SccpConfig,
    dev_tier: bool,
    telemetry: &mut FunctionTelemetry,
    pass_timings: &mut HashMap<&'static str, PassTiming>,
) -> Result<(), DriverError> {
    let mut second_pass = converged.to_vec();
    let started = Instant::now();
    let result = run_round(
        &mut second_pass,
        &function.values,
        &function.predefined_value_names,
        sccp_config,
        RoundPolicy::default(),
    );
    let ms = started.elapsed().as_secs_f64() * 1000.0;

    let idempotent = match &result {
        Ok((_, failures)) => failures.is_empty() && structural_hash(&second_pass) == structural_hash(converged),
        Err(_) => false,
    };
    record_sample(pass_timings, "idempotence_check", ms, !idempotent);

    if idempotent {
        return Ok(());
    }
    if dev_tier {
        return Err(DriverError::IdempotenceViolation);
    }
    telemetry.idempotence_violation = true;
    Ok(())
}

fn record_sample(
    pass_timings: &mut HashMap<&'static str, PassTiming>,
    name: &'static str,
    ms: f64,
    degraded: bool,
) {
    pass_timings.entry(name).or_default().record_sample(ms, degraded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{ArgVec, ValueTable};

    fn const_return_function() -> Function {
        let mut values = ValueTable::new();
        let k = values.intern("k");
        let ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(k)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        Function::new("f", "m", "m.py", ops, values, FxHashSet::default())
    }

    #[test]
    fn trivial_function_optimizes_cleanly_under_dev_profile() {
        let function = const_return_function();
        let outcome =
            optimize_function(&function, Profile::Dev, &DriverConfig::default()).unwrap();
        assert!(!outcome.policy_outcome.degraded);
        assert_eq!(outcome.policy_outcome.tier, "A");
    }

    #[test]
    fn zero_budget_degrades_immediately_and_returns_the_input() {
        let function = const_return_function();
        let config = DriverConfig {
            budget_ms_override: Some(0),
            ..DriverConfig::default()
        };
        let outcome = optimize_function(&function, Profile::Release, &config).unwrap();
        assert!(outcome.policy_outcome.degraded);
        assert_eq!(outcome.ops.len(), function.ops.len());
    }

    #[test]
    fn sccp_branch_prune_is_counted_on_a_constant_if() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let k = values.intern("k");
        let ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(11), 1), Some(k)),
            Op::nullary(OpKind::Else),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(99), 1), Some(k)),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        let function = Function::new("f", "m", "m.py", ops, values, FxHashSet::default());
        let outcome =
            optimize_function(&function, Profile::Dev, &DriverConfig::default()).unwrap();
        assert!(outcome.stats.sccp_branch_prunes > 0 || outcome.stats.cfg_region_prunes > 0);
    }

    #[test]
    fn structural_hash_ignores_line_ops() {
        let mut values = ValueTable::new();
        let k = values.intern("k");
        let base = vec![Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(k))];
        let mut with_line = base.clone();
        with_line.push(Op::new(OpKind::Line, ArgVec::from_elem(Arg::ImmInt(42), 1), None));
        assert_eq!(structural_hash(&base), structural_hash(&with_line));
    }
}
