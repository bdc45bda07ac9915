use molt_tir::{Arg, Cfg, Op, OpKind};
use molt_tir_analysis::{BranchChoice, SccpResult};

use crate::dce::can_raise_anywhere;

/// Telemetry for one edge-threading run, per §4.8 / §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeThreadStats {
    pub loop_edge_thread_prunes: usize,
    pub try_edge_thread_prunes: usize,
}

/// Thread loop-break and try/check-exception edges SCCP has proven, per §4.8. Ladder
/// normalization (collapsing `LABEL -> JUMP -> LABEL` chains) is handled up front by the
/// pre-canonicalizer (§4.2), which always runs earlier in the round (§4.12); this pass only
/// assumes labels already point at their final destination.
pub fn run(ops: &mut Vec<Op>, cfg: &Cfg, sccp: &SccpResult) -> EdgeThreadStats {
    let mut stats = EdgeThreadStats::default();
    let mut remove = vec![false; ops.len()];
    let mut rewrite_jump: Vec<Option<String>> = vec![None; ops.len()];

    thread_loop_breaks(ops, sccp, &mut remove, &mut rewrite_jump, &mut stats);
    thread_try_regions(ops, cfg, sccp, &mut remove, &mut rewrite_jump, &mut stats);

    for (idx, target) in rewrite_jump.into_iter().enumerate() {
        if let Some(target) = target {
            ops[idx] = Op::new(OpKind::Jump, [Arg::Label(target)].into_iter().collect(), None);
        }
    }

    if remove.iter().any(|r| *r) {
        let mut kept = Vec::with_capacity(ops.len());
        for (idx, op) in ops.drain(..).enumerate() {
            if !remove[idx] {
                kept.push(op);
            }
        }
        *ops = kept;
    }

    stats
}

/// For `LOOP_BREAK_IF_TRUE`/`IF_FALSE` with an SCCP-proven outcome, rewrite to an unconditional
/// `JUMP` and delete the rest of the now-unreachable loop tail up to `LOOP_END`.
fn thread_loop_breaks(
    ops: &[Op],
    sccp: &SccpResult,
    remove: &mut [bool],
    rewrite_jump: &mut [Option<String>],
    stats: &mut EdgeThreadStats,
) {
    let mut loop_end_of: Vec<usize> = vec![usize::MAX; ops.len()];
    let mut stack: Vec<usize> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        match op.kind {
            OpKind::LoopStart => stack.push(idx),
            OpKind::LoopEnd => {
                if let Some(start_idx) = stack.pop() {
                    for i in start_idx..=idx {
                        loop_end_of[i] = idx;
                    }
                }
            }
            _ => {}
        }
    }

    for (idx, op) in ops.iter().enumerate() {
        if !matches!(op.kind, OpKind::LoopBreakIfTrue | OpKind::LoopBreakIfFalse) {
            continue;
        }
        // `BranchChoice::Then` always denotes "the break edge is proven taken" here, regardless
        // of whether this op is the IF_TRUE or IF_FALSE variant: SCCP already folds that
        // distinction in when it records the fact (see `loop_break_choice`).
        if sccp.loop_break_choice.get(&idx) != Some(&BranchChoice::Then) {
            continue;
        }
        let end_idx = loop_end_of[idx];
        if end_idx == usize::MAX {
            continue;
        }
        // The fallthrough after LOOP_END is the break target: thread directly to its label.
        // `LOOP_END` itself is left in place (now unreachable, cleaned up by the next round's
        // region pruning) rather than removed here, so the marker stack the CFG builder walks
        // stays balanced.
        let Some(after_label) = label_immediately_after(ops, end_idx) else {
            continue;
        };
        rewrite_jump[idx] = Some(after_label.to_string());
        for i in (idx + 1)..end_idx {
            remove[i] = true;
        }
        stats.loop_edge_thread_prunes += 1;
    }
}

fn label_immediately_after(ops: &[Op], idx: usize) -> Option<&str> {
    ops.get(idx + 1).and_then(|op| match op.kind {
        OpKind::Label | OpKind::StateLabel => op.label_arg(),
        _ => None,
    })
}

/// For each `TRY_START`/`TRY_END` region, use SCCP's `try_exception_possible`/`try_normal_possible`
/// facts (keyed by the `TRY_START` index) to either thread the must-raise case straight to the
/// handler or elide the whole region in the no-raise case.
fn thread_try_regions(
    ops: &[Op],
    cfg: &Cfg,
    sccp: &SccpResult,
    remove: &mut [bool],
    rewrite_jump: &mut [Option<String>],
    stats: &mut EdgeThreadStats,
) {
    let pairs: Vec<(usize, usize)> = cfg
        .control
        .try_start_to_end
        .iter()
        .map(|(&s, &e)| (s, e))
        .collect();

    for (start_idx, end_idx) in pairs {
        let Some(check_idx) = find_check_exception_for(ops, start_idx, end_idx) else {
            continue;
        };
        let Some(handler) = ops[check_idx].label_arg().map(|s| s.to_string()) else {
            continue;
        };

        let exception_possible = sccp.try_exception_possible.get(&start_idx).copied();
        let normal_possible = sccp.try_normal_possible.get(&start_idx).copied();

        match (exception_possible, normal_possible) {
            (Some(false), _) if !can_raise_anywhere(ops, start_idx, end_idx) => {
                // No-raise case: the entire try region always completes normally, so the
                // CHECK_EXCEPTION and its TRY_START/TRY_END markers carry no information.
                remove[start_idx] = true;
                remove[end_idx] = true;
                remove[check_idx] = true;
                stats.try_edge_thread_prunes += 1;
            }
            (Some(true), Some(false)) => {
                // Must-raise case: every path through the body raises, so CHECK_EXCEPTION never
                // sees a normal completion; thread it straight to the handler and prune the dead
                // ops ahead of it. TRY_START/TRY_END are left in place (now dead code, cleaned up
                // by the next round's region pruning) so the marker stack stays balanced.
                rewrite_jump[check_idx] = Some(handler);
                for i in (start_idx + 1)..check_idx {
                    remove[i] = true;
                }
                stats.try_edge_thread_prunes += 1;
            }
            _ => {}
        }
    }
}

fn find_check_exception_for(ops: &[Op], start_idx: usize, end_idx: usize) -> Option<usize> {
    (start_idx..=end_idx)
        .rev()
        .find(|&idx| ops[idx].kind == OpKind::CheckException)
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, ArgVec, ValueTable};
    use molt_tir_analysis::{run_sccp, SccpConfig};

    #[test]
    fn proven_true_loop_break_threads_to_label_after_loop_end() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let mut ops = vec![
            Op::nullary(OpKind::LoopStart),
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::LoopBreakIfTrue, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::nullary(OpKind::LoopEnd),
            Op::new(OpKind::Label, ArgVec::from_elem(Arg::Label("after".into()), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let stats = run(&mut ops, &cfg, &sccp);
        assert_eq!(stats.loop_edge_thread_prunes, 1);
        assert!(ops
            .iter()
            .any(|op| op.kind == OpKind::Jump && op.label_arg() == Some("after")));
        // LOOP_END itself stays (now unreachable dead code); only the break's own op is rewritten.
        assert!(ops.iter().any(|op| op.kind == OpKind::LoopEnd));
        assert!(!ops.iter().any(|op| op.kind == OpKind::LoopBreakIfTrue));
    }

    #[test]
    fn no_raise_try_region_is_elided() {
        let mut values = ValueTable::new();
        let k = values.intern("k");
        let mut ops = vec![
            Op::nullary(OpKind::TryStart),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(k)),
            Op::new(
                OpKind::CheckException,
                ArgVec::from_elem(Arg::Label("handler".into()), 1),
                None,
            ),
            Op::nullary(OpKind::TryEnd),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
            Op::new(OpKind::Label, ArgVec::from_elem(Arg::Label("handler".into()), 1), None),
            Op::new(OpKind::Raise, ArgVec::new(), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let stats = run(&mut ops, &cfg, &sccp);
        assert_eq!(stats.try_edge_thread_prunes, 1);
        assert!(!ops.iter().any(|op| op.kind == OpKind::TryStart));
        assert!(!ops.iter().any(|op| op.kind == OpKind::CheckException));
    }
}
