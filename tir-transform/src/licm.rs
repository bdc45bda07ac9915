use rustc_hash::FxHashSet;

use molt_tir::{classify, effects, BlockId, Cfg, EffectClass, Op, OpKind, ValueId};
use molt_tir_analysis::{DominatorTree, SccpResult};

/// Telemetry for one LICM run, per §4.7 / §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct LicmStats {
    pub licm_hoisted: usize,
    pub licm_rejected_trap: usize,
    pub licm_rejected_loop_carried: usize,
}

/// A natural loop, as discovered from a `LOOP_START`/`LOOP_END` marker pair: the set of blocks
/// between them, and the block containing `LOOP_START` itself (the hoist destination is
/// immediately before that op).
struct Loop {
    start_idx: usize,
    header: BlockId,
    body_blocks: FxHashSet<BlockId>,
}

/// Hoist loop-invariant pure ops above their loop's `LOOP_START`, innermost loop first, per §4.7.
///
/// Moving an op out of a loop body changes block boundaries, which invalidates `cfg`/`dom` for
/// every op index at or after the hoist point. Rather than recompute them mid-call, this hoists
/// at most one loop's worth of ops per invocation and relies on the driver's fixed-point rounds
/// (§4.12) to call in again, with a freshly rebuilt CFG, for any loop left untouched this round.
pub fn run(ops: &mut Vec<Op>, cfg: &Cfg, dom: &DominatorTree, sccp: &SccpResult) -> LicmStats {
    let mut stats = LicmStats::default();
    let mut loops = find_loops(ops, cfg);
    // Innermost-to-outermost: a loop nested inside another has a larger body (it's discovered at
    // a deeper nesting level in source order, but here we simply sort by body size ascending,
    // since an inner loop's body is always a subset of its enclosing loop's).
    loops.sort_by_key(|l| l.body_blocks.len());

    for lp in &loops {
        let before = stats.licm_hoisted;
        hoist_loop(ops, cfg, dom, sccp, lp, &mut stats);
        if stats.licm_hoisted > before {
            // `ops` now has different block boundaries than `cfg` describes; stop here and let
            // the next round's rebuilt CFG pick up any remaining loops.
            break;
        }
    }

    stats
}

fn find_loops(ops: &[Op], cfg: &Cfg) -> Vec<Loop> {
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        match op.kind {
            OpKind::LoopStart => stack.push(idx),
            OpKind::LoopEnd => {
                if let Some(start_idx) = stack.pop() {
                    pairs.push((start_idx, idx));
                }
            }
            _ => {}
        }
    }

    pairs
        .into_iter()
        .map(|(start_idx, end_idx)| {
            let header = cfg.block_of(start_idx);
            let mut body_blocks = FxHashSet::default();
            for idx in start_idx..=end_idx {
                body_blocks.insert(cfg.block_of(idx));
            }
            Loop {
                start_idx,
                header,
                body_blocks,
            }
        })
        .collect()
}

fn hoist_loop(
    ops: &mut Vec<Op>,
    cfg: &Cfg,
    dom: &DominatorTree,
    sccp: &SccpResult,
    lp: &Loop,
    stats: &mut LicmStats,
) {
    // Values defined by a PHI inside the loop body: an op depending on one is loop-carried and
    // can never be hoisted above LOOP_START, regardless of how the PHI's own inputs resolve.
    let loop_carried: FxHashSet<ValueId> = lp
        .body_blocks
        .iter()
        .flat_map(|&b| cfg.block(b).op_range())
        .filter(|&idx| ops[idx].kind == OpKind::Phi)
        .filter_map(|idx| ops[idx].result)
        .collect();

    // Pass over the loop body at its *original* indices (never mutating `ops` mid-scan, so every
    // `cfg`/`dom` lookup stays valid). Decide, op by op in source order, which indices hoist —
    // hoisting one op makes its result available to a later candidate in the same pass.
    let mut cursor = lp.start_idx + 1;
    let mut hoist_indices: Vec<usize> = Vec::new();
    let mut hoisted_values: FxHashSet<ValueId> = FxHashSet::default();

    while cursor < ops.len() {
        let block = cfg.block_of(cursor);
        if !lp.body_blocks.contains(&block) {
            break;
        }
        let op = &ops[cursor];
        if op.kind.is_block_boundary() {
            cursor += 1;
            continue;
        }

        let effect = classify(op.kind, None);
        if effect != EffectClass::Pure {
            cursor += 1;
            continue;
        }

        if effects::may_trap(op.kind) && !operands_proven_non_trapping(op, sccp) {
            stats.licm_rejected_trap += 1;
            cursor += 1;
            continue;
        }

        let depends_on_loop_carried = op.value_args().any(|v| loop_carried.contains(&v));
        if depends_on_loop_carried {
            stats.licm_rejected_loop_carried += 1;
            cursor += 1;
            continue;
        }

        let all_operands_invariant = op.value_args().all(|v| {
            hoisted_values.contains(&v) || defined_outside_loop_dominating_preheader(v, cfg, dom, lp, ops)
        });
        if !all_operands_invariant {
            cursor += 1;
            continue;
        }

        if let Some(result) = op.result {
            hoisted_values.insert(result);
        }
        hoist_indices.push(cursor);
        cursor += 1;
    }

    if hoist_indices.is_empty() {
        return;
    }
    stats.licm_hoisted += hoist_indices.len();

    // Apply: pull the hoisted ops out (in source order) and splice them in just before
    // LOOP_START, leaving every other op's relative order untouched.
    let hoist_set: FxHashSet<usize> = hoist_indices.iter().copied().collect();
    let hoisted: Vec<Op> = hoist_indices.iter().map(|&idx| ops[idx].clone()).collect();
    let mut rest: Vec<Op> = Vec::with_capacity(ops.len() - hoisted.len());
    for (idx, op) in ops.drain(..).enumerate() {
        if !hoist_set.contains(&idx) {
            rest.push(op);
        }
    }
    let insert_at = lp.start_idx;
    rest.splice(insert_at..insert_at, hoisted);
    *ops = rest;
}

fn operands_proven_non_trapping(op: &Op, sccp: &SccpResult) -> bool {
    // The divisor is the second value argument by convention for ADD/SUB/DIV-style binary ops.
    let Some(divisor) = op.value_args().nth(1) else {
        return false;
    };
    match sccp.value_of(divisor).as_int() {
        Some(v) => v != 0,
        None => false,
    }
}

fn defined_outside_loop_dominating_preheader(
    v: ValueId,
    cfg: &Cfg,
    dom: &DominatorTree,
    lp: &Loop,
    ops: &[Op],
) -> bool {
    let Some(def_idx) = ops.iter().position(|op| op.result == Some(v)) else {
        // No producer found among remaining ops: either a function parameter (always available)
        // or already hoisted and removed from `ops`, in which case the caller's `hoisted_values`
        // check above already accepted it.
        return true;
    };
    let def_block = cfg.block_of(def_idx);
    if lp.body_blocks.contains(&def_block) {
        return false;
    }
    dom.dominates(def_block, lp.header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, Arg, ArgVec, ValueTable};
    use molt_tir_analysis::{run_sccp, SccpConfig};

    #[test]
    fn invariant_add_is_hoisted_above_loop_start() {
        let mut values = ValueTable::new();
        let a = values.intern("a");
        let b = values.intern("b");
        let sum = values.intern("sum");
        let cond = values.intern("cond");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(a)),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(2), 1), Some(b)),
            Op::nullary(OpKind::LoopStart),
            Op::new(
                OpKind::Add,
                ArgVec::from_iter([Arg::Value(a), Arg::Value(b)]),
                Some(sum),
            ),
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(false), 1), Some(cond)),
            Op::new(OpKind::LoopBreakIfTrue, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::nullary(OpKind::LoopEnd),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(sum), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.licm_hoisted, 1);
        let add_idx = ops.iter().position(|op| op.kind == OpKind::Add).unwrap();
        let loop_start_idx = ops.iter().position(|op| op.kind == OpKind::LoopStart).unwrap();
        assert!(add_idx < loop_start_idx);
    }

    #[test]
    fn op_depending_on_loop_phi_is_not_hoisted() {
        let mut values = ValueTable::new();
        let start = values.intern("start");
        let i = values.intern("i");
        let next_i = values.intern("next_i");
        let one = values.intern("one");
        let doubled = values.intern("doubled");
        let cond = values.intern("cond");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(0), 1), Some(start)),
            Op::nullary(OpKind::LoopStart),
            Op::new(OpKind::Phi, ArgVec::from_elem(Arg::Value(start), 1), Some(i)),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(one)),
            Op::new(
                OpKind::Add,
                ArgVec::from_iter([Arg::Value(i), Arg::Value(one)]),
                Some(next_i),
            ),
            Op::new(
                OpKind::Add,
                ArgVec::from_iter([Arg::Value(i), Arg::Value(i)]),
                Some(doubled),
            ),
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(false), 1), Some(cond)),
            Op::new(OpKind::LoopBreakIfTrue, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::nullary(OpKind::LoopEnd),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(doubled), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.licm_hoisted, 0);
        assert!(stats.licm_rejected_loop_carried >= 1);
    }

    #[test]
    fn div_by_unproven_nonzero_is_rejected() {
        let mut values = ValueTable::new();
        let a = values.intern("a");
        let b = values.intern("b");
        let q = values.intern("q");
        let cond = values.intern("cond");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(10), 1), Some(a)),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(0), 1), Some(b)),
            Op::nullary(OpKind::LoopStart),
            Op::new(
                OpKind::Div,
                ArgVec::from_iter([Arg::Value(a), Arg::Value(b)]),
                Some(q),
            ),
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(false), 1), Some(cond)),
            Op::new(OpKind::LoopBreakIfTrue, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::nullary(OpKind::LoopEnd),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(q), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.licm_hoisted, 0);
        assert_eq!(stats.licm_rejected_trap, 1);
    }
}
