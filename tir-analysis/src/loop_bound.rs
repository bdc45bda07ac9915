use rustc_hash::FxHashMap;

use molt_tir::{Arg, Cfg, Op, OpKind, ValueId, ValueTable};

/// A proven affine induction-variable fact for a loop header PHI: `i = phi(start, next_i)`,
/// `next_i = i OP step` with `step` constant, combined with a header comparison against a
/// constant `bound`. See §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBoundFact {
    pub start: i64,
    pub step: i64,
    pub bound: i64,
    pub compare_op: CompareOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl LoopBoundFact {
    /// Monotonic loop trip-count sign: a loop with `step > 0` counts up, `step < 0` counts down.
    pub fn is_monotonic_increasing(&self) -> bool {
        self.step > 0
    }

    pub fn is_monotonic_decreasing(&self) -> bool {
        self.step < 0
    }
}

/// Returns true when `prove_monotonic_loop_compare` can show that `ADD(i, c1) COMP ADD(i, c2)`
/// (or the bare `i COMP bound` comparison that defined the fact) holds throughout the loop body,
/// per §4.4's affine implication rule and §4.10.
pub fn prove_monotonic_loop_compare(fact: &LoopBoundFact, c1: i64, c2: i64) -> bool {
    // `i + c1 < i + c2` is a tautology whenever `c1 < c2`, independent of `i`'s own bound;
    // monotonicity of the induction variable only matters for proving the *loop* terminates
    // with `i` inside `[start, bound)`, not for this particular comparison shape.
    match fact.compare_op {
        CompareOp::Lt | CompareOp::Le => c1 < c2,
        CompareOp::Gt | CompareOp::Ge => c1 > c2,
    }
}

/// Scan the function for loop-header PHIs that form an affine induction variable and pair them
/// with a constant bound comparison in the loop header, per §4.10.
pub fn identify_loop_bound_facts(
    ops: &[Op],
    cfg: &Cfg,
    values: &ValueTable,
) -> FxHashMap<ValueId, LoopBoundFact> {
    let mut facts = FxHashMap::default();

    for (&loop_start_idx, &loop_end_idx) in &cfg.control.loop_start_to_end {
        let header_block = cfg.block_of(loop_start_idx.saturating_add(1).min(ops.len() - 1));
        let header = cfg.block(header_block);

        // Find a PHI in the header whose two operands are `start` (constant, defined before the
        // loop) and `next_i` (defined by an ADD/SUB of the PHI's own result and a constant step,
        // defined somewhere inside `[loop_start_idx, loop_end_idx]`).
        for idx in header.op_range() {
            let op = &ops[idx];
            if op.kind != OpKind::Phi {
                continue;
            }
            let Some(phi_result) = op.result else { continue };
            let operands: Vec<ValueId> = op.value_args().collect();
            if operands.len() != 2 {
                continue;
            }

            let Some(start_val) = const_int_of(ops, values, operands[0]) else { continue };

            let Some((step, kind)) =
                find_step_def(ops, values, operands[1], phi_result, loop_start_idx, loop_end_idx)
            else {
                continue;
            };
            let step = match kind {
                OpKind::Add => step,
                OpKind::Sub => -step,
                _ => continue,
            };
            if step == 0 {
                continue;
            }

            // Find a header comparison `i COMP bound` with a constant bound.
            let Some((bound, compare_op)) =
                find_header_compare(ops, values, header_block, cfg, phi_result)
            else {
                continue;
            };

            facts.insert(
                phi_result,
                LoopBoundFact {
                    start: start_val,
                    step,
                    bound,
                    compare_op,
                },
            );
        }
    }

    facts
}

fn const_int_of(ops: &[Op], values: &ValueTable, v: ValueId) -> Option<i64> {
    let _ = values;
    ops.iter()
        .rev()
        .find(|op| op.result == Some(v) && op.kind == OpKind::Const)
        .and_then(|op| op.args.iter().find_map(Arg::as_int))
}

/// Find `next_i = i OP step` where `i == phi_result`, within the loop body, returning
/// `(step, op_kind)`.
fn find_step_def(
    ops: &[Op],
    _values: &ValueTable,
    next_i: ValueId,
    phi_result: ValueId,
    loop_start_idx: usize,
    loop_end_idx: usize,
) -> Option<(i64, OpKind)> {
    for idx in loop_start_idx..=loop_end_idx {
        let op = &ops[idx];
        if op.result != Some(next_i) {
            continue;
        }
        if !matches!(op.kind, OpKind::Add | OpKind::Sub) {
            continue;
        }
        let mut vals = op.value_args();
        let (Some(a), Some(b)) = (vals.next(), vals.next()) else { continue };
        if a == phi_result {
            if let Some(step) = const_int_of(ops, _values, b) {
                return Some((step, op.kind));
            }
        }
    }
    None
}

fn find_header_compare(
    ops: &[Op],
    values: &ValueTable,
    header_block: molt_tir::BlockId,
    cfg: &Cfg,
    phi_result: ValueId,
) -> Option<(i64, CompareOp)> {
    let block = cfg.block(header_block);
    for idx in block.op_range() {
        let op = &ops[idx];
        let compare_op = match op.kind {
            OpKind::Lt => CompareOp::Lt,
            OpKind::Le => CompareOp::Le,
            OpKind::Gt => CompareOp::Gt,
            OpKind::Ge => CompareOp::Ge,
            _ => continue,
        };
        let mut vals = op.value_args();
        let (Some(a), Some(b)) = (vals.next(), vals.next()) else { continue };
        if a == phi_result {
            if let Some(bound) = const_int_of(ops, values, b) {
                return Some((bound, compare_op));
            }
        }
    }
    None
}
