use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use molt_tir::{effects, Arg, BlockId, Cfg, Op, OpKind, ValueId, ValueTable};

use crate::lattice::{BranchChoice, ConstLit, ConstantValue, Lattice};
use crate::loop_bound::{identify_loop_bound_facts, LoopBoundFact};

/// Configuration knobs for the SCCP worklist solver, resolved by the driver's policy (§4.12) and
/// overridable via `MOLT_SCCP_MAX_ITERS` (§6).
#[derive(Debug, Clone, Copy)]
pub struct SccpConfig {
    pub max_iters: usize,
}

impl Default for SccpConfig {
    fn default() -> Self {
        Self { max_iters: 50_000 }
    }
}

/// The full result of one SCCP run over a function, per §4.4.
#[derive(Debug, Clone, Default)]
pub struct SccpResult {
    pub values: FxHashMap<ValueId, ConstantValue>,
    pub executable_blocks: FxHashSet<BlockId>,
    pub executable_edges: FxHashSet<(BlockId, BlockId)>,
    /// Keyed by the op index of the `IF`.
    pub branch_choice: FxHashMap<usize, BranchChoice>,
    /// Keyed by the op index of the `LOOP_BREAK_IF_TRUE`/`LOOP_BREAK_IF_FALSE`.
    pub loop_break_choice: FxHashMap<usize, BranchChoice>,
    /// Keyed by the op index of the `TRY_START`.
    pub try_exception_possible: FxHashMap<usize, bool>,
    pub try_normal_possible: FxHashMap<usize, bool>,
    pub guard_fail_indices: FxHashSet<usize>,
    pub guard_vacuous_indices: FxHashSet<usize>,
    pub loop_bounds: FxHashMap<ValueId, LoopBoundFact>,
    pub iteration_cap_hits: usize,
}

impl SccpResult {
    pub fn value_of(&self, v: ValueId) -> ConstantValue {
        self.values.get(&v).cloned().unwrap_or(ConstantValue::Undefined)
    }

    pub fn is_executable(&self, block: BlockId) -> bool {
        self.executable_blocks.contains(&block)
    }
}

/// Run sparse conditional constant propagation over `ops`/`cfg`, per §4.4.
///
/// `predefined` are parameter/closure-cell values (always `Overdefined`: the analysis has no
/// information about their runtime value).
pub fn run_sccp(
    ops: &[Op],
    cfg: &Cfg,
    values: &ValueTable,
    predefined: &FxHashSet<ValueId>,
    config: SccpConfig,
) -> SccpResult {
    let mut result = SccpResult::default();
    for &v in predefined {
        result.values.insert(v, ConstantValue::Overdefined);
    }

    result.loop_bounds = identify_loop_bound_facts(ops, cfg, values);

    let mut block_worklist: VecDeque<BlockId> = VecDeque::new();
    let mut value_worklist: VecDeque<ValueId> = VecDeque::new();

    let entry = cfg.entry_block();
    result.executable_blocks.insert(entry);
    block_worklist.push_back(entry);

    let mut iters = 0usize;
    let mut cap_hit = false;

    // Values re-enqueued by `evaluate_op` are handled by re-visiting every block that is a
    // (transitive) successor of the block that last changed; since blocks are small and the
    // block worklist already revisits a block whenever a new edge into it becomes executable,
    // we additionally re-run the whole executable set once per newly-changed value to guarantee
    // PHI/use sites downstream converge. This keeps the solver simple while staying sound: it
    // only ever *adds* facts (monotonic joins), so extra revisits cost time, never correctness.
    while !block_worklist.is_empty() || !value_worklist.is_empty() {
        if iters >= config.max_iters {
            cap_hit = true;
            break;
        }
        iters += 1;

        if let Some(block) = block_worklist.pop_front() {
            visit_block(block, ops, cfg, values, &mut result, &mut block_worklist, &mut value_worklist);
            continue;
        }
        if value_worklist.pop_front().is_some() {
            let executable: Vec<BlockId> = result.executable_blocks.iter().copied().collect();
            for block in executable {
                block_worklist.push_back(block);
            }
            value_worklist.clear();
        }
    }

    if cap_hit {
        result.iteration_cap_hits += 1;
        // Preserve semantics: every currently-unknown block becomes conservatively executable,
        // and every currently-unknown value becomes Overdefined, rather than guessed.
        for block in &cfg.blocks {
            result.executable_blocks.insert(block.id);
        }
        for op in ops {
            if let Some(r) = op.result {
                result.values.entry(r).or_insert(ConstantValue::Overdefined);
            }
        }
    }

    finalize_try_facts(ops, cfg, &mut result);
    finalize_guards(ops, values, &mut result);

    result
}

fn visit_block(
    block: BlockId,
    ops: &[Op],
    cfg: &Cfg,
    values: &ValueTable,
    result: &mut SccpResult,
    block_worklist: &mut VecDeque<BlockId>,
    value_worklist: &mut VecDeque<ValueId>,
) {
    let b = cfg.block(block);
    for idx in b.op_range() {
        let op = &ops[idx];
        evaluate_op(idx, op, values, result, value_worklist, cfg, block);
    }

    let exit_idx = b.exit;
    let exit_op = &ops[exit_idx];
    let succs = &b.succs;

    let taken: Vec<BlockId> = match exit_op.kind {
        OpKind::If => {
            let cond = exit_op.value_args().next();
            let choice = match cond.map(|v| result.value_of(v)) {
                Some(ConstantValue::Constant(ConstLit::Bool(true))) => BranchChoice::Then,
                Some(ConstantValue::Constant(ConstLit::Bool(false))) => BranchChoice::Else,
                _ => BranchChoice::Both,
            };
            let entry = result.branch_choice.entry(exit_idx).or_default();
            *entry = entry.join(choice);
            match *entry {
                BranchChoice::Then => vec![succs[0]],
                BranchChoice::Else => succs.get(1).cloned().into_iter().collect(),
                _ => succs.to_vec(),
            }
        }
        OpKind::LoopBreakIfTrue | OpKind::LoopBreakIfFalse => {
            let cond = exit_op.value_args().next();
            let truth = cond.and_then(|v| result.value_of(v).as_bool());
            let breaks = match (exit_op.kind, truth) {
                (OpKind::LoopBreakIfTrue, Some(true)) => Some(true),
                (OpKind::LoopBreakIfTrue, Some(false)) => Some(false),
                (OpKind::LoopBreakIfFalse, Some(true)) => Some(false),
                (OpKind::LoopBreakIfFalse, Some(false)) => Some(true),
                _ => None,
            };
            let choice = match breaks {
                Some(true) => BranchChoice::Then,  // "break" edge
                Some(false) => BranchChoice::Else, // fall-through edge
                None => BranchChoice::Both,
            };
            let entry = result.loop_break_choice.entry(exit_idx).or_default();
            *entry = entry.join(choice);
            match *entry {
                BranchChoice::Then => succs.first().cloned().into_iter().collect(),
                BranchChoice::Else => succs.get(1).cloned().into_iter().collect(),
                _ => succs.to_vec(),
            }
        }
        _ => succs.to_vec(),
    };

    for succ in taken {
        let edge = (block, succ);
        if result.executable_edges.insert(edge) {
            if result.executable_blocks.insert(succ) {
                block_worklist.push_back(succ);
            } else {
                // Edge is new but block was already visited: re-visit so PHI inputs along this
                // edge get folded in.
                block_worklist.push_back(succ);
            }
        }
    }
}

fn evaluate_op(
    idx: usize,
    op: &Op,
    values: &ValueTable,
    result: &mut SccpResult,
    value_worklist: &mut VecDeque<ValueId>,
    cfg: &Cfg,
    block: BlockId,
) {
    let Some(dest) = op.result else { return };
    if values.is_none(dest) {
        return;
    }

    let new_value = match op.kind {
        OpKind::Const => op
            .args
            .iter()
            .find_map(Arg::as_int)
            .map(|v| ConstantValue::Constant(ConstLit::Int(v)))
            .unwrap_or(ConstantValue::Overdefined),
        OpKind::ConstBool => op
            .args
            .iter()
            .find_map(Arg::as_bool)
            .map(|v| ConstantValue::Constant(ConstLit::Bool(v)))
            .unwrap_or(ConstantValue::Overdefined),
        OpKind::ConstStr => op
            .args
            .iter()
            .find_map(|a| match a {
                Arg::ImmStr(s) => Some(s.clone()),
                _ => None,
            })
            .map(|v| ConstantValue::Constant(ConstLit::Str(v)))
            .unwrap_or(ConstantValue::Overdefined),
        OpKind::ConstNone => ConstantValue::Constant(ConstLit::None),
        OpKind::Phi => {
            // Meet only over operands arriving along an edge SCCP has proven executable: an arg
            // from a predecessor that's never taken (e.g. the dead arm of a folded branch)
            // carries no evidence and must not drag the result down to Overdefined. Args align
            // with `preds` positionally, guaranteed by pre-canonicalization's PHI arity pass.
            let preds = &cfg.block(block).preds;
            let mut acc = ConstantValue::Undefined;
            for (&pred, v) in preds.iter().zip(op.value_args()) {
                if !result.executable_edges.contains(&(pred, block)) {
                    continue;
                }
                acc = acc.join(&result.value_of(v));
            }
            acc
        }
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div | OpKind::FloorDiv | OpKind::Mod => {
            fold_int_binop(op, result, op.kind)
        }
        OpKind::Eq | OpKind::Ne | OpKind::Lt | OpKind::Le | OpKind::Gt | OpKind::Ge => {
            fold_cmp(op, result, op.kind)
        }
        OpKind::Not => {
            let v = op.value_args().next().map(|v| result.value_of(v));
            match v {
                Some(ConstantValue::Constant(ConstLit::Bool(b))) => {
                    ConstantValue::Constant(ConstLit::Bool(!b))
                }
                Some(ConstantValue::Overdefined) => ConstantValue::Overdefined,
                _ => ConstantValue::Undefined,
            }
        }
        _ => ConstantValue::Overdefined,
    };

    let old = result.values.get(&dest).cloned().unwrap_or(ConstantValue::Undefined);
    let joined = old.join(&new_value);
    if joined != old {
        result.values.insert(dest, joined);
        value_worklist.push_back(dest);
    }
    let _ = idx;
}

fn fold_int_binop(op: &Op, result: &SccpResult, kind: OpKind) -> ConstantValue {
    let mut vals = op.value_args();
    let (Some(a), Some(b)) = (vals.next(), vals.next()) else {
        return ConstantValue::Overdefined;
    };
    let (a, b) = (result.value_of(a), result.value_of(b));
    match (a.as_int(), b.as_int()) {
        (Some(a), Some(b)) => {
            let folded = match kind {
                OpKind::Add => a.checked_add(b),
                OpKind::Sub => a.checked_sub(b),
                OpKind::Mul => a.checked_mul(b),
                OpKind::Div | OpKind::FloorDiv => (b != 0).then(|| a.div_euclid(b)),
                OpKind::Mod => (b != 0).then(|| a.rem_euclid(b)),
                _ => None,
            };
            folded
                .map(|v| ConstantValue::Constant(ConstLit::Int(v)))
                .unwrap_or(ConstantValue::Overdefined)
        }
        _ => {
            if a.is_top() || b.is_top() {
                ConstantValue::Overdefined
            } else {
                ConstantValue::Undefined
            }
        }
    }
}

fn fold_cmp(op: &Op, result: &SccpResult, kind: OpKind) -> ConstantValue {
    let mut vals = op.value_args();
    let (Some(a), Some(b)) = (vals.next(), vals.next()) else {
        return ConstantValue::Overdefined;
    };
    let (a, b) = (result.value_of(a), result.value_of(b));
    match (a.as_int(), b.as_int()) {
        (Some(a), Some(b)) => {
            let r = match kind {
                OpKind::Eq => a == b,
                OpKind::Ne => a != b,
                OpKind::Lt => a < b,
                OpKind::Le => a <= b,
                OpKind::Gt => a > b,
                OpKind::Ge => a >= b,
                _ => unreachable!(),
            };
            ConstantValue::Constant(ConstLit::Bool(r))
        }
        _ => {
            if a.is_top() || b.is_top() {
                ConstantValue::Overdefined
            } else {
                ConstantValue::Undefined
            }
        }
    }
}

/// Derive `try_exception_possible_by_start` / `try_normal_possible_by_start` (§4.4) now that
/// reachability and guard facts are known.
fn finalize_try_facts(ops: &[Op], cfg: &Cfg, result: &mut SccpResult) {
    for (&start_idx, &end_idx) in cfg.control.try_start_to_end.clone().iter() {
        let mut exception_possible = false;
        let mut normal_possible = true;
        for idx in (start_idx + 1)..end_idx {
            let kind = ops[idx].kind;
            if effects::may_raise(kind) {
                // A guard that's proven to always fail deterministically raises; one proven to
                // always pass never does. An op we have no guard evidence for is conservatively
                // assumed to be able to raise.
                if matches!(kind, OpKind::GuardTag | OpKind::GuardDictShape) {
                    if result.guard_fail_indices.contains(&idx) {
                        exception_possible = true;
                        normal_possible = false;
                        break;
                    } else if result.guard_vacuous_indices.contains(&idx) {
                        continue;
                    } else {
                        exception_possible = true;
                    }
                } else {
                    exception_possible = true;
                }
            }
        }
        result.try_exception_possible.insert(start_idx, exception_possible);
        result.try_normal_possible.insert(start_idx, normal_possible);
    }
}

/// Evaluate `GUARD_TAG`/`GUARD_DICT_SHAPE` predicates against folded tag facts, per §4.6.
/// A guard's predicate is provably true when the guarded value is a known constant whose literal
/// kind matches the guarded tag name; it is provably false when the value is a known constant of
/// a *different* literal kind.
fn finalize_guards(ops: &[Op], _values: &ValueTable, result: &mut SccpResult) {
    for (idx, op) in ops.iter().enumerate() {
        if !matches!(op.kind, OpKind::GuardTag | OpKind::GuardDictShape) {
            continue;
        }
        let Some(v) = op.value_args().next() else { continue };
        let Some(tag) = op.args.iter().find_map(Arg::as_label).or_else(|| {
            op.args.iter().find_map(|a| match a {
                Arg::ImmStr(s) => Some(s.as_str()),
                _ => None,
            })
        }) else {
            continue;
        };
        let Some(lit) = result.value_of(v).literal().cloned() else {
            continue;
        };
        let actual_tag = match lit {
            ConstLit::Int(_) => "int",
            ConstLit::Bool(_) => "bool",
            ConstLit::Str(_) => "str",
            ConstLit::None => "none",
        };
        if actual_tag == tag {
            result.guard_vacuous_indices.insert(idx);
        } else {
            result.guard_fail_indices.insert(idx);
        }
    }
}
