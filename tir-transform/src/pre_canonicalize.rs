use rustc_hash::FxHashMap;

use molt_tir::{build_cfg, Arg, CfgError, Op, OpKind, ValueId};

/// Run the pre-canonicalizer to fixpoint, per §4.2. Each sub-pass records a rewrite count; this
/// driver loops until a round produces zero rewrites.
pub fn run_to_fixpoint(ops: &mut Vec<Op>) -> Result<usize, CfgError> {
    let mut total = 0usize;
    loop {
        let mut round = 0usize;

        // Snapshot, before this iteration's label rewrites, which predecessor labels each PHI is
        // currently aligned to — the only way to recover that correspondence once collapsing
        // shrinks the op list and shifts every later index out from under it.
        let phi_old_preds = snapshot_phi_predecessor_labels(ops);

        let mut redirects: FxHashMap<String, String> = FxHashMap::default();
        round += collapse_label_trampolines(ops, &mut redirects);
        round += thread_label_chains(ops, &mut redirects);
        round += align_phi_predecessors(ops, &phi_old_preds, &redirects)?;
        total += round;
        if round == 0 {
            break;
        }
    }
    Ok(total)
}

/// For every PHI currently in `ops`, the entry labels of its predecessor blocks, keyed by the
/// PHI's own result value (stable across this iteration's rewrites, unlike op indices). Used by
/// [align_phi_predecessors] to re-derive, after label collapsing/threading changes the block
/// shape underneath a PHI, which surviving predecessor each existing arg belongs to.
fn snapshot_phi_predecessor_labels(ops: &[Op]) -> FxHashMap<ValueId, Vec<Option<String>>> {
    let mut snapshot = FxHashMap::default();
    let Ok(cfg) = build_cfg(ops) else { return snapshot };
    for (idx, op) in ops.iter().enumerate() {
        if op.kind != OpKind::Phi {
            continue;
        }
        let Some(result) = op.result else { continue };
        let block = cfg.block_of(idx);
        let labels = cfg
            .block(block)
            .preds
            .iter()
            .map(|p| cfg.block_entry_label.get(p).cloned())
            .collect();
        snapshot.insert(result, labels);
    }
    snapshot
}

/// Chase a chain of label redirects to its final destination, guarding against cycles.
fn resolve_label(label: &str, redirects: &FxHashMap<String, String>) -> String {
    let mut current = label.to_string();
    let mut seen = rustc_hash::FxHashSet::default();
    while let Some(next) = redirects.get(&current) {
        if !seen.insert(current.clone()) {
            break;
        }
        current = next.clone();
    }
    current
}

/// If `LABEL(L1); JUMP(L2)` is the only work between `L1` and `L2`, redirect every user of `L1`
/// to `L2` and delete `L1` and the `JUMP`. Every redirect recorded this round is merged into
/// `redirects_out` so later sub-passes (and `align_phi_predecessors`) can chase it.
fn collapse_label_trampolines(ops: &mut Vec<Op>, redirects_out: &mut FxHashMap<String, String>) -> usize {
    let mut redirects: FxHashMap<String, String> = FxHashMap::default();
    let mut to_delete: Vec<usize> = Vec::new();

    let mut idx = 0;
    while idx + 1 < ops.len() {
        if matches!(ops[idx].kind, OpKind::Label)
            && ops[idx + 1].kind == OpKind::Jump
            && (idx == 0 || !matches!(ops[idx - 1].kind, OpKind::Label))
        {
            // Confirm nothing else falls into this label block between the label and the jump
            // other than the jump itself (true by construction here since they're adjacent).
            if let (Some(l1), Some(l2)) = (ops[idx].label_arg(), ops[idx + 1].label_arg()) {
                if l1 != l2 {
                    redirects.insert(l1.to_string(), l2.to_string());
                    to_delete.push(idx);
                    to_delete.push(idx + 1);
                }
            }
        }
        idx += 1;
    }

    if redirects.is_empty() {
        return 0;
    }

    for op in ops.iter_mut() {
        retarget_labels(op, &redirects);
    }

    to_delete.sort_unstable();
    to_delete.dedup();
    for &idx in to_delete.iter().rev() {
        ops.remove(idx);
    }

    let n = redirects.len();
    redirects_out.extend(redirects);
    n
}

/// Thread chains of `LABEL -> JUMP -> LABEL -> ...` (and `CHECK_EXCEPTION` handler targets that
/// go through several hops) to their final destination in one step. Every label this round
/// bypasses (even without deleting its block) is merged into `redirects_out`, resolved to its
/// final target, same as [collapse_label_trampolines].
fn thread_label_chains(ops: &mut [Op], redirects_out: &mut FxHashMap<String, String>) -> usize {
    // direct[L] = the label a trampoline at L jumps to, if the block at L is exactly
    // `LABEL(L); JUMP(next)`.
    let mut direct: FxHashMap<String, String> = FxHashMap::default();
    for w in ops.windows(2) {
        if w[0].kind == OpKind::Label && w[1].kind == OpKind::Jump {
            if let (Some(l1), Some(l2)) = (w[0].label_arg(), w[1].label_arg()) {
                if l1 != l2 {
                    direct.insert(l1.to_string(), l2.to_string());
                }
            }
        }
    }

    if direct.is_empty() {
        return 0;
    }

    let mut rewrites = 0usize;
    for op in ops.iter_mut() {
        if matches!(op.kind, OpKind::Jump | OpKind::CheckException) {
            if let Some(target) = op.label_arg() {
                let resolved = resolve_label(target, &direct);
                if resolved != target {
                    for arg in op.args.iter_mut() {
                        if let Arg::Label(l) = arg {
                            *l = resolved.clone();
                        }
                    }
                    rewrites += 1;
                }
            }
        }
    }

    for label in direct.keys() {
        redirects_out.insert(label.clone(), resolve_label(label, &direct));
    }

    rewrites
}

fn retarget_labels(op: &mut Op, redirects: &FxHashMap<String, String>) {
    for arg in op.args.iter_mut() {
        if let Arg::Label(l) = arg {
            if let Some(new) = redirects.get(l.as_str()) {
                *l = new.clone();
            }
        }
    }
}

/// Normalize every `PHI`'s argument count to its block's predecessor count, per §4.2: (a) a
/// single arg broadcasts to every predecessor; (b) multiple args re-permute via `phi_old_preds`'s
/// record of which predecessor label each arg used to belong to, if every old predecessor still
/// resolves (through `redirects`) to exactly one surviving predecessor with a consistent value;
/// (c) otherwise the function's CFG is invalid.
fn align_phi_predecessors(
    ops: &mut Vec<Op>,
    phi_old_preds: &FxHashMap<ValueId, Vec<Option<String>>>,
    redirects: &FxHashMap<String, String>,
) -> Result<usize, CfgError> {
    let cfg = build_cfg(ops)?;
    let mut rewrites = 0usize;

    for idx in 0..ops.len() {
        if ops[idx].kind != OpKind::Phi {
            continue;
        }
        let block = cfg.block_of(idx);
        let preds = &cfg.block(block).preds;
        let expected = preds.len();
        let found = ops[idx].args.len();
        if found == expected {
            continue;
        }
        if found == 1 {
            let only = ops[idx].args[0].clone();
            ops[idx].args = std::iter::repeat(only).take(expected).collect();
            rewrites += 1;
            continue;
        }

        let repermuted = repermute_phi_args(
            ops[idx].result,
            &ops[idx].args,
            phi_old_preds,
            redirects,
            &cfg,
            preds,
        );
        if let Some(new_args) = repermuted {
            ops[idx].args = new_args.into_iter().collect();
            rewrites += 1;
            continue;
        }

        return Err(CfgError::PhiArityMismatch {
            op_index: idx,
            found,
            expected,
        });
    }

    Ok(rewrites)
}

/// Attempt case (b): map each of this PHI's old args to the surviving predecessor its old label
/// now resolves to, and reassemble them in `preds`'s current order. Fails (returns `None`) unless
/// that mapping is total (every old predecessor resolves to a known surviving one), consistent
/// (two old predecessors that collapse onto the same surviving one carried the same value), and
/// complete (every surviving predecessor is covered).
fn repermute_phi_args(
    result: Option<ValueId>,
    args: &[Arg],
    phi_old_preds: &FxHashMap<ValueId, Vec<Option<String>>>,
    redirects: &FxHashMap<String, String>,
    cfg: &molt_tir::Cfg,
    preds: &[molt_tir::BlockId],
) -> Option<Vec<Arg>> {
    let old_labels = phi_old_preds.get(&result?)?;
    if old_labels.len() != args.len() {
        return None;
    }

    let mut by_new_pred: FxHashMap<molt_tir::BlockId, Arg> = FxHashMap::default();
    for (label, arg) in old_labels.iter().zip(args.iter()) {
        let label = label.as_deref()?;
        let resolved = resolve_label(label, redirects);
        let new_pred = *cfg.label_to_block.get(&resolved)?;
        match by_new_pred.get(&new_pred) {
            Some(existing) if existing != arg => return None,
            _ => {
                by_new_pred.insert(new_pred, arg.clone());
            }
        }
    }

    preds.iter().map(|p| by_new_pred.get(p).cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{ArgVec, ValueTable};

    #[test]
    fn trampoline_is_collapsed_and_callers_redirected() {
        let mut values = ValueTable::new();
        let k = values.intern("k");
        let mut ops = vec![
            Op::new(OpKind::Jump, ArgVec::from_elem(Arg::Label("mid".into()), 1), None),
            Op::new(OpKind::Label, ArgVec::from_elem(Arg::Label("mid".into()), 1), None),
            Op::new(OpKind::Jump, ArgVec::from_elem(Arg::Label("end".into()), 1), None),
            Op::new(OpKind::Label, ArgVec::from_elem(Arg::Label("end".into()), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(k)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        let rewrites = run_to_fixpoint(&mut ops).unwrap();
        assert!(rewrites >= 1);
        assert!(ops.iter().all(|op| op.label_arg() != Some("mid")));
        assert_eq!(ops[0].label_arg(), Some("end"));
    }

    #[test]
    fn singleton_phi_is_broadcast_to_predecessor_count() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let x = values.intern("x");
        let y = values.intern("y");
        let mut ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(x)),
            Op::nullary(OpKind::Else),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(2), 1), Some(x)),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Phi, ArgVec::from_elem(Arg::Value(x), 1), Some(y)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(y), 1), None),
        ];
        run_to_fixpoint(&mut ops).unwrap();
        let phi = ops.iter().find(|o| o.kind == OpKind::Phi).unwrap();
        assert_eq!(phi.args.len(), 2);
    }
}
