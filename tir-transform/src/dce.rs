use rustc_hash::FxHashSet;

use molt_tir::{classify, effects, Cfg, Op, OpKind, ValueId};
use molt_tir_analysis::SccpResult;

/// Telemetry for one DCE/region-prune run, per §4.9 / §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct DceStats {
    pub dce_pure_op_attempted: usize,
    pub dce_pure_op_rejected: usize,
    pub dce_removed_total: usize,
    pub cfg_region_prunes: usize,
    pub label_prunes: usize,
    pub jump_noop_elisions: usize,
}

/// Remove pure ops with unused results, unreachable regions (per SCCP's executable-block set),
/// and noop `JUMP`/`LABEL` pairs, per §4.9. Returns the number of ops removed.
pub fn run(ops: &mut Vec<Op>, cfg: &Cfg, sccp: &SccpResult) -> DceStats {
    let mut stats = DceStats::default();

    // Pass 1: drop ops in non-executable blocks (unreachable region pruning).
    let mut keep = vec![true; ops.len()];
    for block in &cfg.blocks {
        if !sccp.is_executable(block.id) {
            for idx in block.op_range() {
                if keep[idx] {
                    keep[idx] = false;
                    stats.cfg_region_prunes += 1;
                }
            }
        }
    }

    // Pass 2: pure-op DCE. Iterate to a local fixpoint since removing one dead op can make its
    // own operand's producer dead in turn.
    loop {
        let used: FxHashSet<ValueId> = ops
            .iter()
            .enumerate()
            .filter(|(idx, _)| keep[*idx])
            .flat_map(|(_, op)| op.value_args())
            .collect();

        let mut changed = false;
        for (idx, op) in ops.iter().enumerate() {
            if !keep[idx] {
                continue;
            }
            let Some(result) = op.result else { continue };
            let effect = classify(op.kind, None);
            if !effect.is_pure() {
                continue;
            }
            if op.kind.is_block_boundary() {
                continue;
            }
            stats.dce_pure_op_attempted += 1;
            if used.contains(&result) {
                stats.dce_pure_op_rejected += 1;
                continue;
            }
            keep[idx] = false;
            changed = true;
        }
        if !changed {
            break;
        }
    }

    // Guards are side-effecting even with an unused result; never drop them here (§4.6 owns
    // their elimination). RAISE and write-heap ops are likewise always kept by construction,
    // since neither is classified `EffectClass::Pure` above.

    // Pass 3: noop `JUMP(L); LABEL(L)` elision and orphan `LABEL` elision.
    let mut idx = 0;
    while idx + 1 < ops.len() {
        if !keep[idx] || !keep[idx + 1] {
            idx += 1;
            continue;
        }
        if ops[idx].kind == OpKind::Jump
            && matches!(ops[idx + 1].kind, OpKind::Label | OpKind::StateLabel)
            && ops[idx].label_arg() == ops[idx + 1].label_arg()
        {
            keep[idx] = false;
            stats.jump_noop_elisions += 1;
        }
        idx += 1;
    }

    let referenced_labels: FxHashSet<&str> = ops
        .iter()
        .enumerate()
        .filter(|(idx, _)| keep[*idx])
        .filter_map(|(_, op)| match op.kind {
            OpKind::Jump | OpKind::CheckException => op.label_arg(),
            _ => None,
        })
        .collect();
    for (idx, op) in ops.iter().enumerate() {
        if !keep[idx] {
            continue;
        }
        if matches!(op.kind, OpKind::Label | OpKind::StateLabel) {
            if let Some(label) = op.label_arg() {
                if !referenced_labels.contains(label) {
                    keep[idx] = false;
                    stats.label_prunes += 1;
                }
            }
        }
    }

    let removed = keep.iter().filter(|k| !**k).count();
    stats.dce_removed_total += removed;

    let mut new_ops = Vec::with_capacity(ops.len() - removed);
    for (idx, op) in ops.drain(..).enumerate() {
        if keep[idx] {
            new_ops.push(op);
        }
    }
    *ops = new_ops;

    stats
}

/// True if every op in `[start, end]` (a try-region body, say) is itself about to be removed.
/// Exposed for the edge threader (§4.8), which prunes dead try bodies as part of must-raise
/// rewriting.
pub fn can_raise_anywhere(ops: &[Op], start: usize, end: usize) -> bool {
    (start..=end).any(|idx| effects::may_raise(ops[idx].kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, Arg, ArgVec, ValueTable};
    use molt_tir_analysis::{run_sccp, SccpConfig};

    #[test]
    fn unused_pure_const_is_removed() {
        let mut values = ValueTable::new();
        let dead = values.intern("dead");
        let live = values.intern("live");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(dead)),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(2), 1), Some(live)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(live), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let stats = run(&mut ops, &cfg, &sccp);
        assert_eq!(stats.dce_removed_total, 1);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn unreachable_else_arm_of_constant_if_is_pruned() {
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
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let stats = run(&mut ops, &cfg, &sccp);
        assert!(stats.cfg_region_prunes > 0);
        assert!(!ops.iter().any(|op| op.kind == OpKind::Const
            && op.args.iter().any(|a| a.as_int() == Some(99))));
    }
}
