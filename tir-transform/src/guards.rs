use rustc_hash::FxHashMap;

use molt_tir::{classify, Arg, BlockId, Cfg, EffectClass, Op, OpKind, ValueId};
use molt_tir_analysis::{DominatorTree, SccpResult};

/// Telemetry for one guard-elimination run, per §4.6 / §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardStats {
    pub guards_elided_local: usize,
    pub guards_hoisted: usize,
    pub guards_rejected_mutation: usize,
}

/// Eliminate guards proven vacuous by SCCP, and hoist/elide dominator-redundant guards, per §4.6.
/// Proven-failing guards (`guard_fail_indices`) are left in place: they are a real, observable
/// raise and belong to the edge threader (§4.8), not to this pass.
pub fn run(ops: &mut Vec<Op>, cfg: &Cfg, dom: &DominatorTree, sccp: &SccpResult) -> GuardStats {
    let mut stats = GuardStats::default();
    let mut remove = vec![false; ops.len()];

    // Local elision: a guard whose predicate SCCP proved vacuously true never needs to run.
    for &idx in &sccp.guard_vacuous_indices {
        if is_guard(ops[idx].kind) {
            remove[idx] = true;
            stats.guards_elided_local += 1;
        }
    }

    // Dominator-based region-wide elision/hoisting: a second guard on the same (value, tag) pair
    // dominated by an earlier identical guard is redundant, *unless* some op on the path between
    // them could have invalidated the fact (a write to the guarded value's heap class, or any
    // `Unknown`-effect op, which the guard subsystem conservatively treats as capable of anything).
    let mut children: FxHashMap<_, Vec<_>> = FxHashMap::default();
    for (b, p) in dom.idoms() {
        children.entry(p).or_default().push(b);
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|b| b.index());
    }

    // scope: (value, tag) -> whether the dominating guard survives to this point without an
    // intervening invalidation.
    let mut stack: Vec<(_, FxHashMap<(molt_tir::ValueId, String), usize>)> =
        vec![(dom.entry(), FxHashMap::default())];

    // Guards synthesized at a dominator block because every child independently produced the
    // same (value, tag) guard with no ancestor already proving it; applied after the DFS below,
    // since inserting mid-walk would shift every op index the rest of the walk depends on.
    let mut hoists: Vec<(BlockId, Op)> = Vec::new();

    while let Some((block, mut scope)) = stack.pop() {
        for idx in cfg.block(block).op_range() {
            if remove[idx] {
                continue;
            }
            let op = &ops[idx];
            if is_guard(op.kind) {
                if let Some(key) = guard_key(op) {
                    if let Some(&_prior_idx) = scope.get(&key) {
                        remove[idx] = true;
                        stats.guards_hoisted += 1;
                        continue;
                    }
                    scope.insert(key, idx);
                }
                continue;
            }

            // Anything that could mutate the guarded value's observable tag invalidates every
            // guard fact currently in scope for that value: a targeted heap write on the same
            // value's alias class, or any effect the subsystem can't reason about at all.
            match classify(op.kind, attr_name_of(op)) {
                EffectClass::Unknown => {
                    stats.guards_rejected_mutation += scope.len();
                    scope.clear();
                }
                EffectClass::WriteHeap(_) => {
                    // A write can only ever retag values it touches; without per-value alias
                    // info finer than the class itself, conservatively drop every fact whose
                    // guarded value could be this write's target.
                    if let Some(target) = op.value_args().next() {
                        scope.retain(|(v, _), _| *v != target);
                    }
                }
                _ => {}
            }
        }

        // The both-arms hoisting case is scoped to this block's own CFG successors (its branch
        // arms), not every dominator-tree child: a join block downstream of both arms is also an
        // idom-child of `block` in a diamond CFG, but it isn't an "arm" and never independently
        // reproduces the guard right at its own entry.
        let arms = &cfg.block(block).succs;
        if arms.len() >= 2 {
            if let Some((key, matches)) = both_arms_guard(ops, &remove, cfg, arms, &scope) {
                for &idx in &matches {
                    remove[idx] = true;
                }
                hoists.push((block, ops[matches[0]].clone()));
                stats.guards_hoisted += 1;
                scope.insert(key, matches[0]);
            }
        }

        for &child in children.get(&block).into_iter().flatten() {
            stack.push((child, scope.clone()));
        }
    }

    // Both the index-based `remove` marks and the hoist insertion points above are computed
    // against `cfg`'s original op indices, so removal and insertion must be applied together in
    // one pass over the old sequence; filtering first would invalidate the insertion points.
    let mut insert_before: FxHashMap<usize, Vec<Op>> = FxHashMap::default();
    for (block, op) in hoists {
        let b = cfg.block(block);
        let at = if ops[b.exit].kind.ends_current_block() { b.exit } else { b.exit + 1 };
        insert_before.entry(at).or_default().push(op);
    }

    if remove.iter().any(|r| *r) || !insert_before.is_empty() {
        let old_len = ops.len();
        let mut kept = Vec::with_capacity(old_len);
        for (idx, op) in ops.drain(..).enumerate() {
            if let Some(pending) = insert_before.remove(&idx) {
                kept.extend(pending);
            }
            if !remove[idx] {
                kept.push(op);
            }
        }
        if let Some(pending) = insert_before.remove(&old_len) {
            kept.extend(pending);
        }
        *ops = kept;
    }

    stats
}

/// If every child of `block` independently leads with the same `(value, tag)` guard (no
/// intervening invalidation within the child, and no ancestor already proving it per `scope`),
/// return that key plus the op index of each child's copy. `remove` reflects decisions already
/// made earlier in this DFS (local SCCP elision, ancestor-redundant elision).
fn both_arms_guard(
    ops: &[Op],
    remove: &[bool],
    cfg: &Cfg,
    arms: &[BlockId],
    scope: &FxHashMap<(ValueId, String), usize>,
) -> Option<((ValueId, String), Vec<usize>)> {
    let mut key: Option<(ValueId, String)> = None;
    let mut matches = Vec::with_capacity(arms.len());

    for &child in arms {
        let (idx, child_key) = leading_guard_in_block(ops, remove, cfg, child)?;
        if scope.contains_key(&child_key) {
            return None;
        }
        match &key {
            None => key = Some(child_key),
            Some(k) if *k == child_key => {}
            Some(_) => return None,
        }
        matches.push(idx);
    }

    key.map(|key| (key, matches))
}

/// The first guard in `block`'s own op range that is reachable without passing an op that could
/// invalidate its value's guarded tag (an `Unknown`-effect op, or a write targeting that value).
fn leading_guard_in_block(
    ops: &[Op],
    remove: &[bool],
    cfg: &Cfg,
    block: BlockId,
) -> Option<(usize, (ValueId, String))> {
    let mut invalidated_all = false;
    let mut invalidated_values: Vec<ValueId> = Vec::new();

    for idx in cfg.block(block).op_range() {
        if remove[idx] {
            continue;
        }
        let op = &ops[idx];
        if is_guard(op.kind) {
            let key = guard_key(op)?;
            if invalidated_all || invalidated_values.contains(&key.0) {
                return None;
            }
            return Some((idx, key));
        }
        match classify(op.kind, attr_name_of(op)) {
            EffectClass::Unknown => invalidated_all = true,
            EffectClass::WriteHeap(_) => {
                if let Some(target) = op.value_args().next() {
                    invalidated_values.push(target);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_guard(kind: OpKind) -> bool {
    matches!(kind, OpKind::GuardTag | OpKind::GuardDictShape)
}

fn guard_key(op: &Op) -> Option<(molt_tir::ValueId, String)> {
    let v = op.value_args().next()?;
    let tag = op.args.iter().find_map(Arg::as_label).or_else(|| {
        op.args.iter().find_map(|a| match a {
            Arg::ImmStr(s) => Some(s.as_str()),
            _ => None,
        })
    })?;
    Some((v, tag.to_string()))
}

fn attr_name_of(op: &Op) -> Option<&str> {
    if op.kind != OpKind::GetAttrName {
        return None;
    }
    op.args.iter().find_map(|a| match a {
        Arg::ImmStr(s) => Some(s.as_str()),
        Arg::Label(s) => Some(s.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, ArgVec, ValueTable};
    use molt_tir_analysis::{run_sccp, SccpConfig};

    #[test]
    fn vacuous_guard_proven_by_sccp_is_elided() {
        let mut values = ValueTable::new();
        let v = values.intern("v");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(v)),
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(v), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &Default::default(), SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.guards_elided_local, 1);
        assert!(!ops.iter().any(|o| o.kind == OpKind::GuardTag));
    }

    #[test]
    fn second_identical_guard_dominated_by_first_is_hoisted() {
        let mut values = ValueTable::new();
        let v = values.intern("v");
        let mut ops = vec![
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(v), 1), None),
        ];
        let mut predefined = rustc_hash::FxHashSet::default();
        predefined.insert(v);
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &predefined, SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.guards_hoisted, 1);
        assert_eq!(ops.iter().filter(|o| o.kind == OpKind::GuardTag).count(), 1);
    }

    #[test]
    fn identical_guard_in_both_arms_is_hoisted_to_common_dominator() {
        let mut values = ValueTable::new();
        let v = values.intern("v");
        let cond = values.intern("cond");
        let mut ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::nullary(OpKind::Else),
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(v), 1), None),
        ];
        let mut predefined = rustc_hash::FxHashSet::default();
        predefined.insert(v);
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &predefined, SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.guards_hoisted, 1);
        assert_eq!(ops.iter().filter(|o| o.kind == OpKind::GuardTag).count(), 1);
        // The surviving guard now sits in the entry block, ahead of the IF.
        let if_pos = ops.iter().position(|o| o.kind == OpKind::If).unwrap();
        let guard_pos = ops.iter().position(|o| o.kind == OpKind::GuardTag).unwrap();
        assert!(guard_pos < if_pos);
    }

    #[test]
    fn guard_after_unknown_call_is_not_hoisted() {
        let mut values = ValueTable::new();
        let v = values.intern("v");
        let t = values.intern("t");
        let mut ops = vec![
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::new(OpKind::CallInternal, ArgVec::from_elem(Arg::Label("f".into()), 1), Some(t)),
            Op::new(
                OpKind::GuardTag,
                ArgVec::from_iter([Arg::Value(v), Arg::Label("int".into())]),
                None,
            ),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(v), 1), None),
        ];
        let mut predefined = rustc_hash::FxHashSet::default();
        predefined.insert(v);
        let cfg = build_cfg(&ops).unwrap();
        let sccp = run_sccp(&ops, &cfg, &values, &predefined, SccpConfig::default());
        let dom = DominatorTree::compute(&cfg);
        let stats = run(&mut ops, &cfg, &dom, &sccp);
        assert_eq!(stats.guards_hoisted, 0);
        assert_eq!(ops.iter().filter(|o| o.kind == OpKind::GuardTag).count(), 2);
    }
}
