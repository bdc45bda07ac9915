use rustc_hash::FxHashMap;

use molt_tir::{classify, Arg, BlockId, Cfg, EffectClass, Op, OpKind, ValueId};
use molt_tir_analysis::DominatorTree;

/// Telemetry for one run of GVN/CSE, per §4.5 / §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct CseStats {
    pub cse_attempted: usize,
    pub gvn_hits: usize,
    pub cse_readheap_attempted: usize,
    pub cse_readheap_rejected: usize,
}

/// A canonical dedup key: opcode plus its argument fingerprint. Read-heap ops additionally key
/// on the alias class and the heap "generation" observed at the point they were evaluated, so a
/// stale read (one whose alias class was invalidated since) never collides with a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CseKey {
    kind: OpKind,
    args: Vec<ArgKey>,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ArgKey {
    Value(ValueId),
    Int(i64),
    Bool(bool),
    Str(String),
    Label(String),
    None,
}

fn arg_key(arg: &Arg) -> ArgKey {
    match arg {
        Arg::Value(v) => ArgKey::Value(*v),
        Arg::ImmInt(i) => ArgKey::Int(*i),
        Arg::ImmBool(b) => ArgKey::Bool(*b),
        Arg::ImmStr(s) => ArgKey::Str(s.clone()),
        Arg::Label(l) => ArgKey::Label(l.clone()),
        Arg::None => ArgKey::None,
    }
}

/// Run GVN/CSE to fixpoint over the dominator tree, per §4.5. Returns `(rewrites, stats)`; a
/// rewrite replaces every argument reference to a deduplicated op's result with the surviving
/// op's result (the caller's DCE pass, §4.9, removes the now-dead producer).
pub fn run(ops: &mut [Op], cfg: &Cfg, dom: &DominatorTree) -> (usize, CseStats) {
    let mut stats = CseStats::default();
    let mut rewrites = 0usize;

    // Pre-order traversal of the dominator tree.
    let mut children: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for (b, p) in dom.idoms() {
        children.entry(p).or_default().push(b);
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|b| b.index());
    }

    let mut unknown_generation: u64 = 0;
    let mut alias_generation: FxHashMap<String, u64> = FxHashMap::default();
    let mut replacements: FxHashMap<ValueId, ValueId> = FxHashMap::default();

    // Stack of (block, scope) for a DFS pre-order walk; scope is cloned on push, matching the
    // teacher's dominator-scoped CSE traversal.
    let mut stack: Vec<(BlockId, FxHashMap<CseKey, ValueId>)> =
        vec![(dom.entry(), FxHashMap::default())];

    while let Some((block, mut scope)) = stack.pop() {
        for idx in cfg.block(block).op_range() {
            // Apply pending renames from earlier dedup hits before looking at this op's own
            // operands, so chains of duplicate ops collapse correctly.
            for arg in ops[idx].args.iter_mut() {
                if let Arg::Value(v) = arg {
                    if let Some(&canonical) = replacements.get(v) {
                        *v = canonical;
                    }
                }
            }

            let kind = ops[idx].kind;
            let effect = classify(kind, attr_name_of(&ops[idx]));
            match &effect {
                EffectClass::Unknown => {
                    unknown_generation += 1;
                }
                EffectClass::WriteHeap(alias) => {
                    let key = format!("{alias:?}");
                    *alias_generation.entry(key).or_insert(0) += 1;
                }
                _ => {}
            }

            let Some(result) = ops[idx].result else { continue };
            if !dedupable(kind) {
                continue;
            }

            let generation = match &effect {
                EffectClass::Pure => 0,
                EffectClass::ReadHeap(alias) => {
                    stats.cse_readheap_attempted += 1;
                    let alias_gen = *alias_generation.get(&format!("{alias:?}")).unwrap_or(&0);
                    alias_gen.wrapping_add(unknown_generation.wrapping_mul(1_000_000_007))
                }
                _ => continue,
            };

            let key = CseKey {
                kind,
                args: ops[idx].args.iter().map(arg_key).collect(),
                generation,
            };

            stats.cse_attempted += 1;
            if let Some(&existing) = scope.get(&key) {
                replacements.insert(result, existing);
                stats.gvn_hits += 1;
                rewrites += 1;
                if matches!(effect, EffectClass::ReadHeap(_)) {
                    // Counted as an attempt above; this path is the accepted case, so nothing to
                    // add to `cse_readheap_rejected`.
                }
            } else {
                scope.insert(key, result);
                if matches!(effect, EffectClass::ReadHeap(_)) {
                    stats.cse_readheap_rejected += 1;
                }
            }
        }

        for &child in children.get(&block).into_iter().flatten() {
            stack.push((child, scope.clone()));
        }
    }

    // Apply any remaining renames (covers uses in blocks visited before their replacement was
    // recorded is impossible under dominance, but PHI operands reference predecessors which are
    // always dominance-compatible with this walk order).
    for op in ops.iter_mut() {
        for arg in op.args.iter_mut() {
            if let Arg::Value(v) = arg {
                if let Some(&canonical) = replacements.get(v) {
                    *v = canonical;
                }
            }
        }
    }

    (rewrites, stats)
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

fn dedupable(kind: OpKind) -> bool {
    !kind.is_block_boundary() && kind != OpKind::Phi
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, ArgVec, ValueTable};

    #[test]
    fn duplicate_const_is_deduped() {
        let mut values = ValueTable::new();
        let a = values.intern("a");
        let b = values.intern("b");
        let mut ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(7), 1), Some(a)),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(7), 1), Some(b)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(b), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let dom = DominatorTree::compute(&cfg);
        let (rewrites, stats) = run(&mut ops, &cfg, &dom);
        assert_eq!(rewrites, 1);
        assert_eq!(stats.gvn_hits, 1);
        let ret = ops.iter().find(|o| o.kind == OpKind::Return).unwrap();
        assert_eq!(ret.value_args().next(), Some(a));
    }

    #[test]
    fn heap_read_across_unknown_call_is_not_deduped() {
        let mut values = ValueTable::new();
        let obj = values.intern("obj");
        let l1 = values.intern("l1");
        let t = values.intern("t");
        let l2 = values.intern("l2");
        let mut ops = vec![
            Op::nullary(OpKind::Missing),
            Op::new(OpKind::Len, ArgVec::from_elem(Arg::Value(obj), 1), Some(l1)),
            Op::new(OpKind::CallInternal, ArgVec::from_elem(Arg::Label("f".into()), 1), Some(t)),
            Op::new(OpKind::Len, ArgVec::from_elem(Arg::Value(obj), 1), Some(l2)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(l2), 1), None),
        ];
        ops[0].result = Some(obj);
        let cfg = build_cfg(&ops).unwrap();
        let dom = DominatorTree::compute(&cfg);
        let (rewrites, _stats) = run(&mut ops, &cfg, &dom);
        assert_eq!(rewrites, 0);
    }
}
