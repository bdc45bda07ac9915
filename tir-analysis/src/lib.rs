//! Dominance, SCCP, and loop-bound analyses for the Molt mid-end optimizer (§4.4, §4.10).

pub mod dominance;
pub mod lattice;
pub mod loop_bound;
pub mod sccp;

pub use dominance::DominatorTree;
pub use lattice::{BranchChoice, ConstLit, ConstantValue, Lattice};
pub use loop_bound::{prove_monotonic_loop_compare, CompareOp, LoopBoundFact};
pub use sccp::{run_sccp, SccpConfig, SccpResult};

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, Arg, ArgVec, Op, OpKind, ValueTable};
    use rustc_hash::FxHashSet;

    /// Matches the `_build_sccp_growth_ops` fixture referenced by §9's Open Questions (a chain
    /// of `depth` nested `IF`/`ELSE` blocks accumulating into `acc`), used as a stress test for
    /// the worklist's iteration cap.
    fn build_growth_ops(depth: usize, constant_cond: Option<bool>, values: &mut ValueTable) -> Vec<Op> {
        let mut ops = Vec::new();
        let acc = values.intern("acc");
        ops.push(Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(0), 1), Some(acc)));
        for i in 0..depth {
            let cond = values.intern(&format!("cond_{i}"));
            match constant_cond {
                Some(c) => ops.push(Op::new(
                    OpKind::ConstBool,
                    ArgVec::from_elem(Arg::ImmBool(c), 1),
                    Some(cond),
                )),
                None => ops.push(Op::new(OpKind::Missing, ArgVec::new(), Some(cond))),
            }
            ops.push(Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None));
            let one = values.intern(&format!("one_{i}"));
            ops.push(Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(one)));
            let mut add_args = ArgVec::new();
            add_args.push(Arg::Value(acc));
            add_args.push(Arg::Value(one));
            ops.push(Op::new(OpKind::Add, add_args, Some(acc)));
            ops.push(Op::nullary(OpKind::Else));
            let two = values.intern(&format!("two_{i}"));
            ops.push(Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(2), 1), Some(two)));
            let mut add_args = ArgVec::new();
            add_args.push(Arg::Value(acc));
            add_args.push(Arg::Value(two));
            ops.push(Op::new(OpKind::Add, add_args, Some(acc)));
            ops.push(Op::nullary(OpKind::EndIf));
        }
        ops.push(Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(acc), 1), None));
        ops
    }

    #[test]
    fn sccp_folds_true_branch_of_constant_if() {
        let mut values = ValueTable::new();
        let cond = values.intern("c");
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
        let cfg = build_cfg(&ops).unwrap();
        let result = run_sccp(&ops, &cfg, &values, &FxHashSet::default(), SccpConfig::default());
        let then_block = cfg.block(cfg.entry_block()).succs[0];
        let else_block = cfg.block(cfg.entry_block()).succs[1];
        assert!(result.is_executable(then_block));
        assert!(!result.is_executable(else_block));
    }

    #[test]
    fn sccp_worklist_handles_large_cfg_without_cap_hit() {
        let mut values = ValueTable::new();
        let ops = build_growth_ops(160, None, &mut values);
        let cfg = build_cfg(&ops).unwrap();
        let result = run_sccp(&ops, &cfg, &values, &FxHashSet::default(), SccpConfig::default());
        assert!(result.is_executable(cfg.entry_block()));
        assert_eq!(result.iteration_cap_hits, 0);
    }

    /// Matches `test_phi_edge_trim_collapses_duplicate_executable_inputs`: a PHI joining the two
    /// arms of an `IF` whose condition SCCP folds to a known constant must only meet over the arg
    /// from the taken arm, not the dead one, or the result collapses to `Overdefined` instead of
    /// staying a known constant.
    #[test]
    fn sccp_phi_join_ignores_unexecuted_predecessor_edge() {
        let mut values = ValueTable::new();
        let cond = values.intern("c");
        let a = values.intern("a");
        let b = values.intern("b");
        let k = values.intern("k");
        let skeleton = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(11), 1), Some(a)),
            Op::nullary(OpKind::Else),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(99), 1), Some(b)),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Missing, ArgVec::new(), Some(k)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        let probe_cfg = build_cfg(&skeleton).unwrap();
        let then_block = probe_cfg.block(probe_cfg.entry_block()).succs[0];
        let else_block = probe_cfg.block(probe_cfg.entry_block()).succs[1];
        let join_block = probe_cfg.block_of(6);
        let preds = probe_cfg.block(join_block).preds.clone();

        let mut phi_args = ArgVec::new();
        for p in preds.iter() {
            if *p == then_block {
                phi_args.push(Arg::Value(a));
            } else if *p == else_block {
                phi_args.push(Arg::Value(b));
            }
        }
        assert_eq!(phi_args.len(), preds.len());

        let mut ops = skeleton;
        ops[6] = Op::new(OpKind::Phi, phi_args, Some(k));
        let cfg = build_cfg(&ops).unwrap();
        let result = run_sccp(&ops, &cfg, &values, &FxHashSet::default(), SccpConfig::default());
        assert_eq!(result.value_of(k), ConstantValue::Constant(ConstLit::Int(11)));
    }

    #[test]
    fn sccp_cap_hit_marks_all_blocks_executable_but_preserves_semantics() {
        let mut values = ValueTable::new();
        let ops = build_growth_ops(220, None, &mut values);
        let cfg = build_cfg(&ops).unwrap();
        let result = run_sccp(
            &ops,
            &cfg,
            &values,
            &FxHashSet::default(),
            SccpConfig { max_iters: 1 },
        );
        assert!(result.iteration_cap_hits >= 1);
        assert_eq!(result.executable_blocks.len(), cfg.num_blocks());
    }
}
