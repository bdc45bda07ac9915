//! The TIR op/value model and CFG construction for the Molt mid-end optimizer.
//!
//! This crate owns §3 of the optimizer spec: the `Op`/`Value` data model and the CFG builder
//! (§4.1). Everything downstream (analyses in `molt-tir-analysis`, rewrites in
//! `molt-tir-transform`, and the fixed-point driver in `molt-tir-driver`) is built on top of the
//! types defined here.

pub mod cfg;
pub mod effects;
pub mod error;
pub mod eval;
pub mod function;
pub mod op;
pub mod value;

pub use cfg::{build_cfg, Block, BlockId, Cfg, ControlTables};
pub use effects::{classify, may_raise, may_trap, AliasClass, EffectClass};
pub use error::{CfgError, InternalInvariantError, VerifierFailure};
pub use function::Function;
pub use op::{Arg, ArgVec, Op, OpKind};
pub use value::{ValueId, ValueTable, NONE_NAME};

#[cfg(test)]
mod tests {
    use super::*;

    fn const_int(values: &mut ValueTable, name: &str, v: i64) -> Op {
        Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(v), 1), Some(values.intern(name)))
    }

    #[test]
    fn trivial_linear_function_is_one_block() {
        let mut values = ValueTable::new();
        let x = values.intern("x");
        let ops = vec![
            const_int(&mut values, "x", 3),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(x), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        assert_eq!(cfg.num_blocks(), 1);
        assert!(cfg.block(cfg.entry_block()).succs.is_empty());
    }

    #[test]
    fn if_else_end_if_produces_four_blocks_with_ordered_successors() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let k = values.intern("k");
        let ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            const_int(&mut values, "k", 11),
            Op::nullary(OpKind::Else),
            const_int(&mut values, "k", 99),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        // block0: [cond, IF] ; block1 (then): [CONST 11] ; block2 (else): [ELSE, CONST 99] ;
        // block3: [END_IF, RETURN]
        assert_eq!(cfg.num_blocks(), 4);
        let entry = cfg.block(cfg.entry_block());
        assert_eq!(entry.succs.len(), 2);
        // then-successor precedes else-successor.
        assert_eq!(entry.succs[0], BlockId::new(1));
        assert_eq!(entry.succs[1], BlockId::new(2));
    }

    #[test]
    fn unknown_jump_target_is_cfg_invalid() {
        let ops = vec![Op::new(
            OpKind::Jump,
            ArgVec::from_elem(Arg::Label("nowhere".into()), 1),
            None,
        )];
        assert!(build_cfg(&ops).is_err());
    }

    #[test]
    fn eval_restricted_evaluates_taken_if_branch() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let k = values.intern("k");
        let ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            const_int(&mut values, "k", 11),
            Op::nullary(OpKind::Else),
            const_int(&mut values, "k", 99),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        assert_eq!(eval::eval_restricted(&ops, &values), Some(eval::EvalValue::Int(11)));
    }
}
