use rustc_hash::{FxHashMap, FxHashSet};

use molt_tir::{BlockId, Cfg, Op, OpKind, ValueId, ValueTable, VerifierFailure};

/// Walk the CFG in reverse post-order, maintaining the set of value names definitely assigned at
/// each program point, per §4.11. Returns every argument reference found in an unassigned state.
///
/// A block's entry set is the intersection of the exit sets of its already-visited predecessors
/// (forward edges only — a loop back-edge predecessor hasn't run yet when its header is first
/// reached in RPO, so it contributes nothing here; whatever it carries forward was already
/// available at the header on the first iteration, which is what this check validates). `PHI`
/// arguments are checked against the specific predecessor they come from rather than the block's
/// merged entry set, since by construction they need only be defined on that one incoming edge.
///
/// `predefined` holds the function's parameters and closure cells (§6's `predefined_value_names`):
/// defined before op 0, on every path, so it seeds any block that otherwise has no visited
/// predecessor to fold in (the true entry block, or a loop header reached only by a back edge on
/// this RPO pass).
pub fn run(
    ops: &[Op],
    cfg: &Cfg,
    values: &ValueTable,
    predefined: &FxHashSet<ValueId>,
) -> Vec<VerifierFailure> {
    let mut failures = Vec::new();
    let rpo = cfg.reverse_postorder();
    let mut visited: FxHashSet<_> = FxHashSet::default();
    let mut exit_sets: FxHashMap<_, FxHashSet<ValueId>> = FxHashMap::default();

    for block in rpo {
        let preds = &cfg.block(block).preds;
        let mut entry: Option<FxHashSet<ValueId>> = None;
        for &pred in preds.iter() {
            if !visited.contains(&pred) {
                continue;
            }
            let pred_set = exit_sets.get(&pred).cloned().unwrap_or_default();
            entry = Some(match entry {
                None => pred_set,
                Some(acc) => acc.intersection(&pred_set).copied().collect(),
            });
        }
        let mut defined = entry.unwrap_or_else(|| predefined.clone());

        for idx in cfg.block(block).op_range() {
            let op = &ops[idx];
            if op.kind == OpKind::Phi {
                check_phi_args(op, idx, preds, &exit_sets, values, &mut failures);
            } else {
                for v in op.value_args() {
                    if !values.is_none(v) && !defined.contains(&v) {
                        failures.push(VerifierFailure {
                            op_index: idx,
                            op_kind: op_kind_name(op.kind),
                            missing_name: values.name(v).to_string(),
                        });
                    }
                }
            }
            if let Some(result) = op.result {
                if !values.is_none(result) {
                    defined.insert(result);
                }
            }
        }

        exit_sets.insert(block, defined);
        visited.insert(block);
    }

    failures
}

fn check_phi_args(
    op: &Op,
    idx: usize,
    preds: &[BlockId],
    exit_sets: &FxHashMap<BlockId, FxHashSet<ValueId>>,
    values: &ValueTable,
    failures: &mut Vec<VerifierFailure>,
) {
    for (arg_pos, v) in op.value_args().enumerate() {
        if values.is_none(v) {
            continue;
        }
        let Some(&pred) = preds.get(arg_pos) else {
            continue;
        };
        // A predecessor that hasn't been visited yet (a loop back edge) can't be checked here;
        // its own definite-assignment was already verified on the path that reaches it.
        if let Some(pred_set) = exit_sets.get(&pred) {
            if !pred_set.contains(&v) {
                failures.push(VerifierFailure {
                    op_index: idx,
                    op_kind: op_kind_name(op.kind),
                    missing_name: values.name(v).to_string(),
                });
            }
        }
    }
}

fn op_kind_name(kind: OpKind) -> &'static str {
    use OpKind::*;
    match kind {
        Const => "CONST",
        ConstBool => "CONST_BOOL",
        ConstStr => "CONST_STR",
        ConstNone => "CONST_NONE",
        Missing => "MISSING",
        Add => "ADD",
        Sub => "SUB",
        Mul => "MUL",
        Div => "DIV",
        FloorDiv => "FLOOR_DIV",
        Mod => "MOD",
        Pow => "POW",
        Neg => "NEG",
        BitAnd => "BIT_AND",
        BitOr => "BIT_OR",
        BitXor => "BIT_XOR",
        Shl => "SHL",
        Shr => "SHR",
        Eq => "EQ",
        Ne => "NE",
        Lt => "LT",
        Le => "LE",
        Gt => "GT",
        Ge => "GE",
        Is => "IS",
        Not => "NOT",
        TypeOf => "TYPE_OF",
        Len => "LEN",
        Index => "INDEX",
        ListNew => "LIST_NEW",
        ListAppend => "LIST_APPEND",
        ListGet => "LIST_GET",
        ListSet => "LIST_SET",
        DictNew => "DICT_NEW",
        DictSet => "DICT_SET",
        DictGet => "DICT_GET",
        DictDel => "DICT_DEL",
        SetNew => "SET_NEW",
        SetAdd => "SET_ADD",
        TupleNew => "TUPLE_NEW",
        TupleGet => "TUPLE_GET",
        ModuleGetAttr => "MODULE_GET_ATTR",
        GetAttrName => "GETATTR_NAME",
        GetAttrGenericObj => "GETATTR_GENERIC_OBJ",
        SetAttr => "SET_ATTR",
        CallInternal => "CALL_INTERNAL",
        CodeNew => "CODE_NEW",
        Raise => "RAISE",
        Return => "RETURN",
        Jump => "JUMP",
        Label => "LABEL",
        StateLabel => "STATE_LABEL",
        If => "IF",
        Else => "ELSE",
        EndIf => "END_IF",
        LoopStart => "LOOP_START",
        LoopEnd => "LOOP_END",
        LoopBreak => "LOOP_BREAK",
        LoopBreakIfTrue => "LOOP_BREAK_IF_TRUE",
        LoopBreakIfFalse => "LOOP_BREAK_IF_FALSE",
        LoopContinue => "LOOP_CONTINUE",
        LoopIndexStart => "LOOP_INDEX_START",
        TryStart => "TRY_START",
        TryEnd => "TRY_END",
        CheckException => "CHECK_EXCEPTION",
        Phi => "PHI",
        GuardTag => "GUARD_TAG",
        GuardDictShape => "GUARD_DICT_SHAPE",
        Line => "LINE",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{build_cfg, Arg, ArgVec};

    #[test]
    fn use_before_def_is_reported() {
        let mut values = ValueTable::new();
        let x = values.intern("x");
        let ops = vec![Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(x), 1), None)];
        let cfg = build_cfg(&ops).unwrap();
        let failures = run(&ops, &cfg, &values, &FxHashSet::default());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].missing_name, "x");
        assert_eq!(failures[0].op_kind, "RETURN");
    }

    #[test]
    fn well_formed_function_has_no_failures() {
        let mut values = ValueTable::new();
        let k = values.intern("k");
        let ops = vec![
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(k)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(k), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let failures = run(&ops, &cfg, &values, &FxHashSet::default());
        assert!(failures.is_empty());
    }

    #[test]
    fn parameter_use_with_no_defining_op_is_not_reported() {
        let mut values = ValueTable::new();
        let param = values.intern("param");
        let ops = vec![Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(param), 1), None)];
        let cfg = build_cfg(&ops).unwrap();
        let mut predefined = FxHashSet::default();
        predefined.insert(param);
        let failures = run(&ops, &cfg, &values, &predefined);
        assert!(failures.is_empty());
    }

    #[test]
    fn phi_arg_checked_against_its_own_predecessor() {
        let mut values = ValueTable::new();
        let cond = values.intern("cond");
        let x = values.intern("x");
        let y = values.intern("y");
        let ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(1), 1), Some(x)),
            Op::nullary(OpKind::Else),
            Op::new(OpKind::Const, ArgVec::from_elem(Arg::ImmInt(2), 1), Some(x)),
            Op::nullary(OpKind::EndIf),
            Op::new(OpKind::Phi, ArgVec::from_elem(Arg::Value(x), 2), Some(y)),
            Op::new(OpKind::Return, ArgVec::from_elem(Arg::Value(y), 1), None),
        ];
        let cfg = build_cfg(&ops).unwrap();
        let failures = run(&ops, &cfg, &values, &FxHashSet::default());
        assert!(failures.is_empty());
    }
}
