use molt_tir::{build_cfg, Cfg, CfgError, Op, OpKind};

/// Outcome of a validation run: either the CFG was already balanced, or a repair was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Balanced,
    Repaired { inserted: Vec<(usize, OpKind)> },
}

/// Verify §3's structural invariants after pre-canonicalization; on imbalance, attempt a single
/// repair pass that inserts a synthesized closing marker at the smallest enclosing block
/// boundary, per §4.3. Returns the rebuilt [Cfg] on success.
pub fn validate_and_repair(ops: &mut Vec<Op>) -> Result<(Cfg, ValidationOutcome), CfgError> {
    match build_cfg(ops) {
        Ok(cfg) => Ok((cfg, ValidationOutcome::Balanced)),
        Err(first_err) => {
            let inserted = repair_once(ops, &first_err)?;
            match build_cfg(ops) {
                Ok(cfg) => Ok((cfg, ValidationOutcome::Repaired { inserted })),
                Err(still_broken) => Err(still_broken),
            }
        }
    }
}

/// Insert a single synthesized closing marker to restore balance, given the first structural
/// error observed. This only handles the unbalanced-open-region case (`IF`/`LOOP_START`/
/// `TRY_START` with no matching close before the function ends); unknown label targets and PHI
/// arity mismatches are not repairable here and are re-raised.
fn repair_once(ops: &mut Vec<Op>, err: &CfgError) -> Result<Vec<(usize, OpKind)>, CfgError> {
    let CfgError::UnbalancedRegion { op_index, kind } = err else {
        return Err(err.clone());
    };

    let closing_kind = match *kind {
        "IF" => OpKind::EndIf,
        "LOOP_START" => OpKind::LoopEnd,
        "TRY_START" => OpKind::TryEnd,
        _ => return Err(err.clone()),
    };
    let (open_kind, close_kind) = match closing_kind {
        OpKind::EndIf => (OpKind::If, OpKind::EndIf),
        OpKind::LoopEnd => (OpKind::LoopStart, OpKind::LoopEnd),
        OpKind::TryEnd => (OpKind::TryStart, OpKind::TryEnd),
        _ => unreachable!(),
    };

    // Walk a same-family stack from `op_index` onward; whatever is still on it at the end is
    // unmatched, oldest (outermost, starting at `op_index` itself) first.
    let mut family_stack: Vec<usize> = Vec::new();
    for (idx, op) in ops.iter().enumerate().skip(*op_index) {
        if op.kind == open_kind {
            family_stack.push(idx);
        } else if op.kind == close_kind {
            family_stack.pop();
        }
    }

    if family_stack.is_empty() {
        return Err(err.clone());
    }

    // Each unmatched open closes at the smallest enclosing block boundary that contains it: the
    // first point afterward where overall region nesting (across every IF/LOOP/TRY marker, not
    // just this family) would otherwise fall below the level this open occupies. Closing there,
    // rather than unconditionally at the function's end, keeps unrelated regions that follow (e.g.
    // an unrelated LOOP_START/LOOP_END pair) out of this region's arm.
    let mut insertions: Vec<(usize, OpKind)> = family_stack
        .iter()
        .map(|&open_idx| (enclosing_boundary(ops, open_idx), closing_kind))
        .collect();

    // Insert highest index first so earlier insertion points aren't shifted out from under us.
    insertions.sort_by(|a, b| b.0.cmp(&a.0));
    let mut inserted = Vec::new();
    for (at, kind) in insertions {
        ops.insert(at, Op::nullary(kind));
        inserted.push((at, kind));
    }
    inserted.reverse();

    Ok(inserted)
}

/// The first position after `open_idx` where overall region nesting falls back to the level
/// `open_idx` itself opened, i.e. the boundary of the smallest block that encloses it. Falls back
/// to the end of the function when nothing does.
fn enclosing_boundary(ops: &[Op], open_idx: usize) -> usize {
    let mut depth = 1i64;
    for (idx, op) in ops.iter().enumerate().skip(open_idx + 1) {
        if is_open_marker(op.kind) {
            depth += 1;
        } else if is_close_marker(op.kind) {
            depth -= 1;
            if depth == 0 {
                return idx;
            }
        }
    }
    ops.len()
}

fn is_open_marker(kind: OpKind) -> bool {
    matches!(kind, OpKind::If | OpKind::LoopStart | OpKind::TryStart)
}

fn is_close_marker(kind: OpKind) -> bool {
    matches!(kind, OpKind::EndIf | OpKind::LoopEnd | OpKind::TryEnd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_tir::{Arg, ArgVec, ValueTable};

    #[test]
    fn missing_end_if_is_repaired_with_synthesized_close() {
        let mut values = ValueTable::new();
        let cond = values.intern("c");
        let mut ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Return, ArgVec::new(), None),
        ];
        let before_if = ops.iter().filter(|o| o.kind == OpKind::If).count();
        let (_, outcome) = validate_and_repair(&mut ops).unwrap();
        assert!(matches!(outcome, ValidationOutcome::Repaired { .. }));
        let after_end_if = ops.iter().filter(|o| o.kind == OpKind::EndIf).count();
        assert_eq!(before_if, after_end_if);
    }

    #[test]
    fn dangling_if_closes_before_an_unrelated_trailing_loop() {
        let mut values = ValueTable::new();
        let cond = values.intern("c");
        let mut ops = vec![
            Op::new(OpKind::ConstBool, ArgVec::from_elem(Arg::ImmBool(true), 1), Some(cond)),
            Op::new(OpKind::If, ArgVec::from_elem(Arg::Value(cond), 1), None),
            Op::new(OpKind::Const, ArgVec::new(), None),
            Op::nullary(OpKind::LoopStart),
            Op::nullary(OpKind::LoopEnd),
            Op::nullary(OpKind::Return),
        ];
        let (_, outcome) = validate_and_repair(&mut ops).unwrap();
        assert!(matches!(outcome, ValidationOutcome::Repaired { .. }));
        let end_if_idx = ops.iter().position(|o| o.kind == OpKind::EndIf).unwrap();
        let loop_start_idx = ops.iter().position(|o| o.kind == OpKind::LoopStart).unwrap();
        // The synthesized EndIf must close before the unrelated loop, not after it -- otherwise
        // the loop ends up nested inside the IF's then-arm.
        assert!(end_if_idx < loop_start_idx);
    }

    #[test]
    fn balanced_function_reports_balanced() {
        let mut ops = vec![Op::nullary(OpKind::Return)];
        let (_, outcome) = validate_and_repair(&mut ops).unwrap();
        assert_eq!(outcome, ValidationOutcome::Balanced);
    }
}
