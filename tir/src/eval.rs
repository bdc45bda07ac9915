use rustc_hash::FxHashMap;

use crate::op::{Arg, OpKind};
use crate::value::ValueTable;
use crate::Op;

/// A value produced by [eval_restricted].
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Int(i64),
    Bool(bool),
}

/// Reference evaluator for the restricted TIR subset named in §8 ("Round-trip / equivalence"):
/// `CONST, CONST_BOOL, ADD, IF/ELSE/END_IF, JUMP, RETURN, LABEL`.
///
/// This exists purely to let optimizer tests assert that a transform preserves the observable
/// `RETURN` value of a function; it is not part of the production pipeline (the real back-end
/// lowerer, out of scope here, is the actual executor of optimized TIR).
pub fn eval_restricted(ops: &[Op], values: &ValueTable) -> Option<EvalValue> {
    let mut env: FxHashMap<&str, EvalValue> = FxHashMap::default();
    let mut label_to_pc: FxHashMap<&str, usize> = FxHashMap::default();
    let mut if_to_else: FxHashMap<usize, usize> = FxHashMap::default();
    let mut if_to_end: FxHashMap<usize, usize> = FxHashMap::default();
    let mut else_to_end: FxHashMap<usize, usize> = FxHashMap::default();
    let mut if_stack: Vec<usize> = Vec::new();

    for (idx, op) in ops.iter().enumerate() {
        match op.kind {
            OpKind::Label | OpKind::StateLabel => {
                if let Some(label) = op.label_arg() {
                    label_to_pc.insert(label, idx);
                }
            }
            OpKind::If => if_stack.push(idx),
            OpKind::Else => {
                if let Some(&if_idx) = if_stack.last() {
                    if_to_else.insert(if_idx, idx);
                }
            }
            OpKind::EndIf => {
                if let Some(if_idx) = if_stack.pop() {
                    if_to_end.insert(if_idx, idx);
                    if let Some(&else_idx) = if_to_else.get(&if_idx) {
                        else_to_end.insert(else_idx, idx);
                    }
                }
            }
            _ => {}
        }
    }

    let step_cap = (ops.len() * 256).max(10_000);
    let mut steps = 0usize;
    let mut pc = 0usize;

    while pc < ops.len() {
        steps += 1;
        if steps > step_cap {
            return None;
        }
        let op = &ops[pc];
        match op.kind {
            OpKind::Line | OpKind::Label | OpKind::StateLabel | OpKind::EndIf => {
                pc += 1;
            }
            OpKind::Const => {
                let lit = op.args.iter().find_map(Arg::as_int)?;
                let name = values.name(op.result?);
                env.insert(name, EvalValue::Int(lit));
                pc += 1;
            }
            OpKind::ConstBool => {
                let lit = op.args.iter().find_map(Arg::as_bool)?;
                let name = values.name(op.result?);
                env.insert(name, EvalValue::Bool(lit));
                pc += 1;
            }
            OpKind::Add => {
                let mut vals = op.value_args();
                let a = vals.next()?;
                let b = vals.next()?;
                let a = env.get(values.name(a))?;
                let b = env.get(values.name(b))?;
                let (EvalValue::Int(a), EvalValue::Int(b)) = (a, b) else {
                    return None;
                };
                let name = values.name(op.result?);
                env.insert(name, EvalValue::Int(a + b));
                pc += 1;
            }
            OpKind::Jump => {
                let label = op.label_arg()?;
                pc = *label_to_pc.get(label)?;
            }
            OpKind::If => {
                let cond = op.value_args().next()?;
                let cond = env.get(values.name(cond))?;
                let EvalValue::Bool(cond) = cond else {
                    return None;
                };
                if *cond {
                    pc += 1;
                } else if let Some(&else_idx) = if_to_else.get(&pc) {
                    pc = else_idx + 1;
                } else if let Some(&end_idx) = if_to_end.get(&pc) {
                    pc = end_idx + 1;
                } else {
                    return None;
                }
            }
            OpKind::Else => {
                let end_idx = *else_to_end.get(&pc)?;
                pc = end_idx + 1;
            }
            OpKind::Return => {
                let result = op.value_args().next();
                return match result {
                    Some(v) => env.get(values.name(v)).cloned(),
                    None => Some(EvalValue::Bool(true)),
                };
            }
            _ => {
                // Anything outside the restricted subset makes equivalence unverifiable by this
                // evaluator; treat as "cannot evaluate" rather than silently guessing.
                return None;
            }
        }
    }

    None
}
