use smallvec::SmallVec;

use crate::value::ValueId;

/// The TIR opcode set.
///
/// This is a representative slice of the ~80 opcodes the front-end may emit; the optimizer
/// never needs an exhaustive list to stay correct, only a correct purity/effect classification
/// per opcode (see [crate::effects]). Adding an opcode the optimizer doesn't recognize by name
/// falls back to the conservative [crate::effects::EffectClass::Unknown] classification rather
/// than silently miscompiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum OpKind {
    // --- constants ---
    Const,
    ConstBool,
    ConstStr,
    ConstNone,
    Missing,

    // --- arithmetic ---
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Neg,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    // --- comparisons ---
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    Not,

    // --- reflection / typing ---
    TypeOf,
    Len,

    // --- containers ---
    Index,
    ListNew,
    ListAppend,
    ListGet,
    ListSet,
    DictNew,
    DictSet,
    DictGet,
    DictDel,
    SetNew,
    SetAdd,
    TupleNew,
    TupleGet,

    // --- attribute / module access ---
    ModuleGetAttr,
    GetAttrName,
    GetAttrGenericObj,
    SetAttr,

    // --- calls & code objects ---
    CallInternal,
    CodeNew,

    // --- exceptions & returns ---
    Raise,
    Return,

    // --- unstructured control flow ---
    Jump,
    Label,
    StateLabel,

    // --- structured if/else ---
    If,
    Else,
    EndIf,

    // --- structured loops ---
    LoopStart,
    LoopEnd,
    LoopBreak,
    LoopBreakIfTrue,
    LoopBreakIfFalse,
    LoopContinue,
    LoopIndexStart,

    // --- structured try/except ---
    TryStart,
    TryEnd,
    CheckException,

    // --- SSA plumbing ---
    Phi,

    // --- deoptimization guards ---
    GuardTag,
    GuardDictShape,

    // --- debug-only metadata ---
    Line,
}

impl OpKind {
    /// True for op kinds that are always a jump/rejoin target and so must begin a new basic
    /// block wherever they occur: labels, the two arms of an if/else, and loop/try region
    /// markers. See §4.1 step 1.
    pub fn starts_new_block(self) -> bool {
        matches!(
            self,
            OpKind::Label
                | OpKind::StateLabel
                | OpKind::Else
                | OpKind::EndIf
                | OpKind::LoopStart
                | OpKind::LoopEnd
                | OpKind::TryStart
                | OpKind::TryEnd
        )
    }

    /// True for op kinds that always end the block they're in, either because they have no
    /// fall-through successor (`Jump`/`Return`/`Raise`/`LoopBreak`/`LoopContinue`) or because they
    /// branch to more than one place (`If`/`LoopBreakIfTrue`/`LoopBreakIfFalse`/
    /// `CheckException`). The op immediately after one of these always begins a new block.
    pub fn ends_current_block(self) -> bool {
        matches!(
            self,
            OpKind::Jump
                | OpKind::Return
                | OpKind::Raise
                | OpKind::If
                | OpKind::LoopBreak
                | OpKind::LoopBreakIfTrue
                | OpKind::LoopBreakIfFalse
                | OpKind::LoopContinue
                | OpKind::CheckException
        )
    }

    /// True for ops that end a block with no fall-through successor at all.
    pub fn is_terminator_without_fallthrough(self) -> bool {
        matches!(self, OpKind::Return | OpKind::Raise | OpKind::Jump | OpKind::LoopBreak)
    }

    /// Union of [Self::starts_new_block] and [Self::ends_current_block]: any op kind that is
    /// control-flow plumbing rather than a regular value-producing/side-effecting instruction.
    /// Used by CSE/DCE to skip opcodes that never carry a dedup-able or dead-code-eligible value.
    pub fn is_block_boundary(self) -> bool {
        self.starts_new_block() || self.ends_current_block()
    }
}

/// A single argument to an [Op]: either a reference to a previously-defined [ValueId], or an
/// immediate literal baked into the instruction itself (a label name, a constant payload, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(ValueId),
    ImmInt(i64),
    ImmBool(bool),
    ImmStr(String),
    /// A label reference used by JUMP targets, CHECK_EXCEPTION handlers, and LABEL/STATE_LABEL
    /// definitions themselves.
    Label(String),
    None,
}

impl Arg {
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Arg::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Arg::Label(l) => Some(l.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::ImmInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::ImmBool(v) => Some(*v),
            _ => None,
        }
    }
}

pub type ArgVec = SmallVec<[Arg; 4]>;

/// An immutable TIR operation: a `kind`, its ordered `args`, and the name of the `result` it
/// defines (the distinguished name `"none"` means "no result").
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub args: ArgVec,
    pub result: Option<ValueId>,
}

impl Op {
    pub fn new(kind: OpKind, args: ArgVec, result: Option<ValueId>) -> Self {
        Self { kind, args, result }
    }

    pub fn nullary(kind: OpKind) -> Self {
        Self {
            kind,
            args: ArgVec::new(),
            result: None,
        }
    }

    pub fn value_args(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.args.iter().filter_map(Arg::as_value)
    }

    pub fn label_arg(&self) -> Option<&str> {
        self.args.iter().find_map(Arg::as_label)
    }
}
