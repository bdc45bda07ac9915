use crate::op::OpKind;

/// The alias partition an op's heap effect belongs to, per §4.5. Two reads in different alias
/// classes never invalidate each other; a write invalidates every read in its own class plus
/// `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AliasClass {
    ListRead,
    DictRead,
    BytesRead,
    SetRead,
    AttrRead(String),
    ModuleAttrRead,
    GenericAttrRead,
}

/// The effect classification of an [OpKind], per §4.5 / §4.9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectClass {
    /// Safe to dedup across blocks wherever dominance holds; safe to delete when unused.
    Pure,
    /// A read from the heap, tagged with the alias class it may observe.
    ReadHeap(AliasClass),
    /// A write to the heap, tagged with the alias class it may mutate.
    WriteHeap(AliasClass),
    /// A side-effecting op with no heap-aliasing structure the optimizer can reason about
    /// (raises, generic calls, guards). Invalidates every `ReadHeap` class.
    Unknown,
}

impl EffectClass {
    pub fn is_pure(&self) -> bool {
        matches!(self, EffectClass::Pure)
    }

    /// Guards are side-effecting (they may deoptimize) but otherwise produce no value and have
    /// no aliasing footprint; they get their own classification so DCE (§4.9) and CSE (§4.5/§4.6)
    /// can each apply the right rule without special-casing opcodes individually.
    pub fn is_guard(kind: OpKind) -> bool {
        matches!(kind, OpKind::GuardTag | OpKind::GuardDictShape)
    }
}

/// Classify the effect of an op, given its kind and (for attribute ops) the attribute name
/// argument when statically known.
pub fn classify(kind: OpKind, attr_name: Option<&str>) -> EffectClass {
    use OpKind::*;
    match kind {
        Const | ConstBool | ConstStr | ConstNone | Missing | Add | Sub | Mul | Neg | BitAnd
        | BitOr | BitXor | Shl | Shr | Eq | Ne | Lt | Le | Gt | Ge | Is | Not | TypeOf
        | TupleNew | TupleGet | Phi => EffectClass::Pure,

        // LEN is only pure for statically-known-immutable containers (tuples, strings); the
        // optimizer has no such static type info here, so it is conservatively treated as a
        // heap read over the list alias class, invalidated the same way `INDEX`/`LIST_GET` are.
        Len => EffectClass::ReadHeap(AliasClass::ListRead),

        // Division/modulo are pure *results* but may trap; LICM treats trapping specially
        // (§4.7), so they still classify as Pure for CSE/DCE purposes.
        Div | FloorDiv | Mod | Pow => EffectClass::Pure,

        Index | ListGet => EffectClass::ReadHeap(AliasClass::ListRead),
        DictGet => EffectClass::ReadHeap(AliasClass::DictRead),

        ListNew | ListAppend | ListSet => EffectClass::WriteHeap(AliasClass::ListRead),
        DictNew | DictSet | DictDel => EffectClass::WriteHeap(AliasClass::DictRead),
        SetNew | SetAdd => EffectClass::WriteHeap(AliasClass::SetRead),

        ModuleGetAttr => EffectClass::ReadHeap(AliasClass::ModuleAttrRead),
        GetAttrName => match attr_name {
            Some(name) => EffectClass::ReadHeap(AliasClass::AttrRead(name.to_string())),
            None => EffectClass::ReadHeap(AliasClass::GenericAttrRead),
        },
        GetAttrGenericObj => EffectClass::ReadHeap(AliasClass::GenericAttrRead),
        SetAttr => EffectClass::WriteHeap(AliasClass::GenericAttrRead),

        CodeNew => EffectClass::Pure,

        GuardTag | GuardDictShape => EffectClass::Unknown,
        CallInternal | Raise | Return => EffectClass::Unknown,

        // Control-flow / plumbing ops are never subject to CSE/DCE effect reasoning directly;
        // classify conservatively so a caller that mistakenly asks is never unsound.
        Jump | Label | StateLabel | If | Else | EndIf | LoopStart | LoopEnd | LoopBreak
        | LoopBreakIfTrue | LoopBreakIfFalse | LoopContinue | LoopIndexStart | TryStart
        | TryEnd | CheckException | Line => EffectClass::Unknown,
    }
}

/// True if this op kind can, in principle, raise an exception. Used by SCCP's
/// `try_exception_possible_by_start` analysis (§4.4) and the edge threader (§4.8).
pub fn may_raise(kind: OpKind) -> bool {
    use OpKind::*;
    !matches!(
        kind,
        Const | ConstBool | ConstStr | ConstNone | Missing | TypeOf | Is | Not | Phi | Label
            | StateLabel | If | Else | EndIf | LoopStart | LoopEnd | LoopContinue | Line
    )
}

/// True if this op may trap (divide/mod by a possibly-zero divisor). LICM (§4.7) rejects
/// hoisting these unless SCCP has proven the divisor non-zero.
pub fn may_trap(kind: OpKind) -> bool {
    matches!(kind, OpKind::Div | OpKind::FloorDiv | OpKind::Mod)
}
