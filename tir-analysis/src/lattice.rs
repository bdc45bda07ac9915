use std::fmt;

/// A bounded join semi-lattice used by the SCCP worklist solver (§4.4).
///
/// The lattice order is `Undefined < Constant(_) < Overdefined`:
///
/// * `Undefined` (_bottom_) is the initial state: nothing is known yet about a value.
/// * `Constant(c)` is a refined, "maximal useful" state: the value is known to always equal `c`
///   along every executable path reached so far.
/// * `Overdefined` (_top_) means two different constants were observed (or the value is known to
///   vary), so no further refinement is possible.
///
/// Joining two different constants produces `Overdefined`; joining a constant with itself is a
/// no-op; joining anything with `Undefined` keeps the other value (`Undefined` is the identity
/// element of join).
pub trait Lattice: Clone + PartialEq + fmt::Debug {
    fn bottom() -> Self;
    fn join(&self, other: &Self) -> Self;
    fn is_bottom(&self) -> bool;
    fn is_top(&self) -> bool;
}

/// A folded constant value tracked by SCCP. Strings are interned by value (cloned) since TIR
/// constants are small and this lattice only needs equality, not identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstLit {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConstantValue {
    #[default]
    Undefined,
    Constant(ConstLit),
    Overdefined,
}

impl ConstantValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstantValue::Constant(ConstLit::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstantValue::Constant(ConstLit::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn literal(&self) -> Option<&ConstLit> {
        match self {
            ConstantValue::Constant(lit) => Some(lit),
            _ => None,
        }
    }
}

impl Lattice for ConstantValue {
    fn bottom() -> Self {
        ConstantValue::Undefined
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (ConstantValue::Undefined, other) => other.clone(),
            (this, ConstantValue::Undefined) => this.clone(),
            (ConstantValue::Overdefined, _) | (_, ConstantValue::Overdefined) => {
                ConstantValue::Overdefined
            }
            (ConstantValue::Constant(a), ConstantValue::Constant(b)) => {
                if a == b {
                    ConstantValue::Constant(a.clone())
                } else {
                    ConstantValue::Overdefined
                }
            }
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, ConstantValue::Undefined)
    }

    fn is_top(&self) -> bool {
        matches!(self, ConstantValue::Overdefined)
    }
}

/// Tri-state outcome for a conditional branch once SCCP has (partially) evaluated its
/// condition, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchChoice {
    /// Neither successor has been proven reachable yet (analysis hasn't visited this branch).
    #[default]
    Neither,
    Then,
    Else,
    Both,
}

impl BranchChoice {
    pub fn join(self, other: Self) -> Self {
        use BranchChoice::*;
        match (self, other) {
            (Neither, x) | (x, Neither) => x,
            (a, b) if a == b => a,
            _ => Both,
        }
    }
}
