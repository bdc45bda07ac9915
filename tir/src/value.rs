use std::fmt;

use rustc_hash::FxHashMap;

/// An interned SSA-ish value name, unique within a function's [ValueTable].
///
/// Names may be reused across optimizer rounds (the op sequence is not a persistent SSA form
/// across rewrites), so analyses must key state on `(op_index)` identity, never on [ValueId]
/// alone, when reasoning about "the op that defines this value in the current round".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub fn from_u32(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The distinguished value name used by ops with no result (`"none"` in the source TIR).
pub const NONE_NAME: &str = "none";

/// Per-function interning table from value names to small integer [ValueId]s.
///
/// Mirrors the front-end's symbol table: names are interned once, in first-seen order, and
/// reused whenever the same name is re-assigned by a later op (value names are not required to
/// be globally unique across the whole function, only locally meaningful for definite-assignment
/// purposes within a round).
#[derive(Debug, Default, Clone)]
pub struct ValueTable {
    names: Vec<String>,
    by_name: FxHashMap<String, ValueId>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning its existing id if already interned.
    pub fn intern(&mut self, name: &str) -> ValueId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = ValueId::from_u32(self.names.len() as u32);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: ValueId) -> &str {
        &self.names[id.as_u32() as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<ValueId> {
        self.by_name.get(name).copied()
    }

    pub fn is_none(&self, id: ValueId) -> bool {
        self.name(id) == NONE_NAME
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
