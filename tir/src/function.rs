use rustc_hash::FxHashSet;

use crate::op::Op;
use crate::value::{ValueId, ValueTable};

/// A function's op sequence plus the metadata the driver needs to resolve a per-function policy
/// (§4.12) and to report telemetry keyed by function (§6).
#[derive(Debug, Clone)]
pub struct Function {
    pub function_name: String,
    pub module_name: String,
    pub source_path: String,
    pub ops: Vec<Op>,
    pub values: ValueTable,
    /// Parameters and closure cells: defined on entry, before op 0, for definite-assignment
    /// purposes (§4.11).
    pub predefined_value_names: FxHashSet<ValueId>,
}

impl Function {
    pub fn new(
        function_name: impl Into<String>,
        module_name: impl Into<String>,
        source_path: impl Into<String>,
        ops: Vec<Op>,
        values: ValueTable,
        predefined_value_names: FxHashSet<ValueId>,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            module_name: module_name.into(),
            source_path: source_path.into(),
            ops,
            values,
            predefined_value_names,
        }
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }
}
