use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::CfgError;
use crate::op::{Op, OpKind};

/// Index of a basic block within a function's [Cfg]. Blocks are numbered `0..N-1` in the order
/// they appear in the op sequence (block 0 is always the function entry).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

pub type Preds = SmallVec<[BlockId; 4]>;
pub type Succs = SmallVec<[BlockId; 2]>;

/// A basic block: a contiguous range of op indices `[entry, exit]` (inclusive), plus
/// predecessor/successor edges. For `IF`, the `then` successor always precedes `else` in
/// `succs`, per §3.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub entry: usize,
    pub exit: usize,
    pub preds: Preds,
    pub succs: Succs,
}

impl Block {
    pub fn op_range(&self) -> std::ops::RangeInclusive<usize> {
        self.entry..=self.exit
    }
}

/// Region side-tables: matched pairs of structured control-flow markers, and the edge a
/// `CHECK_EXCEPTION` takes to its handler. See §3.
#[derive(Debug, Default, Clone)]
pub struct ControlTables {
    pub if_to_else: FxHashMap<usize, usize>,
    pub if_to_end: FxHashMap<usize, usize>,
    pub else_to_end: FxHashMap<usize, usize>,
    pub loop_start_to_end: FxHashMap<usize, usize>,
    pub loop_end_to_start: FxHashMap<usize, usize>,
    pub try_start_to_end: FxHashMap<usize, usize>,
    pub try_end_to_start: FxHashMap<usize, usize>,
    pub check_exception_target: FxHashMap<usize, String>,
}

/// The control-flow graph built from a function's op sequence, per §3/§4.1. Never assumed
/// stable across rewrites: callers rebuild it after every round that may have changed the op
/// sequence (see the fixed-point driver, §4.12).
#[derive(Debug, Clone)]
pub struct Cfg {
    pub blocks: Vec<Block>,
    pub index_to_block: Vec<BlockId>,
    pub label_to_block: FxHashMap<String, BlockId>,
    pub block_entry_label: FxHashMap<BlockId, String>,
    pub control: ControlTables,
}

impl Cfg {
    pub fn entry_block(&self) -> BlockId {
        BlockId::new(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_of(&self, op_index: usize) -> BlockId {
        self.index_to_block[op_index]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Reverse post-order traversal starting from the entry block, used by the definite
    /// assignment verifier (§4.11) and dominance computation.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry_block(), 0usize)];
        visited[self.entry_block().index()] = true;

        while let Some((block, next_succ)) = stack.last_mut() {
            let block = *block;
            let succs = &self.block(block).succs;
            if *next_succ < succs.len() {
                let succ = succs[*next_succ];
                *next_succ += 1;
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        postorder.reverse();
        postorder
    }
}

/// Builds a [Cfg] from a function's op sequence, per §4.1.
pub fn build_cfg(ops: &[Op]) -> Result<Cfg, CfgError> {
    if ops.is_empty() {
        return Ok(Cfg {
            blocks: vec![Block {
                id: BlockId::new(0),
                entry: 0,
                exit: 0,
                preds: Preds::new(),
                succs: Succs::new(),
            }],
            index_to_block: Vec::new(),
            label_to_block: FxHashMap::default(),
            block_entry_label: FxHashMap::default(),
            control: ControlTables::default(),
        });
    }

    // Step 1: assign block boundaries. An op starts a new block if its own kind is always a
    // jump/rejoin target, or if the previous op always ends the block it's in.
    let mut block_starts: Vec<usize> = vec![0];
    for (idx, op) in ops.iter().enumerate() {
        if idx == 0 {
            continue;
        }
        let prev = &ops[idx - 1];
        let starts_new_block = op.kind.starts_new_block() || prev.kind.ends_current_block();
        if starts_new_block {
            if *block_starts.last().unwrap() != idx {
                block_starts.push(idx);
            }
        }
    }
    block_starts.sort_unstable();
    block_starts.dedup();

    let mut blocks = Vec::with_capacity(block_starts.len());
    let mut index_to_block = vec![BlockId::new(0); ops.len()];
    for (bi, &start) in block_starts.iter().enumerate() {
        let end = block_starts.get(bi + 1).copied().unwrap_or(ops.len());
        let block_id = BlockId::new(bi);
        for idx in start..end {
            index_to_block[idx] = block_id;
        }
        blocks.push(Block {
            id: block_id,
            entry: start,
            exit: end - 1,
            preds: Preds::new(),
            succs: Succs::new(),
        });
    }

    // Label table: which block each LABEL/STATE_LABEL op starts.
    let mut label_to_block = FxHashMap::default();
    let mut block_entry_label = FxHashMap::default();
    for (idx, op) in ops.iter().enumerate() {
        if matches!(op.kind, OpKind::Label | OpKind::StateLabel) {
            if let Some(label) = op.label_arg() {
                let block_id = index_to_block[idx];
                label_to_block.insert(label.to_string(), block_id);
                block_entry_label.entry(block_id).or_insert_with(|| label.to_string());
            }
        }
    }

    // Step 2: region side tables (step 4 of §4.1), built as a pure op-indexed scan so every
    // table is fully populated before any successor is computed (a marker's close can appear far
    // after the blocks that need to branch to it). `enclosing_loop_start` records, for every op,
    // the innermost loop it is lexically inside (if any), so LOOP_BREAK/LOOP_CONTINUE can resolve
    // their target without re-deriving a nesting stack from block order.
    let mut control = ControlTables::default();
    let mut else_to_if: FxHashMap<usize, usize> = FxHashMap::default();
    let mut enclosing_loop_start: Vec<Option<usize>> = vec![None; ops.len()];
    let mut if_stack: Vec<usize> = Vec::new();
    let mut loop_stack: Vec<usize> = Vec::new();
    let mut try_stack: Vec<usize> = Vec::new();

    for (idx, op) in ops.iter().enumerate() {
        enclosing_loop_start[idx] = loop_stack.last().copied();
        match op.kind {
            OpKind::If => if_stack.push(idx),
            OpKind::Else => {
                if let Some(&if_idx) = if_stack.last() {
                    control.if_to_else.insert(if_idx, idx);
                    else_to_if.insert(idx, if_idx);
                }
            }
            OpKind::EndIf => {
                if let Some(if_idx) = if_stack.pop() {
                    control.if_to_end.insert(if_idx, idx);
                    if let Some(&else_idx) = control.if_to_else.get(&if_idx) {
                        control.else_to_end.insert(else_idx, idx);
                    }
                }
            }
            OpKind::LoopStart => loop_stack.push(idx),
            OpKind::LoopEnd => {
                if let Some(start_idx) = loop_stack.pop() {
                    control.loop_start_to_end.insert(start_idx, idx);
                    control.loop_end_to_start.insert(idx, start_idx);
                }
            }
            OpKind::TryStart => try_stack.push(idx),
            OpKind::TryEnd => {
                if let Some(start_idx) = try_stack.pop() {
                    control.try_start_to_end.insert(start_idx, idx);
                    control.try_end_to_start.insert(idx, start_idx);
                }
            }
            OpKind::CheckException => {
                if let Some(label) = op.label_arg() {
                    control.check_exception_target.insert(idx, label.to_string());
                }
            }
            _ => {}
        }
    }

    if !if_stack.is_empty() {
        return Err(CfgError::UnbalancedRegion {
            op_index: if_stack[0],
            kind: "IF",
        });
    }
    if !loop_stack.is_empty() {
        return Err(CfgError::UnbalancedRegion {
            op_index: loop_stack[0],
            kind: "LOOP_START",
        });
    }
    if !try_stack.is_empty() {
        return Err(CfgError::UnbalancedRegion {
            op_index: try_stack[0],
            kind: "TRY_START",
        });
    }

    // Step 3: successors, one block at a time, using the now-complete control tables.
    for bi in 0..blocks.len() {
        let exit_idx = blocks[bi].exit;
        let op = &ops[exit_idx];
        let fallthrough = if bi + 1 < blocks.len() {
            Some(BlockId::new(bi + 1))
        } else {
            None
        };

        let mut succs = Succs::new();
        match op.kind {
            OpKind::Return | OpKind::Raise => {
                // no successors
            }
            OpKind::Jump => {
                let label = op
                    .label_arg()
                    .ok_or(CfgError::UnknownLabelTarget { op_index: exit_idx })?;
                let target = label_to_block
                    .get(label)
                    .copied()
                    .ok_or_else(|| CfgError::UnknownLabelTarget { op_index: exit_idx })?;
                succs.push(target);
            }
            OpKind::If => {
                if let Some(ft) = fallthrough {
                    succs.push(ft); // then-block; §3 requires then to precede else
                }
                let target_idx = control
                    .if_to_else
                    .get(&exit_idx)
                    .or_else(|| control.if_to_end.get(&exit_idx))
                    .copied();
                if let Some(target_idx) = target_idx {
                    let target_block = index_to_block[target_idx];
                    if !succs.contains(&target_block) {
                        succs.push(target_block);
                    }
                }
            }
            OpKind::LoopBreak => {
                if let Some(start_idx) = enclosing_loop_start[exit_idx] {
                    if let Some(&end_idx) = control.loop_start_to_end.get(&start_idx) {
                        if let Some(exit_block) = index_to_block.get(end_idx + 1).copied() {
                            succs.push(exit_block);
                        }
                    }
                }
            }
            OpKind::LoopBreakIfTrue | OpKind::LoopBreakIfFalse => {
                // Both the loop-exit edge and the fall-through edge are live; SCCP later
                // narrows this with `loop_break_choice`.
                if let Some(start_idx) = enclosing_loop_start[exit_idx] {
                    if let Some(&end_idx) = control.loop_start_to_end.get(&start_idx) {
                        if let Some(exit_block) = index_to_block.get(end_idx + 1).copied() {
                            succs.push(exit_block);
                        }
                    }
                }
                if let Some(ft) = fallthrough {
                    succs.push(ft);
                }
            }
            OpKind::LoopContinue => {
                if let Some(start_idx) = enclosing_loop_start[exit_idx] {
                    succs.push(index_to_block[start_idx]);
                }
            }
            OpKind::CheckException => {
                let label = op
                    .label_arg()
                    .ok_or(CfgError::UnknownLabelTarget { op_index: exit_idx })?;
                let handler = label_to_block
                    .get(label)
                    .copied()
                    .ok_or_else(|| CfgError::UnknownLabelTarget { op_index: exit_idx })?;
                succs.push(handler);
                if let Some(ft) = fallthrough {
                    succs.push(ft);
                }
            }
            _ => {
                // Covers both plain value-producing ops and the trivial single-op blocks formed
                // by ELSE/END_IF/LOOP_START/LOOP_END/TRY_START/TRY_END when their body is empty.
                // A then-arm whose next block opens with the matching ELSE must skip the else
                // body entirely and rejoin after END_IF instead of falling into it.
                if let Some(ft) = fallthrough {
                    let ft_entry = blocks[ft.index()].entry;
                    let redirect = else_to_if
                        .get(&ft_entry)
                        .and_then(|if_idx| control.if_to_end.get(if_idx))
                        .map(|&end_idx| index_to_block[end_idx]);
                    succs.push(redirect.unwrap_or(ft));
                }
            }
        }

        blocks[bi].succs = succs;
    }

    // Predecessors are the inverse of successors.
    let succs_snapshot: Vec<(BlockId, Succs)> =
        blocks.iter().map(|b| (b.id, b.succs.clone())).collect();
    for (from, succs) in succs_snapshot {
        for to in succs {
            blocks[to.index()].preds.push(from);
        }
    }

    Ok(Cfg {
        blocks,
        index_to_block,
        label_to_block,
        block_entry_label,
        control,
    })
}
