// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The block IR: a tree of nested loop nodes whose leaves are instructions
//! sharing a principal shape.
//!
//! Blocks live in an arena and refer to each other (and to instructions) by
//! index; the arena index doubles as the block's stable id, which makes
//! append/prepend rewrites and id-equality cheap.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::base::BaseId;
use crate::instruction::{InstrId, Instruction};

/// Stable id of a block in its arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

/// One node of the loop-nest tree.
#[derive(Debug)]
pub struct Block {
    /// Nesting depth; loop ranks count from 0, instruction leaves sit one
    /// below their loop.
    pub rank: usize,
    pub kind: BlockKind,
}

#[derive(Debug)]
pub enum BlockKind {
    Instr(InstrId),
    Loop(Loop),
}

/// A loop node: the extent of this rank's dimension plus child blocks and
/// the lifetime bookkeeping the emitter and scheduler need.
#[derive(Debug, Default)]
pub struct Loop {
    pub size: usize,
    pub children: Vec<BlockId>,
    pub reshapable: bool,
    /// Instructions that sweep along this rank
    pub sweeps: BTreeSet<InstrId>,
    /// Bases first allocated inside this block
    pub news: BTreeSet<BaseId>,
    /// Bases whose lifetime ends inside this block
    pub frees: BTreeSet<BaseId>,
}

impl Block {
    pub fn is_instr(&self) -> bool {
        matches!(self.kind, BlockKind::Instr(_))
    }

    pub fn as_loop(&self) -> Option<&Loop> {
        match self.kind {
            BlockKind::Loop(ref l) => Some(l),
            BlockKind::Instr(_) => None,
        }
    }

    pub fn as_loop_mut(&mut self) -> Option<&mut Loop> {
        match self.kind {
            BlockKind::Loop(ref mut l) => Some(l),
            BlockKind::Instr(_) => None,
        }
    }
}

/// Arena owning every block of a scheduling pass.
#[derive(Default)]
pub struct BlockArena {
    nodes: Vec<Block>,
}

impl BlockArena {
    pub fn new() -> BlockArena {
        BlockArena { nodes: Vec::new() }
    }

    pub fn instr_block(&mut self, instr: InstrId, rank: usize) -> BlockId {
        self.push(Block { rank, kind: BlockKind::Instr(instr) })
    }

    pub fn loop_block(&mut self, rank: usize, size: usize) -> BlockId {
        self.push(Block {
            rank,
            kind: BlockKind::Loop(Loop { size, ..Loop::default() }),
        })
    }

    fn push(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.nodes.len());
        self.nodes.push(block);
        id
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> &Block {
        &self.nodes[id.0]
    }

    #[inline]
    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.nodes[id.0]
    }

    /// All instructions in the subtree, in source order.
    pub fn all_instrs(&self, id: BlockId) -> Vec<InstrId> {
        let mut out = Vec::new();
        self.collect_instrs(id, &mut out);
        out
    }

    fn collect_instrs(&self, id: BlockId, out: &mut Vec<InstrId>) {
        match self.get(id).kind {
            BlockKind::Instr(instr) => out.push(instr),
            BlockKind::Loop(ref l) => {
                for &child in &l.children {
                    self.collect_instrs(child, out);
                }
            }
        }
    }

    /// Instructions that are direct children of this block.
    pub fn local_instrs(&self, id: BlockId) -> Vec<InstrId> {
        match self.get(id).kind {
            BlockKind::Instr(instr) => vec![instr],
            BlockKind::Loop(ref l) => l
                .children
                .iter()
                .filter_map(|&c| match self.get(c).kind {
                    BlockKind::Instr(instr) => Some(instr),
                    BlockKind::Loop(_) => None,
                })
                .collect(),
        }
    }

    /// A loop is innermost when no child is itself a loop.
    pub fn is_innermost(&self, id: BlockId) -> bool {
        match self.get(id).kind {
            BlockKind::Instr(_) => false,
            BlockKind::Loop(ref l) => l.children.iter().all(|&c| self.get(c).is_instr()),
        }
    }

    pub fn is_system_only(&self, id: BlockId, batch: &[Instruction]) -> bool {
        self.all_instrs(id)
            .iter()
            .all(|&InstrId(i)| batch[i].opcode.is_system())
    }

    /// All bases referenced anywhere in the subtree.
    pub fn all_bases(&self, id: BlockId, batch: &[Instruction]) -> BTreeSet<BaseId> {
        let mut out = BTreeSet::new();
        for InstrId(i) in self.all_instrs(id) {
            out.extend(batch[i].bases());
        }
        out
    }

    /// The sizes of the loop ranks down the nest, outermost first.
    pub fn rank_sizes(&self, id: BlockId) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut cur = Some(id);
        while let Some(id) = cur {
            match self.get(id).kind {
                BlockKind::Instr(_) => break,
                BlockKind::Loop(ref l) => {
                    sizes.push(l.size);
                    cur = l.children.iter().copied().find(|&c| !self.get(c).is_instr());
                }
            }
        }
        sizes
    }

    /// Whether the subtree under `a` must execute after (or before) `b`:
    /// any instruction pair across the two trees is dependent.
    pub fn depends_on(&self, a: BlockId, b: BlockId, batch: &[Instruction]) -> bool {
        let a_instrs = self.all_instrs(a);
        let b_instrs = self.all_instrs(b);
        for &InstrId(i) in &a_instrs {
            for &InstrId(j) in &b_instrs {
                if i != j && batch[i].depends_on(&batch[j]) {
                    return true;
                }
            }
        }
        false
    }

    /// Build the nested block tree for one fusion group.
    ///
    /// The dominating shape is the principal shape of the last instruction;
    /// every instruction is force-reshaped onto it, loop nodes wrap one rank
    /// per dimension, and sweeps are flagged on the loop whose rank equals
    /// their sweep axis.
    pub fn create_nested_block(&mut self, batch: &mut [Instruction], group: &[InstrId]) -> BlockId {
        debug_assert!(!group.is_empty());
        let last = group[group.len() - 1];
        let mut shape = batch[last.0].principal_shape().to_vec();
        if shape.is_empty() {
            shape.push(1);
        }
        for &InstrId(i) in group {
            batch[i].reshape_force(&shape);
        }
        self.nest_rank(batch, group, &shape, 0)
    }

    fn nest_rank(
        &mut self,
        batch: &[Instruction],
        group: &[InstrId],
        shape: &[usize],
        rank: usize,
    ) -> BlockId {
        let id = self.loop_block(rank, shape[rank]);
        let children = if rank + 1 == shape.len() {
            group
                .iter()
                .map(|&instr| self.instr_block(instr, rank + 1))
                .collect()
        } else {
            vec![self.nest_rank(batch, group, shape, rank + 1)]
        };
        let sweeps = group
            .iter()
            .copied()
            .filter(|&InstrId(i)| batch[i].sweep_axis() == Some(rank))
            .collect();
        let reshapable = group.iter().all(|&InstrId(i)| batch[i].reshapable());
        let l = self.get_mut(id).as_loop_mut().expect("loop node");
        l.children = children;
        l.sweeps = sweeps;
        l.reshapable = reshapable;
        id
    }

    /// Append instructions to this block, force-reshaped to the dominating
    /// shape of the block's last instruction leaf.
    pub fn append_instr_list(
        &mut self,
        id: BlockId,
        list: &[InstrId],
        batch: &mut [Instruction],
    ) {
        debug_assert!(!self.get(id).is_instr());
        let (recurse, shape, rank) = {
            let block = self.get(id);
            let l = block.as_loop().expect("loop node");
            let last = *l.children.last().expect("non-empty block");
            match self.get(last).kind {
                BlockKind::Loop(_) => (Some(last), Vec::new(), 0),
                BlockKind::Instr(InstrId(i)) => {
                    (None, batch[i].principal_shape().to_vec(), block.rank)
                }
            }
        };
        if let Some(inner) = recurse {
            return self.append_instr_list(inner, list, batch);
        }
        for &instr in list {
            batch[instr.0].reshape_force(&shape);
            let leaf = self.instr_block(instr, rank + 1);
            self.get_mut(id).as_loop_mut().expect("loop node").children.push(leaf);
        }
    }

    /// Prepend instructions to this block, force-reshaped to the dominating
    /// shape of the block's first instruction leaf.
    pub fn prepend_instr_list(
        &mut self,
        id: BlockId,
        list: &[InstrId],
        batch: &mut [Instruction],
    ) {
        debug_assert!(!self.get(id).is_instr());
        let (recurse, shape, rank) = {
            let block = self.get(id);
            let l = block.as_loop().expect("loop node");
            let first = *l.children.first().expect("non-empty block");
            match self.get(first).kind {
                BlockKind::Loop(_) => (Some(first), Vec::new(), 0),
                BlockKind::Instr(InstrId(i)) => {
                    (None, batch[i].principal_shape().to_vec(), block.rank)
                }
            }
        };
        if let Some(inner) = recurse {
            return self.prepend_instr_list(inner, list, batch);
        }
        let mut leaves = Vec::with_capacity(list.len());
        for &instr in list {
            batch[instr.0].reshape_force(&shape);
            leaves.push(self.instr_block(instr, rank + 1));
        }
        let children = &mut self.get_mut(id).as_loop_mut().expect("loop node").children;
        leaves.append(children);
        *children = leaves;
    }

    /// Indented rendering of the subtree, for trace logging.
    pub fn pprint(&self, id: BlockId, batch: &[Instruction]) -> String {
        let mut out = String::new();
        self.pprint_into(id, batch, &mut out);
        out
    }

    fn pprint_into(&self, id: BlockId, batch: &[Instruction], out: &mut String) {
        let block = self.get(id);
        let indent = "  ".repeat(block.rank);
        match block.kind {
            BlockKind::Instr(InstrId(i)) => {
                let _ = writeln!(out, "{}{}", indent, batch[i]);
            }
            BlockKind::Loop(ref l) => {
                let _ = writeln!(
                    out,
                    "{}loop rank={} size={} sweeps={} news={} frees={}",
                    indent,
                    block.rank,
                    l.size,
                    l.sweeps.len(),
                    l.news.len(),
                    l.frees.len()
                );
                for &child in &l.children {
                    self.pprint_into(child, batch, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseId;
    use crate::constant::Constant;
    use crate::opcode::Opcode;
    use crate::view::View;

    fn cview(base: usize, shape: &[usize]) -> View {
        View::contiguous(BaseId(base), shape)
    }

    fn batch_of_two() -> Vec<Instruction> {
        vec![
            Instruction::new(
                Opcode::Multiply,
                vec![cview(0, &[2, 3]), cview(1, &[2, 3]), cview(2, &[2, 3])],
                None,
            ),
            Instruction::new(
                Opcode::AddReduce,
                vec![cview(3, &[2]), cview(0, &[2, 3]), View::constant()],
                Some(Constant::Int64(1)),
            ),
        ]
    }

    #[test]
    fn nested_block_structure() {
        let mut batch = batch_of_two();
        let mut arena = BlockArena::new();
        let root = arena.create_nested_block(&mut batch, &[InstrId(0), InstrId(1)]);
        assert_eq!(arena.rank_sizes(root), vec![2, 3]);
        assert_eq!(arena.all_instrs(root), vec![InstrId(0), InstrId(1)]);
        assert!(!arena.is_innermost(root));

        // the sweep is flagged on the rank of its sweep axis
        let inner = match arena.get(root).kind {
            BlockKind::Loop(ref l) => l.children[0],
            _ => unreachable!(),
        };
        assert!(arena.is_innermost(inner));
        let l = arena.get(inner).as_loop().unwrap();
        assert!(l.sweeps.contains(&InstrId(1)));
    }

    #[test]
    fn append_reshapes_to_neighbour() {
        let mut batch = batch_of_two();
        batch.push(Instruction::new(
            Opcode::Add,
            vec![cview(4, &[6]), cview(5, &[6]), cview(6, &[6])],
            None,
        ));
        let mut arena = BlockArena::new();
        let root = arena.create_nested_block(&mut batch, &[InstrId(0)]);
        arena.append_instr_list(root, &[InstrId(2)], &mut batch);
        assert_eq!(arena.all_instrs(root), vec![InstrId(0), InstrId(2)]);
        assert_eq!(batch[2].operands[0].shape, vec![2, 3]);

        arena.prepend_instr_list(root, &[InstrId(1)], &mut batch);
        assert_eq!(
            arena.all_instrs(root),
            vec![InstrId(1), InstrId(0), InstrId(2)]
        );
    }
}
