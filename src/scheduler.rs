// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The scheduler: turns a submitted instruction trace into fusion groups,
//! builds a block tree per group, drives emission, compilation and
//! execution, and releases base storage when lifetimes end.
//!
//! For a fixed fusion model the group partition is a function of the
//! instruction order alone, and groups partition the trace contiguously, so
//! dependent instructions are never reordered.

use std::collections::{BTreeMap, BTreeSet};

use crate::backend::{Backend, KernelCache};
use crate::base::{BaseArena, BaseId, DType};
use crate::block::{BlockArena, BlockId, BlockKind};
use crate::codegen::Emitter;
use crate::config::RuntimeConfig;
use crate::error::EngineError;
use crate::fuse::{fusible, FuseModel};
use crate::instruction::{InstrId, Instruction};
use crate::memory;
use crate::opcode::Opcode;
use crate::view::View;

/// Remove `Sync`/`Free`/`Discard` instructions that never feed a
/// computation. Returns the surviving instruction ids, in order, and the
/// set of bases the trace asked to free.
pub fn remove_non_computed_system(
    batch: &[Instruction],
) -> (Vec<InstrId>, BTreeSet<BaseId>) {
    let mut computed = BTreeSet::new();
    for instr in batch {
        if !instr.opcode.is_system() {
            computed.extend(instr.bases());
        }
    }
    let mut kept = Vec::with_capacity(batch.len());
    let mut freed = BTreeSet::new();
    for (i, instr) in batch.iter().enumerate() {
        if instr.opcode.is_system() {
            let base = instr.output_base();
            if matches!(instr.opcode, Opcode::Free | Opcode::Discard) {
                freed.extend(base);
            }
            if base.map_or(true, |b| !computed.contains(&b)) {
                continue;
            }
        }
        kept.push(InstrId(i));
    }
    (kept, freed)
}

/// Partition `order` into greedy fusion groups: each new instruction joins
/// the open group iff it is fusible with every member, otherwise it closes
/// the group and opens the next one.
pub fn fusion_groups(
    model: FuseModel,
    batch: &[Instruction],
    order: &[InstrId],
) -> Vec<Vec<InstrId>> {
    let mut groups: Vec<Vec<InstrId>> = Vec::new();
    let mut current: Vec<InstrId> = Vec::new();
    for &id in order {
        let joins = current
            .iter()
            .all(|&member| fusible(model, &batch[id.0], &batch[member.0]));
        if !joins && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
        current.push(id);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// The deepest loop node of a block chain; the innermost block that still
/// contains every instruction of the group.
fn innermost_loop(blocks: &BlockArena, root: BlockId) -> BlockId {
    let mut cur = root;
    loop {
        let next = match blocks.get(cur).kind {
            BlockKind::Loop(ref l) => {
                l.children.iter().copied().find(|&c| !blocks.get(c).is_instr())
            }
            BlockKind::Instr(_) => None,
        };
        match next {
            Some(inner) => cur = inner,
            None => return cur,
        }
    }
}

/// The execution-engine core: the base arena, the kernel cache and the
/// backend, driven batch by batch.
///
/// The core is single-threaded cooperative: `execute` returns only when the
/// whole batch has run (or the batch aborted on its first failure).
pub struct Runtime {
    config: RuntimeConfig,
    bases: BaseArena,
    cache: KernelCache,
    backend: Box<dyn Backend>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, backend: Box<dyn Backend>) -> Runtime {
        Runtime {
            config,
            bases: BaseArena::new(),
            cache: KernelCache::new(),
            backend,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bases(&self) -> &BaseArena {
        &self.bases
    }

    pub fn bases_mut(&mut self) -> &mut BaseArena {
        &mut self.bases
    }

    pub fn create_base(&mut self, dtype: DType, nelem: usize) -> BaseId {
        self.bases.create(dtype, nelem)
    }

    /// Hand an externally owned pointer to the base behind `view`.
    pub fn set_data(&mut self, view: &View, data: *mut u8) -> Result<(), EngineError> {
        memory::set_data(&mut self.bases, view, data)
    }

    /// The data pointer of the base behind `view`.
    pub fn get_data(&self, view: &View) -> Result<*mut u8, EngineError> {
        memory::get_data(&self.bases, view)
    }

    /// Number of distinct kernels compiled so far.
    pub fn compiled_kernels(&self) -> usize {
        self.cache.len()
    }

    /// Execute one submitted batch.
    ///
    /// Side effects on bases happen in submission order; a failure aborts
    /// the batch without rolling back kernels that already ran.
    pub fn execute(&mut self, mut batch: Vec<Instruction>) -> Result<(), EngineError> {
        let (kept, freed) = remove_non_computed_system(&batch);

        // where each freed base is referenced for the last time
        let mut last_ref: BTreeMap<BaseId, usize> = BTreeMap::new();
        for (pos, &InstrId(i)) in kept.iter().enumerate() {
            for base in batch[i].bases() {
                last_ref.insert(base, pos);
            }
        }

        let groups = fusion_groups(self.config.fuse_model, &batch, &kept);
        log::debug!(
            "fuse model {}: {} instruction(s) in {} group(s)",
            self.config.fuse_model.name(),
            kept.len(),
            groups.len()
        );

        let mut pos = 0;
        for group in &groups {
            let range = pos..pos + group.len();
            pos = range.end;
            self.execute_group(&mut batch, group, &freed, &last_ref, range)?;
        }

        // bases freed by the trace but never computed on
        for &base in &freed {
            if !last_ref.contains_key(&base) {
                memory::free(self.bases.get_mut(base))?;
            }
        }
        Ok(())
    }

    fn execute_group(
        &mut self,
        batch: &mut [Instruction],
        group: &[InstrId],
        freed: &BTreeSet<BaseId>,
        last_ref: &BTreeMap<BaseId, usize>,
        range: std::ops::Range<usize>,
    ) -> Result<(), EngineError> {
        let group_frees: BTreeSet<BaseId> = freed
            .iter()
            .copied()
            .filter(|b| last_ref.get(b).map_or(false, |&p| range.contains(&p)))
            .collect();

        let system_only = group.iter().all(|&InstrId(i)| batch[i].opcode.is_system());
        if !system_only {
            // the emitter accumulates along the innermost rank; bring every
            // sweep axis there before shapes are compared
            for &InstrId(i) in group {
                if let Some(sa) = batch[i].sweep_axis() {
                    let nd = batch[i].ndim();
                    if nd > 1 && sa + 1 != nd {
                        batch[i].transpose(sa, nd - 1)?;
                    }
                }
            }

            let mut blocks = BlockArena::new();
            let root = blocks.create_nested_block(batch, group);

            // first-written bases materialise inside this block
            let news: BTreeSet<BaseId> = group
                .iter()
                .filter(|&&InstrId(i)| !batch[i].opcode.is_system())
                .filter_map(|&InstrId(i)| batch[i].output_base())
                .filter(|&b| !self.bases.get(b).has_data())
                .collect();
            if let Some(l) = blocks.get_mut(root).as_loop_mut() {
                l.news = news;
            }
            let inner = innermost_loop(&blocks, root);
            if let Some(l) = blocks.get_mut(inner).as_loop_mut() {
                l.frees.extend(group_frees.iter().copied());
            }
            log::trace!("block tree:\n{}", blocks.pprint(root, batch));

            let emitter =
                Emitter::new(&blocks, root, batch, &self.bases, self.config.chunk_size)?;
            let (path, source) = emitter.write_source(&self.config.cache_dir)?;
            log::debug!("kernel {} written to {}", emitter.symbol(), path.display());

            let kernel = self
                .cache
                .get_or_compile(&*self.backend, &source, &emitter.symbol())?;
            for buffer in emitter.buffers() {
                memory::ensure_allocated(self.bases.get_mut(buffer.base))?;
            }
            kernel.call(&emitter.kernel_args(&self.bases))?;
        }

        // lifetimes that ended inside this group
        for &base in &group_frees {
            memory::free(self.bases.get_mut(base))?;
        }
        Ok(())
    }
}
