// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `ndfuse` crate is the execution-engine core of a lazy
//! array-programming runtime.
//!
//! Front-ends build up a trace of elementwise, reduction, scan,
//! gather/scatter and generation instructions over strided views of flat
//! array bases, and submit it as a batch. The engine
//!
//! - decides which instructions may share a kernel (the **fusion policy**,
//!   selectable via the `FUSE_MODEL` environment variable),
//! - groups fused instructions by their dominating shape into a nested-loop
//!   **block IR**,
//! - lowers each block to imperative kernel source with reduction and scan
//!   bookkeeping and SIMD/parallel annotations (the **emitter**),
//! - compiles and runs the kernel through a pluggable [`Backend`], caching
//!   compiled kernels by their source text,
//! - and manages the mmap-backed storage of array bases.
//!
//! ## Highlights
//!
//! - Lightweight value-type views: `(base, start, shape, stride)` with
//!   broadcast (`stride == 0`) dimensions.
//! - Conservative aliasing analysis ([`view::disjoint`]) that never claims
//!   disjointness for overlapping views.
//! - In-place instruction rewrites (`reshape`, `remove_axis`, `transpose`)
//!   with sweep-axis bookkeeping.
//! - Deterministic scheduling: the fusion-group partition depends only on
//!   the instruction order for a fixed policy.
//!
//! The native-source compiler, the concrete codegen targets and the
//! front-end bindings are external collaborators; see [`Backend`] for the
//! seam they plug into.

pub mod backend;
pub mod base;
pub mod block;
pub mod codegen;
pub mod config;
mod constant;
mod error;
pub mod fuse;
pub mod instruction;
pub mod memory;
mod opcode;
pub mod scheduler;
pub mod view;

pub use crate::backend::{Backend, CompiledKernel, KernelArgs, KernelCache};
pub use crate::base::{Base, BaseArena, BaseId, DType};
pub use crate::block::{Block, BlockArena, BlockId};
pub use crate::codegen::{Emitter, Iterspace, Layout};
pub use crate::config::RuntimeConfig;
pub use crate::constant::Constant;
pub use crate::error::{EngineError, ErrorKind};
pub use crate::fuse::{fusible, FuseModel};
pub use crate::instruction::{InstrId, Instruction};
pub use crate::opcode::Opcode;
pub use crate::scheduler::Runtime;
pub use crate::view::{aligned, aligned_and_same_shape, disjoint, same_shape, View, MAX_DIM};
