// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The downstream backend seam: compiling emitted source into a callable
//! kernel, and the process-wide cache that makes identical sources share one
//! compiled kernel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::constant::Constant;
use crate::error::EngineError;

/// One buffer argument: the materialised data region of a base.
#[derive(Clone, Debug)]
pub struct BufferArg {
    pub data: *mut u8,
    pub nelem: usize,
}

/// One operand argument, mirroring the kernel's unpack section.
#[derive(Clone, Debug)]
pub struct OperandArg {
    pub start: usize,
    pub nelem: usize,
    pub stride: Vec<isize>,
    /// Payload of constant operands
    pub constant: Option<Constant>,
}

/// The call-time argument block of a kernel: the iterspace descriptor plus
/// buffer and operand tables, in the order the emitter unpacked them.
#[derive(Clone, Debug)]
pub struct KernelArgs {
    pub shape: Vec<usize>,
    pub nelem: usize,
    pub buffers: Vec<BufferArg>,
    pub operands: Vec<OperandArg>,
}

impl KernelArgs {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

/// A loaded, callable kernel.
///
/// Cloning shares the underlying callable; the cache relies on this for
/// referential stability.
#[derive(Clone)]
pub struct CompiledKernel {
    call: Arc<dyn Fn(&KernelArgs) -> Result<(), EngineError> + Send + Sync>,
}

impl CompiledKernel {
    pub fn new<F>(call: F) -> CompiledKernel
    where
        F: Fn(&KernelArgs) -> Result<(), EngineError> + Send + Sync + 'static,
    {
        CompiledKernel { call: Arc::new(call) }
    }

    pub fn call(&self, args: &KernelArgs) -> Result<(), EngineError> {
        (self.call)(args)
    }

    /// Whether two handles refer to the same loaded kernel.
    pub fn same_kernel(&self, other: &CompiledKernel) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl std::fmt::Debug for CompiledKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompiledKernel({:p})", Arc::as_ptr(&self.call))
    }
}

/// What a concrete backend must provide: turn kernel source into a callable.
///
/// A failed compile surfaces as `CompileFailure` and aborts the batch.
pub trait Backend {
    fn compile_and_load(&self, source: &str, symbol: &str)
        -> Result<CompiledKernel, EngineError>;
}

/// The kernel object cache, keyed by the full generated source.
///
/// Shared read/write across submissions behind a single mutex; a hit reuses
/// the previously compiled kernel, so identical sources are compiled exactly
/// once per process.
#[derive(Default)]
pub struct KernelCache {
    kernels: Mutex<HashMap<String, CompiledKernel>>,
}

impl KernelCache {
    pub fn new() -> KernelCache {
        KernelCache { kernels: Mutex::new(HashMap::new()) }
    }

    pub fn get_or_compile(
        &self,
        backend: &dyn Backend,
        source: &str,
        symbol: &str,
    ) -> Result<CompiledKernel, EngineError> {
        let mut kernels = self.kernels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(kernel) = kernels.get(source) {
            return Ok(kernel.clone());
        }
        let kernel = backend.compile_and_load(source, symbol)?;
        kernels.insert(source.to_string(), kernel.clone());
        Ok(kernel)
    }

    /// Number of distinct compiled kernels.
    pub fn len(&self) -> usize {
        self.kernels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
