// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Lowering one block to kernel source.
//!
//! The emitter is a pure function of the block, its iterspace and the
//! operand catalogue: it unpacks the argument descriptors, declares walker
//! pointers and accumulators, emits one statement per instruction inside the
//! loop nest, and picks one of three loop modes (scalar, single-rank
//! parallel, nested). The output is text; the backend owns the compiler.

pub mod expr;
pub mod iterspace;

pub use self::iterspace::{Iterspace, Layout};

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{BufferArg, KernelArgs, OperandArg};
use crate::base::{BaseArena, BaseId, DType};
use crate::block::{BlockArena, BlockId, BlockKind};
use crate::constant::Constant;
use crate::error::{EngineError, ErrorKind};
use crate::instruction::{InstrId, Instruction};
use crate::opcode::Opcode;
use crate::view::View;

/// How one instruction lowers inside the loop body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TacClass {
    Map,
    Zip,
    Generate,
    ReduceComplete,
    ReducePartial,
    Scan,
    Gather,
    Scatter,
    CondScatter,
}

/// One lowered instruction: opcode plus resolved kernel-operand indices
/// (sweep-axis constants resolve to `None`).
#[derive(Debug)]
struct Tac {
    opcode: Opcode,
    class: TacClass,
    ops: Vec<Option<usize>>,
}

/// A deduplicated kernel argument.
#[derive(Debug)]
pub struct KernelOperand {
    pub view: View,
    pub dtype: DType,
    pub layout: Layout,
    /// Index into the kernel's buffer table, when the layout touches memory
    pub buffer: Option<usize>,
    /// Payload of `ScalarConst` operands
    pub constant: Option<Constant>,
}

/// A buffer referenced by the kernel.
#[derive(Copy, Clone, Debug)]
pub struct KernelBuffer {
    pub base: BaseId,
    pub dtype: DType,
}

#[derive(Debug)]
pub struct Emitter {
    iterspace: Iterspace,
    chunk_size: usize,
    tacs: Vec<Tac>,
    operands: Vec<KernelOperand>,
    buffers: Vec<KernelBuffer>,
}

impl Emitter {
    /// Collect the array instructions of `root` and resolve their operands.
    pub fn new(
        blocks: &BlockArena,
        root: BlockId,
        batch: &[Instruction],
        arena: &BaseArena,
        chunk_size: usize,
    ) -> Result<Emitter, EngineError> {
        // bases born and dying inside the block can live in registers
        let mut news = BTreeSet::new();
        let mut frees = BTreeSet::new();
        collect_lifetimes(blocks, root, &mut news, &mut frees);
        let temps: BTreeSet<BaseId> = news.intersection(&frees).copied().collect();

        let mut shape = blocks.rank_sizes(root);
        if shape.is_empty() {
            shape.push(1);
        }

        let mut emitter = Emitter {
            iterspace: Iterspace::new(shape, Layout::ScalarConst),
            chunk_size,
            tacs: Vec::new(),
            operands: Vec::new(),
            buffers: Vec::new(),
        };

        for InstrId(i) in blocks.all_instrs(root) {
            let instr = &batch[i];
            if instr.opcode.is_system() {
                continue;
            }
            if let Opcode::Extension(_) = instr.opcode {
                return Err(EngineError::with_info(
                    ErrorKind::UnknownOperator,
                    instr.opcode.to_string(),
                ));
            }
            let class = classify_tac(instr)?;
            let mut ops = Vec::with_capacity(instr.operands.len());
            for (pos, view) in instr.operands.iter().enumerate() {
                ops.push(emitter.add_operand(instr, pos, view, &temps, arena)?);
            }
            emitter.tacs.push(Tac { opcode: instr.opcode, class, ops });
        }

        let layout = emitter
            .operands
            .iter()
            .map(|o| o.layout)
            .max()
            .unwrap_or(Layout::ScalarConst);
        if layout == Layout::Sparse {
            return Err(EngineError::with_info(ErrorKind::UnsupportedLayout, layout.to_string()));
        }
        emitter.iterspace.layout = layout;
        Ok(emitter)
    }

    fn add_operand(
        &mut self,
        instr: &Instruction,
        pos: usize,
        view: &View,
        temps: &BTreeSet<BaseId>,
        arena: &BaseArena,
    ) -> Result<Option<usize>, EngineError> {
        if view.is_constant() {
            // the sweep-axis constant is loop structure, not a kernel argument
            if instr.opcode.is_sweep() && pos == 2 {
                return Ok(None);
            }
            let payload = match (instr.opcode, instr.constant) {
                (Opcode::Random, Some(Constant::Random123 { start, key })) => {
                    if pos == 1 {
                        Constant::UInt64(start)
                    } else {
                        Constant::UInt64(key)
                    }
                }
                (_, Some(c)) => c,
                (_, None) => {
                    return Err(EngineError::with_info(
                        ErrorKind::NullView,
                        "constant operand without payload",
                    ))
                }
            };
            let id = self.operands.len();
            self.operands.push(KernelOperand {
                view: view.clone(),
                dtype: payload.dtype(),
                layout: Layout::ScalarConst,
                buffer: None,
                constant: Some(payload),
            });
            return Ok(Some(id));
        }

        // array operands with identical windows share one argument
        if let Some(id) = self
            .operands
            .iter()
            .position(|o| o.constant.is_none() && o.view == *view)
        {
            return Ok(Some(id));
        }

        let base = view.base.expect("non-constant view has a base");
        let dtype = arena.get(base).dtype();
        let layout = iterspace::classify(view, temps.contains(&base));
        let buffer = if layout.is_array() {
            Some(match self.buffers.iter().position(|b| b.base == base) {
                Some(b) => b,
                None => {
                    self.buffers.push(KernelBuffer { base, dtype });
                    self.buffers.len() - 1
                }
            })
        } else {
            None
        };
        let id = self.operands.len();
        self.operands.push(KernelOperand {
            view: view.clone(),
            dtype,
            layout,
            buffer,
            constant: None,
        });
        Ok(Some(id))
    }

    pub fn iterspace(&self) -> &Iterspace {
        &self.iterspace
    }

    pub fn operands(&self) -> &[KernelOperand] {
        &self.operands
    }

    pub fn buffers(&self) -> &[KernelBuffer] {
        &self.buffers
    }

    /// The readable form behind the kernel symbol: opcode sequence with
    /// operand layouts and dtypes, plus the iterspace rank.
    pub fn symbol_text(&self) -> String {
        let mut text = String::new();
        for tac in &self.tacs {
            if !text.is_empty() {
                text.push('_');
            }
            let _ = write!(text, "{}", tac.opcode);
            text.push('(');
            let mut first = true;
            for op in tac.ops.iter().flatten() {
                if !first {
                    text.push(',');
                }
                first = false;
                let o = &self.operands[*op];
                let _ = write!(text, "{}:{}", o.layout, o.dtype);
            }
            text.push(')');
        }
        let _ = write!(text, "~{}d", self.iterspace.ndim());
        text
    }

    /// Deterministic kernel symbol: FNV-1a over the symbol text.
    pub fn symbol(&self) -> String {
        format!("KRN_{:016X}", fnv1a(self.symbol_text().as_bytes()))
    }

    /// Write the generated source to `<cache_dir>/<symbol>.c` and return the
    /// path and the source.
    pub fn write_source(&self, cache_dir: &Path) -> Result<(PathBuf, String), EngineError> {
        let source = self.generate_source()?;
        let path = cache_dir.join(format!("{}.c", self.symbol()));
        fs::create_dir_all(cache_dir)
            .and_then(|()| fs::write(&path, &source))
            .map_err(|e| EngineError::with_info(ErrorKind::CompileFailure, e.to_string()))?;
        Ok((path, source))
    }

    /// The call-time argument block mirroring the unpack section.
    pub fn kernel_args(&self, arena: &BaseArena) -> KernelArgs {
        KernelArgs {
            shape: self.iterspace.shape.clone(),
            nelem: self.iterspace.nelem,
            buffers: self
                .buffers
                .iter()
                .map(|b| {
                    let base = arena.get(b.base);
                    BufferArg { data: base.data(), nelem: base.nelem() }
                })
                .collect(),
            operands: self
                .operands
                .iter()
                .map(|o| OperandArg {
                    start: o.view.start,
                    nelem: o.view.nelements(),
                    stride: o.view.stride.clone(),
                    constant: o.constant,
                })
                .collect(),
        }
    }

    fn name(&self, o: usize) -> String {
        format!("a{}", o)
    }

    fn etype(&self, o: usize) -> &'static str {
        expr::ctype(self.operands[o].dtype)
    }

    /// Element access of operand `o` at the iterspace axis.
    fn axis_access(&self, o: usize) -> String {
        let op = &self.operands[o];
        let axis = self.iterspace.axis;
        match op.layout {
            Layout::Contiguous | Layout::Consecutive | Layout::Strided => {
                let innermost = axis + 1 == op.view.ndim();
                if innermost && op.view.stride[axis] == 0 {
                    format!("{}[0]", self.name(o))
                } else if innermost && op.view.stride[axis] == 1 {
                    format!("{}[idx{}]", self.name(o), axis)
                } else {
                    format!("{0}[idx{1}*{0}_stride_d{1}]", self.name(o), axis)
                }
            }
            _ => self.name(o),
        }
    }

    fn tac_op(&self, tac: &Tac, pos: usize) -> usize {
        tac.ops[pos].expect("resolved kernel operand")
    }

    /// The linear element index of the current iteration.
    fn linear_index(&self) -> String {
        let nd = self.iterspace.ndim();
        let mut out = "idx0".to_string();
        for d in 1..nd {
            out = format!("({} * iterspace_shape_d{} + idx{})", out, d, d);
        }
        out
    }

    fn unpack_iterspace(&self, src: &mut String) {
        let _ = writeln!(src, "    const int64_t iterspace_ndim = iterspace->ndim;");
        let _ = writeln!(src, "    const int64_t *iterspace_shape = iterspace->shape;");
        for d in 0..self.iterspace.ndim() {
            let _ = writeln!(
                src,
                "    const int64_t iterspace_shape_d{0} = iterspace->shape[{0}];",
                d
            );
        }
        let _ = writeln!(src, "    const int64_t iterspace_nelem = iterspace->nelem;");
        let _ = writeln!(src, "    (void) iterspace_ndim; (void) iterspace_shape; (void) iterspace_nelem;");
    }

    fn unpack_buffers(&self, src: &mut String) {
        for (b, buffer) in self.buffers.iter().enumerate() {
            let t = expr::ctype(buffer.dtype);
            let _ = writeln!(src, "\n    // Buffer buf{}", b);
            let _ = writeln!(src, "    {t} *buf{b}_data = ({t} *) buffers[{b}]->data;");
            let _ = writeln!(src, "    const int64_t buf{b}_nelem = buffers[{b}]->nelem;");
            let _ = writeln!(src, "    assert(buf{b}_data != NULL);");
            let _ = writeln!(src, "    (void) buf{b}_nelem;");
        }
    }

    fn unpack_operands(&self, src: &mut String) {
        for (o, op) in self.operands.iter().enumerate() {
            let name = self.name(o);
            let _ = writeln!(src, "\n    // Argument {} [{}]", name, op.layout);
            match op.layout {
                Layout::Contiguous | Layout::Consecutive | Layout::Strided | Layout::Scalar => {
                    let _ = writeln!(src, "    const int64_t {name}_start = args[{o}]->start;");
                    let _ = writeln!(src, "    const int64_t {name}_nelem = args[{o}]->nelem;");
                    let _ = writeln!(src, "    (void) {name}_nelem;");
                    for d in 0..op.view.ndim() {
                        let _ = writeln!(
                            src,
                            "    const int64_t {name}_stride_d{d} = args[{o}]->stride[{d}];"
                        );
                        let _ = writeln!(src, "    (void) {name}_stride_d{d};");
                    }
                }
                Layout::ScalarConst => {
                    let t = self.etype(o);
                    let _ = writeln!(
                        src,
                        "    const {t} {name} = *(const {t} *) args[{o}]->const_data;"
                    );
                }
                Layout::ScalarTemp | Layout::Contractable => {
                    let _ = writeln!(src, "    // No unpacking needed.");
                }
                Layout::Sparse => {}
            }
        }
    }

    /// Walker declarations: operand pointers offset over the non-axis ranks.
    fn declare_init_operands(&self, prolog: &mut String) {
        let ndim = self.iterspace.ndim();
        let axis = self.iterspace.axis;
        for (o, op) in self.operands.iter().enumerate() {
            let name = self.name(o);
            let t = expr::ctype(op.dtype);
            match op.layout {
                Layout::ScalarConst => {}
                Layout::Scalar => {
                    let b = op.buffer.expect("scalar operand has a buffer");
                    let _ = writeln!(
                        prolog,
                        "{t} {name} = *(buf{b}_data + {name}_start);"
                    );
                }
                Layout::ScalarTemp | Layout::Contractable => {
                    let _ = writeln!(prolog, "{t} {name};");
                }
                Layout::Contiguous | Layout::Consecutive | Layout::Strided => {
                    let b = op.buffer.expect("walked operand has a buffer");
                    let mut offset = String::new();
                    let opd_ndim = op.view.ndim();
                    let mut opd_axis = 0;
                    for a in 0..ndim {
                        if a == axis {
                            if opd_ndim == ndim {
                                opd_axis += 1;
                            }
                            continue;
                        }
                        let _ = write!(offset, " + {name}_stride_d{opd_axis}*idx{a}");
                        opd_axis += 1;
                    }
                    let restrict =
                        if self.operands.iter().filter(|p| p.buffer == op.buffer).count() == 1 {
                            "restrict "
                        } else {
                            ""
                        };
                    let _ = writeln!(
                        prolog,
                        "{t} *{restrict}{name} = buf{b}_data + {name}_start{offset};"
                    );
                }
                Layout::Sparse => {}
            }
        }
    }

    /// Fill prolog, body and epilog with one statement group per tac.
    fn emit_operations(
        &self,
        prolog: &mut String,
        body: &mut String,
        epilog: &mut String,
    ) -> Result<(), EngineError> {
        for (t, tac) in self.tacs.iter().enumerate() {
            match tac.class {
                TacClass::Zip => {
                    let out = self.tac_op(tac, 0);
                    let in1 = self.tac_op(tac, 1);
                    let in2 = self.tac_op(tac, 2);
                    let dtype = self.operands[out].dtype;
                    let e = expr::op_expr(
                        tac.opcode,
                        dtype,
                        &self.axis_access(in1),
                        &self.axis_access(in2),
                    )?;
                    let _ = writeln!(body, "{} = {};", self.axis_access(out), e);
                }
                TacClass::Map => {
                    let out = self.tac_op(tac, 0);
                    let in1 = self.tac_op(tac, 1);
                    // absolute narrows complex input to a real output
                    let dtype = if tac.opcode == Opcode::Absolute {
                        self.operands[in1].dtype
                    } else {
                        self.operands[out].dtype
                    };
                    let e = expr::op_expr(tac.opcode, dtype, &self.axis_access(in1), "")?;
                    let _ = writeln!(body, "{} = {};", self.axis_access(out), e);
                }
                TacClass::Generate => {
                    let out = self.tac_op(tac, 0);
                    match tac.opcode {
                        Opcode::Range => {
                            let _ = writeln!(
                                body,
                                "{} = ({}) {};",
                                self.axis_access(out),
                                self.etype(out),
                                self.linear_index()
                            );
                        }
                        Opcode::Random => {
                            let in1 = self.tac_op(tac, 1);
                            let in2 = self.tac_op(tac, 2);
                            let _ = writeln!(
                                body,
                                "{} = kp_random123({}, {}, {});",
                                self.axis_access(out),
                                self.linear_index(),
                                self.name(in1),
                                self.name(in2)
                            );
                        }
                        op => {
                            return Err(EngineError::with_info(
                                ErrorKind::UnknownOperator,
                                op.to_string(),
                            ))
                        }
                    }
                }
                TacClass::Gather => {
                    let out = self.tac_op(tac, 0);
                    let in1 = self.tac_op(tac, 1);
                    let index = self.tac_op(tac, 2);
                    let b = self.operands[in1].buffer.expect("gather input has a buffer");
                    let _ = writeln!(
                        body,
                        "{} = *(buf{}_data + {}_start + (int64_t) {});",
                        self.axis_access(out),
                        b,
                        self.name(in1),
                        self.axis_access(index)
                    );
                }
                TacClass::Scatter | TacClass::CondScatter => {
                    let out = self.tac_op(tac, 0);
                    let in1 = self.tac_op(tac, 1);
                    let index = self.tac_op(tac, 2);
                    let b = self.operands[out].buffer.expect("scatter output has a buffer");
                    let store = format!(
                        "*(buf{}_data + {}_start + (int64_t) {}) = {};",
                        b,
                        self.name(out),
                        self.axis_access(index),
                        self.axis_access(in1)
                    );
                    if tac.class == TacClass::CondScatter {
                        let mask = self.tac_op(tac, 3);
                        let _ = writeln!(body, "if ({}) {{ {} }}", self.axis_access(mask), store);
                    } else {
                        let _ = writeln!(body, "{}", store);
                    }
                }
                TacClass::ReduceComplete | TacClass::ReducePartial => {
                    let out = self.tac_op(tac, 0);
                    let in1 = self.tac_op(tac, 1);
                    let combiner = self.combiner(tac)?;
                    let dtype = self.operands[in1].dtype;
                    let neutral = expr::neutral_element(combiner, dtype)?;
                    let _ = writeln!(prolog, "{} acc{} = {};", expr::ctype(dtype), t, neutral);
                    let e = expr::op_expr(
                        combiner,
                        dtype,
                        &format!("acc{}", t),
                        &self.axis_access(in1),
                    )?;
                    let _ = writeln!(body, "acc{} = {};", t, e);
                    if tac.class == TacClass::ReduceComplete {
                        let fold = expr::synced_fold(
                            combiner,
                            dtype,
                            &format!("acc{}_shar", t),
                            &format!("acc{}", t),
                        )?;
                        let _ = writeln!(epilog, "{}", fold);
                    } else {
                        let _ = writeln!(epilog, "*{} = acc{};", self.name(out), t);
                    }
                }
                TacClass::Scan => {
                    let out = self.tac_op(tac, 0);
                    let in1 = self.tac_op(tac, 1);
                    let combiner = self.combiner(tac)?;
                    let dtype = self.operands[in1].dtype;
                    let neutral = expr::neutral_element(combiner, dtype)?;
                    let _ = writeln!(prolog, "{} acc{} = {};", expr::ctype(dtype), t, neutral);
                    let e = expr::op_expr(
                        combiner,
                        dtype,
                        &format!("acc{}", t),
                        &self.axis_access(in1),
                    )?;
                    let _ = writeln!(body, "acc{} = {};", t, e);
                    let _ = writeln!(body, "{} = acc{};", self.axis_access(out), t);
                }
            }
        }

        // write elementwise scalar results back to memory
        let mut written = BTreeSet::new();
        for tac in &self.tacs {
            if !matches!(tac.class, TacClass::Map | TacClass::Zip | TacClass::Generate) {
                continue;
            }
            let out = self.tac_op(tac, 0);
            if self.operands[out].layout == Layout::Scalar && written.insert(out) {
                let b = self.operands[out].buffer.expect("scalar operand has a buffer");
                let _ = writeln!(
                    epilog,
                    "*(buf{}_data + {}_start) = {};",
                    b,
                    self.name(out),
                    self.name(out)
                );
            }
        }
        Ok(())
    }

    fn combiner(&self, tac: &Tac) -> Result<Opcode, EngineError> {
        tac.opcode.sweep_combiner().ok_or_else(|| {
            EngineError::with_info(ErrorKind::UnknownOperator, tac.opcode.to_string())
        })
    }

    /// `reduction(...)` clauses of the SIMD loop, one per private
    /// accumulator whose combiner the clause supports.
    fn simd_reduction_annotation(&self) -> String {
        let mut out = String::new();
        for (t, tac) in self.tacs.iter().enumerate() {
            if !matches!(tac.class, TacClass::ReduceComplete | TacClass::ReducePartial) {
                continue;
            }
            if let Some(token) = tac.opcode.sweep_combiner().and_then(expr::reduction_token) {
                let _ = write!(out, " reduction({}:acc{})", token, t);
            }
        }
        out
    }

    fn has_accumulation(&self) -> bool {
        self.tacs.iter().any(|t| {
            matches!(
                t.class,
                TacClass::ReduceComplete | TacClass::ReducePartial | TacClass::Scan
            )
        })
    }

    fn has_scan(&self) -> bool {
        self.tacs.iter().any(|t| t.class == TacClass::Scan)
    }

    /// Generate the kernel source for this block.
    pub fn generate_source(&self) -> Result<String, EngineError> {
        if self.tacs.is_empty() {
            return Err(EngineError::with_info(
                ErrorKind::UnknownOperator,
                "no array operations in block",
            ));
        }
        let symbol = self.symbol();
        let mut src = String::new();
        let _ = writeln!(src, "// MODE: {}", if self.tacs.len() > 1 { "FUSED" } else { "SIJ" });
        let _ = writeln!(src, "// LAYOUT: {}", self.iterspace.layout);
        let _ = writeln!(src, "// NINSTR: {}", self.tacs.len());
        let _ = writeln!(src, "// SYMBOL_TEXT: {}", self.symbol_text());
        let _ = writeln!(src, "// SYMBOL: {}", symbol);
        src.push_str(
            "#include <assert.h>\n\
             #include <complex.h>\n\
             #include <float.h>\n\
             #include <math.h>\n\
             #include <stdbool.h>\n\
             #include <stdint.h>\n\
             #include <ndfuse_krnl.h>\n\n",
        );
        let _ = writeln!(src, "#define CHUNKSIZE {}\n", self.chunk_size);
        let _ = writeln!(
            src,
            "void {}(kp_buffer **buffers, kp_operand **args, kp_iterspace *iterspace)\n{{",
            symbol
        );

        // HEAD
        self.unpack_iterspace(&mut src);
        self.unpack_buffers(&mut src);
        self.unpack_operands(&mut src);
        for (t, tac) in self.tacs.iter().enumerate() {
            if tac.class == TacClass::ReduceComplete {
                let in1 = self.tac_op(tac, 1);
                let dtype = self.operands[in1].dtype;
                let neutral = expr::neutral_element(self.combiner(tac)?, dtype)?;
                let _ = writeln!(
                    src,
                    "\n    {} acc{}_shar = {};",
                    expr::ctype(dtype),
                    t,
                    neutral
                );
            }
        }

        // BODY
        let mut prolog = String::new();
        let mut body = String::new();
        let mut epilog = String::new();
        self.declare_init_operands(&mut prolog);
        self.emit_operations(&mut prolog, &mut body, &mut epilog)?;
        src.push('\n');
        src.push_str(&self.loop_nest(&prolog, &body, &epilog));

        // FOOT
        for (t, tac) in self.tacs.iter().enumerate() {
            if tac.class == TacClass::ReduceComplete {
                let out = self.tac_op(tac, 0);
                let b = self.operands[out].buffer.expect("reduce output has a buffer");
                let _ = writeln!(
                    src,
                    "    *(buf{}_data + {}_start) = acc{}_shar;",
                    b,
                    self.name(out),
                    t
                );
            }
        }
        let _ = writeln!(src, "}}");
        Ok(src)
    }

    /// Wrap the code block in the loop structure the block calls for.
    fn loop_nest(&self, prolog: &str, body: &str, epilog: &str) -> String {
        let ndim = self.iterspace.ndim();
        let axis = self.iterspace.axis;
        let scalar = matches!(
            self.iterspace.layout,
            Layout::Scalar | Layout::ScalarConst | Layout::Contractable
        ) && !self.has_accumulation();

        if scalar {
            // no loop at all
            return format!("    {{\n{}{}{}    }}\n", prolog, body, epilog);
        }

        if ndim == 1 && !self.has_scan() {
            // parallel outer loop over chunks, vectorised inner loop
            let mut out = String::new();
            out.push_str("    #pragma omp parallel\n    {\n");
            out.push_str(prolog);
            out.push_str("    #pragma omp for schedule(static)\n");
            let _ = writeln!(
                out,
                "    for (int64_t idx0_chunked = 0; idx0_chunked < iterspace_shape_d0; \
                 idx0_chunked += CHUNKSIZE) {{"
            );
            let _ = writeln!(
                out,
                "        const int64_t idx0_chunked_bound = iterspace_shape_d0 < \
                 (idx0_chunked + CHUNKSIZE) ? iterspace_shape_d0 : (idx0_chunked + CHUNKSIZE);"
            );
            let _ = writeln!(out, "        #pragma omp simd{}", self.simd_reduction_annotation());
            let _ = writeln!(
                out,
                "        for (int64_t idx0 = idx0_chunked; idx0 < idx0_chunked_bound; ++idx0) {{"
            );
            out.push_str(body);
            out.push_str("        }\n    }\n");
            out.push_str(epilog);
            out.push_str("    }\n");
            return out;
        }

        // nested mode: vectorised axis loop innermost, outer ranks wrapped
        // outward, parallel-for on the outermost; a scan axis is never
        // vectorised
        let mut nest = String::new();
        nest.push_str(prolog);
        if !self.has_scan() {
            let _ = writeln!(nest, "#pragma omp simd{}", self.simd_reduction_annotation());
        }
        let _ = writeln!(
            nest,
            "for (int64_t idx{axis} = 0; idx{axis} < iterspace_shape_d{axis}; ++idx{axis}) {{"
        );
        nest.push_str(body);
        nest.push_str("}\n");
        nest.push_str(epilog);

        let outer_axes: Vec<usize> = (0..ndim).rev().filter(|&a| a != axis).collect();
        for (i, &a) in outer_axes.iter().enumerate() {
            let mut wrapped = String::new();
            if i + 1 == outer_axes.len() {
                wrapped.push_str("#pragma omp parallel for schedule(static)");
                if ndim > 2 {
                    let _ = write!(wrapped, " collapse({})", ndim - 1);
                }
                wrapped.push('\n');
            }
            let _ = writeln!(
                wrapped,
                "for (int64_t idx{a} = 0; idx{a} < iterspace_shape_d{a}; ++idx{a}) {{"
            );
            wrapped.push_str(&nest);
            wrapped.push_str("}\n");
            nest = wrapped;
        }
        nest
    }
}

fn classify_tac(instr: &Instruction) -> Result<TacClass, EngineError> {
    let op = instr.opcode;
    if op.is_binary() {
        Ok(TacClass::Zip)
    } else if op.is_unary() {
        Ok(TacClass::Map)
    } else if op.is_generator() {
        Ok(TacClass::Generate)
    } else if op.is_reduction() {
        if instr.operands[0].nelements() == 1 {
            Ok(TacClass::ReduceComplete)
        } else {
            Ok(TacClass::ReducePartial)
        }
    } else if op.is_accumulate() {
        Ok(TacClass::Scan)
    } else {
        match op {
            Opcode::Gather => Ok(TacClass::Gather),
            Opcode::Scatter => Ok(TacClass::Scatter),
            Opcode::CondScatter => Ok(TacClass::CondScatter),
            _ => Err(EngineError::with_info(ErrorKind::UnknownOperator, op.to_string())),
        }
    }
}

fn collect_lifetimes(
    blocks: &BlockArena,
    id: BlockId,
    news: &mut BTreeSet<BaseId>,
    frees: &mut BTreeSet<BaseId>,
) {
    if let BlockKind::Loop(ref l) = blocks.get(id).kind {
        news.extend(l.news.iter().copied());
        frees.extend(l.frees.iter().copied());
        for &child in &l.children {
            collect_lifetimes(blocks, child, news, frees);
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
