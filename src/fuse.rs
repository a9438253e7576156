// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The fusion policy: a family of increasingly restrictive predicates that
//! decide whether two instructions may share a kernel.
//!
//! All predicates answer with booleans and never fail. Every model refines
//! `broadest`, which guarantees safe elementwise co-iteration: each operand
//! of one instruction is either disjoint from or aligned with the output of
//! the other.

use std::str::FromStr;

use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::view::{aligned, disjoint, View};

/// The fusion model in effect for a runtime.
///
/// Each model is at most as permissive as the one before it in its family;
/// the two families fork after [`NoXsweep`](FuseModel::NoXsweep) and
/// [`SameShape`](FuseModel::SameShape) respectively.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FuseModel {
    Broadest,
    NoXsweep,
    NoXsweepScalarSeparate,
    NoXsweepScalarSeparateShapeMatch,
    SameShape,
    SameShapeStreamCreduce,
    SameShapeStreamCreducePreduceOnce,
}

impl Default for FuseModel {
    fn default() -> FuseModel {
        FuseModel::Broadest
    }
}

impl FuseModel {
    pub fn name(self) -> &'static str {
        use FuseModel::*;
        match self {
            Broadest => "broadest",
            NoXsweep => "no_xsweep",
            NoXsweepScalarSeparate => "no_xsweep_scalar_separate",
            NoXsweepScalarSeparateShapeMatch => "no_xsweep_scalar_separate_shape_match",
            SameShape => "same_shape",
            SameShapeStreamCreduce => "same_shape_stream_creduce",
            SameShapeStreamCreducePreduceOnce => "same_shape_stream_creduce_preduce_once",
        }
    }

    const ALL: [FuseModel; 7] = [
        FuseModel::Broadest,
        FuseModel::NoXsweep,
        FuseModel::NoXsweepScalarSeparate,
        FuseModel::NoXsweepScalarSeparateShapeMatch,
        FuseModel::SameShape,
        FuseModel::SameShapeStreamCreduce,
        FuseModel::SameShapeStreamCreducePreduceOnce,
    ];
}

impl FromStr for FuseModel {
    type Err = ();

    /// Case-insensitive match on the model names.
    fn from_str(s: &str) -> Result<FuseModel, ()> {
        FuseModel::ALL
            .iter()
            .copied()
            .find(|m| s.eq_ignore_ascii_case(m.name()))
            .ok_or(())
    }
}

/// Whether `a` and `b` may legally share a kernel under `model`.
pub fn fusible(model: FuseModel, a: &Instruction, b: &Instruction) -> bool {
    use FuseModel::*;
    match model {
        Broadest => fuse_broadest(a, b),
        NoXsweep => fuse_no_xsweep(a, b),
        NoXsweepScalarSeparate => fuse_no_xsweep_scalar_separate(a, b),
        NoXsweepScalarSeparateShapeMatch => fuse_no_xsweep_scalar_separate_shape_match(a, b),
        SameShape => fuse_same_shape(a, b),
        SameShapeStreamCreduce => fuse_same_shape_stream_creduce(a, b),
        SameShapeStreamCreducePreduceOnce => fuse_same_shape_stream_creduce_preduce_once(a, b),
    }
}

fn fuse_broadest(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    let co_iterable = |x: &Instruction, y: &Instruction| {
        let out = match y.operands.first() {
            Some(out) => out,
            None => return true,
        };
        x.operands.iter().all(|v| disjoint(out, v) || aligned(out, v))
    };
    co_iterable(a, b) && co_iterable(b, a)
}

/// Two sweeps of the same input rank but different sweep axes must not share
/// a kernel.
fn fuse_no_xsweep(a: &Instruction, b: &Instruction) -> bool {
    fuse_broadest(a, b)
        && !(a.opcode.is_sweep()
            && b.opcode.is_sweep()
            && a.operands[1].ndim() == b.operands[1].ndim()
            && a.sweep_axis() != b.sweep_axis())
}

fn scalar_output(i: &Instruction) -> bool {
    match i.operands.first() {
        Some(out) => out.is_scalar() || (i.opcode.is_accumulate() && out.ndim() == 1),
        None => false,
    }
}

/// Scalars and non-scalars don't mix. System opcodes stay always-fusible so
/// the model remains a refinement of the ones above it.
fn fuse_no_xsweep_scalar_separate(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    fuse_no_xsweep(a, b) && scalar_output(a) == scalar_output(b)
}

/// Inner dimensions of the pre-sweep operands must match.
fn fuse_no_xsweep_scalar_separate_shape_match(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    let va = if a.opcode.is_sweep() { &a.operands[1] } else { &a.operands[0] };
    let vb = if b.opcode.is_sweep() { &b.operands[1] } else { &b.operands[0] };
    let ndim = va.ndim().min(vb.ndim());
    for i in 1..=ndim {
        if va.shape[va.ndim() - i] != vb.shape[vb.ndim() - i] {
            return false;
        }
    }
    fuse_no_xsweep_scalar_separate(a, b)
}

fn operands_match_shape(i: &Instruction, shape: &[usize], skip_output: bool) -> bool {
    i.operands
        .iter()
        .skip(skip_output as usize)
        .filter(|v| !v.is_constant())
        .all(|v| v.shape == shape)
}

/// Only elementwise instructions, and all non-constant operands share a
/// single shape.
fn fuse_same_shape(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    if !a.opcode.is_elementwise() || !b.opcode.is_elementwise() {
        return false;
    }
    let shape = &a.operands[0].shape;
    if !operands_match_shape(a, shape, true) || !operands_match_shape(b, shape, false) {
        return false;
    }
    fuse_broadest(a, b)
}

fn stream_accepts(op: Opcode) -> bool {
    op == Opcode::Range || op == Opcode::Random || op.is_elementwise() || op.is_reduction()
}

fn consumes_output_of(consumer: &Instruction, producer: &Instruction) -> bool {
    let out = match producer.output_base() {
        Some(out) => out,
        None => return false,
    };
    consumer.views().any(|v| v.base == Some(out))
}

fn is_scalar_view(v: &View) -> bool {
    v.ndim() == 1 && v.shape[0] == 1
}

/// Streaming with complete reductions: at most one reduction per kernel; the
/// non-reduction side must match the reduction's input shape and must not
/// consume its result.
fn fuse_same_shape_stream_creduce(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    if !stream_accepts(a.opcode) || !stream_accepts(b.opcode) {
        return false;
    }
    let a_red = a.opcode.is_reduction();
    let b_red = b.opcode.is_reduction();
    if a_red && b_red {
        return false;
    } else if a_red || b_red {
        let (reduction, other) = if a_red { (a, b) } else { (b, a) };
        if consumes_output_of(other, reduction) {
            log::debug!("stream_creduce: rejecting, consumes the reduce result");
            return false;
        }
        let red_shape = &reduction.operands[1].shape;
        for v in other.views() {
            if &v.shape != red_shape {
                log::debug!("stream_creduce: rejecting, shape differs from reduce input");
                return false;
            }
        }
    } else {
        // elementwise/generator on both sides; check both directions so the
        // predicate stays symmetric when exactly one output is scalar
        let ab = is_scalar_view(&a.operands[0])
            || operands_match_shape(b, &a.operands[0].shape, false);
        let ba = is_scalar_view(&b.operands[0])
            || operands_match_shape(a, &b.operands[0].shape, false);
        if !(ab && ba) {
            log::debug!("stream_creduce: rejecting, shape mismatch");
            return false;
        }
    }
    fuse_broadest(a, b)
}

/// As `stream_creduce`, but the non-reduction side is compared against the
/// reduction's *output* shape when it consumes the reduce result.
fn fuse_same_shape_stream_creduce_preduce_once(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode.is_system() || b.opcode.is_system() {
        return true;
    }
    if !stream_accepts(a.opcode) || !stream_accepts(b.opcode) {
        return false;
    }
    let a_red = a.opcode.is_reduction();
    let b_red = b.opcode.is_reduction();
    if a_red && b_red {
        // TODO: allow multiple reductions sharing an input shape once the
        // emitter splits instructions around the reduction point
        return false;
    } else if a_red || b_red {
        let (reduction, other) = if a_red { (a, b) } else { (b, a) };
        let depends = consumes_output_of(other, reduction);
        // The non-reduction operands all share one shape, so comparing the
        // output operand is enough.
        let red_view = if depends { &reduction.operands[0] } else { &reduction.operands[1] };
        if red_view.ndim() != other.operands[0].ndim() {
            log::debug!("stream_creduce_preduce_once: rejecting because of ndim");
            return false;
        }
        if red_view.shape != other.operands[0].shape {
            log::debug!("stream_creduce_preduce_once: rejecting because of shape");
            return false;
        }
    } else {
        let ab = is_scalar_view(&a.operands[0])
            || operands_match_shape(b, &a.operands[0].shape, false);
        let ba = is_scalar_view(&b.operands[0])
            || operands_match_shape(a, &b.operands[0].shape, false);
        if !(ab && ba) {
            log::debug!("stream_creduce_preduce_once: rejecting because of shape");
            return false;
        }
    }
    fuse_broadest(a, b)
}
