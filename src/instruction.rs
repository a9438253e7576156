// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Deferred instructions: one opcode, an ordered operand list (output
//! first), and an optional inline constant.
//!
//! The shape rewrites here (`reshape`, `remove_axis`, `transpose`) preserve
//! instruction semantics; the scheduler uses them to bend every member of a
//! fusion group onto the group's dominating shape.

use std::collections::BTreeSet;
use std::fmt;

use crate::base::BaseId;
use crate::constant::Constant;
use crate::error::{EngineError, ErrorKind};
use crate::opcode::Opcode;
use crate::view::{self, View};

/// Index of an instruction in the submitted batch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub usize);

/// A single deferred operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Operands, output first. Constant operands are `View::constant()`
    /// markers; the payload is in `constant`.
    pub operands: Vec<View>,
    pub constant: Option<Constant>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<View>, constant: Option<Constant>) -> Instruction {
        debug_assert!(
            opcode.num_operands().map_or(true, |n| n == operands.len()),
            "operand count mismatch for {}",
            opcode
        );
        Instruction { opcode, operands, constant }
    }

    /// The non-constant operand views.
    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.operands.iter().filter(|v| !v.is_constant())
    }

    fn views_mut(&mut self) -> impl Iterator<Item = &mut View> {
        self.operands.iter_mut().filter(|v| !v.is_constant())
    }

    /// All bases referenced by the instruction.
    pub fn bases(&self) -> BTreeSet<BaseId> {
        self.views().filter_map(|v| v.base).collect()
    }

    /// The base the instruction writes, if it writes one.
    pub fn output_base(&self) -> Option<BaseId> {
        self.operands.first().and_then(|v| v.base)
    }

    pub fn is_contiguous(&self) -> bool {
        self.views().all(View::is_contiguous)
    }

    pub fn all_same_shape(&self) -> bool {
        let mut views = self.views();
        match views.next() {
            None => true,
            Some(first) => views.all(|v| view::same_shape(first, v)),
        }
    }

    /// Whether the in-place `reshape` rewrite is permitted.
    ///
    /// Instructions with differently shaped views cannot be meaningfully
    /// reshaped, and neither can non-contiguous or sweeping instructions,
    /// nor gather (its input has arbitrary shape).
    pub fn reshapable(&self) -> bool {
        self.all_same_shape()
            && self.is_contiguous()
            && !self.opcode.is_sweep()
            && self.opcode != Opcode::Gather
    }

    /// The intrinsic shape the instruction iterates over.
    ///
    /// For a sweep that is the input being swept, for gather the output,
    /// for scatter the index/input pair; otherwise the output.
    pub fn principal_shape(&self) -> &[usize] {
        if self.opcode.is_sweep() {
            &self.operands[1].shape
        } else if self.opcode == Opcode::Gather {
            &self.operands[0].shape
        } else if self.opcode == Opcode::Scatter || self.opcode == Opcode::CondScatter {
            &self.operands[2].shape
        } else if let Some(first) = self.operands.first() {
            &first.shape
        } else {
            &[]
        }
    }

    pub fn ndim(&self) -> usize {
        self.principal_shape().len()
    }

    /// The axis a sweep reduces or scans along.
    pub fn sweep_axis(&self) -> Option<usize> {
        if self.opcode.is_sweep() {
            self.constant.as_ref().and_then(Constant::axis)
        } else {
            None
        }
    }

    /// Reshape every view to `shape` with contiguous strides.
    ///
    /// Fails with `InvalidReshape` when the instruction is not
    /// [`reshapable`](Self::reshapable) or the element counts do not match.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<(), EngineError> {
        if !self.reshapable() {
            return Err(EngineError::with_info(
                ErrorKind::InvalidReshape,
                "instruction not reshapable",
            ));
        }
        let totalsize: usize = shape.iter().product();
        for v in self.views_mut() {
            if v.nelements() != totalsize {
                return Err(EngineError::with_info(ErrorKind::InvalidReshape, "shape mismatch"));
            }
        }
        for v in self.views_mut() {
            v.shape = shape.to_vec();
            v.stride = vec![0; shape.len()];
            v.set_contiguous_stride();
        }
        Ok(())
    }

    /// Force views onto `shape` for block construction.
    ///
    /// Views whose shape already matches are untouched; other views with a
    /// matching element count get `shape` and contiguous strides; views
    /// whose element count differs (a reduction output, say) are left alone.
    pub fn reshape_force(&mut self, shape: &[usize]) {
        let totalsize: usize = shape.iter().product();
        for v in self.views_mut() {
            if v.shape == shape {
                continue;
            }
            if v.nelements() == totalsize {
                v.shape = shape.to_vec();
                v.stride = vec![0; shape.len()];
                v.set_contiguous_stride();
            }
        }
    }

    /// Drop `axis` from every participating operand.
    ///
    /// Gather's index input and scatter's output keep their shapes. A sweep
    /// axis greater than `axis` shifts down by one; removing the sweep axis
    /// itself is an `InvalidTransform`.
    pub fn remove_axis(&mut self, axis: usize) -> Result<(), EngineError> {
        if axis >= self.ndim() {
            return Err(EngineError::with_info(ErrorKind::InvalidTransform, "axis out of range"));
        }
        if self.operands.is_empty() {
            return Ok(());
        }
        let sweep = self.sweep_axis();
        if sweep == Some(axis) {
            return Err(EngineError::with_info(
                ErrorKind::InvalidTransform,
                "cannot remove an axis that is swept",
            ));
        }
        for (o, v) in self.operands.iter_mut().enumerate().skip(1) {
            if v.is_constant() || (o == 2 && self.opcode == Opcode::Gather) {
                continue;
            }
            v.remove_axis(axis);
        }
        if let Some(sa) = sweep {
            if sa > axis {
                self.constant = Some(Constant::Int64(sa as i64 - 1));
            }
        }
        // Scatter's output is allowed any shape
        if self.opcode == Opcode::Scatter || self.opcode == Opcode::CondScatter {
            return Ok(());
        }
        let out_axis = match sweep {
            Some(sa) if self.opcode.is_reduction() => {
                if sa < axis {
                    axis - 1
                } else {
                    axis
                }
            }
            _ => axis,
        };
        if let Some(out) = self.operands.first_mut() {
            if !out.is_constant() {
                out.remove_axis(out_axis);
            }
        }
        Ok(())
    }

    /// Swap two axes of the instruction.
    ///
    /// A sweep on one of the swapped axes has its sweep constant rewritten
    /// to the other. The output of a reduction is rank-reduced, so swapping
    /// the reduced axis goes through an insert-axis / swap / remove-axis
    /// sequence that preserves the output rank.
    pub fn transpose(&mut self, mut ax1: usize, mut ax2: usize) -> Result<(), EngineError> {
        let nd = self.ndim();
        if ax1 >= nd || ax2 >= nd {
            return Err(EngineError::with_info(ErrorKind::InvalidTransform, "axis out of range"));
        }
        if ax1 == ax2 {
            return Err(EngineError::with_info(ErrorKind::InvalidTransform, "equal axes"));
        }
        if self.operands.is_empty() {
            return Ok(());
        }
        for (o, v) in self.operands.iter_mut().enumerate().skip(1) {
            if v.is_constant() || (o == 2 && self.opcode == Opcode::Gather) {
                continue;
            }
            v.transpose(ax1, ax2);
        }
        let sweep = self.sweep_axis();
        if sweep == Some(ax1) {
            self.constant = Some(Constant::Int64(ax2 as i64));
        } else if sweep == Some(ax2) {
            self.constant = Some(Constant::Int64(ax1 as i64));
        }
        // Scatter's output is allowed any shape and stride
        if self.opcode == Opcode::Scatter || self.opcode == Opcode::CondScatter {
            return Ok(());
        }
        let out = match self.operands.first_mut() {
            Some(v) if !v.is_constant() => v,
            _ => return Ok(()),
        };
        match sweep {
            Some(sa) if self.opcode.is_reduction() => {
                if sa != ax1 && sa != ax2 {
                    let t1 = if sa < ax1 { ax1 - 1 } else { ax1 };
                    let t2 = if sa < ax2 { ax2 - 1 } else { ax2 };
                    debug_assert_ne!(t1, t2);
                    out.transpose(t1, t2);
                } else {
                    // Swapping the reduced axis: insert a dummy dimension at
                    // it, transpose, and drop the dummy again.
                    if sa != ax1 {
                        std::mem::swap(&mut ax1, &mut ax2);
                    }
                    out.insert_axis(ax1, 1, 1);
                    out.transpose(ax1, ax2);
                    out.remove_axis(ax2);
                }
            }
            _ => out.transpose(ax1, ax2),
        }
        Ok(())
    }

    /// Reverse all axes by repeated pairwise transposes.
    pub fn reverse_axes(&mut self) -> Result<(), EngineError> {
        let nd = self.ndim();
        if self.operands.is_empty() || nd < 2 {
            return Ok(());
        }
        let mut lc = 0;
        let mut rc = nd - 1;
        while lc < rc {
            self.transpose(lc, rc)?;
            lc += 1;
            rc -= 1;
        }
        Ok(())
    }

    /// Whether the instructions must not be reordered: an operand of one
    /// aliases the output of the other, in either direction.
    pub fn depends_on(&self, other: &Instruction) -> bool {
        if self.operands.is_empty() || other.operands.is_empty() {
            return false;
        }
        for v in &self.operands {
            if !view::disjoint(&other.operands[0], v) {
                return true;
            }
        }
        for v in &other.operands {
            if !view::disjoint(&self.operands[0], v) {
                return true;
            }
        }
        false
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for v in &self.operands {
            if v.is_constant() {
                match self.constant {
                    Some(ref c) => write!(f, " {}", c)?,
                    None => write!(f, " CONST")?,
                }
            } else {
                write!(f, " {}", v)?;
            }
        }
        Ok(())
    }
}
