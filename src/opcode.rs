// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The deferred instruction set.
//!
//! Every classification the fusion engine and the emitter need is answered
//! by a method here; no virtual dispatch happens on the emit path.

use std::fmt;

/// Opcode of a deferred instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Elementwise, binary
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Mod,
    Maximum,
    Minimum,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Arctan2,
    // Elementwise, unary
    Identity,
    Absolute,
    Sqrt,
    Exp,
    Exp2,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Arcsin,
    Arccos,
    Arctan,
    Arcsinh,
    Arccosh,
    Arctanh,
    Floor,
    Ceil,
    Rint,
    Trunc,
    Sign,
    Invert,
    LogicalNot,
    Isnan,
    Isinf,
    Real,
    Imag,
    // Generators
    Range,
    Random,
    // Reductions
    AddReduce,
    MultiplyReduce,
    MinimumReduce,
    MaximumReduce,
    BitwiseAndReduce,
    BitwiseOrReduce,
    BitwiseXorReduce,
    LogicalAndReduce,
    LogicalOrReduce,
    LogicalXorReduce,
    // Scans
    AddAccumulate,
    MultiplyAccumulate,
    // Data movement
    Gather,
    Scatter,
    CondScatter,
    // System
    Sync,
    Free,
    Discard,
    // User-registered extension operation
    Extension(u16),
}

impl Opcode {
    /// Elementwise map over one or two inputs, one output element per index.
    pub fn is_elementwise(self) -> bool {
        self.is_binary() || self.is_unary()
    }

    /// Binary elementwise opcodes.
    pub fn is_binary(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add | Subtract
                | Multiply
                | Divide
                | Power
                | Mod
                | Maximum
                | Minimum
                | BitwiseAnd
                | BitwiseOr
                | BitwiseXor
                | LeftShift
                | RightShift
                | LogicalAnd
                | LogicalOr
                | LogicalXor
                | Equal
                | NotEqual
                | Greater
                | GreaterEqual
                | Less
                | LessEqual
                | Arctan2
        )
    }

    /// Unary elementwise opcodes.
    pub fn is_unary(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Identity
                | Absolute
                | Sqrt
                | Exp
                | Exp2
                | Expm1
                | Log
                | Log2
                | Log10
                | Log1p
                | Sin
                | Cos
                | Tan
                | Sinh
                | Cosh
                | Tanh
                | Arcsin
                | Arccos
                | Arctan
                | Arcsinh
                | Arccosh
                | Arctanh
                | Floor
                | Ceil
                | Rint
                | Trunc
                | Sign
                | Invert
                | LogicalNot
                | Isnan
                | Isinf
                | Real
                | Imag
        )
    }

    /// Reductions collapse the sweep axis into the combining operator.
    pub fn is_reduction(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            AddReduce
                | MultiplyReduce
                | MinimumReduce
                | MaximumReduce
                | BitwiseAndReduce
                | BitwiseOrReduce
                | BitwiseXorReduce
                | LogicalAndReduce
                | LogicalOrReduce
                | LogicalXorReduce
        )
    }

    /// Scans keep the sweep axis and write every partial result.
    pub fn is_accumulate(self) -> bool {
        matches!(self, Opcode::AddAccumulate | Opcode::MultiplyAccumulate)
    }

    /// A sweep is either a reduction or a scan; both carry a sweep axis in
    /// the instruction constant.
    pub fn is_sweep(self) -> bool {
        self.is_reduction() || self.is_accumulate()
    }

    pub fn is_system(self) -> bool {
        matches!(self, Opcode::Sync | Opcode::Free | Opcode::Discard)
    }

    /// Generators produce output from the iteration index alone.
    pub fn is_generator(self) -> bool {
        matches!(self, Opcode::Range | Opcode::Random)
    }

    /// The elementwise combining operator behind a sweep.
    pub fn sweep_combiner(self) -> Option<Opcode> {
        use Opcode::*;
        match self {
            AddReduce | AddAccumulate => Some(Add),
            MultiplyReduce | MultiplyAccumulate => Some(Multiply),
            MinimumReduce => Some(Minimum),
            MaximumReduce => Some(Maximum),
            BitwiseAndReduce => Some(BitwiseAnd),
            BitwiseOrReduce => Some(BitwiseOr),
            BitwiseXorReduce => Some(BitwiseXor),
            LogicalAndReduce => Some(LogicalAnd),
            LogicalOrReduce => Some(LogicalOr),
            LogicalXorReduce => Some(LogicalXor),
            _ => None,
        }
    }

    /// Number of operands of the closed opcodes (output included); extension
    /// opcodes carry their own operand count in the instruction.
    pub fn num_operands(self) -> Option<usize> {
        use Opcode::*;
        match self {
            op if op.is_binary() => Some(3),
            op if op.is_unary() => Some(2),
            op if op.is_sweep() => Some(3),
            Range => Some(1),
            Random => Some(3),
            Gather => Some(3),
            Scatter => Some(3),
            CondScatter => Some(4),
            Sync | Free | Discard => Some(1),
            Extension(_) => None,
            _ => unreachable!(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Opcode::Extension(id) => write!(f, "EXT_METHOD({})", id),
            op => write!(f, "{:?}", op),
        }
    }
}
