// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Inline constants.
//!
//! An instruction carries at most one inline constant. Sweeps use it for the
//! sweep axis; elementwise instructions use it for scalar literals that have
//! no backing base.

use std::fmt;

use num_complex::Complex;
use num_traits::ToPrimitive;

use crate::base::DType;
use crate::opcode::Opcode;

/// A typed scalar payload, tagged with its [`DType`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Constant {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Complex64(Complex<f32>),
    Complex128(Complex<f64>),
    /// Counter-based PRNG state of a `Random` instruction: the stream start
    /// and the key, consumed as the instruction's two constant inputs.
    Random123 { start: u64, key: u64 },
}

impl Constant {
    pub fn dtype(&self) -> DType {
        use Constant::*;
        match *self {
            Bool(_) => DType::Bool,
            Int8(_) => DType::Int8,
            Int16(_) => DType::Int16,
            Int32(_) => DType::Int32,
            Int64(_) => DType::Int64,
            UInt8(_) => DType::UInt8,
            UInt16(_) => DType::UInt16,
            UInt32(_) => DType::UInt32,
            UInt64(_) => DType::UInt64,
            Float32(_) => DType::Float32,
            Float64(_) => DType::Float64,
            Complex64(_) => DType::Complex64,
            Complex128(_) => DType::Complex128,
            Random123 { .. } => DType::UInt64,
        }
    }

    /// The payload as an `i64`, if the type has an integral reading.
    pub fn as_i64(&self) -> Option<i64> {
        use Constant::*;
        match *self {
            Bool(v) => Some(v as i64),
            Int8(v) => v.to_i64(),
            Int16(v) => v.to_i64(),
            Int32(v) => v.to_i64(),
            Int64(v) => Some(v),
            UInt8(v) => v.to_i64(),
            UInt16(v) => v.to_i64(),
            UInt32(v) => v.to_i64(),
            UInt64(v) => v.to_i64(),
            Float32(_) | Float64(_) | Complex64(_) | Complex128(_) | Random123 { .. } => None,
        }
    }

    /// Interpret the constant as a sweep axis.
    pub fn axis(&self) -> Option<usize> {
        self.as_i64().and_then(|v| v.to_usize())
    }

    /// The identity value of the sweep with combining operator `op` on
    /// element type `dtype`, or `None` when the pair has no identity.
    pub fn sweep_identity(op: Opcode, dtype: DType) -> Option<Constant> {
        use DType::*;
        use Opcode::*;
        match op {
            Add | LogicalOr | LogicalXor | BitwiseOr | BitwiseXor => Some(Constant::zero(dtype)),
            Multiply | LogicalAnd => Some(Constant::one(dtype)),
            Maximum => Some(match dtype {
                Bool => Constant::Bool(false),
                Int8 => Constant::Int8(i8::MIN),
                Int16 => Constant::Int16(i16::MIN),
                Int32 => Constant::Int32(i32::MIN),
                Int64 => Constant::Int64(i64::MIN),
                UInt8 => Constant::UInt8(0),
                UInt16 => Constant::UInt16(0),
                UInt32 => Constant::UInt32(0),
                UInt64 => Constant::UInt64(0),
                Float32 => Constant::Float32(f32::MIN),
                Float64 => Constant::Float64(f64::MIN),
                Complex64 | Complex128 => return None,
            }),
            Minimum => Some(match dtype {
                Bool => Constant::Bool(true),
                Int8 => Constant::Int8(i8::MAX),
                Int16 => Constant::Int16(i16::MAX),
                Int32 => Constant::Int32(i32::MAX),
                Int64 => Constant::Int64(i64::MAX),
                UInt8 => Constant::UInt8(u8::MAX),
                UInt16 => Constant::UInt16(u16::MAX),
                UInt32 => Constant::UInt32(u32::MAX),
                UInt64 => Constant::UInt64(u64::MAX),
                Float32 => Constant::Float32(f32::MAX),
                Float64 => Constant::Float64(f64::MAX),
                Complex64 | Complex128 => return None,
            }),
            BitwiseAnd => Some(match dtype {
                Bool => Constant::Bool(true),
                Int8 => Constant::Int8(-1),
                Int16 => Constant::Int16(-1),
                Int32 => Constant::Int32(-1),
                Int64 => Constant::Int64(-1),
                UInt8 => Constant::UInt8(u8::MAX),
                UInt16 => Constant::UInt16(u16::MAX),
                UInt32 => Constant::UInt32(u32::MAX),
                UInt64 => Constant::UInt64(u64::MAX),
                _ => return None,
            }),
            _ => None,
        }
    }

    fn zero(dtype: DType) -> Constant {
        use DType::*;
        match dtype {
            Bool => Constant::Bool(false),
            Int8 => Constant::Int8(0),
            Int16 => Constant::Int16(0),
            Int32 => Constant::Int32(0),
            Int64 => Constant::Int64(0),
            UInt8 => Constant::UInt8(0),
            UInt16 => Constant::UInt16(0),
            UInt32 => Constant::UInt32(0),
            UInt64 => Constant::UInt64(0),
            Float32 => Constant::Float32(0.),
            Float64 => Constant::Float64(0.),
            Complex64 => Constant::Complex64(Complex::new(0., 0.)),
            Complex128 => Constant::Complex128(Complex::new(0., 0.)),
        }
    }

    fn one(dtype: DType) -> Constant {
        use DType::*;
        match dtype {
            Bool => Constant::Bool(true),
            Int8 => Constant::Int8(1),
            Int16 => Constant::Int16(1),
            Int32 => Constant::Int32(1),
            Int64 => Constant::Int64(1),
            UInt8 => Constant::UInt8(1),
            UInt16 => Constant::UInt16(1),
            UInt32 => Constant::UInt32(1),
            UInt64 => Constant::UInt64(1),
            Float32 => Constant::Float32(1.),
            Float64 => Constant::Float64(1.),
            Complex64 => Constant::Complex64(Complex::new(1., 0.)),
            Complex128 => Constant::Complex128(Complex::new(1., 0.)),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Constant::*;
        match *self {
            Bool(v) => write!(f, "{}", v),
            Int8(v) => write!(f, "{}", v),
            Int16(v) => write!(f, "{}", v),
            Int32(v) => write!(f, "{}", v),
            Int64(v) => write!(f, "{}", v),
            UInt8(v) => write!(f, "{}", v),
            UInt16(v) => write!(f, "{}", v),
            UInt32(v) => write!(f, "{}", v),
            UInt64(v) => write!(f, "{}", v),
            Float32(v) => write!(f, "{}", v),
            Float64(v) => write!(f, "{}", v),
            Complex64(v) => write!(f, "({}+{}i)", v.re, v.im),
            Complex128(v) => write!(f, "({}+{}i)", v.re, v.im),
            Random123 { start, key } => write!(f, "r123({}, {})", start, key),
        }
    }
}
