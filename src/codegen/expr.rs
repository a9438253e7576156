// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The textual operator catalogue: C spellings of element types, operator
//! expressions, neutral elements and the synchronised fold forms.
//!
//! Everything here is plain text; the backend owns the compiler that gives
//! it meaning.

use crate::base::DType;
use crate::constant::Constant;
use crate::error::{EngineError, ErrorKind};
use crate::opcode::Opcode;

/// The C spelling of an element type.
pub fn ctype(dtype: DType) -> &'static str {
    use DType::*;
    match dtype {
        Bool => "bool",
        Int8 => "int8_t",
        Int16 => "int16_t",
        Int32 => "int32_t",
        Int64 => "int64_t",
        UInt8 => "uint8_t",
        UInt16 => "uint16_t",
        UInt32 => "uint32_t",
        UInt64 => "uint64_t",
        Float32 => "float",
        Float64 => "double",
        Complex64 => "float complex",
        Complex128 => "double complex",
    }
}

/// A constant payload as a C literal.
pub fn literal(c: &Constant) -> String {
    use Constant::*;
    match *c {
        Bool(v) => (if v { "true" } else { "false" }).to_string(),
        Int8(v) => v.to_string(),
        Int16(v) => v.to_string(),
        Int32(v) => v.to_string(),
        Int64(v) => format!("{}LL", v),
        UInt8(v) => v.to_string(),
        UInt16(v) => v.to_string(),
        UInt32(v) => format!("{}U", v),
        UInt64(v) => format!("{}ULL", v),
        Float32(v) => format!("{:?}f", v),
        Float64(v) => format!("{:?}", v),
        Complex64(v) => format!("({:?}f + {:?}f*I)", v.re, v.im),
        Complex128(v) => format!("({:?} + {:?}*I)", v.re, v.im),
        Random123 { start, key } => format!("{}ULL, {}ULL", start, key),
    }
}

fn unknown(op: Opcode) -> EngineError {
    EngineError::with_info(ErrorKind::UnknownOperator, op.to_string())
}

/// The neutral element of the combining operator `op` on `dtype`, as
/// literal text.
pub fn neutral_element(op: Opcode, dtype: DType) -> Result<&'static str, EngineError> {
    use DType::*;
    use Opcode::*;
    Ok(match op {
        Add | LogicalOr | LogicalXor | BitwiseOr | BitwiseXor => "0",
        Multiply | LogicalAnd => "1",
        Maximum => match dtype {
            Bool => "0",
            Int8 => "INT8_MIN",
            Int16 => "INT16_MIN",
            Int32 => "INT32_MIN",
            Int64 => "INT64_MIN",
            UInt8 | UInt16 | UInt32 | UInt64 => "0",
            Float32 => "-FLT_MAX",
            Float64 => "-DBL_MAX",
            Complex64 | Complex128 => return Err(unknown(op)),
        },
        Minimum => match dtype {
            Bool => "1",
            Int8 => "INT8_MAX",
            Int16 => "INT16_MAX",
            Int32 => "INT32_MAX",
            Int64 => "INT64_MAX",
            UInt8 => "UINT8_MAX",
            UInt16 => "UINT16_MAX",
            UInt32 => "UINT32_MAX",
            UInt64 => "UINT64_MAX",
            Float32 => "FLT_MAX",
            Float64 => "DBL_MAX",
            Complex64 | Complex128 => return Err(unknown(op)),
        },
        BitwiseAnd => match dtype {
            Bool => "1",
            Int8 | Int16 | Int32 | Int64 => "-1",
            UInt8 => "UINT8_MAX",
            UInt16 => "UINT16_MAX",
            UInt32 => "UINT32_MAX",
            UInt64 => "UINT64_MAX",
            _ => return Err(unknown(op)),
        },
        _ => return Err(unknown(op)),
    })
}

/// Apply a libm function, picking the real or the complex spelling.
fn call1(dtype: DType, real: &str, c64: &str, c128: &str, in1: &str) -> String {
    let name = match dtype {
        DType::Complex64 => c64,
        DType::Complex128 => c128,
        _ => real,
    };
    format!("{}({})", name, in1)
}

/// The C expression of applying `op` on `dtype` to `in1` (and `in2` for
/// binary operators).
pub fn op_expr(op: Opcode, dtype: DType, in1: &str, in2: &str) -> Result<String, EngineError> {
    use DType::*;
    use Opcode::*;
    Ok(match op {
        Add => format!("({} + {})", in1, in2),
        Subtract => format!("({} - {})", in1, in2),
        Multiply => format!("({} * {})", in1, in2),
        Divide => format!("({} / {})", in1, in2),
        Mod => match dtype {
            Float32 => format!("fmodf({}, {})", in1, in2),
            Float64 => format!("fmod({}, {})", in1, in2),
            _ => format!("({} % {})", in1, in2),
        },
        Power => match dtype {
            Complex64 => format!("cpowf({}, {})", in1, in2),
            Complex128 => format!("cpow({}, {})", in1, in2),
            _ => format!("pow({}, {})", in1, in2),
        },
        Maximum => format!("({0} > {1} ? {0} : {1})", in1, in2),
        Minimum => format!("({0} < {1} ? {0} : {1})", in1, in2),
        BitwiseAnd => format!("({} & {})", in1, in2),
        BitwiseOr => format!("({} | {})", in1, in2),
        BitwiseXor => format!("({} ^ {})", in1, in2),
        LeftShift => format!("({} << {})", in1, in2),
        RightShift => format!("({} >> {})", in1, in2),
        LogicalAnd => format!("({} && {})", in1, in2),
        LogicalOr => format!("({} || {})", in1, in2),
        LogicalXor => format!("(!!{} != !!{})", in1, in2),
        Equal => format!("({} == {})", in1, in2),
        NotEqual => format!("({} != {})", in1, in2),
        Greater => format!("({} > {})", in1, in2),
        GreaterEqual => format!("({} >= {})", in1, in2),
        Less => format!("({} < {})", in1, in2),
        LessEqual => format!("({} <= {})", in1, in2),
        Arctan2 => format!("atan2({}, {})", in1, in2),
        Identity => in1.to_string(),
        Absolute => match dtype {
            Complex64 => format!("cabsf({})", in1),
            Complex128 => format!("cabs({})", in1),
            Float32 | Float64 => format!("fabs({})", in1),
            Bool => in1.to_string(),
            _ => format!("({0} < 0 ? -{0} : {0})", in1),
        },
        Sqrt => call1(dtype, "sqrt", "csqrtf", "csqrt", in1),
        Exp => call1(dtype, "exp", "cexpf", "cexp", in1),
        Exp2 => call1(dtype, "exp2", "cexp2f", "cexp2", in1),
        Expm1 => format!("expm1({})", in1),
        Log => call1(dtype, "log", "clogf", "clog", in1),
        Log2 => format!("log2({})", in1),
        Log10 => call1(dtype, "log10", "clog10f", "clog10", in1),
        Log1p => format!("log1p({})", in1),
        Sin => call1(dtype, "sin", "csinf", "csin", in1),
        Cos => call1(dtype, "cos", "ccosf", "ccos", in1),
        Tan => call1(dtype, "tan", "ctanf", "ctan", in1),
        Sinh => call1(dtype, "sinh", "csinhf", "csinh", in1),
        Cosh => call1(dtype, "cosh", "ccoshf", "ccosh", in1),
        Tanh => call1(dtype, "tanh", "ctanhf", "ctanh", in1),
        Arcsin => call1(dtype, "asin", "casinf", "casin", in1),
        Arccos => call1(dtype, "acos", "cacosf", "cacos", in1),
        Arctan => call1(dtype, "atan", "catanf", "catan", in1),
        Arcsinh => call1(dtype, "asinh", "casinhf", "casinh", in1),
        Arccosh => call1(dtype, "acosh", "cacoshf", "cacosh", in1),
        Arctanh => call1(dtype, "atanh", "catanhf", "catanh", in1),
        Floor => format!("floor({})", in1),
        Ceil => format!("ceil({})", in1),
        Rint => format!("rint({})", in1),
        Trunc => format!("trunc({})", in1),
        Sign => match dtype {
            Complex64 => format!("({0} / (cabsf({0}) + ({0} == 0)))", in1),
            Complex128 => format!("({0} / (cabs({0}) + ({0} == 0)))", in1),
            _ => format!("(({0} > 0) - ({0} < 0))", in1),
        },
        Invert => match dtype {
            Bool => format!("(!{})", in1),
            _ => format!("(~{})", in1),
        },
        LogicalNot => format!("(!{})", in1),
        Isnan => format!("isnan({})", in1),
        Isinf => format!("isinf({})", in1),
        Real => match dtype {
            Float32 => format!("crealf({})", in1),
            _ => format!("creal({})", in1),
        },
        Imag => match dtype {
            Float32 => format!("cimagf({})", in1),
            _ => format!("cimag({})", in1),
        },
        _ => return Err(unknown(op)),
    })
}

/// The bare C token of a combining operator, for `x = x op e` atomic forms.
fn combine_token(op: Opcode) -> Option<&'static str> {
    use Opcode::*;
    match op {
        Add => Some("+"),
        Multiply => Some("*"),
        BitwiseAnd => Some("&"),
        BitwiseOr => Some("|"),
        BitwiseXor => Some("^"),
        _ => None,
    }
}

/// The OpenMP reduction-clause token of a combining operator, when the
/// clause supports it.
pub fn reduction_token(op: Opcode) -> Option<&'static str> {
    use Opcode::*;
    match op {
        Add => Some("+"),
        Multiply => Some("*"),
        LogicalAnd => Some("&&"),
        BitwiseAnd => Some("&"),
        LogicalOr => Some("||"),
        BitwiseOr => Some("|"),
        _ => None,
    }
}

/// Fold `value` into the shared accumulator `out` under the required
/// synchronisation: a named critical section for order-insensitive compares
/// and logicals and for all complex types, an atomic update otherwise.
pub fn synced_fold(
    op: Opcode,
    dtype: DType,
    out: &str,
    value: &str,
) -> Result<String, EngineError> {
    use Opcode::*;
    let critical = matches!(op, Maximum | Minimum | LogicalAnd | LogicalOr | LogicalXor)
        || dtype.is_complex();
    if critical {
        let expr = op_expr(op, dtype, out, value)?;
        Ok(format!(
            "#pragma omp critical(accusync)\n{{ {} = {}; }}",
            out, expr
        ))
    } else {
        match combine_token(op) {
            Some(token) => Ok(format!(
                "#pragma omp atomic\n{} = {} {} {};",
                out, out, token, value
            )),
            None => Err(unknown(op)),
        }
    }
}
