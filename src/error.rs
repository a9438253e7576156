// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::error::Error;
use std::fmt;

/// An error raised by the execution-engine core.
///
/// The error encodes an [`ErrorKind`] plus, for some kinds, a short detail
/// string (the OS error of a failed allocation, the compiler's diagnostic,
/// the offending opcode); the detail shows up in the Display representation.
#[derive(Clone)]
pub struct EngineError {
    /// Error category
    repr: ErrorKind,
    /// Additional info
    info: Option<Box<str>>,
}

impl EngineError {
    /// Return the `ErrorKind` of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.repr
    }

    /// Create a new `EngineError` from the given kind
    pub fn from_kind(error: ErrorKind) -> Self {
        EngineError { repr: error, info: None }
    }

    pub(crate) fn with_info(repr: ErrorKind, info: impl Into<Box<str>>) -> Self {
        EngineError { repr, info: Some(info.into()) }
    }

    pub(crate) fn out_of_memory(errno: std::io::Error) -> Self {
        Self::with_info(ErrorKind::OutOfMemory, errno.to_string())
    }
}

/// Error code for an error raised by the execution-engine core.
///
/// This enumeration is not exhaustive. The representation of the enum
/// is not guaranteed.
#[non_exhaustive]
#[derive(Copy, Clone, Debug)]
pub enum ErrorKind {
    /// the OS refused a data-region allocation; fatal to the batch
    OutOfMemory = 1,
    /// shape product mismatch or non-reshapable instruction
    InvalidReshape,
    /// removing a sweep axis, transposing equal axes, out-of-range axis
    InvalidTransform,
    /// the emitter has no lowering for the opcode
    UnknownOperator,
    /// the emitter has no lowering for an operand layout
    UnsupportedLayout,
    /// the backend compiler returned a non-zero status
    CompileFailure,
    /// data access through a constant operand
    NullView,
    /// setting a data pointer on a base that already has one
    InvalidDataPointer,
}

#[inline(always)]
pub fn from_kind(error: ErrorKind) -> EngineError {
    EngineError::from_kind(error)
}

impl PartialEq for ErrorKind {
    #[inline(always)]
    fn eq(&self, rhs: &Self) -> bool {
        *self as u8 == *rhs as u8
    }
}

impl PartialEq for EngineError {
    #[inline(always)]
    fn eq(&self, rhs: &Self) -> bool {
        self.repr == rhs.repr
    }
}

impl Error for EngineError {}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self.kind() {
            ErrorKind::OutOfMemory => "could not allocate a data region",
            ErrorKind::InvalidReshape => "invalid reshape",
            ErrorKind::InvalidTransform => "invalid axis transform",
            ErrorKind::UnknownOperator => "no lowering for operator",
            ErrorKind::UnsupportedLayout => "no lowering for operand layout",
            ErrorKind::CompileFailure => "kernel compilation failed",
            ErrorKind::NullView => "data access through a constant operand",
            ErrorKind::InvalidDataPointer => "base already has a data pointer",
        };
        write!(f, "EngineError/{:?}: {}", self.kind(), description)?;
        if let Some(ref info) = self.info {
            write!(f, ": {}", info)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[test]
fn test_sizes() {
    use std::mem::size_of;
    assert!(size_of::<ErrorKind>() <= size_of::<u8>());
    assert!(size_of::<EngineError>() <= 24);
}

#[test]
fn test_display() {
    assert_eq!(
        EngineError::from_kind(ErrorKind::InvalidReshape).to_string(),
        "EngineError/InvalidReshape: invalid reshape"
    );
    assert_eq!(
        EngineError::with_info(ErrorKind::UnknownOperator, "Extension(7)").to_string(),
        "EngineError/UnknownOperator: no lowering for operator: Extension(7)"
    );
}
