// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The base-memory manager.
//!
//! Data regions are anonymous memory maps so `free` hands whole pages back
//! to the OS. Allocation is lazy: a base gets memory when the first kernel
//! that writes it runs, and zero-sized bases never allocate at all.

use std::io;
use std::ptr;

use crate::base::{Base, BaseArena, DataOrigin};
use crate::error::{from_kind, EngineError, ErrorKind};
use crate::view::View;

/// Allocate the data region of `base` if it has none.
///
/// Zero-sized bases stay unallocated. On failure the returned
/// `OutOfMemory` carries the OS error.
pub fn ensure_allocated(base: &mut Base) -> Result<(), EngineError> {
    if base.has_data() {
        return Ok(());
    }
    let bytes = base.nbytes();
    if bytes == 0 {
        // zero-sized bases are allowed
        return Ok(());
    }
    let data = unsafe {
        libc::mmap(
            ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if data == libc::MAP_FAILED {
        return Err(EngineError::out_of_memory(io::Error::last_os_error()));
    }
    base.set_data_ptr(data as *mut u8, DataOrigin::Mapped);
    Ok(())
}

/// Release the data region of `base` and null its pointer.
///
/// Freeing a base without data is a silent success. Externally provided
/// pointers are dropped but not unmapped; the provider owns them.
pub fn free(base: &mut Base) -> Result<(), EngineError> {
    if !base.has_data() {
        return Ok(());
    }
    if base.origin == DataOrigin::Mapped {
        let rc = unsafe { libc::munmap(base.data() as *mut libc::c_void, base.nbytes()) };
        if rc != 0 {
            log::error!(
                "could not release a data region: {}",
                io::Error::last_os_error()
            );
        }
    }
    base.set_data_ptr(ptr::null_mut(), DataOrigin::None);
    Ok(())
}

/// Hand an externally owned data pointer to the base behind `view`.
///
/// Valid only while the base has no data; setting over an existing pointer
/// is an `InvalidDataPointer` error, and constant views have no base to set
/// (`NullView`).
pub fn set_data(arena: &mut BaseArena, view: &View, data: *mut u8) -> Result<(), EngineError> {
    let id = view.base.ok_or_else(|| {
        EngineError::with_info(ErrorKind::NullView, "set_data on a constant operand")
    })?;
    let base = arena.get_mut(id);
    if base.has_data() && !data.is_null() {
        return Err(from_kind(ErrorKind::InvalidDataPointer));
    }
    let origin = if data.is_null() { DataOrigin::None } else { DataOrigin::External };
    base.set_data_ptr(data, origin);
    Ok(())
}

/// The data pointer of the base behind `view` (null until materialised).
pub fn get_data(arena: &BaseArena, view: &View) -> Result<*mut u8, EngineError> {
    let id = view.base.ok_or_else(|| {
        EngineError::with_info(ErrorKind::NullView, "get_data on a constant operand")
    })?;
    Ok(arena.get(id).data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::DType;

    #[test]
    fn allocate_and_free() {
        let mut arena = BaseArena::new();
        let id = arena.create(DType::Float64, 1024);
        ensure_allocated(arena.get_mut(id)).unwrap();
        assert!(arena.get(id).has_data());
        // idempotent
        let p = arena.get(id).data();
        ensure_allocated(arena.get_mut(id)).unwrap();
        assert_eq!(arena.get(id).data(), p);

        free(arena.get_mut(id)).unwrap();
        assert!(!arena.get(id).has_data());
        // double-free is a silent success
        free(arena.get_mut(id)).unwrap();
    }

    #[test]
    fn zero_sized_allocation() {
        let mut arena = BaseArena::new();
        let id = arena.create(DType::Int32, 0);
        ensure_allocated(arena.get_mut(id)).unwrap();
        assert!(!arena.get(id).has_data());
    }

    #[test]
    fn set_data_rules() {
        let mut arena = BaseArena::new();
        let id = arena.create(DType::Int32, 4);
        let view = View::whole_base(id, 4);
        let mut host = [0i32; 4];

        assert!(get_data(&arena, &view).unwrap().is_null());
        set_data(&mut arena, &view, host.as_mut_ptr() as *mut u8).unwrap();
        assert_eq!(get_data(&arena, &view).unwrap(), host.as_mut_ptr() as *mut u8);

        // a second pointer is refused
        let err = set_data(&mut arena, &view, host.as_mut_ptr() as *mut u8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDataPointer);

        // clearing is allowed, and external memory is not unmapped
        set_data(&mut arena, &view, std::ptr::null_mut()).unwrap();
        assert!(!arena.get(id).has_data());

        let constant = View::constant();
        assert_eq!(
            get_data(&arena, &constant).unwrap_err().kind(),
            ErrorKind::NullView
        );
    }
}
