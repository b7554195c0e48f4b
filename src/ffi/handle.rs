//! Plumbing shared by every exported function: boxing handles, checking
//! pointers, and keeping panics on the Rust side.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use crate::error::{panic_message, Result, Status};
use crate::ffi::error::TSERVE_Error;

/// Move `value` to the heap and hand ownership to the caller.
pub(crate) fn into_raw<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}

/// Take back ownership of a handle and drop it. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or come from [`into_raw`] and not have been released.
pub(crate) unsafe fn release<T>(ptr: *mut T) {
    if !ptr.is_null() {
        // SAFETY: upheld by the caller.
        drop(unsafe { Box::from_raw(ptr) });
    }
}

/// Run an exported function body, turning its outcome into an error handle.
pub(crate) fn guard(body: impl FnOnce() -> Result<()>) -> *mut TSERVE_Error {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => ptr::null_mut(),
        Ok(Err(status)) => TSERVE_Error::into_handle(status),
        Err(panic) => TSERVE_Error::into_handle(Status::internal(format!(
            "panic in C API call: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

/// Like [`guard`] for accessors that cannot report an error.
pub(crate) fn guard_or<T>(fallback: T, body: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(body)).unwrap_or(fallback)
}

/// # Safety
///
/// `ptr` must be null or point to a live `T`.
pub(crate) unsafe fn handle_ref<'a, T>(ptr: *const T, what: &str) -> Result<&'a T> {
    // SAFETY: upheld by the caller.
    unsafe { ptr.as_ref() }.ok_or_else(|| null_arg(what))
}

/// # Safety
///
/// `ptr` must be null or point to a live `T` not aliased elsewhere.
pub(crate) unsafe fn handle_mut<'a, T>(ptr: *mut T, what: &str) -> Result<&'a mut T> {
    // SAFETY: upheld by the caller.
    unsafe { ptr.as_mut() }.ok_or_else(|| null_arg(what))
}

/// Write `value` through a caller-supplied out-parameter.
///
/// # Safety
///
/// `out` must be null or valid for writes.
pub(crate) unsafe fn write_out<T>(out: *mut T, what: &str, value: T) -> Result<()> {
    if out.is_null() {
        return Err(null_arg(what));
    }
    // SAFETY: checked non-null, validity upheld by the caller.
    unsafe { out.write(value) };
    Ok(())
}

/// Box `value` and hand the handle out through `out`. Nothing is allocated
/// when `out` is null.
///
/// # Safety
///
/// `out` must be null or valid for writes.
pub(crate) unsafe fn write_handle<T>(out: *mut *mut T, what: &str, value: T) -> Result<()> {
    if out.is_null() {
        return Err(null_arg(what));
    }
    // SAFETY: checked non-null, validity upheld by the caller.
    unsafe { out.write(into_raw(value)) };
    Ok(())
}

/// Write a `(base, byte_size)` pair. Neither is written unless both are
/// non-null.
///
/// # Safety
///
/// `base` and `byte_size` must each be null or valid for writes.
pub(crate) unsafe fn write_buffer<T>(
    base: *mut *const T,
    byte_size: *mut usize,
    data: &[u8],
) -> Result<()> {
    if base.is_null() {
        return Err(null_arg("base out-parameter"));
    }
    if byte_size.is_null() {
        return Err(null_arg("byte size out-parameter"));
    }
    // SAFETY: both checked non-null, validity upheld by the caller.
    unsafe {
        base.write(data.as_ptr().cast::<T>());
        byte_size.write(data.len());
    }
    Ok(())
}

/// Borrow a NUL-terminated UTF-8 argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(null_arg(what));
    }
    // SAFETY: checked non-null, termination upheld by the caller.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| Status::invalid_arg(format!("{what} is not valid UTF-8: {e}")))
}

/// Borrow a `(base, byte_size)` argument. A null base is accepted only with
/// a zero size.
///
/// # Safety
///
/// A non-null `base` must be valid for reads of `byte_size` bytes for `'a`.
pub(crate) unsafe fn bytes_arg<'a>(base: *const c_void, byte_size: usize, what: &str) -> Result<&'a [u8]> {
    if base.is_null() {
        if byte_size == 0 {
            return Ok(&[]);
        }
        return Err(null_arg(what));
    }
    // SAFETY: checked non-null, extent upheld by the caller.
    Ok(unsafe { std::slice::from_raw_parts(base.cast::<u8>(), byte_size) })
}

fn null_arg(what: &str) -> Status {
    Status::invalid_arg(format!("{what} must not be null"))
}
