//! Error objects and serialized-message holders.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use crate::error::{Code, Status};
use crate::ffi::handle::{guard, guard_or, handle_ref, into_raw, release, str_arg, write_buffer};

/// Failure codes. Success is never a code: it is a null error handle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TSERVE_Error_Code {
    TSERVE_ERROR_UNKNOWN = 0,
    TSERVE_ERROR_INTERNAL = 1,
    TSERVE_ERROR_NOT_FOUND = 2,
    TSERVE_ERROR_INVALID_ARG = 3,
    TSERVE_ERROR_UNAVAILABLE = 4,
    TSERVE_ERROR_UNSUPPORTED = 5,
    TSERVE_ERROR_ALREADY_EXISTS = 6,
}

impl From<Code> for TSERVE_Error_Code {
    fn from(code: Code) -> Self {
        match code {
            Code::Success | Code::Unknown => TSERVE_Error_Code::TSERVE_ERROR_UNKNOWN,
            Code::Internal => TSERVE_Error_Code::TSERVE_ERROR_INTERNAL,
            Code::NotFound => TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND,
            Code::InvalidArg => TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG,
            Code::Unavailable => TSERVE_Error_Code::TSERVE_ERROR_UNAVAILABLE,
            Code::Unsupported => TSERVE_Error_Code::TSERVE_ERROR_UNSUPPORTED,
            Code::AlreadyExists => TSERVE_Error_Code::TSERVE_ERROR_ALREADY_EXISTS,
        }
    }
}

impl From<TSERVE_Error_Code> for Code {
    fn from(code: TSERVE_Error_Code) -> Self {
        match code {
            TSERVE_Error_Code::TSERVE_ERROR_UNKNOWN => Code::Unknown,
            TSERVE_Error_Code::TSERVE_ERROR_INTERNAL => Code::Internal,
            TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND => Code::NotFound,
            TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG => Code::InvalidArg,
            TSERVE_Error_Code::TSERVE_ERROR_UNAVAILABLE => Code::Unavailable,
            TSERVE_Error_Code::TSERVE_ERROR_UNSUPPORTED => Code::Unsupported,
            TSERVE_Error_Code::TSERVE_ERROR_ALREADY_EXISTS => Code::AlreadyExists,
        }
    }
}

impl TSERVE_Error_Code {
    fn name(self) -> &'static CStr {
        match self {
            TSERVE_Error_Code::TSERVE_ERROR_UNKNOWN => c"UNKNOWN",
            TSERVE_Error_Code::TSERVE_ERROR_INTERNAL => c"INTERNAL",
            TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND => c"NOT_FOUND",
            TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG => c"INVALID_ARG",
            TSERVE_Error_Code::TSERVE_ERROR_UNAVAILABLE => c"UNAVAILABLE",
            TSERVE_Error_Code::TSERVE_ERROR_UNSUPPORTED => c"UNSUPPORTED",
            TSERVE_Error_Code::TSERVE_ERROR_ALREADY_EXISTS => c"ALREADY_EXISTS",
        }
    }
}

/// An immutable failure: code plus message.
pub struct TSERVE_Error {
    status: Status,
    message: CString,
}

impl TSERVE_Error {
    pub(crate) fn new(status: Status) -> Self {
        let message = CString::new(status.message().replace('\0', " ")).unwrap_or_default();
        Self { status, message }
    }

    pub(crate) fn into_handle(status: Status) -> *mut TSERVE_Error {
        into_raw(Self::new(status))
    }

    /// Null for success, a new error handle otherwise.
    pub(crate) fn from_result(result: crate::error::Result<()>) -> *mut TSERVE_Error {
        match result {
            Ok(()) => ptr::null_mut(),
            Err(status) => Self::into_handle(status),
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }
}

/// Create an error. Returns null when `code` maps to no failure, which
/// cannot happen for the defined codes; `msg` may be null.
///
/// # Safety
///
/// `msg` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ErrorNew(
    code: TSERVE_Error_Code,
    msg: *const c_char,
) -> *mut TSERVE_Error {
    guard_or(ptr::null_mut(), || {
        let message = if msg.is_null() {
            String::new()
        } else {
            // SAFETY: upheld by the caller.
            unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
        };
        match Status::create(code.into(), message) {
            Some(status) => TSERVE_Error::into_handle(status),
            None => ptr::null_mut(),
        }
    })
}

/// # Safety
///
/// `error` must be null or an error handle not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ErrorDelete(error: *mut TSERVE_Error) {
    // SAFETY: upheld by the caller.
    guard_or((), || unsafe { release(error) })
}

/// # Safety
///
/// `error` must be null or a live error handle. Null yields UNKNOWN.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ErrorCode(error: *const TSERVE_Error) -> TSERVE_Error_Code {
    // SAFETY: upheld by the caller.
    match unsafe { error.as_ref() } {
        Some(error) => error.status.code().into(),
        None => TSERVE_Error_Code::TSERVE_ERROR_UNKNOWN,
    }
}

/// Static name of the error code, e.g. `"NOT_FOUND"`.
///
/// # Safety
///
/// `error` must be null or a live error handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ErrorCodeString(error: *const TSERVE_Error) -> *const c_char {
    // SAFETY: upheld by the caller.
    unsafe { TSERVE_ErrorCode(error) }.name().as_ptr()
}

/// Message of the error, valid until the error is deleted. Null for a null
/// handle.
///
/// # Safety
///
/// `error` must be null or a live error handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ErrorMessage(error: *const TSERVE_Error) -> *const c_char {
    // SAFETY: upheld by the caller.
    match unsafe { error.as_ref() } {
        Some(error) => error.message.as_ptr(),
        None => ptr::null(),
    }
}

/// A snapshot of serialized bytes.
pub struct TSERVE_Message {
    bytes: Vec<u8>,
}

impl TSERVE_Message {
    pub(crate) fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Expose the serialized bytes, valid until the message is deleted.
///
/// # Safety
///
/// `message` must be null or a live message handle; `base` and `byte_size`
/// must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_MessageSerialize(
    message: *const TSERVE_Message,
    base: *mut *const c_char,
    byte_size: *mut usize,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let message = unsafe { handle_ref(message, "message") }?;
        // SAFETY: upheld by the caller.
        unsafe { write_buffer(base, byte_size, &message.bytes) }
    })
}

/// # Safety
///
/// `message` must be null or a message handle not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_MessageDelete(message: *mut TSERVE_Message) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    guard(|| {
        unsafe { release(message) };
        Ok(())
    })
}

/// Read a C-string argument, used by the other handle modules.
///
/// # Safety
///
/// See [`str_arg`].
pub(crate) unsafe fn owned_str_arg(ptr: *const c_char, what: &str) -> crate::error::Result<String> {
    // SAFETY: upheld by the caller.
    unsafe { str_arg(ptr, what) }.map(str::to_string)
}
