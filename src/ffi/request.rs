//! Request providers and inference responses.

use std::ffi::{c_char, c_void};

use crate::error::Status;
use crate::ffi::error::{TSERVE_Error, TSERVE_Message};
use crate::ffi::handle::{
    bytes_arg, guard, handle_mut, handle_ref, release, str_arg, write_buffer, write_handle,
};
use crate::protocol::WireMessage;
use crate::provider::RequestProvider;
use crate::server::InferResponse;

/// A request under construction: model selector, header and input buffers.
pub struct TSERVE_InferenceRequestProvider {
    pub(crate) provider: RequestProvider,
}

/// Create a request provider. A negative `model_version` selects the latest
/// ready version.
///
/// # Safety
///
/// `provider` must be valid for writes, `model_name` NUL-terminated and
/// `request_header_base` valid for `request_header_byte_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceRequestProviderNew(
    provider: *mut *mut TSERVE_InferenceRequestProvider,
    model_name: *const c_char,
    model_version: i64,
    request_header_base: *const c_void,
    request_header_byte_size: usize,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe {
            let model_name = str_arg(model_name, "model name")?;
            let header = bytes_arg(request_header_base, request_header_byte_size, "request header")?;
            let created = RequestProvider::new(model_name, model_version, header)?;
            write_handle(
                provider,
                "provider out-parameter",
                TSERVE_InferenceRequestProvider { provider: created },
            )
        }
    })
}

/// Release a provider. Input buffers stay owned by the caller.
///
/// # Safety
///
/// `provider` must be null or a provider handle not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceRequestProviderDelete(
    provider: *mut TSERVE_InferenceRequestProvider,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe { release(provider) };
        Ok(())
    })
}

/// Append a buffer to `input_name`. The buffer is referenced, not copied,
/// and must stay valid until the submitting call returns.
///
/// # Safety
///
/// `provider` must be a live provider handle, `input_name` NUL-terminated
/// and `base` valid for `byte_size` bytes until submission returns.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceRequestProviderSetInputData(
    provider: *mut TSERVE_InferenceRequestProvider,
    input_name: *const c_char,
    base: *const c_void,
    byte_size: usize,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let (provider, input_name) = unsafe {
            (
                handle_mut(provider, "request provider")?,
                str_arg(input_name, "input name")?,
            )
        };
        if base.is_null() && byte_size > 0 {
            return Err(Status::invalid_arg(format!(
                "input '{input_name}' has a null base with non-zero byte size"
            )));
        }
        provider
            .provider
            .set_input_data(input_name, base.cast::<u8>(), byte_size);
        Ok(())
    })
}

/// The result of one accepted submission.
pub struct TSERVE_InferenceResponse {
    pub(crate) response: InferResponse,
}

/// # Safety
///
/// `response` must be null or a response handle not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceResponseDelete(
    response: *mut TSERVE_InferenceResponse,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe { release(response) };
        Ok(())
    })
}

/// Null when execution succeeded, otherwise a new error describing why it
/// failed.
///
/// # Safety
///
/// `response` must be a live response handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceResponseStatus(
    response: *const TSERVE_InferenceResponse,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let response = unsafe { handle_ref(response, "response") }?;
        response.response.status()
    })
}

/// Serialize the response header. Fails with the execution status if
/// execution failed.
///
/// # Safety
///
/// `response` must be a live response handle and `header` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceResponseHeader(
    response: *const TSERVE_InferenceResponse,
    header: *mut *mut TSERVE_Message,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let response = unsafe { handle_ref(response, "response") }?;
        let bytes = response.response.header()?.to_bytes()?;
        // SAFETY: upheld by the caller.
        unsafe { write_handle(header, "header out-parameter", TSERVE_Message::new(bytes)) }
    })
}

/// Contents of output `name`, valid until the response is deleted.
///
/// # Safety
///
/// `response` must be a live response handle, `name` NUL-terminated and
/// `base`/`byte_size` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_InferenceResponseOutputData(
    response: *const TSERVE_InferenceResponse,
    name: *const c_char,
    base: *mut *const c_void,
    byte_size: *mut usize,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let (response, name) = unsafe {
            (
                handle_ref(response, "response")?,
                str_arg(name, "output name")?,
            )
        };
        let data = response.response.output_data(name)?;
        // SAFETY: upheld by the caller.
        unsafe { write_buffer(base, byte_size, data) }
    })
}
