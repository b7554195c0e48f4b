//! Server options and server handles, including asynchronous inference.

use std::ffi::{c_char, c_void, CString};
use std::path::PathBuf;

use crate::config::ServerOptions;
use crate::error::Status;
use crate::ffi::error::{owned_str_arg, TSERVE_Error, TSERVE_Message};
use crate::ffi::handle::{
    guard, handle_mut, handle_ref, into_raw, release, str_arg, write_handle, write_out,
};
use crate::ffi::request::{TSERVE_InferenceRequestProvider, TSERVE_InferenceResponse};
use crate::protocol::WireMessage;
use crate::server::{InferResponse, InferenceServer};

/// Startup parameters, copied into the server at creation.
pub struct TSERVE_ServerOptions {
    pub(crate) options: ServerOptions,
}

/// # Safety
///
/// `options` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsNew(
    options: *mut *mut TSERVE_ServerOptions,
) -> *mut TSERVE_Error {
    guard(|| {
        let created = TSERVE_ServerOptions {
            options: ServerOptions::default(),
        };
        // SAFETY: upheld by the caller.
        unsafe { write_handle(options, "options out-parameter", created) }
    })
}

/// # Safety
///
/// `options` must be null or an options handle not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsDelete(
    options: *mut TSERVE_ServerOptions,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe { release(options) };
        Ok(())
    })
}

/// Apply `update` to a live options handle.
unsafe fn with_options(
    options: *mut TSERVE_ServerOptions,
    update: impl FnOnce(&mut ServerOptions) -> crate::error::Result<()>,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the exported caller.
        let options = unsafe { handle_mut(options, "server options") }?;
        update(&mut options.options)
    })
}

/// Set the model repository path. Not validated until server creation.
///
/// # Safety
///
/// `options` must be a live options handle and `path` NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetModelRepositoryPath(
    options: *mut TSERVE_ServerOptions,
    path: *const c_char,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            o.set_model_repository_path(PathBuf::from(owned_str_arg(path, "model repository path")?));
            Ok(())
        })
    }
}

/// Set the server id reported in status. Empty generates one.
///
/// # Safety
///
/// `options` must be a live options handle and `server_id` NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetServerId(
    options: *mut TSERVE_ServerOptions,
    server_id: *const c_char,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            o.server_id = owned_str_arg(server_id, "server id")?;
            Ok(())
        })
    }
}

/// # Safety
///
/// `options` must be a live options handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetStrictReadiness(
    options: *mut TSERVE_ServerOptions,
    strict: bool,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            o.strict_readiness = strict;
            Ok(())
        })
    }
}

/// # Safety
///
/// `options` must be a live options handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetExitTimeout(
    options: *mut TSERVE_ServerOptions,
    timeout_secs: u64,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            o.exit_timeout_secs = timeout_secs;
            Ok(())
        })
    }
}

/// # Safety
///
/// `options` must be a live options handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetMetrics(
    options: *mut TSERVE_ServerOptions,
    metrics: bool,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            o.metrics = metrics;
            Ok(())
        })
    }
}

/// Engine worker threads; 0 uses one per core.
///
/// # Safety
///
/// `options` must be a live options handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetWorkerThreads(
    options: *mut TSERVE_ServerOptions,
    worker_threads: usize,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            o.worker_threads = worker_threads;
            Ok(())
        })
    }
}

/// Per-model queue depth. Must be positive.
///
/// # Safety
///
/// `options` must be a live options handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerOptionsSetQueueCapacity(
    options: *mut TSERVE_ServerOptions,
    queue_capacity: usize,
) -> *mut TSERVE_Error {
    // SAFETY: upheld by the caller.
    unsafe {
        with_options(options, |o| {
            if queue_capacity == 0 {
                return Err(Status::invalid_arg("queue capacity must be positive"));
            }
            o.queue_capacity = queue_capacity;
            Ok(())
        })
    }
}

/// A running inference server.
pub struct TSERVE_Server {
    server: InferenceServer,
    id: CString,
}

/// Completion callback: receives the server, a response the callee now
/// owns, and the user context given to `TSERVE_ServerInferAsync`.
pub type TSERVE_InferenceCompleteFn = Option<
    unsafe extern "C" fn(
        server: *mut TSERVE_Server,
        response: *mut TSERVE_InferenceResponse,
        userp: *mut c_void,
    ),
>;

/// Create a server and load its model repository.
///
/// # Safety
///
/// `server` must be valid for writes and `options` a live options handle.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerNew(
    server: *mut *mut TSERVE_Server,
    options: *const TSERVE_ServerOptions,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let options = unsafe { handle_ref(options, "server options") }?;
        let created = InferenceServer::new(options.options.clone()).map_err(|e| {
            Status::invalid_arg(format!(
                "failed to initialize inference server: {}",
                e.message()
            ))
        })?;
        let id = CString::new(created.id().replace('\0', " ")).unwrap_or_default();
        // SAFETY: upheld by the caller.
        unsafe {
            write_handle(
                server,
                "server out-parameter",
                TSERVE_Server {
                    server: created,
                    id,
                },
            )
        }
    })
}

/// Stop the server, waiting up to the exit timeout for in-flight
/// callbacks, and release it. Null is a no-op.
///
/// # Safety
///
/// `server` must be null or a server handle not yet deleted.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerDelete(server: *mut TSERVE_Server) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        if let Some(handle) = unsafe { server.as_ref() } {
            handle.server.stop();
        }
        // SAFETY: upheld by the caller.
        unsafe { release(server) };
        Ok(())
    })
}

/// # Safety
///
/// `server` must be a live server handle and `live` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerIsLive(
    server: *const TSERVE_Server,
    live: *mut bool,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe {
            let server = handle_ref(server, "server")?;
            write_out(live, "live out-parameter", server.server.is_live())
        }
    })
}

/// # Safety
///
/// `server` must be a live server handle and `ready` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerIsReady(
    server: *const TSERVE_Server,
    ready: *mut bool,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe {
            let server = handle_ref(server, "server")?;
            write_out(ready, "ready out-parameter", server.server.is_ready())
        }
    })
}

/// Serialized status of every model.
///
/// # Safety
///
/// `server` must be a live server handle and `status` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerStatus(
    server: *const TSERVE_Server,
    status: *mut *mut TSERVE_Message,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let server = unsafe { handle_ref(server, "server") }?;
        let bytes = server.server.status(None)?.to_bytes()?;
        // SAFETY: upheld by the caller.
        unsafe { write_handle(status, "status out-parameter", TSERVE_Message::new(bytes)) }
    })
}

/// Serialized status of one model.
///
/// # Safety
///
/// `server` must be a live server handle, `model_name` NUL-terminated and
/// `status` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerModelStatus(
    server: *const TSERVE_Server,
    model_name: *const c_char,
    status: *mut *mut TSERVE_Message,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let (server, model_name) = unsafe {
            (
                handle_ref(server, "server")?,
                str_arg(model_name, "model name")?,
            )
        };
        let bytes = server.server.status(Some(model_name))?.to_bytes()?;
        // SAFETY: upheld by the caller.
        unsafe { write_handle(status, "status out-parameter", TSERVE_Message::new(bytes)) }
    })
}

/// Prometheus text exposition. `UNSUPPORTED` when metrics are disabled.
///
/// # Safety
///
/// `server` must be a live server handle and `metrics` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerMetrics(
    server: *const TSERVE_Server,
    metrics: *mut *mut TSERVE_Message,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let server = unsafe { handle_ref(server, "server") }?;
        let text = server.server.metrics_text()?;
        // SAFETY: upheld by the caller.
        unsafe {
            write_handle(
                metrics,
                "metrics out-parameter",
                TSERVE_Message::new(text.into_bytes()),
            )
        }
    })
}

/// Server id, valid until the server is deleted.
///
/// # Safety
///
/// `server` must be a live server handle and `id` valid for writes.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerId(
    server: *const TSERVE_Server,
    id: *mut *const c_char,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        unsafe {
            let server = handle_ref(server, "server")?;
            write_out(id, "id out-parameter", server.id.as_ptr())
        }
    })
}

/// Everything the completion path hands back to C.
struct Completion {
    server: *mut TSERVE_Server,
    complete: unsafe extern "C" fn(*mut TSERVE_Server, *mut TSERVE_InferenceResponse, *mut c_void),
    userp: *mut c_void,
}

// SAFETY: the pointers are only handed back to the caller's callback; the
// caller guarantees they may be used from an engine thread.
unsafe impl Send for Completion {}

impl Completion {
    fn deliver(self, response: InferResponse) {
        let response = into_raw(TSERVE_InferenceResponse { response });
        // SAFETY: the callback contract is upheld by the submitting caller.
        unsafe { (self.complete)(self.server, response, self.userp) };
    }
}

/// Validate, assemble and queue a request. On success `complete` runs
/// exactly once on an engine thread; on error it never runs. Input buffers
/// only need to stay valid until this call returns.
///
/// # Safety
///
/// `server` and `request_provider` must be live handles, and every buffer
/// added to the provider must be readable for its byte size.
#[no_mangle]
pub unsafe extern "C" fn TSERVE_ServerInferAsync(
    server: *mut TSERVE_Server,
    request_provider: *const TSERVE_InferenceRequestProvider,
    complete: TSERVE_InferenceCompleteFn,
    userp: *mut c_void,
) -> *mut TSERVE_Error {
    guard(|| {
        // SAFETY: upheld by the caller.
        let (handle, provider) = unsafe {
            (
                handle_ref(server.cast_const(), "server")?,
                handle_ref(request_provider, "request provider")?,
            )
        };
        let complete =
            complete.ok_or_else(|| Status::invalid_arg("completion callback must not be null"))?;

        let completion = Completion {
            server,
            complete,
            userp,
        };
        // SAFETY: buffer validity upheld by the caller for the duration of this call.
        let request = unsafe { provider.provider.request() };
        handle
            .server
            .infer_async(request, move |response| completion.deliver(response))
    })
}
