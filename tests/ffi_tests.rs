//! End-to-end tests of the C surface.

mod common;

use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;

use tensor_serve::ffi::*;
use tensor_serve::protocol::{InferRequestHeader, InferResponseHeader, ServerStatus, WireMessage};
use tensor_serve::LATEST_VERSION;

use common::*;

type Completions = Mutex<mpsc::Sender<usize>>;

unsafe extern "C" fn send_response(
    _server: *mut TSERVE_Server,
    response: *mut TSERVE_InferenceResponse,
    userp: *mut c_void,
) {
    let tx = unsafe { &*userp.cast::<Completions>() };
    tx.lock().unwrap().send(response as usize).unwrap();
}

unsafe extern "C" fn slow_count(
    _server: *mut TSERVE_Server,
    response: *mut TSERVE_InferenceResponse,
    userp: *mut c_void,
) {
    thread::sleep(Duration::from_millis(200));
    let counter = unsafe { &*userp.cast::<AtomicUsize>() };
    counter.fetch_add(1, Ordering::SeqCst);
    unsafe { TSERVE_InferenceResponseDelete(response) };
}

struct DeleteOnce {
    deleted: AtomicBool,
    done: Completions,
}

unsafe extern "C" fn delete_server_once(
    server: *mut TSERVE_Server,
    response: *mut TSERVE_InferenceResponse,
    userp: *mut c_void,
) {
    let ctx = unsafe { &*userp.cast::<DeleteOnce>() };
    let status = unsafe { TSERVE_InferenceResponseStatus(response) };
    let failed = !status.is_null();
    unsafe {
        TSERVE_ErrorDelete(status);
        ok(TSERVE_InferenceResponseDelete(response));
    }
    if ctx.deleted.swap(true, Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    } else {
        unsafe { ok(TSERVE_ServerDelete(server)) };
    }
    ctx.done.lock().unwrap().send(usize::from(failed)).unwrap();
}

/// Code and message of `err`, releasing it. `None` for success.
fn take_error(err: *mut TSERVE_Error) -> Option<(TSERVE_Error_Code, String)> {
    if err.is_null() {
        return None;
    }
    unsafe {
        let code = TSERVE_ErrorCode(err);
        let message = CStr::from_ptr(TSERVE_ErrorMessage(err)).to_string_lossy().into_owned();
        TSERVE_ErrorDelete(err);
        Some((code, message))
    }
}

#[track_caller]
fn ok(err: *mut TSERVE_Error) {
    if let Some((code, message)) = take_error(err) {
        panic!("unexpected error {code:?}: {message}");
    }
}

#[track_caller]
fn expect_code(err: *mut TSERVE_Error, expected: TSERVE_Error_Code) -> String {
    let (code, message) = take_error(err).expect("expected an error");
    assert_eq!(code, expected, "{message}");
    message
}

fn message_bytes(message: *mut TSERVE_Message) -> Vec<u8> {
    let mut base = ptr::null();
    let mut size = 0usize;
    unsafe {
        ok(TSERVE_MessageSerialize(message, &mut base, &mut size));
        let bytes = std::slice::from_raw_parts(base.cast::<u8>(), size).to_vec();
        ok(TSERVE_MessageDelete(message));
        bytes
    }
}

fn new_server(repository: &std::path::Path, server_id: Option<&str>) -> *mut TSERVE_Server {
    let path = CString::new(repository.to_str().unwrap()).unwrap();
    let mut options = ptr::null_mut();
    let mut server = ptr::null_mut();
    unsafe {
        ok(TSERVE_ServerOptionsNew(&mut options));
        ok(TSERVE_ServerOptionsSetModelRepositoryPath(options, path.as_ptr()));
        ok(TSERVE_ServerOptionsSetExitTimeout(options, 5));
        if let Some(id) = server_id {
            let id = CString::new(id).unwrap();
            ok(TSERVE_ServerOptionsSetServerId(options, id.as_ptr()));
        }
        ok(TSERVE_ServerNew(&mut server, options));
        ok(TSERVE_ServerOptionsDelete(options));
    }
    server
}

fn new_provider(model: &str, version: i64, header: &InferRequestHeader) -> *mut TSERVE_InferenceRequestProvider {
    let model = CString::new(model).unwrap();
    let header = header.to_bytes().unwrap();
    let mut provider = ptr::null_mut();
    unsafe {
        ok(TSERVE_InferenceRequestProviderNew(
            &mut provider,
            model.as_ptr(),
            version,
            header.as_ptr().cast(),
            header.len(),
        ));
    }
    provider
}

fn set_input(provider: *mut TSERVE_InferenceRequestProvider, name: &str, data: &[u8]) {
    let name = CString::new(name).unwrap();
    unsafe {
        ok(TSERVE_InferenceRequestProviderSetInputData(
            provider,
            name.as_ptr(),
            data.as_ptr().cast(),
            data.len(),
        ));
    }
}

fn output(response: *mut TSERVE_InferenceResponse, name: &str) -> Result<Vec<u8>, TSERVE_Error_Code> {
    let name = CString::new(name).unwrap();
    let mut base = ptr::null();
    let mut size = 0usize;
    let err = unsafe { TSERVE_InferenceResponseOutputData(response, name.as_ptr(), &mut base, &mut size) };
    match take_error(err) {
        Some((code, _)) => Err(code),
        None => Ok(unsafe { std::slice::from_raw_parts(base.cast::<u8>(), size) }.to_vec()),
    }
}

fn response_header(response: *mut TSERVE_InferenceResponse) -> InferResponseHeader {
    let mut header = ptr::null_mut();
    unsafe { ok(TSERVE_InferenceResponseHeader(response, &mut header)) };
    InferResponseHeader::from_bytes(&message_bytes(header)).unwrap()
}

/// Submit `provider` and wait for the response pointer.
fn submit(
    server: *mut TSERVE_Server,
    provider: *mut TSERVE_InferenceRequestProvider,
) -> *mut TSERVE_InferenceResponse {
    let (tx, rx) = mpsc::channel();
    let completions: Completions = Mutex::new(tx);
    let userp = (&completions as *const Completions).cast_mut().cast();
    unsafe { ok(TSERVE_ServerInferAsync(server, provider, Some(send_response), userp)) };
    let response = rx.recv_timeout(COMPLETION_TIMEOUT).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    response as *mut TSERVE_InferenceResponse
}

fn add_sub_header() -> InferRequestHeader {
    InferRequestHeader::new(1, ["INPUT0", "INPUT1"], ["OUTPUT0", "OUTPUT1"])
}

#[test]
fn test_simple_add_sub_flow() {
    let repo = simple_repository();
    let server = new_server(repo.path(), None);

    let mut live = false;
    let mut ready = false;
    unsafe {
        ok(TSERVE_ServerIsLive(server, &mut live));
        ok(TSERVE_ServerIsReady(server, &mut ready));
    }
    assert!(live && ready);

    let in0: Vec<i32> = (0..16).collect();
    let in1 = vec![1i32; 16];
    let (b0, b1) = (i32_bytes(&in0), i32_bytes(&in1));
    let provider = new_provider("simple", LATEST_VERSION, &add_sub_header());
    set_input(provider, "INPUT0", &b0);
    set_input(provider, "INPUT1", &b1);

    let response = submit(server, provider);
    unsafe { ok(TSERVE_InferenceRequestProviderDelete(provider)) };

    unsafe { ok(TSERVE_InferenceResponseStatus(response)) };
    let header = response_header(response);
    assert_eq!(header.model_name, "simple");
    assert_eq!(header.model_version, 1);

    let sum = i32_values(&output(response, "OUTPUT0").unwrap());
    let diff = i32_values(&output(response, "OUTPUT1").unwrap());
    for i in 0..16 {
        assert_eq!(sum[i], in0[i] + in1[i]);
        assert_eq!(diff[i], in0[i] - in1[i]);
    }

    unsafe {
        ok(TSERVE_InferenceResponseDelete(response));
        ok(TSERVE_ServerDelete(server));
    }
}

#[test]
fn test_input_in_multiple_chunks() {
    let repo = simple_repository();
    let server = new_server(repo.path(), None);

    let in0 = i32_bytes(&(0..16).collect::<Vec<_>>());
    let in1 = i32_bytes(&[10; 16]);
    let provider = new_provider("simple", 1, &add_sub_header());
    set_input(provider, "INPUT0", &in0[..24]);
    set_input(provider, "INPUT0", &in0[24..]);
    set_input(provider, "INPUT1", &in1);

    let response = submit(server, provider);
    unsafe { ok(TSERVE_InferenceResponseStatus(response)) };
    let sum = i32_values(&output(response, "OUTPUT0").unwrap());
    assert_eq!(sum, (10..26).collect::<Vec<i32>>());

    unsafe {
        ok(TSERVE_InferenceResponseDelete(response));
        ok(TSERVE_InferenceRequestProviderDelete(provider));
        ok(TSERVE_ServerDelete(server));
    }
}

#[test]
fn test_malformed_header_rejected() {
    let garbage = b"{not a header";
    let model = CString::new("simple").unwrap();
    let mut provider = ptr::null_mut();
    let err = unsafe {
        TSERVE_InferenceRequestProviderNew(
            &mut provider,
            model.as_ptr(),
            LATEST_VERSION,
            garbage.as_ptr().cast(),
            garbage.len(),
        )
    };
    expect_code(err, TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG);
    assert!(provider.is_null());
}

#[test]
fn test_synchronous_rejection_skips_callback() {
    let repo = simple_repository();
    let server = new_server(repo.path(), None);
    let b = i32_bytes(&[0; 16]);

    let (tx, rx) = mpsc::channel();
    let completions: Completions = Mutex::new(tx);
    let userp: *mut c_void = (&completions as *const Completions).cast_mut().cast();

    let unknown = new_provider("missing", LATEST_VERSION, &add_sub_header());
    set_input(unknown, "INPUT0", &b);
    set_input(unknown, "INPUT1", &b);
    let err = unsafe { TSERVE_ServerInferAsync(server, unknown, Some(send_response), userp) };
    expect_code(err, TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND);

    let short = new_provider("simple", LATEST_VERSION, &add_sub_header());
    set_input(short, "INPUT0", &b);
    set_input(short, "INPUT1", &b[..4]);
    let err = unsafe { TSERVE_ServerInferAsync(server, short, Some(send_response), userp) };
    expect_code(err, TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG);

    let err = unsafe { TSERVE_ServerInferAsync(server, short, None, userp) };
    let message = expect_code(err, TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG);
    assert!(message.contains("must not be null"));

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    unsafe {
        ok(TSERVE_InferenceRequestProviderDelete(unknown));
        ok(TSERVE_InferenceRequestProviderDelete(short));
        ok(TSERVE_ServerDelete(server));
    }
}

#[test]
fn test_unrequested_output_is_not_found() {
    let repo = simple_repository();
    let server = new_server(repo.path(), None);
    let b = i32_bytes(&[3; 16]);

    let header = InferRequestHeader::new(1, ["INPUT0", "INPUT1"], ["OUTPUT0"]);
    let provider = new_provider("simple", LATEST_VERSION, &header);
    set_input(provider, "INPUT0", &b);
    set_input(provider, "INPUT1", &b);
    let response = submit(server, provider);

    unsafe { ok(TSERVE_InferenceResponseStatus(response)) };
    let header = response_header(response);
    assert_eq!(header.output.len(), 1);
    assert_eq!(output(response, "OUTPUT0").unwrap(), i32_bytes(&[6; 16]));
    assert_eq!(output(response, "OUTPUT1"), Err(TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND));
    assert_eq!(output(response, "BOGUS"), Err(TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND));

    unsafe {
        ok(TSERVE_InferenceResponseDelete(response));
        ok(TSERVE_InferenceRequestProviderDelete(provider));
        ok(TSERVE_ServerDelete(server));
    }
}

#[test]
fn test_execution_failure_reported_in_response() {
    let repo = TestRepository::new();
    repo.add_model("varsum", &add_sub_config("FP32", &[-1]), &[1]);
    let server = new_server(repo.path(), None);

    let mut header = InferRequestHeader::new(1, ["INPUT0", "INPUT1"], ["OUTPUT0", "OUTPUT1"]);
    header.input[0].dims = vec![4];
    header.input[1].dims = vec![2];
    let provider = new_provider("varsum", LATEST_VERSION, &header);
    let a = [0u8; 16];
    let b = [0u8; 8];
    set_input(provider, "INPUT0", &a);
    set_input(provider, "INPUT1", &b);

    let response = submit(server, provider);
    let message = expect_code(
        unsafe { TSERVE_InferenceResponseStatus(response) },
        TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG,
    );
    assert!(message.contains("must have the same shape"), "{message}");

    let mut header_message = ptr::null_mut();
    expect_code(
        unsafe { TSERVE_InferenceResponseHeader(response, &mut header_message) },
        TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG,
    );
    assert!(header_message.is_null());

    unsafe {
        ok(TSERVE_InferenceResponseDelete(response));
        ok(TSERVE_InferenceRequestProviderDelete(provider));
        ok(TSERVE_ServerDelete(server));
    }
}

#[test]
fn test_empty_repository_is_live_not_ready() {
    let repo = TestRepository::new();
    let server = new_server(repo.path(), None);
    let mut live = false;
    let mut ready = true;
    unsafe {
        ok(TSERVE_ServerIsLive(server, &mut live));
        ok(TSERVE_ServerIsReady(server, &mut ready));
        ok(TSERVE_ServerDelete(server));
    }
    assert!(live);
    assert!(!ready);
}

#[test]
fn test_missing_repository_fails_creation() {
    let path = CString::new("/nonexistent/tserve/models").unwrap();
    let mut options = ptr::null_mut();
    let mut server = ptr::null_mut();
    unsafe {
        ok(TSERVE_ServerOptionsNew(&mut options));
        ok(TSERVE_ServerOptionsSetModelRepositoryPath(options, path.as_ptr()));
        let message = expect_code(
            TSERVE_ServerNew(&mut server, options),
            TSERVE_Error_Code::TSERVE_ERROR_INVALID_ARG,
        );
        assert!(message.contains("failed to initialize inference server"));
        ok(TSERVE_ServerOptionsDelete(options));
    }
    assert!(server.is_null());
}

#[test]
fn test_server_id_and_status_messages() {
    let repo = simple_repository();
    let server = new_server(repo.path(), Some("ffi-test"));

    let mut id = ptr::null();
    unsafe { ok(TSERVE_ServerId(server, &mut id)) };
    assert_eq!(unsafe { CStr::from_ptr(id) }.to_str().unwrap(), "ffi-test");

    let mut message = ptr::null_mut();
    unsafe { ok(TSERVE_ServerStatus(server, &mut message)) };
    let status = ServerStatus::from_bytes(&message_bytes(message)).unwrap();
    assert_eq!(status.id, "ffi-test");
    assert!(status.model_status.contains_key("simple"));

    let model = CString::new("simple").unwrap();
    unsafe { ok(TSERVE_ServerModelStatus(server, model.as_ptr(), &mut message)) };
    let status = ServerStatus::from_bytes(&message_bytes(message)).unwrap();
    assert_eq!(status.model_status.len(), 1);

    let missing = CString::new("missing").unwrap();
    let err = unsafe { TSERVE_ServerModelStatus(server, missing.as_ptr(), &mut message) };
    expect_code(err, TSERVE_Error_Code::TSERVE_ERROR_NOT_FOUND);

    unsafe { ok(TSERVE_ServerMetrics(server, &mut message)) };
    let text = String::from_utf8(message_bytes(message)).unwrap();
    assert!(text.contains("tserve_inference_request_success"));

    unsafe { ok(TSERVE_ServerDelete(server)) };
}

#[test]
fn test_delete_waits_for_inflight_callbacks() {
    let repo = simple_repository();
    let server = new_server(repo.path(), None);
    let b = i32_bytes(&[1; 16]);
    let counter = AtomicUsize::new(0);
    let userp = (&counter as *const AtomicUsize).cast_mut().cast();

    let provider = new_provider("simple", LATEST_VERSION, &add_sub_header());
    set_input(provider, "INPUT0", &b);
    set_input(provider, "INPUT1", &b);
    for _ in 0..3 {
        unsafe { ok(TSERVE_ServerInferAsync(server, provider, Some(slow_count), userp)) };
    }
    unsafe {
        ok(TSERVE_InferenceRequestProviderDelete(provider));
        ok(TSERVE_ServerDelete(server));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn test_delete_from_callback_keeps_other_callbacks() {
    let repo = simple_repository();
    let server = new_server(repo.path(), None);
    let b = i32_bytes(&[4; 16]);
    let (tx, rx) = mpsc::channel();
    let ctx = DeleteOnce {
        deleted: AtomicBool::new(false),
        done: Mutex::new(tx),
    };
    let userp = (&ctx as *const DeleteOnce).cast_mut().cast();

    let provider = new_provider("simple", LATEST_VERSION, &add_sub_header());
    set_input(provider, "INPUT0", &b);
    set_input(provider, "INPUT1", &b);
    for _ in 0..3 {
        unsafe { ok(TSERVE_ServerInferAsync(server, provider, Some(delete_server_once), userp)) };
    }
    unsafe { ok(TSERVE_InferenceRequestProviderDelete(provider)) };

    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(COMPLETION_TIMEOUT).unwrap(), 0);
    }
    assert!(ctx.deleted.load(Ordering::SeqCst));
}

#[test]
fn test_error_objects() {
    let msg = CString::new("disk full").unwrap();
    unsafe {
        let err = TSERVE_ErrorNew(TSERVE_Error_Code::TSERVE_ERROR_UNAVAILABLE, msg.as_ptr());
        assert_eq!(TSERVE_ErrorCode(err), TSERVE_Error_Code::TSERVE_ERROR_UNAVAILABLE);
        assert_eq!(CStr::from_ptr(TSERVE_ErrorCodeString(err)).to_str().unwrap(), "UNAVAILABLE");
        assert_eq!(CStr::from_ptr(TSERVE_ErrorMessage(err)).to_str().unwrap(), "disk full");
        TSERVE_ErrorDelete(err);

        assert_eq!(TSERVE_ErrorCode(ptr::null()), TSERVE_Error_Code::TSERVE_ERROR_UNKNOWN);
        assert!(TSERVE_ErrorMessage(ptr::null()).is_null());
        TSERVE_ErrorDelete(ptr::null_mut());
        ok(TSERVE_ServerDelete(ptr::null_mut()));
    }
}
