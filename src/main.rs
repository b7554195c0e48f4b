//! tserve-simple: drive one `add_sub` inference through the C API.
//!
//! Creates a server over a model repository, waits for it to become ready,
//! prints server and model status, sends 16 INT32 elements to each input of
//! the selected model and checks that OUTPUT0 holds the sums and OUTPUT1 the
//! differences.

use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing::{info, warn};

use tensor_serve::config::{Cli, ServerOptions};
use tensor_serve::ffi::*;
use tensor_serve::protocol::{InferRequestHeader, WireMessage};
use tensor_serve::LATEST_VERSION;

const ELEMENTS: usize = 16;
const HEALTH_ATTEMPTS: usize = 10;

/// Turn a returned error handle into an `anyhow` error, releasing it.
fn check(err: *mut TSERVE_Error, what: &str) -> anyhow::Result<()> {
    if err.is_null() {
        return Ok(());
    }
    // SAFETY: non-null errors returned by the C API are live until deleted.
    let (code, message) = unsafe {
        let code = CStr::from_ptr(TSERVE_ErrorCodeString(err)).to_string_lossy().into_owned();
        let message = CStr::from_ptr(TSERVE_ErrorMessage(err)).to_string_lossy().into_owned();
        TSERVE_ErrorDelete(err);
        (code, message)
    };
    Err(anyhow!("{what}: {code} - {message}"))
}

/// Copy a message's bytes out and release it.
fn message_text(message: *mut TSERVE_Message) -> anyhow::Result<String> {
    let mut base = ptr::null();
    let mut size = 0usize;
    // SAFETY: `message` was just returned by the C API.
    unsafe {
        let serialized = check(TSERVE_MessageSerialize(message, &mut base, &mut size), "serializing message");
        let text = serialized.map(|()| {
            String::from_utf8_lossy(std::slice::from_raw_parts(base.cast::<u8>(), size)).into_owned()
        });
        check(TSERVE_MessageDelete(message), "deleting message")?;
        text
    }
}

struct ResponsePtr(*mut TSERVE_InferenceResponse);

// SAFETY: the response is owned by whoever holds the pointer.
unsafe impl Send for ResponsePtr {}

unsafe extern "C" fn infer_complete(
    _server: *mut TSERVE_Server,
    response: *mut TSERVE_InferenceResponse,
    userp: *mut c_void,
) {
    // SAFETY: `userp` is the sender passed to `TSERVE_ServerInferAsync`,
    // which outlives the server.
    let tx = unsafe { &*userp.cast::<mpsc::Sender<ResponsePtr>>() };
    if tx.send(ResponsePtr(response)).is_err() {
        // SAFETY: nobody is waiting, release it here.
        unsafe { TSERVE_InferenceResponseDelete(response) };
    }
}

fn output_values(response: *mut TSERVE_InferenceResponse, name: &str) -> anyhow::Result<Vec<i32>> {
    let cname = CString::new(name)?;
    let mut base = ptr::null();
    let mut size = 0usize;
    // SAFETY: `response` is live until deleted by `main`.
    check(
        unsafe { TSERVE_InferenceResponseOutputData(response, cname.as_ptr(), &mut base, &mut size) },
        &format!("getting {name}"),
    )?;
    if size != ELEMENTS * std::mem::size_of::<i32>() {
        bail!("{name} has {size} bytes, expected {}", ELEMENTS * std::mem::size_of::<i32>());
    }
    // SAFETY: the C API reported `size` readable bytes at `base`.
    let bytes = unsafe { std::slice::from_raw_parts(base.cast::<u8>(), size) };
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tensor_serve=debug"
    } else {
        "tensor_serve=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("tserve-simple v{}", env!("CARGO_PKG_VERSION"));

    let mut options = match &cli.config {
        Some(path) => ServerOptions::load(path)?,
        None => ServerOptions::default(),
    };
    if let Some(repository) = &cli.model_repository {
        options.set_model_repository_path(repository);
    }
    if options.model_repository_path.as_os_str().is_empty() {
        bail!("-r must be used to specify model repository path");
    }

    let repository = CString::new(options.model_repository_path.to_string_lossy().into_owned())?;
    let server_id = CString::new(options.server_id.clone())?;
    let model_name = CString::new(cli.model.clone())?;

    let mut server_options = ptr::null_mut();
    let mut server = ptr::null_mut();
    // SAFETY: every handle below is created by the C API and deleted once.
    unsafe {
        check(TSERVE_ServerOptionsNew(&mut server_options), "creating server options")?;
        check(
            TSERVE_ServerOptionsSetModelRepositoryPath(server_options, repository.as_ptr()),
            "setting model repository path",
        )?;
        check(TSERVE_ServerOptionsSetServerId(server_options, server_id.as_ptr()), "setting server id")?;
        check(
            TSERVE_ServerOptionsSetStrictReadiness(server_options, options.strict_readiness),
            "setting strict readiness",
        )?;
        check(
            TSERVE_ServerOptionsSetExitTimeout(server_options, options.exit_timeout_secs),
            "setting exit timeout",
        )?;
        check(TSERVE_ServerOptionsSetMetrics(server_options, options.metrics), "setting metrics")?;
        check(
            TSERVE_ServerOptionsSetWorkerThreads(server_options, options.worker_threads),
            "setting worker threads",
        )?;
        check(
            TSERVE_ServerOptionsSetQueueCapacity(server_options, options.queue_capacity),
            "setting queue capacity",
        )?;

        let created = check(TSERVE_ServerNew(&mut server, server_options), "creating server");
        check(TSERVE_ServerOptionsDelete(server_options), "deleting server options")?;
        created?;
    }

    // The sender outlives the server so a late callback still has a target.
    let (tx, rx) = mpsc::channel();
    let outcome = run(server, &model_name, cli.verbose, &tx, &rx);
    // SAFETY: `server` was created above and is deleted exactly once.
    check(unsafe { TSERVE_ServerDelete(server) }, "deleting server")?;
    drop(rx);
    outcome
}

fn run(
    server: *mut TSERVE_Server,
    model_name: &CStr,
    verbose: bool,
    tx: &mpsc::Sender<ResponsePtr>,
    rx: &mpsc::Receiver<ResponsePtr>,
) -> anyhow::Result<()> {
    // SAFETY: `server` stays live for the whole function.
    unsafe {
        let mut id = ptr::null();
        check(TSERVE_ServerId(server, &mut id), "getting server id")?;
        info!(server_id = %CStr::from_ptr(id).to_string_lossy(), "Server created");

        let mut live = false;
        let mut ready = false;
        for attempt in 0..HEALTH_ATTEMPTS {
            check(TSERVE_ServerIsLive(server, &mut live), "unable to get server liveness")?;
            check(TSERVE_ServerIsReady(server, &mut ready), "unable to get server readiness")?;
            info!(live, ready, attempt, "Server health");
            if live && ready {
                break;
            }
            thread::sleep(Duration::from_millis(500));
        }
        if !live || !ready {
            bail!("failed to find healthy inference server");
        }

        let mut status = ptr::null_mut();
        check(TSERVE_ServerStatus(server, &mut status), "unable to get server status")?;
        let status = message_text(status)?;
        if verbose {
            println!("Server Status:\n{status}");
        }

        let mut model_status = ptr::null_mut();
        check(
            TSERVE_ServerModelStatus(server, model_name.as_ptr(), &mut model_status),
            "unable to get model status",
        )?;
        println!("Model Status:\n{}", message_text(model_status)?);

        let header = InferRequestHeader::new(1, ["INPUT0", "INPUT1"], ["OUTPUT0", "OUTPUT1"]);
        let header = header.to_bytes().map_err(|e| anyhow!("{e}"))?;

        let input0: Vec<i32> = (0..ELEMENTS as i32).collect();
        let input1: Vec<i32> = vec![1; ELEMENTS];
        let input_bytes = ELEMENTS * std::mem::size_of::<i32>();

        let mut provider = ptr::null_mut();
        check(
            TSERVE_InferenceRequestProviderNew(
                &mut provider,
                model_name.as_ptr(),
                LATEST_VERSION,
                header.as_ptr().cast(),
                header.len(),
            ),
            "creating inference request provider",
        )?;

        let submitted = (|| -> anyhow::Result<()> {
            check(
                TSERVE_InferenceRequestProviderSetInputData(
                    provider,
                    c"INPUT0".as_ptr(),
                    input0.as_ptr().cast(),
                    input_bytes,
                ),
                "assigning INPUT0 data",
            )?;
            check(
                TSERVE_InferenceRequestProviderSetInputData(
                    provider,
                    c"INPUT1".as_ptr(),
                    input1.as_ptr().cast(),
                    input_bytes,
                ),
                "assigning INPUT1 data",
            )?;
            let userp = (tx as *const mpsc::Sender<ResponsePtr>).cast_mut().cast();
            check(
                TSERVE_ServerInferAsync(server, provider, Some(infer_complete), userp),
                "running inference",
            )
        })();
        // Inputs were copied during submission.
        check(TSERVE_InferenceRequestProviderDelete(provider), "deleting request provider")?;
        submitted?;

        let response = rx
            .recv_timeout(Duration::from_secs(30))
            .context("waiting for inference completion")?
            .0;

        let verified = (|| -> anyhow::Result<()> {
            check(TSERVE_InferenceResponseStatus(response), "response")?;

            let mut header = ptr::null_mut();
            check(TSERVE_InferenceResponseHeader(response, &mut header), "getting response header")?;
            println!("Response Header:\n{}", message_text(header)?);

            let output0 = output_values(response, "OUTPUT0")?;
            let output1 = output_values(response, "OUTPUT1")?;
            for i in 0..ELEMENTS {
                println!("{} + {} = {}", input0[i], input1[i], output0[i]);
                println!("{} - {} = {}", input0[i], input1[i], output1[i]);
                if input0[i].wrapping_add(input1[i]) != output0[i] {
                    bail!("incorrect sum at element {i}");
                }
                if input0[i].wrapping_sub(input1[i]) != output1[i] {
                    bail!("incorrect difference at element {i}");
                }
            }
            Ok(())
        })();
        check(TSERVE_InferenceResponseDelete(response), "deleting response")?;
        verified?;

        let mut metrics = ptr::null_mut();
        match check(TSERVE_ServerMetrics(server, &mut metrics), "getting metrics") {
            Ok(()) if verbose => println!("Metrics:\n{}", message_text(metrics)?),
            Ok(()) => {
                message_text(metrics)?;
            }
            Err(e) => warn!(error = %e, "Metrics unavailable"),
        }
    }

    info!("Inference verified");
    Ok(())
}
