//! Shared helpers: throwaway model repositories and blocking inference.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use tensor_serve::protocol::InferRequestHeader;
use tensor_serve::{InferResponse, InferenceRequest, InferenceServer, ServerOptions};

pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// A model repository in a temporary directory.
pub struct TestRepository {
    dir: TempDir,
}

impl TestRepository {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp repository"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `config.json` and create the version directories.
    pub fn add_model(&self, name: &str, config: &Value, versions: &[u64]) -> PathBuf {
        let dir = self.dir.path().join(name);
        std::fs::create_dir_all(&dir).expect("create model dir");
        std::fs::write(dir.join("config.json"), config.to_string()).expect("write config");
        for version in versions {
            std::fs::create_dir_all(dir.join(version.to_string())).expect("create version dir");
        }
        dir
    }

    pub fn add_file(&self, model: &str, file: &str, contents: &str) {
        std::fs::write(self.dir.path().join(model).join(file), contents).expect("write file");
    }

    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            model_repository_path: self.path().to_path_buf(),
            exit_timeout_secs: 5,
            worker_threads: 2,
            ..Default::default()
        }
    }
}

/// `add_sub` model with two inputs and two outputs.
pub fn add_sub_config(data_type: &str, dims: &[i64]) -> Value {
    let tensor = |name: &str| json!({"name": name, "data_type": data_type, "dims": dims});
    json!({
        "platform": "add_sub",
        "input": [tensor("INPUT0"), tensor("INPUT1")],
        "output": [tensor("OUTPUT0"), tensor("OUTPUT1")],
    })
}

/// `identity` model mapping IN to OUT.
pub fn identity_config(data_type: &str, dims: &[i64], max_batch_size: u32) -> Value {
    json!({
        "platform": "identity",
        "max_batch_size": max_batch_size,
        "input": [{"name": "IN", "data_type": data_type, "dims": dims}],
        "output": [{"name": "OUT", "data_type": data_type, "dims": dims}],
    })
}

/// Repository holding the `simple` add_sub model over 16 INT32 elements.
pub fn simple_repository() -> TestRepository {
    let repo = TestRepository::new();
    repo.add_model("simple", &add_sub_config("INT32", &[16]), &[1]);
    repo
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn i32_values(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Submit through the Rust API and wait for the completion.
pub fn infer(
    server: &InferenceServer,
    model: &str,
    version: i64,
    header: &InferRequestHeader,
    inputs: &[(&str, &[u8])],
) -> tensor_serve::Result<InferResponse> {
    let (tx, rx) = mpsc::channel();
    let mut request = InferenceRequest::new(model, version, header);
    for &(name, data) in inputs {
        request = request.with_input(name, data);
    }
    server.infer_async(request, move |response| {
        let _ = tx.send(response);
    })?;
    Ok(rx
        .recv_timeout(COMPLETION_TIMEOUT)
        .expect("completion callback did not fire"))
}
