//! tensor-serve: an asynchronous tensor inference server behind a stable C ABI.
//!
//! A server scans a model repository, loads every selected model version
//! onto its own tokio runtime, and serves requests submitted through
//! `TSERVE_ServerInferAsync`. Requests are validated and their inputs copied
//! on the caller's thread; execution and the completion callback happen on
//! engine threads, exactly once per accepted submission.
//!
//! The same engine is usable from Rust through [`InferenceServer`].

pub mod backend;
pub mod config;
pub mod error;
pub mod ffi;
pub mod model;
pub mod protocol;
pub mod provider;
pub mod server;

pub use backend::{ModelExecutor, PlatformRegistry};
pub use config::ServerOptions;
pub use error::{Code, Result, Status};
pub use protocol::WireMessage;
pub use provider::{InferenceRequest, RequestProvider, LATEST_VERSION};
pub use server::{InferResponse, InferenceServer};
