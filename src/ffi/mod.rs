//! C ABI over the inference server.
//!
//! Every fallible function returns a `TSERVE_Error*`: null on success, an
//! owned error the caller must delete otherwise. Out-parameters are written
//! only on success. Handles are opaque boxes created by `*New` and consumed
//! by `*Delete`.
//!
//! - [`error`]: error objects and serialized-message holders
//! - [`handle`]: pointer checks and panic containment
//! - [`request`]: request providers and responses
//! - [`server`]: server options, server handles and `TSERVE_ServerInferAsync`

#![allow(non_camel_case_types, non_snake_case)]

pub mod error;
pub(crate) mod handle;
pub mod request;
pub mod server;

pub use error::*;
pub use request::*;
pub use server::*;
