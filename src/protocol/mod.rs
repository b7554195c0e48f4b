//! Payloads that cross the C boundary as opaque byte buffers.
//!
//! - [`request`]: request header sent with every inference
//! - [`response`]: response header describing produced outputs
//! - [`status`]: server and model status snapshots

pub mod request;
pub mod response;
pub mod status;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, Status};

pub use request::{ClassificationRequest, InferRequestHeader, RequestInput, RequestOutput};
pub use response::{BatchClasses, ClassResult, InferResponseHeader, RawOutput, ResponseOutput};
pub use status::{
    InferRequestStats, ModelReadyState, ModelStatus, ModelVersionStatus, ServerReadyState,
    ServerStatus, StatDuration,
};

/// A structured payload with a stable byte encoding.
///
/// Encoding is JSON; every map inside a payload is ordered, so encoding the
/// same value twice yields identical bytes.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Name used in parse errors.
    const NAME: &'static str;

    fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Status::internal(format!("failed to serialize {}: {e}", Self::NAME)))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Status::invalid_arg(format!("failed to parse {}: {e}", Self::NAME)))
    }
}
