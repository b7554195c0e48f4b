//! Request and response providers.
//!
//! - [`memory`]: caller-owned buffer references and element codecs
//! - [`request`]: request assembly, from caller buffers to owned inputs
//! - [`response`]: output storage and response header construction

pub mod memory;
pub mod request;
pub mod response;

pub use memory::MemoryReference;
pub use request::{InferRequestProvider, InferenceRequest, InputTensor, RequestProvider, LATEST_VERSION};
pub use response::{InferResponseProvider, OutputTensor};
