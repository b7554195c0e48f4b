//! Request assembly.
//!
//! [`RequestProvider`] is what a caller builds: a model selector, a parsed
//! request header and references to input buffers. At submission the engine
//! turns a borrowed [`InferenceRequest`] view of it into an
//! [`InferRequestProvider`] that owns copies of every input.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, Status};
use crate::model::config::{DataType, ModelConfig};
use crate::protocol::{InferRequestHeader, WireMessage};
use crate::provider::memory::MemoryReference;

/// Version selector meaning "highest ready version".
pub const LATEST_VERSION: i64 = -1;

/// Caller-side request: model selector, header and referenced input buffers.
#[derive(Debug)]
pub struct RequestProvider {
    model_name: String,
    model_version: i64,
    header: InferRequestHeader,
    inputs: HashMap<String, MemoryReference>,
}

impl RequestProvider {
    /// Parse `header_bytes` as an [`InferRequestHeader`].
    pub fn new(model_name: &str, model_version: i64, header_bytes: &[u8]) -> Result<Self> {
        let header = InferRequestHeader::from_bytes(header_bytes)?;
        Ok(Self::from_header(model_name, model_version, header))
    }

    pub fn from_header(model_name: &str, model_version: i64, header: InferRequestHeader) -> Self {
        Self {
            model_name: model_name.to_string(),
            model_version,
            header,
            inputs: HashMap::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_version(&self) -> i64 {
        self.model_version
    }

    pub fn header(&self) -> &InferRequestHeader {
        &self.header
    }

    /// Append a buffer to `input_name`'s ordered buffer list.
    ///
    /// Nothing is validated here; shapes and sizes are checked at submission.
    pub fn set_input_data(&mut self, input_name: &str, base: *const u8, byte_size: usize) {
        self.inputs
            .entry(input_name.to_string())
            .or_default()
            .add_buffer(base, byte_size);
    }

    pub fn input_buffers(&self, input_name: &str) -> Option<&MemoryReference> {
        self.inputs.get(input_name)
    }

    /// Borrow the provider as a submission view.
    ///
    /// # Safety
    ///
    /// Every buffer passed to [`set_input_data`](Self::set_input_data) must
    /// still be valid for reads of its byte size while the view is alive.
    pub unsafe fn request(&self) -> InferenceRequest<'_> {
        let inputs = self
            .inputs
            .iter()
            // SAFETY: upheld by the caller.
            .map(|(name, mem)| (name.as_str(), unsafe { mem.slices() }))
            .collect();
        InferenceRequest {
            model_name: &self.model_name,
            model_version: self.model_version,
            header: &self.header,
            inputs,
        }
    }
}

/// A borrowed request ready for submission.
#[derive(Debug, Clone)]
pub struct InferenceRequest<'a> {
    pub model_name: &'a str,
    /// Negative selects the latest ready version.
    pub model_version: i64,
    pub header: &'a InferRequestHeader,
    /// Input chunks by name, in append order.
    pub inputs: HashMap<&'a str, Vec<&'a [u8]>>,
}

impl<'a> InferenceRequest<'a> {
    pub fn new(model_name: &'a str, model_version: i64, header: &'a InferRequestHeader) -> Self {
        Self {
            model_name,
            model_version,
            header,
            inputs: HashMap::new(),
        }
    }

    /// Append a chunk to `name`.
    pub fn with_input(mut self, name: &'a str, data: &'a [u8]) -> Self {
        self.inputs.entry(name).or_default().push(data);
        self
    }
}

/// One input tensor owned by the engine.
#[derive(Debug, Clone)]
pub struct InputTensor {
    pub name: String,
    pub data_type: DataType,
    /// Shape of one batch item.
    pub dims: Vec<i64>,
    /// Contents for the whole batch.
    pub data: Bytes,
}

/// Engine-side request with stable, owned input data.
#[derive(Debug)]
pub struct InferRequestProvider {
    model_name: String,
    model_version: u64,
    header: InferRequestHeader,
    inputs: Vec<InputTensor>,
}

impl InferRequestProvider {
    /// Copy the inputs of `inputs` described by a normalized `header`.
    pub fn create(
        model_name: &str,
        model_version: u64,
        header: InferRequestHeader,
        config: &ModelConfig,
        inputs: &HashMap<&str, Vec<&[u8]>>,
    ) -> Result<Self> {
        if let Some(extra) = inputs
            .keys()
            .find(|name| header.find_input(name).is_none())
        {
            return Err(Status::invalid_arg(format!(
                "unexpected data for input '{extra}' which is not in the request header"
            )));
        }

        let mut tensors = Vec::with_capacity(header.input.len());
        for input in &header.input {
            let model_input = config.find_input(&input.name).ok_or_else(|| {
                Status::invalid_arg(format!(
                    "unexpected inference input '{}' for model '{model_name}'",
                    input.name
                ))
            })?;
            let chunks = inputs.get(input.name.as_str()).ok_or_else(|| {
                Status::invalid_arg(format!(
                    "input '{}' was not provided for model '{model_name}'",
                    input.name
                ))
            })?;

            let total: usize = chunks.iter().map(|c| c.len()).sum();
            if total as u64 != input.batch_byte_size {
                return Err(Status::invalid_arg(format!(
                    "unexpected size {total} for input '{}', expecting {}",
                    input.name, input.batch_byte_size
                )));
            }

            let mut data = BytesMut::with_capacity(total);
            for chunk in chunks {
                data.extend_from_slice(chunk);
            }

            tensors.push(InputTensor {
                name: input.name.clone(),
                data_type: model_input.data_type,
                dims: input.dims.clone(),
                data: data.freeze(),
            });
        }

        Ok(Self {
            model_name: model_name.to_string(),
            model_version,
            header,
            inputs: tensors,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_version(&self) -> u64 {
        self.model_version
    }

    pub fn header(&self) -> &InferRequestHeader {
        &self.header
    }

    pub fn batch_size(&self) -> u32 {
        self.header.batch_size
    }

    pub fn input(&self, name: &str) -> Result<&InputTensor> {
        self.inputs
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Status::invalid_arg(format!("input '{name}' is missing from the request")))
    }

    /// Inputs in request-header order.
    pub fn inputs(&self) -> &[InputTensor] {
        &self.inputs
    }
}
