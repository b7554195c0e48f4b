//! Inference response header.

use serde::{Deserialize, Serialize};

use crate::protocol::WireMessage;

/// Metadata describing the outputs produced for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferResponseHeader {
    pub id: u64,
    pub model_name: String,
    pub model_version: i64,
    pub batch_size: u32,
    pub output: Vec<ResponseOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseOutput {
    pub name: String,

    /// Present when the raw tensor was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawOutput>,

    /// One entry per batch item when classification was requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batch_classes: Vec<BatchClasses>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
    /// Shape of one batch item.
    pub dims: Vec<i64>,
    pub batch_byte_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchClasses {
    pub cls: Vec<ClassResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassResult {
    pub idx: u32,
    pub value: f32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

impl WireMessage for InferResponseHeader {
    const NAME: &'static str = "InferResponseHeader";
}

impl InferResponseHeader {
    pub fn find_output(&self, name: &str) -> Option<&ResponseOutput> {
        self.output.iter().find(|o| o.name == name)
    }
}
