//! Inference request header.

use serde::{Deserialize, Serialize};

use crate::protocol::WireMessage;

/// Metadata accompanying the input tensors of one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferRequestHeader {
    /// Caller-chosen correlation id, echoed in the response header.
    #[serde(default)]
    pub id: u64,

    /// Number of batch items in every input.
    #[serde(default)]
    pub batch_size: u32,

    #[serde(default)]
    pub input: Vec<RequestInput>,

    /// Outputs to return. Empty means all model outputs.
    #[serde(default)]
    pub output: Vec<RequestOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestInput {
    pub name: String,

    /// Shape of one batch item. Required when the model input is variable-size.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dims: Vec<i64>,

    /// Total bytes across the batch. Zero means "compute from the shape".
    #[serde(default)]
    pub batch_byte_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestOutput {
    pub name: String,

    /// Return the top classes instead of the raw tensor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<ClassificationRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationRequest {
    pub count: u32,
}

impl WireMessage for InferRequestHeader {
    const NAME: &'static str = "InferRequestHeader";
}

impl InferRequestHeader {
    /// Header for `batch_size` items of the named inputs, requesting the named outputs.
    pub fn new<I, O>(batch_size: u32, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            id: 0,
            batch_size,
            input: inputs
                .into_iter()
                .map(|name| RequestInput {
                    name: name.into(),
                    ..Default::default()
                })
                .collect(),
            output: outputs
                .into_iter()
                .map(|name| RequestOutput {
                    name: name.into(),
                    cls: None,
                })
                .collect(),
        }
    }

    pub fn find_input(&self, name: &str) -> Option<&RequestInput> {
        self.input.iter().find(|i| i.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&RequestOutput> {
        self.output.iter().find(|o| o.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;

    #[test]
    fn test_parse_minimal_header() {
        let header = InferRequestHeader::from_bytes(
            br#"{"batch_size": 1, "input": [{"name": "INPUT0"}], "output": [{"name": "OUTPUT0", "cls": {"count": 3}}]}"#,
        )
        .unwrap();
        assert_eq!(header.batch_size, 1);
        assert_eq!(header.input[0].batch_byte_size, 0);
        assert_eq!(header.find_output("OUTPUT0").unwrap().cls.unwrap().count, 3);
    }

    #[test]
    fn test_truncated_header_is_invalid_arg() {
        let bytes = InferRequestHeader::new(1, ["INPUT0"], ["OUTPUT0"]).to_bytes().unwrap();
        let err = InferRequestHeader::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArg);
    }

    #[test]
    fn test_empty_and_unknown_fields_rejected() {
        assert!(InferRequestHeader::from_bytes(b"").is_err());
        assert!(InferRequestHeader::from_bytes(br#"{"batch": 1}"#).is_err());
    }
}
