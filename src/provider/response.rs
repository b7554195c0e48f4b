//! Response assembly: output storage and the response header.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use half::f16;

use crate::error::{Result, Status};
use crate::model::config::{DataType, ModelConfig};
use crate::model::labels::LabelProvider;
use crate::protocol::{
    BatchClasses, ClassResult, InferRequestHeader, InferResponseHeader, RawOutput, ResponseOutput,
};
use crate::provider::memory::read_elements;

#[derive(Debug, Clone)]
struct RequestedOutput {
    name: String,
    data_type: DataType,
    class_count: Option<u32>,
}

/// A produced output tensor.
#[derive(Debug, Clone)]
pub struct OutputTensor {
    /// Shape of one batch item.
    pub dims: Vec<i64>,
    pub data: Bytes,
}

/// Collects the outputs an executor produces and describes them in an
/// [`InferResponseHeader`] once execution finishes.
#[derive(Debug)]
pub struct InferResponseProvider {
    header: InferResponseHeader,
    requested: Vec<RequestedOutput>,
    outputs: HashMap<String, OutputTensor>,
    labels: Arc<LabelProvider>,
}

impl InferResponseProvider {
    /// Size the provider from a normalized request header.
    pub fn create(
        request_header: &InferRequestHeader,
        config: &ModelConfig,
        model_version: u64,
        labels: Arc<LabelProvider>,
    ) -> Result<Self> {
        let requested = if request_header.output.is_empty() {
            config
                .output
                .iter()
                .map(|o| RequestedOutput {
                    name: o.name.clone(),
                    data_type: o.data_type,
                    class_count: None,
                })
                .collect()
        } else {
            let mut requested = Vec::with_capacity(request_header.output.len());
            for output in &request_header.output {
                let model_output = config.find_output(&output.name).ok_or_else(|| {
                    Status::invalid_arg(format!(
                        "unexpected inference output '{}' for model '{}'",
                        output.name, config.name
                    ))
                })?;

                let class_count = match output.cls {
                    Some(cls) if cls.count == 0 => {
                        return Err(Status::invalid_arg(format!(
                            "classification count for output '{}' must be positive",
                            output.name
                        )));
                    }
                    Some(_) if !model_output.data_type.is_numeric() => {
                        return Err(Status::invalid_arg(format!(
                            "classification is not supported for {:?} output '{}'",
                            model_output.data_type, output.name
                        )));
                    }
                    Some(cls) => Some(cls.count),
                    None => None,
                };

                requested.push(RequestedOutput {
                    name: output.name.clone(),
                    data_type: model_output.data_type,
                    class_count,
                });
            }
            requested
        };

        Ok(Self {
            header: InferResponseHeader {
                id: request_header.id,
                model_name: config.name.clone(),
                model_version: model_version as i64,
                batch_size: request_header.batch_size,
                output: Vec::new(),
            },
            requested,
            outputs: HashMap::new(),
            labels,
        })
    }

    /// Whether `name` was requested and must be produced.
    pub fn requires_output(&self, name: &str) -> bool {
        self.requested.iter().any(|o| o.name == name)
    }

    /// Store an output. Outputs that were not requested are dropped.
    pub fn set_output(&mut self, name: &str, dims: Vec<i64>, data: impl Into<Bytes>) -> Result<()> {
        let Some(spec) = self.requested.iter().find(|o| o.name == name) else {
            return Ok(());
        };

        let data = data.into();
        let per_item = dims
            .iter()
            .try_fold(1u64, |acc, d| u64::try_from(*d).ok().and_then(|d| acc.checked_mul(d)))
            .ok_or_else(|| Status::internal(format!("output '{name}' has invalid dims {dims:?}")))?;
        let expected = per_item * spec.data_type.byte_size() as u64 * self.header.batch_size as u64;
        if data.len() as u64 != expected {
            return Err(Status::internal(format!(
                "output '{name}' has {} bytes, expected {expected}",
                data.len()
            )));
        }

        self.outputs.insert(name.to_string(), OutputTensor { dims, data });
        Ok(())
    }

    /// Build the response header from the produced outputs.
    pub fn finalize(&mut self) -> Result<()> {
        let batch_size = self.header.batch_size.max(1) as usize;
        let mut described = Vec::with_capacity(self.requested.len());

        for spec in &self.requested {
            let tensor = self.outputs.get(&spec.name).ok_or_else(|| {
                Status::internal(format!(
                    "model '{}' did not produce requested output '{}'",
                    self.header.model_name, spec.name
                ))
            })?;

            let output = match spec.class_count {
                None => ResponseOutput {
                    name: spec.name.clone(),
                    raw: Some(RawOutput {
                        dims: tensor.dims.clone(),
                        batch_byte_size: tensor.data.len() as u64,
                    }),
                    batch_classes: Vec::new(),
                },
                Some(count) => {
                    let values = values_as_f64(spec.data_type, &tensor.data);
                    let per_item = values.len() / batch_size;
                    let batch_classes = values
                        .chunks(per_item.max(1))
                        .take(batch_size)
                        .map(|item| BatchClasses {
                            cls: top_classes(item, count as usize, |idx| {
                                self.labels.label(&spec.name, idx).to_string()
                            }),
                        })
                        .collect();
                    ResponseOutput {
                        name: spec.name.clone(),
                        raw: None,
                        batch_classes,
                    }
                }
            };
            described.push(output);
        }

        self.header.output = described;
        Ok(())
    }

    /// Drop produced outputs after a failed execution.
    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
        self.header.output.clear();
    }

    pub fn response_header(&self) -> &InferResponseHeader {
        &self.header
    }

    /// Contents of a produced output, valid while the provider lives.
    pub fn output_buffer_contents(&self, name: &str) -> Result<&[u8]> {
        self.outputs
            .get(name)
            .map(|t| &t.data[..])
            .ok_or_else(|| {
                Status::not_found(format!(
                    "output '{name}' was not produced by model '{}'",
                    self.header.model_name
                ))
            })
    }
}

fn top_classes(
    values: &[f64],
    count: usize,
    label: impl Fn(usize) -> String,
) -> Vec<ClassResult> {
    let mut ranked: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(count)
        .map(|(idx, value)| ClassResult {
            idx: idx as u32,
            value: value as f32,
            label: label(idx),
        })
        .collect()
}

fn values_as_f64(data_type: DataType, bytes: &[u8]) -> Vec<f64> {
    match data_type {
        DataType::Bool | DataType::Uint8 => bytes.iter().map(|v| f64::from(*v)).collect(),
        DataType::Int8 => read_elements::<i8>(bytes).into_iter().map(f64::from).collect(),
        DataType::Uint16 => read_elements::<u16>(bytes).into_iter().map(f64::from).collect(),
        DataType::Int16 => read_elements::<i16>(bytes).into_iter().map(f64::from).collect(),
        DataType::Uint32 => read_elements::<u32>(bytes).into_iter().map(f64::from).collect(),
        DataType::Int32 => read_elements::<i32>(bytes).into_iter().map(f64::from).collect(),
        DataType::Uint64 => read_elements::<u64>(bytes).into_iter().map(|v| v as f64).collect(),
        DataType::Int64 => read_elements::<i64>(bytes).into_iter().map(|v| v as f64).collect(),
        DataType::Fp16 => read_elements::<f16>(bytes).into_iter().map(f64::from).collect(),
        DataType::Fp32 => read_elements::<f32>(bytes).into_iter().map(f64::from).collect(),
        DataType::Fp64 => read_elements::<f64>(bytes),
    }
}
