//! Request header normalization against model metadata.

use std::collections::HashSet;

use crate::error::{Result, Status};
use crate::model::config::{element_count, ModelConfig};
use crate::protocol::InferRequestHeader;

/// Validate `header` against `config`, filling input dims and byte sizes
/// the caller left out.
pub fn normalize_request_header(config: &ModelConfig, header: &mut InferRequestHeader) -> Result<()> {
    let model = &config.name;

    if header.batch_size == 0 {
        return Err(Status::invalid_arg(format!(
            "inference request for model '{model}' must specify a positive batch size"
        )));
    }
    if config.max_batch_size == 0 {
        if header.batch_size != 1 {
            return Err(Status::invalid_arg(format!(
                "model '{model}' does not support batching, batch size must be 1"
            )));
        }
    } else if header.batch_size > config.max_batch_size {
        return Err(Status::invalid_arg(format!(
            "batch size {} exceeds maximum {} for model '{model}'",
            header.batch_size, config.max_batch_size
        )));
    }

    if header.input.len() != config.input.len() {
        return Err(Status::invalid_arg(format!(
            "expected {} inputs but got {} inputs for model '{model}'",
            config.input.len(),
            header.input.len()
        )));
    }

    let batch_size = header.batch_size as u64;
    let mut seen = HashSet::new();
    for input in &mut header.input {
        if !seen.insert(input.name.clone()) {
            return Err(Status::invalid_arg(format!(
                "duplicate input '{}' for model '{model}'",
                input.name
            )));
        }
        let model_input = config.find_input(&input.name).ok_or_else(|| {
            Status::invalid_arg(format!(
                "unexpected inference input '{}' for model '{model}'",
                input.name
            ))
        })?;

        if input.dims.is_empty() {
            if model_input.dims.iter().any(|d| *d < 0) {
                return Err(Status::invalid_arg(format!(
                    "must specify dims for variable-size input '{}' for model '{model}'",
                    input.name
                )));
            }
            input.dims = model_input.dims.clone();
        } else {
            let compatible = input.dims.len() == model_input.dims.len()
                && input
                    .dims
                    .iter()
                    .zip(&model_input.dims)
                    .all(|(given, declared)| *given > 0 && (*declared == -1 || given == declared));
            if !compatible {
                return Err(Status::invalid_arg(format!(
                    "unexpected shape for input '{}' for model '{model}'. Expected {:?}, got {:?}",
                    input.name, model_input.dims, input.dims
                )));
            }
        }

        let expected = element_count(&input.dims)
            .and_then(|n| n.checked_mul(model_input.data_type.byte_size() as u64))
            .and_then(|n| n.checked_mul(batch_size))
            .ok_or_else(|| {
                Status::invalid_arg(format!(
                    "input '{}' for model '{model}' is too large",
                    input.name
                ))
            })?;
        if input.batch_byte_size == 0 {
            input.batch_byte_size = expected;
        } else if input.batch_byte_size != expected {
            return Err(Status::invalid_arg(format!(
                "specific batch-byte-size {} for input '{}' does not match expected byte-size {expected} for model '{model}'",
                input.batch_byte_size, input.name
            )));
        }
    }

    seen.clear();
    for output in &header.output {
        if !seen.insert(output.name.clone()) {
            return Err(Status::invalid_arg(format!(
                "duplicate output '{}' for model '{model}'",
                output.name
            )));
        }
        if config.find_output(&output.name).is_none() {
            return Err(Status::invalid_arg(format!(
                "unexpected inference output '{}' for model '{model}'",
                output.name
            )));
        }
    }

    Ok(())
}
