//! Model configuration (`config.json` in every model directory).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, Status};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Fp32,
    Fp64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::Bool | DataType::Uint8 | DataType::Int8 => 1,
            DataType::Uint16 | DataType::Int16 | DataType::Fp16 => 2,
            DataType::Uint32 | DataType::Int32 | DataType::Fp32 => 4,
            DataType::Uint64 | DataType::Int64 | DataType::Fp64 => 8,
        }
    }

    /// Whether values can be ranked for classification.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, DataType::Bool)
    }
}

/// Which version directories of a model get loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// The `num_versions` highest versions.
    Latest { num_versions: u32 },
    All,
    Specific { versions: Vec<u64> },
}

impl Default for VersionPolicy {
    fn default() -> Self {
        VersionPolicy::Latest { num_versions: 1 }
    }
}

impl VersionPolicy {
    /// Select versions to load from those present on disk.
    pub fn select(&self, available: &[u64]) -> Vec<u64> {
        let mut sorted: Vec<u64> = available.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        match self {
            VersionPolicy::Latest { num_versions } => {
                sorted.truncate(*num_versions as usize);
                sorted
            }
            VersionPolicy::All => sorted,
            VersionPolicy::Specific { versions } => {
                let mut selected: Vec<u64> = versions
                    .iter()
                    .copied()
                    .filter(|v| {
                        let present = sorted.contains(v);
                        if !present {
                            tracing::warn!(version = v, "Specified version directory is not present");
                        }
                        present
                    })
                    .collect();
                selected.sort_unstable_by(|a, b| b.cmp(a));
                selected.dedup();
                selected
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    pub name: String,
    pub data_type: DataType,
    /// Shape of one batch item; `-1` marks a variable-size dimension.
    pub dims: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
    /// File (relative to the model directory) with one class label per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_filename: Option<String>,
}

fn default_instance_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Must match the model directory name when set.
    #[serde(default)]
    pub name: String,

    /// Executor platform, e.g. `identity` or `add_sub`.
    pub platform: String,

    /// Largest accepted batch; 0 disables batching.
    #[serde(default)]
    pub max_batch_size: u32,

    #[serde(default)]
    pub input: Vec<ModelInput>,

    #[serde(default)]
    pub output: Vec<ModelOutput>,

    #[serde(default)]
    pub version_policy: VersionPolicy,

    /// Worker tasks draining this model's queue.
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
}

impl ModelConfig {
    pub fn find_input(&self, name: &str) -> Option<&ModelInput> {
        self.input.iter().find(|i| i.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&ModelOutput> {
        self.output.iter().find(|o| o.name == name)
    }

    /// Check internal consistency. `dir_name` is the model's directory name.
    pub fn validate(&mut self, dir_name: &str) -> Result<()> {
        if self.name.is_empty() {
            self.name = dir_name.to_string();
        } else if self.name != dir_name {
            return Err(Status::invalid_arg(format!(
                "model name '{}' does not match directory name '{dir_name}'",
                self.name
            )));
        }

        if self.platform.is_empty() {
            return Err(Status::invalid_arg(format!(
                "model '{dir_name}' must specify a platform"
            )));
        }
        if self.instance_count == 0 {
            return Err(Status::invalid_arg(format!(
                "model '{dir_name}' must have at least one instance"
            )));
        }
        if self.output.is_empty() {
            return Err(Status::invalid_arg(format!(
                "model '{dir_name}' must specify at least one output"
            )));
        }

        let mut seen = HashSet::new();
        for (name, dims) in self.input.iter().map(|i| (&i.name, &i.dims)) {
            if !seen.insert(name.as_str()) {
                return Err(Status::invalid_arg(format!(
                    "duplicate input '{name}' in model '{dir_name}'"
                )));
            }
            validate_dims(dir_name, name, dims)?;
        }

        seen.clear();
        for (name, dims) in self.output.iter().map(|o| (&o.name, &o.dims)) {
            if !seen.insert(name.as_str()) {
                return Err(Status::invalid_arg(format!(
                    "duplicate output '{name}' in model '{dir_name}'"
                )));
            }
            validate_dims(dir_name, name, dims)?;
        }

        Ok(())
    }
}

fn validate_dims(model: &str, tensor: &str, dims: &[i64]) -> Result<()> {
    if dims.iter().any(|d| *d == 0 || *d < -1) {
        return Err(Status::invalid_arg(format!(
            "tensor '{tensor}' of model '{model}' has invalid dims {dims:?}"
        )));
    }
    Ok(())
}

/// Element count of a fully-specified shape, `None` if any dim is variable.
pub fn element_count(dims: &[i64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, d| {
        if *d < 0 {
            None
        } else {
            acc.checked_mul(*d as u64)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_config() -> ModelConfig {
        serde_json::from_str(
            r#"{
                "platform": "add_sub",
                "max_batch_size": 8,
                "input": [
                    {"name": "INPUT0", "data_type": "INT32", "dims": [16]},
                    {"name": "INPUT1", "data_type": "INT32", "dims": [16]}
                ],
                "output": [
                    {"name": "OUTPUT0", "data_type": "INT32", "dims": [16]},
                    {"name": "OUTPUT1", "data_type": "INT32", "dims": [16]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_and_name_fill() {
        let mut config = simple_config();
        config.validate("simple").unwrap();
        assert_eq!(config.name, "simple");
        assert_eq!(config.instance_count, 1);
        assert_eq!(config.version_policy, VersionPolicy::Latest { num_versions: 1 });
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let mut config = simple_config();
        config.name = "other".to_string();
        assert!(config.validate("simple").is_err());
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut config = simple_config();
        config.output[1].name = "OUTPUT0".to_string();
        assert!(config.validate("simple").is_err());
    }

    #[test]
    fn test_version_policy_selection() {
        let available = [1, 3, 2];
        assert_eq!(VersionPolicy::default().select(&available), vec![3]);
        assert_eq!(
            VersionPolicy::Latest { num_versions: 2 }.select(&available),
            vec![3, 2]
        );
        assert_eq!(VersionPolicy::All.select(&available), vec![3, 2, 1]);
        assert_eq!(
            VersionPolicy::Specific { versions: vec![1, 7] }.select(&available),
            vec![1]
        );
    }

    #[test]
    fn test_element_count() {
        assert_eq!(element_count(&[4, 4]), Some(16));
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[-1, 4]), None);
    }
}
