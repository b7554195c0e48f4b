//! Class labels for classification outputs.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, Status};
use crate::model::config::{element_count, ModelConfig};

/// Per-output class labels, indexed by class position.
#[derive(Debug, Clone, Default)]
pub struct LabelProvider {
    labels: HashMap<String, Vec<String>>,
}

impl LabelProvider {
    /// Read every `label_filename` referenced by `config` from `model_dir`.
    pub fn load(model_dir: &Path, config: &ModelConfig) -> Result<Self> {
        let mut provider = Self::default();
        for output in &config.output {
            let Some(filename) = &output.label_filename else {
                continue;
            };

            let path = model_dir.join(filename);
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                Status::invalid_arg(format!(
                    "failed to read label file '{}' for output '{}': {e}",
                    path.display(),
                    output.name
                ))
            })?;
            let labels: Vec<String> = contents.lines().map(|l| l.trim_end().to_string()).collect();

            if let Some(expected) = element_count(&output.dims) {
                if labels.len() as u64 != expected {
                    return Err(Status::invalid_arg(format!(
                        "label file '{}' has {} labels but output '{}' has {expected} classes",
                        path.display(),
                        labels.len(),
                        output.name
                    )));
                }
            }

            provider.labels.insert(output.name.clone(), labels);
        }
        Ok(provider)
    }

    pub fn insert(&mut self, output: impl Into<String>, labels: Vec<String>) {
        self.labels.insert(output.into(), labels);
    }

    /// Label for class `index` of `output`, empty when unknown.
    pub fn label(&self, output: &str, index: usize) -> &str {
        self.labels
            .get(output)
            .and_then(|l| l.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn has_labels(&self, output: &str) -> bool {
        self.labels.contains_key(output)
    }
}
