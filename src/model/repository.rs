//! Model repository scanning.
//!
//! Layout:
//! ```text
//! <repository>/
//!   <model-name>/
//!     config.json
//!     labels.txt        (optional, referenced by config)
//!     1/  2/  ...       (integer version directories)
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::error::{Result, Status};
use crate::model::config::ModelConfig;

/// File holding the model configuration inside each model directory.
pub const CONFIG_FILENAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("model repository path must be specified")]
    EmptyPath,

    #[error("model repository '{0}' not found")]
    NotFound(String),

    #[error("model repository '{0}' is not a directory")]
    NotADirectory(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<RepositoryError> for Status {
    fn from(err: RepositoryError) -> Self {
        Status::invalid_arg(err.to_string())
    }
}

/// A model whose configuration was read and validated.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub dir: PathBuf,
    pub config: ModelConfig,
    /// Versions selected by the version policy, highest first.
    pub versions: Vec<u64>,
}

impl ModelDefinition {
    pub fn version_dir(&self, version: u64) -> PathBuf {
        self.dir.join(version.to_string())
    }
}

/// One model directory found in the repository.
#[derive(Debug)]
pub struct DiscoveredModel {
    pub name: String,
    pub definition: Result<ModelDefinition>,
}

/// Scan `root` for model directories, sorted by name.
///
/// Only problems with the repository itself are errors; a broken model is
/// reported through [`DiscoveredModel::definition`].
pub fn scan(root: &Path) -> std::result::Result<Vec<DiscoveredModel>, RepositoryError> {
    if root.as_os_str().is_empty() {
        return Err(RepositoryError::EmptyPath);
    }
    if !root.exists() {
        return Err(RepositoryError::NotFound(root.display().to_string()));
    }
    if !root.is_dir() {
        return Err(RepositoryError::NotADirectory(root.display().to_string()));
    }

    let mut models = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 model directory");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let definition = load_definition(&name, &entry.path());
        if let Err(e) = &definition {
            warn!(model = %name, error = %e, "Model definition is invalid");
        }
        models.push(DiscoveredModel { name, definition });
    }

    models.sort_by(|a, b| a.name.cmp(&b.name));

    info!(
        repository = %root.display(),
        models = models.len(),
        "Scanned model repository"
    );

    Ok(models)
}

fn load_definition(name: &str, dir: &Path) -> Result<ModelDefinition> {
    let config_path = dir.join(CONFIG_FILENAME);
    let data = std::fs::read_to_string(&config_path).map_err(|e| {
        Status::invalid_arg(format!(
            "failed to read '{}': {e}",
            config_path.display()
        ))
    })?;
    let mut config: ModelConfig = serde_json::from_str(&data).map_err(|e| {
        Status::invalid_arg(format!(
            "failed to parse '{}': {e}",
            config_path.display()
        ))
    })?;
    config.validate(name)?;

    let mut available = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name();
        match dir_name.to_str().and_then(|s| s.parse::<u64>().ok()) {
            Some(version) => available.push(version),
            None => warn!(
                model = name,
                dir = ?dir_name,
                "Ignoring non-integral version directory"
            ),
        }
    }

    let versions = config.version_policy.select(&available);
    if versions.is_empty() {
        return Err(Status::invalid_arg(format!(
            "at least one version must be available under the version policy of model '{name}'"
        )));
    }

    Ok(ModelDefinition {
        name: name.to_string(),
        dir: dir.to_path_buf(),
        config,
        versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = r#"{
        "platform": "identity",
        "input": [{"name": "IN", "data_type": "FP32", "dims": [4]}],
        "output": [{"name": "OUT", "data_type": "FP32", "dims": [4]}]
    }"#;

    #[test]
    fn test_scan_selects_latest_version() {
        let root = tempfile::tempdir().unwrap();
        let model = root.path().join("ident");
        std::fs::create_dir_all(model.join("1")).unwrap();
        std::fs::create_dir_all(model.join("4")).unwrap();
        std::fs::create_dir_all(model.join("notes")).unwrap();
        std::fs::write(model.join(CONFIG_FILENAME), IDENTITY).unwrap();
        std::fs::create_dir_all(root.path().join(".hidden")).unwrap();

        let models = scan(root.path()).unwrap();
        assert_eq!(models.len(), 1);
        let def = models[0].definition.as_ref().unwrap();
        assert_eq!(def.versions, vec![4]);
        assert_eq!(def.config.name, "ident");
    }

    #[test]
    fn test_model_without_versions_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let model = root.path().join("ident");
        std::fs::create_dir_all(&model).unwrap();
        std::fs::write(model.join(CONFIG_FILENAME), IDENTITY).unwrap();

        let models = scan(root.path()).unwrap();
        assert!(models[0].definition.is_err());
    }

    #[test]
    fn test_repository_errors() {
        assert!(matches!(scan(Path::new("")), Err(RepositoryError::EmptyPath)));
        assert!(matches!(
            scan(Path::new("/nonexistent/repository")),
            Err(RepositoryError::NotFound(_))
        ));

        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            scan(file.path()),
            Err(RepositoryError::NotADirectory(_))
        ));
    }
}
