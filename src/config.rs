//! Runtime configuration for tensor-serve.
//!
//! Server options can be loaded from a JSON file or built programmatically
//! (the C surface builds them through `TSERVE_ServerOptions*` calls).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments for the `tserve-simple` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "tserve-simple", about = "Run one inference through the tensor-serve C API")]
pub struct Cli {
    /// Model repository absolute path.
    #[arg(short = 'r', long = "model-repository")]
    pub model_repository: Option<PathBuf>,

    /// Optional server options file (JSON).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name of an `add_sub` model to run.
    #[arg(short, long, default_value = "simple")]
    pub model: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Startup parameters consumed once by server creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Directory scanned for models at startup.
    pub model_repository_path: PathBuf,

    /// Identifier reported in server status. Empty means "generate one".
    pub server_id: String,

    /// Require every discovered model to load before reporting ready.
    pub strict_readiness: bool,

    /// How long deletion waits for in-flight requests to complete.
    pub exit_timeout_secs: u64,

    /// Engine worker threads (0 = one per core).
    pub worker_threads: usize,

    /// Per-model queue depth before submissions are rejected.
    pub queue_capacity: usize,

    /// Collect prometheus metrics.
    pub metrics: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            model_repository_path: PathBuf::new(),
            server_id: String::new(),
            strict_readiness: true,
            exit_timeout_secs: 30,
            worker_threads: 0,
            queue_capacity: 1024,
            metrics: true,
        }
    }
}

impl ServerOptions {
    /// Load options from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let options: ServerOptions = serde_json::from_str(&data)?;
            Ok(options)
        } else {
            tracing::warn!("Options file not found at {:?}, using defaults", path);
            Ok(ServerOptions::default())
        }
    }

    pub fn set_model_repository_path(&mut self, path: impl Into<PathBuf>) {
        self.model_repository_path = path.into();
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(self.exit_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ServerOptions::default();
        assert!(opts.strict_readiness);
        assert_eq!(opts.exit_timeout(), Duration::from_secs(30));
        assert!(opts.model_repository_path.as_os_str().is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let opts: ServerOptions =
            serde_json::from_str(r#"{"model_repository_path": "/models", "metrics": false}"#)
                .unwrap();
        assert_eq!(opts.model_repository_path, PathBuf::from("/models"));
        assert!(!opts.metrics);
        assert_eq!(opts.queue_capacity, 1024);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let opts = ServerOptions::load(Path::new("/nonexistent/tserve.json")).unwrap();
        assert_eq!(opts.exit_timeout_secs, 30);
    }
}
