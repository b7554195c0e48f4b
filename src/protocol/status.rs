//! Server and model status snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::config::ModelConfig;
use crate::protocol::WireMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerReadyState {
    #[default]
    Invalid,
    Initializing,
    Ready,
    Exiting,
    FailedToInitialize,
}

impl ServerReadyState {
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServerReadyState::Initializing | ServerReadyState::Ready | ServerReadyState::Exiting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelReadyState {
    #[default]
    Unknown,
    Loading,
    Ready,
    Unavailable,
}

/// Count and cumulative duration of a class of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDuration {
    pub count: u64,
    pub total_time_ns: u64,
}

impl StatDuration {
    pub fn record(&mut self, nanos: u64) {
        self.count += 1;
        self.total_time_ns += nanos;
    }
}

/// Request statistics for one batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferRequestStats {
    pub success: StatDuration,
    pub failed: StatDuration,
    pub compute: StatDuration,
    pub queue: StatDuration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelVersionStatus {
    pub ready_state: ModelReadyState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Keyed by batch size.
    #[serde(default)]
    pub infer_stats: BTreeMap<u32, InferRequestStats>,

    #[serde(default)]
    pub model_execution_count: u64,

    #[serde(default)]
    pub model_inference_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Absent when the model configuration could not be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ModelConfig>,

    /// Why the model as a whole is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub version_status: BTreeMap<u64, ModelVersionStatus>,
}

impl ModelStatus {
    /// A model is fully loaded when its config was read and every selected version is ready.
    pub fn is_fully_ready(&self) -> bool {
        self.config.is_some()
            && !self.version_status.is_empty()
            && self
                .version_status
                .values()
                .all(|v| v.ready_state == ModelReadyState::Ready)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub id: String,
    pub version: String,
    pub ready_state: ServerReadyState,
    pub uptime_ns: u64,
    #[serde(default)]
    pub model_status: BTreeMap<String, ModelStatus>,
}

impl WireMessage for ServerStatus {
    const NAME: &'static str = "ServerStatus";
}
