//! Model definitions.
//!
//! - [`config`]: per-model configuration and tensor metadata
//! - [`labels`]: class labels for classification outputs
//! - [`repository`]: model repository scanning and version selection

pub mod config;
pub mod labels;
pub mod repository;
