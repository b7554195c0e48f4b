//! Platform registry and the built-in executors.
//!
//! A model's `platform` field selects the factory that builds its executor.
//! Two platforms ship with the engine:
//!
//! - `identity`: output *i* is a copy of input *i*
//! - `add_sub`: `OUTPUT0 = INPUT0 + INPUT1`, `OUTPUT1 = INPUT0 - INPUT1`

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use half::f16;
use tracing::debug;

use crate::backend::ModelExecutor;
use crate::error::{Result, Status};
use crate::model::config::{DataType, ModelConfig};
use crate::provider::memory::{read_elements, write_elements};
use crate::provider::{InferRequestProvider, InferResponseProvider};

pub const IDENTITY_PLATFORM: &str = "identity";
pub const ADD_SUB_PLATFORM: &str = "add_sub";

/// Builds an executor for one loaded model version from its config and
/// version directory.
pub type ExecutorFactory =
    Arc<dyn Fn(&ModelConfig, &Path) -> Result<Arc<dyn ModelExecutor>> + Send + Sync>;

/// Maps platform names to executor factories.
#[derive(Clone)]
pub struct PlatformRegistry {
    factories: BTreeMap<String, ExecutorFactory>,
}

impl fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PlatformRegistry {
    /// A registry with no platforms at all.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with `identity` and `add_sub`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(IDENTITY_PLATFORM, |config, _| {
            Ok(Arc::new(IdentityExecutor::new(config)?) as Arc<dyn ModelExecutor>)
        });
        registry.register(ADD_SUB_PLATFORM, |config, _| {
            Ok(Arc::new(AddSubExecutor::new(config)?) as Arc<dyn ModelExecutor>)
        });
        registry
    }

    /// Register (or replace) a platform.
    pub fn register<F>(&mut self, platform: impl Into<String>, factory: F)
    where
        F: Fn(&ModelConfig, &Path) -> Result<Arc<dyn ModelExecutor>> + Send + Sync + 'static,
    {
        self.factories.insert(platform.into(), Arc::new(factory));
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.factories.contains_key(platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the executor for `config`.
    pub fn create_executor(
        &self,
        config: &ModelConfig,
        version_dir: &Path,
    ) -> Result<Arc<dyn ModelExecutor>> {
        let factory = self.factories.get(&config.platform).ok_or_else(|| {
            Status::unsupported(format!(
                "platform '{}' of model '{}' is not supported",
                config.platform, config.name
            ))
        })?;
        debug!(
            model = %config.name,
            platform = %config.platform,
            dir = %version_dir.display(),
            "Creating executor"
        );
        factory(config, version_dir)
    }
}

/// Copies each input to the output at the same position.
#[derive(Debug)]
pub struct IdentityExecutor {
    pairs: Vec<(String, String)>,
}

impl IdentityExecutor {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        if config.input.len() != config.output.len() {
            return Err(Status::invalid_arg(format!(
                "identity model '{}' must have as many outputs as inputs",
                config.name
            )));
        }
        let pairs = config
            .input
            .iter()
            .zip(&config.output)
            .map(|(input, output)| {
                if input.data_type != output.data_type {
                    return Err(Status::invalid_arg(format!(
                        "identity model '{}' maps {:?} input '{}' to {:?} output '{}'",
                        config.name, input.data_type, input.name, output.data_type, output.name
                    )));
                }
                Ok((input.name.clone(), output.name.clone()))
            })
            .collect::<Result<_>>()?;
        Ok(Self { pairs })
    }
}

#[async_trait]
impl ModelExecutor for IdentityExecutor {
    async fn execute(
        &self,
        request: &InferRequestProvider,
        response: &mut InferResponseProvider,
    ) -> Result<()> {
        for (input_name, output_name) in &self.pairs {
            let input = request.input(input_name)?;
            response.set_output(output_name, input.dims.clone(), input.data.clone())?;
        }
        Ok(())
    }
}

/// Elementwise sum and difference of two same-typed inputs.
#[derive(Debug)]
pub struct AddSubExecutor {
    data_type: DataType,
    inputs: [String; 2],
    outputs: [String; 2],
}

impl AddSubExecutor {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        if config.input.len() != 2 || config.output.len() != 2 {
            return Err(Status::invalid_arg(format!(
                "add_sub model '{}' must have exactly 2 inputs and 2 outputs",
                config.name
            )));
        }
        let data_type = config.input[0].data_type;
        let tensors = config
            .input
            .iter()
            .map(|t| (&t.name, t.data_type))
            .chain(config.output.iter().map(|t| (&t.name, t.data_type)));
        for (name, dt) in tensors {
            if dt != data_type {
                return Err(Status::invalid_arg(format!(
                    "add_sub model '{}' expects every tensor to be {data_type:?}, '{name}' is {dt:?}",
                    config.name
                )));
            }
        }
        if data_type == DataType::Bool {
            return Err(Status::unsupported(format!(
                "add_sub model '{}' does not support BOOL tensors",
                config.name
            )));
        }

        Ok(Self {
            data_type,
            inputs: [config.input[0].name.clone(), config.input[1].name.clone()],
            outputs: [config.output[0].name.clone(), config.output[1].name.clone()],
        })
    }
}

#[async_trait]
impl ModelExecutor for AddSubExecutor {
    async fn execute(
        &self,
        request: &InferRequestProvider,
        response: &mut InferResponseProvider,
    ) -> Result<()> {
        let lhs = request.input(&self.inputs[0])?;
        let rhs = request.input(&self.inputs[1])?;
        if lhs.dims != rhs.dims {
            return Err(Status::invalid_arg(format!(
                "{} and {} must have the same shape",
                self.inputs[0], self.inputs[1]
            )));
        }

        let (sum, diff) = match self.data_type {
            DataType::Uint8 => add_sub::<u8>(&lhs.data, &rhs.data),
            DataType::Uint16 => add_sub::<u16>(&lhs.data, &rhs.data),
            DataType::Uint32 => add_sub::<u32>(&lhs.data, &rhs.data),
            DataType::Uint64 => add_sub::<u64>(&lhs.data, &rhs.data),
            DataType::Int8 => add_sub::<i8>(&lhs.data, &rhs.data),
            DataType::Int16 => add_sub::<i16>(&lhs.data, &rhs.data),
            DataType::Int32 => add_sub::<i32>(&lhs.data, &rhs.data),
            DataType::Int64 => add_sub::<i64>(&lhs.data, &rhs.data),
            DataType::Fp16 => add_sub::<f16>(&lhs.data, &rhs.data),
            DataType::Fp32 => add_sub::<f32>(&lhs.data, &rhs.data),
            DataType::Fp64 => add_sub::<f64>(&lhs.data, &rhs.data),
            DataType::Bool => {
                return Err(Status::unsupported("add_sub does not support BOOL tensors"))
            }
        };

        response.set_output(&self.outputs[0], lhs.dims.clone(), sum)?;
        response.set_output(&self.outputs[1], lhs.dims.clone(), diff)?;
        Ok(())
    }
}

trait Arith: bytemuck::Pod {
    fn plus(self, other: Self) -> Self;
    fn minus(self, other: Self) -> Self;
}

macro_rules! wrapping_arith {
    ($($t:ty),*) => {
        $(impl Arith for $t {
            fn plus(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            fn minus(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }
        })*
    };
}

macro_rules! float_arith {
    ($($t:ty),*) => {
        $(impl Arith for $t {
            fn plus(self, other: Self) -> Self {
                self + other
            }
            fn minus(self, other: Self) -> Self {
                self - other
            }
        })*
    };
}

wrapping_arith!(u8, u16, u32, u64, i8, i16, i32, i64);
float_arith!(f16, f32, f64);

fn add_sub<T: Arith>(lhs: &[u8], rhs: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let lhs = read_elements::<T>(lhs);
    let rhs = read_elements::<T>(rhs);
    let sum: Vec<T> = lhs.iter().zip(&rhs).map(|(a, b)| a.plus(*b)).collect();
    let diff: Vec<T> = lhs.iter().zip(&rhs).map(|(a, b)| a.minus(*b)).collect();
    (write_elements(&sum), write_elements(&diff))
}
