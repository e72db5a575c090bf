//! Configuration of IMPALA learner.
use super::ImpalaModelConfig;
use crate::{loss::LossConfig, opt::OptimizerConfig, vtrace::VTraceConfig, Device};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Impala`](super::Impala).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ImpalaConfig<C> {
    /// Configuration of the network and the optimizer.
    pub model_config: ImpalaModelConfig<C>,

    /// Configuration of V-trace.
    pub vtrace_config: VTraceConfig,

    /// Configuration of the loss.
    pub loss_config: LossConfig,

    /// Shape of a single observation.
    pub obs_shape: Vec<usize>,

    /// Device used for the network.
    pub device: Option<Device>,

    /// Seed of the action sampler.
    pub seed: u64,
}

impl<C> Default for ImpalaConfig<C> {
    fn default() -> Self {
        Self {
            model_config: Default::default(),
            vtrace_config: Default::default(),
            loss_config: Default::default(),
            obs_shape: vec![3, 80, 80],
            device: None,
            seed: 42,
        }
    }
}

impl<C> ImpalaConfig<C> {
    /// Sets the configuration of the policy/value network.
    pub fn net_config(mut self, v: C) -> Self {
        self.model_config = self.model_config.net_config(v);
        self
    }

    /// Sets the optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.model_config = self.model_config.opt_config(v);
        self
    }

    /// Sets the configuration of V-trace.
    pub fn vtrace_config(mut self, v: VTraceConfig) -> Self {
        self.vtrace_config = v;
        self
    }

    /// Sets the configuration of the loss.
    pub fn loss_config(mut self, v: LossConfig) -> Self {
        self.loss_config = v;
        self
    }

    /// Sets the shape of a single observation.
    pub fn obs_shape(mut self, v: Vec<usize>) -> Self {
        self.obs_shape = v;
        self
    }

    /// Device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Sets the seed of the action sampler.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }
}

impl<C> ImpalaConfig<C>
where
    C: Serialize + serde::de::DeserializeOwned,
{
    /// Constructs [`ImpalaConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ImpalaConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
