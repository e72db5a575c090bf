use crate::{
    model::PolicyValue,
    opt::{Optimizer, OptimizerConfig},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use impala_core::ImpalaError;
use log::info;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// File name of the network parameters in a checkpoint directory.
pub const MODEL_FILE: &str = "model.safetensors";

/// File name of the optimizer state in a checkpoint directory.
pub const OPTIMIZER_FILE: &str = "optimizer.safetensors";

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`ImpalaModel`].
pub struct ImpalaModelConfig<C> {
    pub(super) net_config: Option<C>,
    pub(super) opt_config: OptimizerConfig,
}

impl<C> Default for ImpalaModelConfig<C> {
    fn default() -> Self {
        Self {
            net_config: None,
            opt_config: OptimizerConfig::default(),
        }
    }
}

impl<C> ImpalaModelConfig<C> {
    /// Sets configurations of the policy/value network.
    pub fn net_config(mut self, v: C) -> Self {
        self.net_config = Some(v);
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }
}

/// Policy/value network with its parameters and optimizer.
pub struct ImpalaModel<P>
where
    P: PolicyValue,
{
    varmap: VarMap,
    net: P,
    opt: Optimizer,
}

impl<P> ImpalaModel<P>
where
    P: PolicyValue,
{
    /// Constructs [`ImpalaModel`].
    pub fn build(config: ImpalaModelConfig<P::Config>, device: &Device) -> Result<Self> {
        let net_config = config.net_config.context("net_config is not set.")?;
        let varmap = VarMap::new();
        let net = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
            P::build(vb, net_config)?
        };
        let opt = config.opt_config.build(&varmap)?;

        Ok(Self { varmap, net, opt })
    }

    /// Returns the network.
    pub fn net(&self) -> &P {
        &self.net
    }

    /// Returns the optimizer.
    pub fn optimizer(&self) -> &Optimizer {
        &self.opt
    }

    /// Returns the variables of the network.
    pub fn get_varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Computes gradients of `loss` and updates the parameters.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.opt.backward_step(loss)
    }

    /// Saves the parameters and the optimizer state in directory `path`.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        self.varmap.save(path.join(MODEL_FILE))?;
        self.opt.save(path.join(OPTIMIZER_FILE))?;
        info!("Save impala model to {:?}", path);
        Ok(())
    }

    /// Loads the parameters and the optimizer state from directory `path`.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let path = path.as_ref();
        for file in [MODEL_FILE, OPTIMIZER_FILE] {
            if !path.join(file).is_file() {
                return Err(ImpalaError::CheckpointNotFound(path.join(file)).into());
            }
        }
        self.varmap.load(path.join(MODEL_FILE))?;
        self.opt.load(path.join(OPTIMIZER_FILE))?;
        info!("Load impala model from {:?}", path);
        Ok(())
    }
}
