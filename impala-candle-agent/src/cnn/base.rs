use super::PolicyValueCnnConfig;
use crate::model::{PolicyValue, SubModel1};
use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use candle_nn::{
    conv::Conv2dConfig,
    conv2d, linear,
    ops::leaky_relu,
    sequential::{seq, Sequential},
    Linear, Module, VarBuilder,
};

/// Convolutional network with a policy head and a value head on a shared trunk.
///
/// The trunk has three convolutional layers followed by a hidden linear layer,
/// each followed by leaky ReLU.
pub struct PolicyValueCnn {
    n_actions: usize,
    obs_shape: Vec<usize>,
    device: Device,
    trunk: Sequential,
    pi: Linear,
    v: Linear,
}

impl PolicyValueCnn {
    fn stride(s: usize) -> Conv2dConfig {
        Conv2dConfig {
            stride: s,
            ..Default::default()
        }
    }

    fn create_trunk(vb: &VarBuilder, config: &PolicyValueCnnConfig) -> Result<Sequential> {
        let flat_dim = config.flat_dim().ok_or_else(|| {
            anyhow!(
                "input shape {:?} is too small for the convolutional layers",
                config.obs_shape()
            )
        })?;
        let slope = config.negative_slope;
        let seq = seq()
            .add(conv2d(
                config.in_channels,
                32,
                8,
                Self::stride(4),
                vb.pp("c1"),
            )?)
            .add_fn(move |xs| leaky_relu(xs, slope))
            .add(conv2d(32, 64, 4, Self::stride(2), vb.pp("c2"))?)
            .add_fn(move |xs| leaky_relu(xs, slope))
            .add(conv2d(64, 64, 3, Self::stride(1), vb.pp("c3"))?)
            .add_fn(move |xs| leaky_relu(xs, slope)?.flatten_from(1))
            .add(linear(flat_dim, config.hidden, vb.pp("l1"))?)
            .add_fn(move |xs| leaky_relu(xs, slope));

        Ok(seq)
    }
}

impl SubModel1 for PolicyValueCnn {
    type Config = PolicyValueCnnConfig;
    type Input = Tensor;
    type Output = (Tensor, Tensor);

    fn forward(&self, xs: &Self::Input) -> Result<Self::Output> {
        let h = self.trunk.forward(&xs.to_device(&self.device)?)?;
        Ok((self.pi.forward(&h)?, self.v.forward(&h)?))
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let device = vb.device().clone();
        let trunk = Self::create_trunk(&vb, &config)?;
        let pi = linear(config.hidden, config.n_actions, vb.pp("pi"))?;
        let v = linear(config.hidden, 1, vb.pp("v"))?;

        Ok(Self {
            n_actions: config.n_actions,
            obs_shape: config.obs_shape(),
            device,
            trunk,
            pi,
            v,
        })
    }
}

impl PolicyValue for PolicyValueCnn {
    fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn obs_shape(&self) -> Option<Vec<usize>> {
        Some(self.obs_shape.clone())
    }

    fn policy_only(&self, xs: &Tensor) -> Result<Tensor> {
        let h = self.trunk.forward(&xs.to_device(&self.device)?)?;
        Ok(self.pi.forward(&h)?)
    }

    fn value_only(&self, xs: &Tensor) -> Result<Tensor> {
        let h = self.trunk.forward(&xs.to_device(&self.device)?)?;
        Ok(self.v.forward(&h)?)
    }
}
