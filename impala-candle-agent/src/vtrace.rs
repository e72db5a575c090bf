//! V-trace targets.
//!
//! Targets are computed by a backward pass over the steps of a
//! [`TensorTrajectory`]. Carried tensors keep one row per batch entry and are
//! padded with zero rows when the batch grows going backward, so that row `j`
//! always belongs to the same trajectory segment.
use crate::{model::PolicyValue, TensorTrajectory};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::softmax;
use impala_core::ImpalaError;
use log::{trace, warn};
use serde::{Deserialize, Serialize};

/// Configuration of V-trace.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct VTraceConfig {
    /// Discount factor.
    pub gamma: f64,

    /// Clipping threshold of the importance ratio in the TD residual (ρ̄).
    pub clip_rho_threshold: f64,

    /// Clipping threshold of the importance ratio in the trace (c̄).
    pub clip_c_threshold: f64,
}

impl Default for VTraceConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            clip_rho_threshold: 1.0,
            clip_c_threshold: 1.0,
        }
    }
}

impl VTraceConfig {
    /// Sets the discount factor.
    pub fn gamma(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets ρ̄.
    pub fn clip_rho_threshold(mut self, v: f64) -> Self {
        self.clip_rho_threshold = v;
        self
    }

    /// Sets c̄.
    pub fn clip_c_threshold(mut self, v: f64) -> Self {
        self.clip_c_threshold = v;
        self
    }

    /// Checks the ranges of the parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ImpalaError::InvalidConfig(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            ))
            .into());
        }
        if !(self.clip_rho_threshold > 0.0 && self.clip_c_threshold > 0.0) {
            return Err(ImpalaError::InvalidConfig(format!(
                "clipping thresholds must be positive, got {} and {}",
                self.clip_rho_threshold, self.clip_c_threshold
            ))
            .into());
        }
        if self.clip_c_threshold > self.clip_rho_threshold {
            warn!(
                "clip_c_threshold {} exceeds clip_rho_threshold {}",
                self.clip_c_threshold, self.clip_rho_threshold
            );
        }
        Ok(())
    }
}

/// Value targets and policy-gradient advantages, one `(data_sizes[t], 1)`
/// tensor per step. Both are detached from the computation graph.
pub struct VTraceTargets {
    /// V-trace value targets.
    pub vs: Vec<Tensor>,

    /// Advantages for the policy gradient.
    pub pg_advantages: Vec<Tensor>,
}

/// Appends zero rows to `xs` so that it has `rows` rows.
///
/// Fails if `xs` already has more than `rows` rows.
pub fn pad_rows(xs: &Tensor, rows: usize) -> Result<Tensor> {
    let n = xs.dim(0)?;
    if n > rows {
        return Err(ImpalaError::ShapeMismatch(format!(
            "cannot pad {} rows down to {}",
            n, rows
        ))
        .into());
    }
    if n == rows {
        return Ok(xs.clone());
    }
    if n == 0 {
        let mut dims = xs.dims().to_vec();
        dims[0] = rows;
        return Ok(Tensor::zeros(dims, xs.dtype(), xs.device())?);
    }
    Ok(xs.pad_with_zeros(0, 0, rows - n)?)
}

fn empty_column(device: &Device) -> Result<Tensor> {
    Ok(Tensor::zeros((0, 1), DType::F32, device)?)
}

/// Computes V-trace targets for `traj` with the current network.
pub fn compute<P: PolicyValue>(
    net: &P,
    traj: &TensorTrajectory,
    config: &VTraceConfig,
) -> Result<VTraceTargets> {
    let t_max = traj.t_max();
    let gamma = config.gamma;
    let device = traj.states(0).device().clone();

    let mut prev_obs_size = traj.observation_size(t_max);
    let mut prev_value = if prev_obs_size > 0 {
        net.value_only(traj.states(t_max))?.detach()
    } else {
        empty_column(&device)?
    };
    let mut prev_v = prev_value.clone();
    let mut sum_delta = Tensor::zeros((prev_obs_size, 1), DType::F32, &device)?;
    let mut vs_list = Vec::with_capacity(t_max);
    let mut pg_advantage_list = Vec::with_capacity(t_max);

    for t in (0..t_max).rev() {
        let data_size = traj.data_size(t);
        let obs_size = traj.observation_size(t);
        if data_size != prev_obs_size {
            prev_value = pad_rows(&prev_value, data_size)?;
            prev_v = pad_rows(&prev_v, data_size)?;
            sum_delta = pad_rows(&sum_delta, data_size)?;
        }

        if obs_size == 0 {
            vs_list.push(empty_column(&device)?);
            pg_advantage_list.push(empty_column(&device)?);
            prev_value = empty_column(&device)?;
            prev_v = empty_column(&device)?;
            sum_delta = empty_column(&device)?;
            prev_obs_size = 0;
            continue;
        }

        let (logits, value_obs) = net.forward(traj.states(t))?;
        let value_obs = value_obs.detach();

        let vs = if data_size > 0 {
            let logits = logits.detach().narrow(0, 0, data_size)?;
            let value = value_obs.narrow(0, 0, data_size)?;
            let rewards = traj.rewards(t);
            let probs = softmax(&logits, D::Minus1)?;
            let target_policy = probs.gather(traj.actions(t), 1)?;
            let policy_ratio = (target_policy / traj.behaviour_policy(t))?;
            let rho = policy_ratio.minimum(config.clip_rho_threshold)?;
            let c = policy_ratio.minimum(config.clip_c_threshold)?;

            let delta = (&rho * ((rewards + (&prev_value * gamma)?)? - &value)?)?;
            sum_delta = (delta + ((c * gamma)? * &sum_delta)?)?;
            let vs = (&sum_delta + &value)?;
            let pg_advantage = (&rho * ((rewards + (&prev_v * gamma)?)? - &value)?)?;
            vs_list.push(vs.clone());
            pg_advantage_list.push(pg_advantage);
            vs
        } else {
            vs_list.push(empty_column(&device)?);
            pg_advantage_list.push(empty_column(&device)?);
            empty_column(&device)?
        };

        // Entries in [data_size, obs_size) only have a bootstrap observation
        if obs_size != data_size {
            sum_delta = pad_rows(&sum_delta, obs_size)?;
            prev_v = (&sum_delta + &value_obs)?;
        } else {
            prev_v = vs;
        }
        prev_value = value_obs;
        prev_obs_size = obs_size;
        trace!("V-trace step {}: {} transitions, {} observations", t, data_size, obs_size);
    }

    vs_list.reverse();
    pg_advantage_list.reverse();
    Ok(VTraceTargets {
        vs: vs_list,
        pg_advantages: pg_advantage_list,
    })
}
