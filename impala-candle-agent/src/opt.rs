//! Optimizers.
//!
//! Both optimizers keep their buffers per named variable of a [`VarMap`],
//! so that the state saved from one learner can be restored into a freshly
//! built network of the same architecture.
use anyhow::{anyhow, Result};
use candle_core::{backprop::GradStore, safetensors, Device, Tensor, Var};
use candle_nn::VarMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};

const STEP_T: &str = "step_t";

/// Configuration of optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// Stochastic gradient descent.
    Sgd {
        /// Learning rate.
        lr: f64,
        /// Momentum factor. `0` disables the momentum buffer.
        #[serde(default)]
        momentum: f64,
    },

    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_beta1")]
        beta1: f64,
        #[serde(default = "default_beta2")]
        beta2: f64,
        #[serde(default = "default_eps")]
        eps: f64,
        #[serde(default = "default_weight_decay")]
        weight_decay: f64,
    },
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_eps() -> f64 {
    1e-8
}

fn default_weight_decay() -> f64 {
    0.01
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Sgd {
            lr: 0.003,
            momentum: 0.0,
        }
    }
}

impl OptimizerConfig {
    /// Constructs an optimizer over all variables in `varmap`.
    pub fn build(&self, varmap: &VarMap) -> Result<Optimizer> {
        let vars = named_vars(varmap)?;
        match self {
            Self::Sgd { lr, momentum } => Ok(Optimizer::Sgd(Sgd::new(vars, *lr, *momentum)?)),
            Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                Ok(Optimizer::AdamW(AdamW::new(vars, params)?))
            }
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::Sgd { lr: _, momentum } => Self::Sgd { lr, momentum },
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
        }
    }
}

/// Returns the float variables of `varmap` sorted by name.
fn named_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("the variable map is poisoned"))?;
    let mut vars = data
        .iter()
        .filter(|(_, var)| var.dtype().is_float())
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect::<Vec<_>>();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vars)
}

fn zeros_like(var: &Var) -> candle_core::Result<Var> {
    Var::zeros(var.shape(), var.dtype(), var.device())
}

/// Copies `src` into `dest` after checking its shape.
fn restore(dest: &Var, src: Option<&Tensor>, key: &str) -> Result<()> {
    let src = src.ok_or_else(|| anyhow!("missing {} in optimizer state", key))?;
    if src.shape() != dest.shape() {
        return Err(anyhow!(
            "shape mismatch of {}: expected {:?}, got {:?}",
            key,
            dest.shape(),
            src.shape()
        ));
    }
    dest.set(&src.to_dtype(dest.dtype())?)?;
    Ok(())
}

struct VarSgd {
    name: String,
    var: Var,
    momentum_buffer: Option<Var>,
}

/// Stochastic gradient descent with optional momentum.
pub struct Sgd {
    vars: Vec<VarSgd>,
    lr: f64,
    momentum: f64,
    step_t: usize,
}

impl Sgd {
    fn new(vars: Vec<(String, Var)>, lr: f64, momentum: f64) -> Result<Self> {
        let vars = vars
            .into_iter()
            .map(|(name, var)| {
                let momentum_buffer = if momentum > 0.0 {
                    Some(zeros_like(&var)?)
                } else {
                    None
                };
                Ok(VarSgd {
                    name,
                    var,
                    momentum_buffer,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            lr,
            momentum,
            step_t: 0,
        })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        for v in self.vars.iter() {
            if let Some(g) = grads.get(&v.var) {
                let update = match &v.momentum_buffer {
                    Some(buf) => {
                        let next_buf = ((buf.as_tensor() * self.momentum)? + g)?;
                        buf.set(&next_buf)?;
                        next_buf
                    }
                    None => g.clone(),
                };
                let next_theta = (v.var.as_tensor() - (update * self.lr)?)?;
                v.var.set(&next_theta)?;
            }
        }
        Ok(())
    }

    fn state(&self) -> HashMap<String, Tensor> {
        self.vars
            .iter()
            .filter_map(|v| {
                v.momentum_buffer
                    .as_ref()
                    .map(|buf| (format!("{}.momentum", v.name), buf.as_tensor().clone()))
            })
            .collect()
    }

    fn restore_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        for v in self.vars.iter() {
            if let Some(buf) = &v.momentum_buffer {
                let key = format!("{}.momentum", v.name);
                restore(buf, state.get(&key), &key)?;
            }
        }
        Ok(())
    }
}

/// Parameters of [`AdamW`].
#[derive(Clone, Debug)]
pub struct ParamsAdamW {
    /// Learning rate.
    pub lr: f64,
    /// Decay of the first moment.
    pub beta1: f64,
    /// Decay of the second moment.
    pub beta2: f64,
    /// Added to the denominator.
    pub eps: f64,
    /// Decoupled weight decay.
    pub weight_decay: f64,
}

struct VarAdamW {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

/// AdamW optimizer.
pub struct AdamW {
    vars: Vec<VarAdamW>,
    params: ParamsAdamW,
    step_t: usize,
}

impl AdamW {
    fn new(vars: Vec<(String, Var)>, params: ParamsAdamW) -> Result<Self> {
        let vars = vars
            .into_iter()
            .map(|(name, var)| {
                let first_moment = zeros_like(&var)?;
                let second_moment = zeros_like(&var)?;
                Ok(VarAdamW {
                    name,
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            params,
            step_t: 0,
        })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let lr = self.params.lr;
        let beta1 = self.params.beta1;
        let beta2 = self.params.beta2;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step_t as i32));
        for v in self.vars.iter() {
            let theta = &v.var;
            let m = &v.first_moment;
            let s = &v.second_moment;
            if let Some(g) = grads.get(theta) {
                let next_m = ((m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
                let next_s = ((s.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
                let m_hat = (&next_m * scale_m)?;
                let s_hat = (&next_s * scale_v)?;
                let next_theta = (theta.as_tensor() * (1f64 - lr * self.params.weight_decay))?;
                let adjusted_grad = (m_hat / (s_hat.sqrt()? + self.params.eps)?)?;
                let next_theta = (next_theta - (adjusted_grad * lr)?)?;
                m.set(&next_m)?;
                s.set(&next_s)?;
                theta.set(&next_theta)?;
            }
        }
        Ok(())
    }

    fn state(&self) -> HashMap<String, Tensor> {
        let mut state = HashMap::new();
        for v in self.vars.iter() {
            state.insert(
                format!("{}.first_moment", v.name),
                v.first_moment.as_tensor().clone(),
            );
            state.insert(
                format!("{}.second_moment", v.name),
                v.second_moment.as_tensor().clone(),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        for v in self.vars.iter() {
            let key = format!("{}.first_moment", v.name);
            restore(&v.first_moment, state.get(&key), &key)?;
            let key = format!("{}.second_moment", v.name);
            restore(&v.second_moment, state.get(&key), &key)?;
        }
        Ok(())
    }
}

/// Optimizers.
pub enum Optimizer {
    /// Stochastic gradient descent.
    Sgd(Sgd),

    /// AdamW optimizer.
    AdamW(AdamW),
}

impl Optimizer {
    /// Applies a backward step pass.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Updates the variables with the given gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::Sgd(opt) => opt.step(grads),
            Self::AdamW(opt) => opt.step(grads),
        }
    }

    /// Returns the current learning rate.
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd(opt) => opt.lr,
            Self::AdamW(opt) => opt.params.lr,
        }
    }

    /// Sets the learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd(opt) => opt.lr = lr,
            Self::AdamW(opt) => opt.params.lr = lr,
        }
    }

    /// Number of optimization steps done so far.
    pub fn step_t(&self) -> usize {
        match self {
            Self::Sgd(opt) => opt.step_t,
            Self::AdamW(opt) => opt.step_t,
        }
    }

    fn device(&self) -> Device {
        let var = match self {
            Self::Sgd(opt) => opt.vars.first().map(|v| &v.var),
            Self::AdamW(opt) => opt.vars.first().map(|v| &v.var),
        };
        var.map(|v| v.device().clone()).unwrap_or(Device::Cpu)
    }

    /// Saves the internal state of the optimizer as safetensors.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let mut state = match self {
            Self::Sgd(opt) => opt.state(),
            Self::AdamW(opt) => opt.state(),
        };
        state.insert(
            STEP_T.to_string(),
            Tensor::new(self.step_t() as i64, &Device::Cpu)?,
        );
        safetensors::save(&state, path.as_ref())?;
        info!("Save optimizer to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the internal state of the optimizer saved with [`Optimizer::save`].
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let state = safetensors::load(path.as_ref(), &self.device())?;
        let step_t = state
            .get(STEP_T)
            .ok_or_else(|| anyhow!("missing {} in optimizer state", STEP_T))?
            .to_scalar::<i64>()? as usize;
        match self {
            Self::Sgd(opt) => {
                opt.restore_state(&state)?;
                opt.step_t = step_t;
            }
            Self::AdamW(opt) => {
                opt.restore_state(&state)?;
                opt.step_t = step_t;
            }
        }
        info!("Load optimizer from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};
    use tempdir::TempDir;

    fn quadratic(varmap: &VarMap) -> Result<Tensor> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(3, "w", Init::Const(1.0))?;
        Ok(w.sqr()?.sum_all()?)
    }

    fn weights(varmap: &VarMap) -> Result<Vec<f32>> {
        let vars = named_vars(varmap)?;
        Ok(vars[0].1.as_tensor().to_vec1::<f32>()?)
    }

    #[test]
    fn test_sgd_step() -> Result<()> {
        let varmap = VarMap::new();
        let loss = quadratic(&varmap)?;
        let mut opt = OptimizerConfig::Sgd {
            lr: 0.1,
            momentum: 0.0,
        }
        .build(&varmap)?;
        opt.backward_step(&loss)?;

        // w - lr * 2w
        for w in weights(&varmap)? {
            assert!((w - 0.8).abs() < 1e-6);
        }
        assert_eq!(opt.step_t(), 1);
        Ok(())
    }

    #[test]
    fn test_sgd_momentum() -> Result<()> {
        let varmap = VarMap::new();
        let _ = quadratic(&varmap)?;
        let mut opt = OptimizerConfig::Sgd {
            lr: 0.1,
            momentum: 0.5,
        }
        .build(&varmap)?;
        for _ in 0..2 {
            let loss = quadratic(&varmap)?;
            opt.backward_step(&loss)?;
        }

        // step 1: buf = 2, w = 0.8; step 2: buf = 0.5 * 2 + 1.6 = 2.6, w = 0.54
        for w in weights(&varmap)? {
            assert!((w - 0.54).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_save_and_load_continues_identically() -> Result<()> {
        let config = OptimizerConfig::AdamW {
            lr: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let tmp = TempDir::new("impala_opt")?;
        let path = tmp.path().join("optimizer.safetensors");
        let model_path = tmp.path().join("model.safetensors");

        let varmap1 = VarMap::new();
        let _ = quadratic(&varmap1)?;
        let mut opt1 = config.build(&varmap1)?;
        opt1.backward_step(&quadratic(&varmap1)?)?;
        opt1.save(&path)?;
        varmap1.save(&model_path)?;

        let mut varmap2 = VarMap::new();
        let _ = quadratic(&varmap2)?;
        let mut opt2 = config.build(&varmap2)?;
        opt2.load(&path)?;
        varmap2.load(&model_path)?;
        assert_eq!(opt2.step_t(), 1);

        opt1.backward_step(&quadratic(&varmap1)?)?;
        opt2.backward_step(&quadratic(&varmap2)?)?;
        assert_eq!(weights(&varmap1)?, weights(&varmap2)?);
        Ok(())
    }

    #[test]
    fn test_load_rejects_missing_buffer() -> Result<()> {
        let tmp = TempDir::new("impala_opt")?;
        let path = tmp.path().join("optimizer.safetensors");

        let varmap1 = VarMap::new();
        let _ = quadratic(&varmap1)?;
        OptimizerConfig::default().build(&varmap1)?.save(&path)?;

        let varmap2 = VarMap::new();
        let _ = quadratic(&varmap2)?;
        let mut opt = OptimizerConfig::Sgd {
            lr: 0.1,
            momentum: 0.9,
        }
        .build(&varmap2)?;
        assert!(opt.load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_serde_optimizer_config() -> Result<()> {
        let config = OptimizerConfig::AdamW {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        };
        let yaml = serde_yaml::to_string(&config)?;
        assert_eq!(config, serde_yaml::from_str(&yaml)?);

        let sgd: OptimizerConfig = serde_yaml::from_str("Sgd:\n  lr: 0.003\n")?;
        assert_eq!(sgd, OptimizerConfig::default());
        Ok(())
    }
}
