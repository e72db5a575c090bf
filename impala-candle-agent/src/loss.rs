//! Losses of the policy/value network.
use crate::{model::PolicyValue, vtrace::VTraceTargets, TensorTrajectory};
use anyhow::Result;
use candle_core::{DType, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use impala_core::Losses;
use serde::{Deserialize, Serialize};

/// Configuration of the loss.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LossConfig {
    /// Coefficient of the entropy loss (β).
    pub entropy_coef: f64,

    /// Log-probabilities are clipped from below at `ln(min_prob)`.
    pub min_prob: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            entropy_coef: 1e-3,
            min_prob: 1e-6,
        }
    }
}

impl LossConfig {
    /// Sets the coefficient of the entropy loss.
    pub fn entropy_coef(mut self, v: f64) -> Self {
        self.entropy_coef = v;
        self
    }

    /// Sets the probability at which log-probabilities are clipped.
    pub fn min_prob(mut self, v: f64) -> Self {
        self.min_prob = v;
        self
    }
}

/// Scalar loss tensors, each normalized by the number of valid transitions.
pub struct LossTerms {
    /// Value loss.
    pub v_loss: Tensor,

    /// Policy-gradient loss.
    pub pi_loss: Tensor,

    /// Entropy loss.
    pub entropy_loss: Tensor,
}

impl LossTerms {
    /// `0.5 * v_loss + pi_loss + entropy_coef * entropy_loss`.
    pub fn total(&self, entropy_coef: f64) -> Result<Tensor> {
        let loss = ((&self.v_loss * 0.5)? + &self.pi_loss)?;
        Ok((loss + (&self.entropy_loss * entropy_coef)?)?)
    }

    /// Extracts the values of the losses.
    pub fn to_losses(&self) -> Result<Losses> {
        Ok(Losses {
            v_loss: self.v_loss.to_scalar::<f32>()?,
            pi_loss: self.pi_loss.to_scalar::<f32>()?,
            entropy_loss: self.entropy_loss.to_scalar::<f32>()?,
        })
    }
}

/// Computes the losses of `net` on `traj` against fixed V-trace targets.
pub fn compute<P: PolicyValue>(
    net: &P,
    traj: &TensorTrajectory,
    targets: &VTraceTargets,
    config: &LossConfig,
) -> Result<LossTerms> {
    let device = traj.states(0).device();
    let log_floor = config.min_prob.ln();
    let mut v_loss = Tensor::zeros((), DType::F32, device)?;
    let mut pi_loss = Tensor::zeros((), DType::F32, device)?;
    let mut entropy_loss = Tensor::zeros((), DType::F32, device)?;

    for t in 0..traj.t_max() {
        if traj.data_size(t) == 0 {
            continue;
        }
        let (logits, v) = net.forward(&traj.transition_states(t)?)?;
        let v_err = (v - &targets.vs[t])?.sqr()?.sum_all()?;
        v_loss = (v_loss + (v_err * 0.5)?)?;

        let probs = softmax(&logits, D::Minus1)?;
        let log_probs = log_softmax(&logits, D::Minus1)?.maximum(log_floor)?;
        let log_pi = log_probs.gather(traj.actions(t), 1)?;
        let pg = (log_pi * &targets.pg_advantages[t])?.sum_all()?;
        pi_loss = (pi_loss - pg)?;
        entropy_loss = (entropy_loss + (log_probs * probs)?.sum_all()?)?;
    }

    let n = traj.num_samples() as f64;
    Ok(LossTerms {
        v_loss: (v_loss / n)?,
        pi_loss: (pi_loss / n)?,
        entropy_loss: (entropy_loss / n)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing::stub_net, vtrace};
    use candle_core::Device;
    use candle_nn::VarMap;
    use impala_core::{TrajectoryBatch, TrajectorySegment};

    fn batch() -> TrajectoryBatch {
        let segments = vec![
            TrajectorySegment {
                observations: vec![vec![0.0], vec![0.0], vec![0.0]],
                actions: vec![0, 1],
                rewards: vec![1.0, -0.5],
                behaviour_policy: vec![0.5, 0.2],
            },
            TrajectorySegment {
                observations: vec![vec![0.0]],
                actions: vec![2],
                rewards: vec![2.0],
                behaviour_policy: vec![0.3],
            },
        ];
        TrajectoryBatch::from_segments(segments, 2, vec![1]).unwrap()
    }

    fn losses(batch: &TrajectoryBatch) -> Result<Losses> {
        let varmap = VarMap::new();
        let net = stub_net(&varmap)?;
        let traj = TensorTrajectory::from_batch(batch, 4, &Device::Cpu)?;
        let targets = vtrace::compute(&net, &traj, &Default::default())?;
        compute(&net, &traj, &targets, &LossConfig::default())?.to_losses()
    }

    #[test]
    fn test_entropy_of_fixed_policy() -> Result<()> {
        let out = losses(&batch())?;
        assert!(out.is_finite());

        // Every row has probabilities [1/2, 1/6, 1/6, 1/6].
        let p: [f32; 4] = [0.5, 1. / 6., 1. / 6., 1. / 6.];
        let neg_entropy: f32 = p.iter().map(|p| p * p.ln()).sum();
        assert!((out.entropy_loss - neg_entropy).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_reward_scaling() -> Result<()> {
        // The stub network has zero values on zero observations, so value
        // targets scale linearly with rewards.
        let base = losses(&batch())?;
        for k in [2.0f32, 10.0] {
            let scaled = losses(&batch().scale_rewards(k))?;
            assert!((scaled.v_loss - k * k * base.v_loss).abs() < 1e-4 * k * k);
            assert!((scaled.pi_loss - k * base.pi_loss).abs() < 1e-4 * k);
            assert!((scaled.entropy_loss - base.entropy_loss).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_steps_without_transitions_are_skipped() -> Result<()> {
        // Every segment ends at t = 0, so steps 1 and 2 have no transitions.
        let segments = |n: usize| {
            let segments = vec![
                TrajectorySegment {
                    observations: vec![vec![0.3], vec![0.6]],
                    actions: vec![0],
                    rewards: vec![1.0],
                    behaviour_policy: vec![0.5],
                },
                TrajectorySegment {
                    observations: vec![vec![0.2]],
                    actions: vec![3],
                    rewards: vec![-1.0],
                    behaviour_policy: vec![0.2],
                },
            ];
            TrajectoryBatch::from_segments(segments, n, vec![1]).unwrap()
        };
        let padded = segments(3);
        assert_eq!(padded.data_sizes(), &[2, 0, 0]);

        let a = losses(&padded)?;
        let b = losses(&segments(1))?;
        assert!(a.is_finite());
        assert!((a.v_loss - b.v_loss).abs() < 1e-6);
        assert!((a.pi_loss - b.pi_loss).abs() < 1e-6);
        assert!((a.entropy_loss - b.entropy_loss).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_total() -> Result<()> {
        let terms = LossTerms {
            v_loss: Tensor::new(2f32, &Device::Cpu)?,
            pi_loss: Tensor::new(-1f32, &Device::Cpu)?,
            entropy_loss: Tensor::new(-1.5f32, &Device::Cpu)?,
        };
        let total = terms.total(1e-3)?.to_scalar::<f32>()?;
        assert!((total - (1.0 - 1.0 - 1.5e-3)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_gradient_reaches_network() -> Result<()> {
        let varmap = VarMap::new();
        let net = stub_net(&varmap)?;
        let traj = TensorTrajectory::from_batch(&batch(), 4, &Device::Cpu)?;
        let targets = vtrace::compute(&net, &traj, &Default::default())?;
        let loss = compute(&net, &traj, &targets, &LossConfig::default())?.total(1e-3)?;

        let grads = loss.backward()?;
        let data = varmap.data().lock().unwrap();
        let offset = data.get("offset").unwrap();
        assert!(grads.get(offset.as_tensor()).is_some());
        Ok(())
    }
}
