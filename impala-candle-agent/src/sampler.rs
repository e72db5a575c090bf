//! Action sampler.
use crate::model::PolicyValue;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use impala_core::{ImpalaError, Prediction};
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, SeedableRng};

/// Draws actions from the softmax of the policy logits.
pub struct ActionSampler {
    rng: StdRng,
}

impl ActionSampler {
    /// Constructs a sampler with a seeded random number generator.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Samples one action per observation in `states`, `(n, *obs_shape)`.
    pub fn sample<P: PolicyValue>(&mut self, net: &P, states: &Tensor) -> Result<Prediction> {
        let logits = net.policy_only(states)?.detach();
        let probs = softmax(&logits, D::Minus1)?;
        self.sample_from_probs(&probs)
    }

    /// Samples one action per row of a `(n, n_actions)` probability matrix.
    pub fn sample_from_probs(&mut self, probs: &Tensor) -> Result<Prediction> {
        let rows = probs.to_vec2::<f32>()?;
        let mut actions = Vec::with_capacity(rows.len());
        let mut action_probs = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            let dist = WeightedIndex::new(row).map_err(|e| {
                ImpalaError::NumericInstability(format!(
                    "row {} is not a distribution ({}): {:?}",
                    i, e, row
                ))
            })?;
            let a = dist.sample(&mut self.rng);
            actions.push(a as i64);
            action_probs.push(row[a]);
        }

        Ok(Prediction {
            actions,
            probs: action_probs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stub_net;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_sample_from_one_hot() -> Result<()> {
        let mut sampler = ActionSampler::new(42);
        let probs = Tensor::new(&[[0f32, 0., 1., 0.], [1., 0., 0., 0.]], &Device::Cpu)?;
        let out = sampler.sample_from_probs(&probs)?;
        assert_eq!(out.actions, vec![2, 0]);
        assert_eq!(out.probs, vec![1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_sample_frequencies() -> Result<()> {
        let varmap = VarMap::new();
        let net = stub_net(&varmap)?;
        let mut sampler = ActionSampler::new(0);
        let states = Tensor::zeros((1000, 1), DType::F32, &Device::Cpu)?;
        let out = sampler.sample(&net, &states)?;

        let n0 = out.actions.iter().filter(|&&a| a == 0).count();
        assert!(n0 > 400 && n0 < 600);
        for (a, p) in out.actions.iter().zip(out.probs.iter()) {
            let expected = if *a == 0 { 0.5 } else { 1.0 / 6.0 };
            assert!((p - expected).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_distribution() -> Result<()> {
        let mut sampler = ActionSampler::new(0);
        let probs = Tensor::new(&[[0f32, 0.], [f32::NAN, 1.]], &Device::Cpu)?;
        let err = sampler.sample_from_probs(&probs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImpalaError>(),
            Some(ImpalaError::NumericInstability(_))
        ));
        Ok(())
    }
}
