use anyhow::Result;
use candle_core::{Device, Tensor};
use impala_core::{ImpalaError, TrajectoryBatch};

/// A [`TrajectoryBatch`] converted to tensors, keeping only valid entries.
///
/// For each step `t`:
///
/// * `states(t)` - `(observation_sizes[t], *obs_shape)`, `0 <= t <= T`.
/// * `actions(t)` - `(data_sizes[t], 1)` of `u32`, `0 <= t < T`.
/// * `rewards(t)`, `behaviour_policy(t)` - `(data_sizes[t], 1)` of `f32`.
pub struct TensorTrajectory {
    states: Vec<Tensor>,
    actions: Vec<Tensor>,
    rewards: Vec<Tensor>,
    behaviour_policy: Vec<Tensor>,
    data_sizes: Vec<usize>,
    observation_sizes: Vec<usize>,
}

impl TensorTrajectory {
    /// Converts a batch, checking that every valid action is below `n_actions`.
    pub fn from_batch(batch: &TrajectoryBatch, n_actions: usize, device: &Device) -> Result<Self> {
        let t_max = batch.t_max();
        let obs_shape = batch.obs_shape().to_vec();
        let obs_volume = batch.obs_volume();
        let data_sizes = batch.data_sizes().to_vec();
        let observation_sizes = batch.observation_sizes().to_vec();

        let states = (0..=t_max)
            .map(|t| {
                let n = observation_sizes[t];
                let mut shape = vec![n];
                shape.extend_from_slice(&obs_shape);
                Tensor::from_slice(&batch.states_at(t)[..n * obs_volume], shape, device)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let mut actions = Vec::with_capacity(t_max);
        let mut rewards = Vec::with_capacity(t_max);
        let mut behaviour_policy = Vec::with_capacity(t_max);
        for t in 0..t_max {
            let n = data_sizes[t];
            let acts = batch.actions_at(t)[..n]
                .iter()
                .map(|&a| {
                    if a < 0 || a as usize >= n_actions {
                        Err(ImpalaError::ShapeMismatch(format!(
                            "action {} at step {} is out of range 0..{}",
                            a, t, n_actions
                        )))
                    } else {
                        Ok(a as u32)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            actions.push(Tensor::from_vec(acts, (n, 1), device)?);
            rewards.push(Tensor::from_slice(&batch.rewards_at(t)[..n], (n, 1), device)?);
            behaviour_policy.push(Tensor::from_slice(
                &batch.behaviour_policy_at(t)[..n],
                (n, 1),
                device,
            )?);
        }

        Ok(Self {
            states,
            actions,
            rewards,
            behaviour_policy,
            data_sizes,
            observation_sizes,
        })
    }

    /// Number of transition steps.
    pub fn t_max(&self) -> usize {
        self.data_sizes.len()
    }

    /// Number of valid transitions at step `t`.
    pub fn data_size(&self, t: usize) -> usize {
        self.data_sizes[t]
    }

    /// Number of valid observations at step `t`.
    pub fn observation_size(&self, t: usize) -> usize {
        self.observation_sizes[t]
    }

    /// Total number of valid transitions.
    pub fn num_samples(&self) -> usize {
        self.data_sizes.iter().sum()
    }

    /// Valid observations at step `t`.
    pub fn states(&self, t: usize) -> &Tensor {
        &self.states[t]
    }

    /// Valid actions at step `t`.
    pub fn actions(&self, t: usize) -> &Tensor {
        &self.actions[t]
    }

    /// Valid rewards at step `t`.
    pub fn rewards(&self, t: usize) -> &Tensor {
        &self.rewards[t]
    }

    /// Valid behaviour-policy probabilities at step `t`.
    pub fn behaviour_policy(&self, t: usize) -> &Tensor {
        &self.behaviour_policy[t]
    }

    /// Observations of the entries having a transition at step `t`.
    pub fn transition_states(&self, t: usize) -> Result<Tensor> {
        Ok(self.states[t].narrow(0, 0, self.data_sizes[t])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impala_core::TrajectorySegment;

    fn batch(action: i64) -> TrajectoryBatch {
        let segments = vec![
            TrajectorySegment {
                observations: vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
                actions: vec![action, 0],
                rewards: vec![1.0, 2.0],
                behaviour_policy: vec![0.5, 0.5],
            },
            TrajectorySegment {
                observations: vec![vec![7.0, 8.0]],
                actions: vec![1],
                rewards: vec![3.0],
                behaviour_policy: vec![0.25],
            },
        ];
        TrajectoryBatch::from_segments(segments, 2, vec![2]).unwrap()
    }

    #[test]
    fn test_from_batch_keeps_valid_entries() -> Result<()> {
        let traj = TensorTrajectory::from_batch(&batch(2), 4, &Device::Cpu)?;
        assert_eq!(traj.t_max(), 2);
        assert_eq!(traj.num_samples(), 3);
        assert_eq!(traj.states(0).dims(), &[2, 2]);
        assert_eq!(traj.states(1).dims(), &[1, 2]);
        assert_eq!(traj.states(2).to_vec2::<f32>()?, vec![vec![5.0, 6.0]]);
        assert_eq!(traj.actions(0).to_vec2::<u32>()?, vec![vec![2], vec![1]]);
        assert_eq!(traj.rewards(1).to_vec2::<f32>()?, vec![vec![2.0]]);
        assert_eq!(
            traj.behaviour_policy(0).to_vec2::<f32>()?,
            vec![vec![0.5], vec![0.25]]
        );
        assert_eq!(traj.transition_states(1)?.dims(), &[1, 2]);
        Ok(())
    }

    #[test]
    fn test_from_batch_rejects_out_of_range_action() {
        let res = TensorTrajectory::from_batch(&batch(4), 4, &Device::Cpu);
        let err = res.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ImpalaError>(),
            Some(ImpalaError::ShapeMismatch(_))
        ));
    }
}
