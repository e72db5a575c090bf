//! Time-major trajectory batches.
//!
//! A [`TrajectoryBatch`] stores `T` transition steps plus one bootstrap step
//! for `B` trajectory segments. Entry `j` refers to the same segment at every
//! step and the valid entries of a step always form a prefix, so batches
//! shrink (or grow again) only at their tail:
//!
//! ```text
//!            t=0  t=1  t=2  t=3 (bootstrap)
//! entry 0    o a  o a  o a  o        bootstrapped segment
//! entry 1    o a  o a                terminated at t=1
//! entry 2    o a  o                  bootstrapped at t=1
//! entry 3    o a                     terminated at t=0
//! ```
//!
//! `data_sizes[t]` counts the entries with a transition (`a`) at step `t`,
//! `observation_sizes[t]` those with an observation (`o`).
use crate::error::ImpalaError;
use log::trace;

/// Observations, actions, rewards and behaviour-policy probabilities
/// collected by one actor.
///
/// A segment either ends with a bootstrap observation
/// (`observations.len() == actions.len() + 1`) or with a terminal transition
/// (`observations.len() == actions.len()`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectorySegment {
    /// Flattened observations.
    pub observations: Vec<Vec<f32>>,

    /// Indices of the taken actions.
    pub actions: Vec<i64>,

    /// Rewards of the transitions.
    pub rewards: Vec<f32>,

    /// Probabilities of the taken actions under the behaviour policy.
    pub behaviour_policy: Vec<f32>,
}

impl TrajectorySegment {
    /// Returns `true` if the last transition of the segment was terminal.
    pub fn is_terminated(&self) -> bool {
        self.observations.len() == self.actions.len()
    }

    fn validate(&self, t_max: usize, obs_volume: usize) -> Result<(), ImpalaError> {
        let n = self.actions.len();
        if n == 0 || n > t_max {
            return Err(ImpalaError::ShapeMismatch(format!(
                "segment has {} transitions, expected 1..={}",
                n, t_max
            )));
        }
        if self.rewards.len() != n || self.behaviour_policy.len() != n {
            return Err(ImpalaError::ShapeMismatch(format!(
                "segment has {} actions, {} rewards and {} behaviour probabilities",
                n,
                self.rewards.len(),
                self.behaviour_policy.len()
            )));
        }
        let n_obs = self.observations.len();
        if n_obs != n && n_obs != n + 1 {
            return Err(ImpalaError::ShapeMismatch(format!(
                "segment has {} observations for {} transitions",
                n_obs, n
            )));
        }
        if let Some(obs) = self.observations.iter().find(|o| o.len() != obs_volume) {
            return Err(ImpalaError::ShapeMismatch(format!(
                "observation of length {}, expected {}",
                obs.len(),
                obs_volume
            )));
        }
        Ok(())
    }
}

/// A time-major batch of trajectory segments.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryBatch {
    states: Vec<f32>,
    actions: Vec<i64>,
    rewards: Vec<f32>,
    behaviour_policy: Vec<f32>,
    data_sizes: Vec<usize>,
    observation_sizes: Vec<usize>,
    obs_shape: Vec<usize>,
    batch_size: usize,
}

impl TrajectoryBatch {
    /// Constructs a batch from raw time-major arrays.
    ///
    /// * `states` - `(T + 1, B, *obs_shape)` values.
    /// * `actions`, `rewards`, `behaviour_policy` - `(T, B)` values.
    /// * `data_sizes` - number of valid transitions at each of the `T` steps.
    /// * `observation_sizes` - number of valid observations at each of the `T + 1` steps.
    ///
    /// `B` is inferred from the length of `actions`.
    pub fn new(
        states: Vec<f32>,
        actions: Vec<i64>,
        rewards: Vec<f32>,
        behaviour_policy: Vec<f32>,
        obs_shape: Vec<usize>,
        data_sizes: Vec<usize>,
        observation_sizes: Vec<usize>,
    ) -> Result<Self, ImpalaError> {
        let t_max = data_sizes.len();
        if t_max == 0 {
            return Err(ImpalaError::ShapeMismatch(
                "a batch needs at least one transition step".to_string(),
            ));
        }
        if observation_sizes.len() != t_max + 1 {
            return Err(ImpalaError::ShapeMismatch(format!(
                "{} observation sizes for {} transition steps",
                observation_sizes.len(),
                t_max
            )));
        }
        if actions.len() % t_max != 0 {
            return Err(ImpalaError::ShapeMismatch(format!(
                "{} actions cannot be split into {} steps",
                actions.len(),
                t_max
            )));
        }
        let batch_size = actions.len() / t_max;
        if rewards.len() != actions.len() || behaviour_policy.len() != actions.len() {
            return Err(ImpalaError::ShapeMismatch(format!(
                "{} actions, {} rewards and {} behaviour probabilities",
                actions.len(),
                rewards.len(),
                behaviour_policy.len()
            )));
        }
        let obs_volume: usize = obs_shape.iter().product();
        if obs_shape.is_empty() || obs_volume == 0 {
            return Err(ImpalaError::ShapeMismatch(format!(
                "invalid observation shape {:?}",
                obs_shape
            )));
        }
        if states.len() != (t_max + 1) * batch_size * obs_volume {
            return Err(ImpalaError::ShapeMismatch(format!(
                "{} state values, expected {} x {} x {:?}",
                states.len(),
                t_max + 1,
                batch_size,
                obs_shape
            )));
        }
        Self::validate_sizes(&data_sizes, &observation_sizes, batch_size)?;

        Ok(Self {
            states,
            actions,
            rewards,
            behaviour_policy,
            data_sizes,
            observation_sizes,
            obs_shape,
            batch_size,
        })
    }

    /// Constructs a batch with a single size list covering all `T + 1` steps.
    ///
    /// `sizes[t]` is taken both as the number of transitions and as the number
    /// of observations at step `t`. Entries dropping out between two steps are
    /// therefore treated as terminated.
    pub fn from_step_sizes(
        states: Vec<f32>,
        actions: Vec<i64>,
        rewards: Vec<f32>,
        behaviour_policy: Vec<f32>,
        obs_shape: Vec<usize>,
        sizes: Vec<usize>,
    ) -> Result<Self, ImpalaError> {
        if sizes.len() < 2 {
            return Err(ImpalaError::ShapeMismatch(format!(
                "{} step sizes, expected at least 2",
                sizes.len()
            )));
        }
        let data_sizes = sizes[..sizes.len() - 1].to_vec();
        Self::new(
            states,
            actions,
            rewards,
            behaviour_policy,
            obs_shape,
            data_sizes,
            sizes,
        )
    }

    /// Assembles a batch from segments collected by actors.
    ///
    /// Segments are ordered by the number of observations and then by the
    /// number of transitions, both descending, so that the valid entries of
    /// every step form a prefix. Missing entries are filled with zero
    /// observations, action `0`, reward `0` and probability `0`.
    pub fn from_segments(
        mut segments: Vec<TrajectorySegment>,
        t_max: usize,
        obs_shape: Vec<usize>,
    ) -> Result<Self, ImpalaError> {
        let obs_volume: usize = obs_shape.iter().product();
        if t_max == 0 || segments.is_empty() {
            return Err(ImpalaError::ShapeMismatch(format!(
                "cannot assemble {} segments into {} steps",
                segments.len(),
                t_max
            )));
        }
        for segment in segments.iter() {
            segment.validate(t_max, obs_volume)?;
        }
        segments.sort_by(|a, b| {
            b.observations
                .len()
                .cmp(&a.observations.len())
                .then(b.actions.len().cmp(&a.actions.len()))
        });

        let batch_size = segments.len();
        let mut states = Vec::with_capacity((t_max + 1) * batch_size * obs_volume);
        let mut actions = Vec::with_capacity(t_max * batch_size);
        let mut rewards = Vec::with_capacity(t_max * batch_size);
        let mut behaviour_policy = Vec::with_capacity(t_max * batch_size);

        for t in 0..=t_max {
            for segment in segments.iter() {
                match segment.observations.get(t) {
                    Some(obs) => states.extend_from_slice(obs),
                    None => states.resize(states.len() + obs_volume, 0.0),
                }
                if t == t_max {
                    continue;
                }
                if t < segment.actions.len() {
                    actions.push(segment.actions[t]);
                    rewards.push(segment.rewards[t]);
                    behaviour_policy.push(segment.behaviour_policy[t]);
                } else {
                    actions.push(0);
                    rewards.push(0.0);
                    behaviour_policy.push(0.0);
                }
            }
        }

        let data_sizes = (0..t_max)
            .map(|t| segments.iter().filter(|s| s.actions.len() > t).count())
            .collect::<Vec<_>>();
        let observation_sizes = (0..=t_max)
            .map(|t| segments.iter().filter(|s| s.observations.len() > t).count())
            .collect::<Vec<_>>();
        trace!(
            "Assembled {} segments: data_sizes = {:?}, observation_sizes = {:?}",
            batch_size,
            data_sizes,
            observation_sizes
        );

        Self::new(
            states,
            actions,
            rewards,
            behaviour_policy,
            obs_shape,
            data_sizes,
            observation_sizes,
        )
    }

    fn validate_sizes(
        data_sizes: &[usize],
        observation_sizes: &[usize],
        batch_size: usize,
    ) -> Result<(), ImpalaError> {
        if let Some(n) = observation_sizes.iter().find(|&&n| n > batch_size) {
            return Err(ImpalaError::ShapeMismatch(format!(
                "observation size {} exceeds batch size {}",
                n, batch_size
            )));
        }
        for (t, &n) in data_sizes.iter().enumerate() {
            if n > observation_sizes[t] {
                return Err(ImpalaError::ShapeMismatch(format!(
                    "step {}: {} transitions but only {} observations",
                    t, n, observation_sizes[t]
                )));
            }
            if observation_sizes[t + 1] > n {
                return Err(ImpalaError::ShapeMismatch(format!(
                    "step {}: {} observations follow only {} transitions",
                    t + 1,
                    observation_sizes[t + 1],
                    n
                )));
            }
        }
        if data_sizes.iter().sum::<usize>() == 0 {
            return Err(ImpalaError::ShapeMismatch(
                "batch has no valid transitions".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of transition steps `T`.
    pub fn t_max(&self) -> usize {
        self.data_sizes.len()
    }

    /// Allocated number of entries per step `B`.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Shape of a single observation.
    pub fn obs_shape(&self) -> &[usize] {
        &self.obs_shape
    }

    /// Number of values in a single observation.
    pub fn obs_volume(&self) -> usize {
        self.obs_shape.iter().product()
    }

    /// Number of valid transitions at each step.
    pub fn data_sizes(&self) -> &[usize] {
        &self.data_sizes
    }

    /// Number of valid observations at each step, including the bootstrap step.
    pub fn observation_sizes(&self) -> &[usize] {
        &self.observation_sizes
    }

    /// Total number of valid transitions.
    pub fn num_samples(&self) -> usize {
        self.data_sizes.iter().sum()
    }

    /// All state values, time-major.
    pub fn states(&self) -> &[f32] {
        &self.states
    }

    /// States of all `B` entries at step `t`, `0 <= t <= T`.
    pub fn states_at(&self, t: usize) -> &[f32] {
        let n = self.batch_size * self.obs_volume();
        &self.states[t * n..(t + 1) * n]
    }

    /// Actions of all `B` entries at step `t < T`.
    pub fn actions_at(&self, t: usize) -> &[i64] {
        &self.actions[t * self.batch_size..(t + 1) * self.batch_size]
    }

    /// Rewards of all `B` entries at step `t < T`.
    pub fn rewards_at(&self, t: usize) -> &[f32] {
        &self.rewards[t * self.batch_size..(t + 1) * self.batch_size]
    }

    /// Behaviour-policy probabilities of all `B` entries at step `t < T`.
    pub fn behaviour_policy_at(&self, t: usize) -> &[f32] {
        &self.behaviour_policy[t * self.batch_size..(t + 1) * self.batch_size]
    }

    /// All actions, time-major.
    pub fn actions(&self) -> &[i64] {
        &self.actions
    }

    /// All rewards, time-major.
    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    /// Returns a copy of the batch with every reward multiplied by `k`.
    pub fn scale_rewards(&self, k: f32) -> Self {
        let mut batch = self.clone();
        batch.rewards.iter_mut().for_each(|r| *r *= k);
        batch
    }
}
