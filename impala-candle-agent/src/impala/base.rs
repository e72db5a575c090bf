use super::{ImpalaConfig, ImpalaModel};
use crate::{
    loss::{self, LossConfig},
    model::PolicyValue,
    sampler::ActionSampler,
    vtrace::{self, VTraceConfig},
    TensorTrajectory,
};
use anyhow::Result;
use candle_core::{Device, Tensor};
use impala_core::{ImpalaError, Learner, Losses, Prediction, TrajectoryBatch};
use log::trace;
use std::{convert::TryFrom, path::Path};

/// IMPALA learner.
///
/// A training step computes V-trace targets with the current network,
/// evaluates the losses against those fixed targets and applies a single
/// optimizer step. The same network serves [`Learner::predict`].
pub struct Impala<P>
where
    P: PolicyValue,
{
    model: ImpalaModel<P>,
    vtrace_config: VTraceConfig,
    loss_config: LossConfig,
    obs_shape: Vec<usize>,
    sampler: ActionSampler,
    device: Device,
}

impl<P> Impala<P>
where
    P: PolicyValue,
{
    /// Constructs the learner.
    pub fn build(config: ImpalaConfig<P::Config>) -> Result<Self> {
        let device = candle_core::Device::try_from(config.device.unwrap_or_default())?;
        config.vtrace_config.validate()?;
        let model = ImpalaModel::<P>::build(config.model_config, &device)?;
        if let Some(expected) = model.net().obs_shape() {
            if expected != config.obs_shape {
                return Err(ImpalaError::ShapeMismatch(format!(
                    "observation shape {:?}, but the network takes {:?}",
                    config.obs_shape, expected
                ))
                .into());
            }
        }

        Ok(Self {
            model,
            vtrace_config: config.vtrace_config,
            loss_config: config.loss_config,
            obs_shape: config.obs_shape,
            sampler: ActionSampler::new(config.seed),
            device,
        })
    }

    /// Returns the network and its optimizer.
    pub fn model(&self) -> &ImpalaModel<P> {
        &self.model
    }

    fn obs_volume(&self) -> usize {
        self.obs_shape.iter().product()
    }

    /// Converts flattened observations into a `(n, *obs_shape)` tensor.
    pub fn states_tensor(&self, states: &[f32]) -> Result<Tensor> {
        let volume = self.obs_volume();
        if volume == 0 || states.len() % volume != 0 {
            return Err(ImpalaError::ShapeMismatch(format!(
                "{} values cannot be split into observations of shape {:?}",
                states.len(),
                self.obs_shape
            ))
            .into());
        }
        let mut shape = vec![states.len() / volume];
        shape.extend_from_slice(&self.obs_shape);
        Ok(Tensor::from_slice(states, shape, &self.device)?)
    }

    /// Computes V-trace targets for `batch` without updating the network.
    pub fn targets(&self, batch: &TrajectoryBatch) -> Result<vtrace::VTraceTargets> {
        let traj = self.tensorize(batch)?;
        vtrace::compute(self.model.net(), &traj, &self.vtrace_config)
    }

    fn tensorize(&self, batch: &TrajectoryBatch) -> Result<TensorTrajectory> {
        if batch.obs_shape() != self.obs_shape.as_slice() {
            return Err(ImpalaError::ShapeMismatch(format!(
                "batch observation shape {:?}, expected {:?}",
                batch.obs_shape(),
                self.obs_shape
            ))
            .into());
        }
        TensorTrajectory::from_batch(batch, self.model.net().n_actions(), &self.device)
    }
}

impl<P> Learner for Impala<P>
where
    P: PolicyValue,
{
    fn train(&mut self, batch: &TrajectoryBatch) -> Result<Losses> {
        trace!("Convert batch of {} samples", batch.num_samples());
        let traj = self.tensorize(batch)?;

        trace!("Compute V-trace targets");
        let targets = vtrace::compute(self.model.net(), &traj, &self.vtrace_config)?;

        trace!("Compute losses");
        let terms = loss::compute(self.model.net(), &traj, &targets, &self.loss_config)?;
        let loss = terms.total(self.loss_config.entropy_coef)?;

        trace!("Optimizer step");
        self.model.backward_step(&loss)?;

        terms.to_losses()
    }

    fn predict(&mut self, states: &[f32]) -> Result<Prediction> {
        if states.is_empty() {
            return Ok(Prediction::default());
        }
        let states = self.states_tensor(states)?;
        self.sampler.sample(self.model.net(), &states)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        self.model.save(path)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(ImpalaError::CheckpointNotFound(path.to_path_buf()).into());
        }
        self.model.load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cnn::{PolicyValueCnn, PolicyValueCnnConfig},
        opt::OptimizerConfig,
        testing,
        testing::StubNet,
    };
    use impala_core::TrajectorySegment;

    fn learner() -> Result<Impala<StubNet>> {
        let config = ImpalaConfig::default()
            .net_config(testing::half_on_first_action())
            .opt_config(OptimizerConfig::Sgd {
                lr: 0.1,
                momentum: 0.0,
            })
            .obs_shape(vec![1]);
        Impala::build(config)
    }

    fn batch(obs_shape: Vec<usize>) -> TrajectoryBatch {
        let volume = obs_shape.iter().product();
        let segment = TrajectorySegment {
            observations: vec![vec![1.0; volume]; 3],
            actions: vec![0, 1],
            rewards: vec![1.0, 1.0],
            behaviour_policy: vec![0.5, 0.25],
        };
        TrajectoryBatch::from_segments(vec![segment], 2, obs_shape).unwrap()
    }

    fn scale(learner: &Impala<StubNet>) -> f32 {
        let data = learner.model().get_varmap().data().lock().unwrap();
        data.get("scale")
            .unwrap()
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0]
    }

    #[test]
    fn test_train_updates_parameters() -> Result<()> {
        let mut learner = learner()?;
        let before = scale(&learner);
        let losses = learner.train(&batch(vec![1]))?;
        assert!(losses.is_finite());
        assert_ne!(before, scale(&learner));
        assert_eq!(learner.model().optimizer().step_t(), 1);
        Ok(())
    }

    #[test]
    fn test_train_rejects_wrong_obs_shape() -> Result<()> {
        let mut learner = learner()?;
        let err = learner.train(&batch(vec![2])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImpalaError>(),
            Some(ImpalaError::ShapeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_build_rejects_network_of_other_shape() -> Result<()> {
        let net_config = PolicyValueCnnConfig::default().in_shape(3, 36, 36).hidden(8);
        let config = ImpalaConfig::default().net_config(net_config.clone());
        let err = Impala::<PolicyValueCnn>::build(config)
            .err()
            .expect("obs_shape [3, 80, 80] disagrees with the network");
        assert!(matches!(
            err.downcast_ref::<ImpalaError>(),
            Some(ImpalaError::ShapeMismatch(_))
        ));

        let config = ImpalaConfig::default()
            .net_config(net_config)
            .obs_shape(vec![3, 36, 36]);
        assert!(Impala::<PolicyValueCnn>::build(config).is_ok());
        Ok(())
    }

    #[test]
    fn test_predict() -> Result<()> {
        let mut learner = learner()?;
        let out = learner.predict(&[0.0, 1.0, 2.0])?;
        assert_eq!(out.actions.len(), 3);
        assert!(out.actions.iter().all(|a| (0..4).contains(a)));
        assert_eq!(learner.predict(&[])?, Prediction::default());
        Ok(())
    }

    #[test]
    fn test_load_missing_checkpoint() -> Result<()> {
        let mut learner = learner()?;
        let err = learner
            .load_params(Path::new("/nonexistent/impala/checkpoint"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImpalaError>(),
            Some(ImpalaError::CheckpointNotFound(_))
        ));
        Ok(())
    }
}
