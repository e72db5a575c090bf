//! Learner.
use crate::{
    batch::TrajectoryBatch,
    record::{Record, RecordValue},
};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Losses of a single training step, each normalized by the number of
/// valid transitions in the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Losses {
    /// Squared error between value estimates and V-trace targets.
    pub v_loss: f32,

    /// Policy-gradient loss.
    pub pi_loss: f32,

    /// Negative entropy of the target policy.
    pub entropy_loss: f32,
}

impl Losses {
    /// Returns `true` if all losses are finite.
    pub fn is_finite(&self) -> bool {
        self.v_loss.is_finite() && self.pi_loss.is_finite() && self.entropy_loss.is_finite()
    }

    /// Moves the losses toward `other` as an exponential moving average.
    pub fn update_average(&mut self, other: &Losses, decay: f32) {
        self.v_loss = decay * self.v_loss + (1.0 - decay) * other.v_loss;
        self.pi_loss = decay * self.pi_loss + (1.0 - decay) * other.pi_loss;
        self.entropy_loss = decay * self.entropy_loss + (1.0 - decay) * other.entropy_loss;
    }

    /// Converts the losses into a [`Record`].
    pub fn to_record(&self) -> Record {
        Record::from_slice(&[
            ("v_loss", RecordValue::Scalar(self.v_loss)),
            ("pi_loss", RecordValue::Scalar(self.pi_loss)),
            ("entropy_loss", RecordValue::Scalar(self.entropy_loss)),
        ])
    }
}

/// Actions drawn from the target policy and their probabilities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    /// Indices of the drawn actions.
    pub actions: Vec<i64>,

    /// Probability of each drawn action.
    pub probs: Vec<f32>,
}

/// Trains a policy/value network from trajectory batches.
pub trait Learner {
    /// Performs a single training step on the given batch.
    fn train(&mut self, batch: &TrajectoryBatch) -> Result<Losses>;

    /// Samples actions for a batch of flattened observations.
    ///
    /// The length of `states` must be a multiple of the observation volume.
    fn predict(&mut self, states: &[f32]) -> Result<Prediction>;

    /// Saves the network parameters and the optimizer state in the given directory.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Loads the network parameters and the optimizer state from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}

/// Returns the directory of the checkpoint with the given index.
pub fn checkpoint_dir(base: impl AsRef<Path>, index: usize) -> PathBuf {
    base.as_ref().join(index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_average() {
        let mut avg = Losses::default();
        let losses = Losses {
            v_loss: 1.0,
            pi_loss: -2.0,
            entropy_loss: 4.0,
        };
        avg.update_average(&losses, 0.5);
        assert_eq!(avg.v_loss, 0.5);
        assert_eq!(avg.pi_loss, -1.0);
        assert_eq!(avg.entropy_loss, 2.0);
    }

    #[test]
    fn test_is_finite() {
        let mut losses = Losses::default();
        assert!(losses.is_finite());
        losses.pi_loss = f32::NAN;
        assert!(!losses.is_finite());
    }

    #[test]
    fn test_checkpoint_dir() {
        assert_eq!(
            checkpoint_dir("output", 1000),
            PathBuf::from("output").join("1000")
        );
    }
}
