//! Train [`Learner`].
mod config;
use crate::{
    batch::TrajectoryBatch,
    error::ImpalaError,
    learner::{checkpoint_dir, Learner, Losses},
    record::{Record, Recorder},
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::{info, warn};

/// Provides trajectory batches to [`Trainer`].
///
/// Any iterator over [`TrajectoryBatch`] is a batch source.
pub trait BatchSource {
    /// Returns the next batch, or `None` when the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<TrajectoryBatch>>;
}

impl<I> BatchSource for I
where
    I: Iterator<Item = TrajectoryBatch>,
{
    fn next_batch(&mut self) -> Result<Option<TrajectoryBatch>> {
        Ok(self.next())
    }
}

/// Result of [`Trainer::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Total number of trained transitions.
    pub trained_samples: usize,

    /// Number of training steps.
    pub batches: usize,

    /// Exponential moving averages of the losses at the end of training.
    pub averages: Losses,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop of a [`Learner`].
///
/// # Training loop
///
/// 0. Given a learner implementing [`Learner`], a batch source implementing
///    [`BatchSource`] and a recorder implementing [`Recorder`].
/// 1. Reset the counter of trained samples `trained_samples = 0` and the loss
///    averages to zero.
/// 2. Take a batch from the source. Finish if the source is exhausted.
/// 3. Do a training step. If any of the returned losses is not finite, stop with
///    [`ImpalaError::NumericInstability`].
/// 4. Update the loss averages with decay `average_decay` and
///    `trained_samples += batch.num_samples()`.
/// 5. If `trained_samples / log_interval` changed, log the averages and write them
///    to the recorder.
/// 6. If `trained_samples / save_interval` changed, save the learner in
///    `(model_dir)/(trained_samples)`.
/// 7. If `trained_samples >= max_samples`, finish. Otherwise back to 2.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     A[BatchSource]-->|TrajectoryBatch|B[Learner]
///     B -->|Losses|C[Trainer]
///     C -->|Record|D[Recorder]
///     C -->|save_params|B
/// ```
pub struct Trainer {
    /// Interval of logging in trained samples.
    log_interval: usize,

    /// Interval of saving the model in trained samples.
    save_interval: usize,

    /// Decay of the loss averages.
    average_decay: f32,

    /// The maximum number of trained samples.
    max_samples: Option<usize>,

    /// Where to save the trained model.
    model_dir: Option<String>,
}

impl Trainer {
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig) -> Self {
        if config.log_interval == 0 || config.save_interval == 0 {
            warn!("Zero interval in {:?}, the corresponding action is disabled", config);
        }
        Self {
            log_interval: config.log_interval,
            save_interval: config.save_interval,
            average_decay: config.average_decay,
            max_samples: config.max_samples,
            model_dir: config.model_dir,
        }
    }

    fn save_model<L: Learner>(learner: &L, model_dir: &str, trained_samples: usize) {
        let path = checkpoint_dir(model_dir, trained_samples);
        match learner.save_params(&path) {
            Ok(()) => info!("Saved the model in {:?}.", &path),
            Err(e) => warn!("Failed to save model in {:?}: {}", &path, e),
        }
    }

    fn crossed(interval: usize, prev: usize, current: usize) -> bool {
        interval > 0 && prev / interval != current / interval
    }

    /// Train the learner until the batch source is exhausted or `max_samples`
    /// transitions have been trained.
    pub fn train<L, S>(
        &mut self,
        learner: &mut L,
        source: &mut S,
        recorder: &mut dyn Recorder,
    ) -> Result<TrainingSummary>
    where
        L: Learner,
        S: BatchSource + ?Sized,
    {
        let mut averages = Losses::default();
        let mut trained_samples = 0;
        let mut batches = 0;

        while let Some(batch) = source.next_batch()? {
            let losses = learner.train(&batch)?;
            if !losses.is_finite() {
                return Err(ImpalaError::NumericInstability(format!(
                    "non-finite loss {:?} after {} trained samples",
                    losses, trained_samples
                ))
                .into());
            }

            averages.update_average(&losses, self.average_decay);
            let prev_samples = trained_samples;
            trained_samples += batch.num_samples();
            batches += 1;

            if Self::crossed(self.log_interval, prev_samples, trained_samples) {
                info!(
                    "samples {}, loss {} {} {}",
                    trained_samples, averages.v_loss, averages.pi_loss, averages.entropy_loss
                );
                let mut record = Record::from_scalar("trained_samples", trained_samples as f32);
                record.merge_inplace(averages.to_record());
                recorder.write(record);
            }

            if Self::crossed(self.save_interval, prev_samples, trained_samples) {
                if let Some(model_dir) = self.model_dir.as_ref() {
                    Self::save_model(learner, model_dir, trained_samples);
                }
            }

            if let Some(max_samples) = self.max_samples {
                if trained_samples >= max_samples {
                    break;
                }
            }
        }

        Ok(TrainingSummary {
            trained_samples,
            batches,
            averages,
        })
    }
}
