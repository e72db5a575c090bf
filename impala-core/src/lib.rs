#![warn(missing_docs)]
//! Backend-independent building blocks of an IMPALA learner.
//!
//! This crate holds everything that does not depend on a tensor library:
//! the time-major [`TrajectoryBatch`] handed to a learner, the [`Learner`]
//! interface implemented by backend crates, the [`Trainer`] loop that drives
//! a learner with batches from an external [`BatchSource`], and the
//! [`record`] types used to report losses.
pub mod batch;
pub mod error;
pub mod record;

mod learner;
pub use learner::{checkpoint_dir, Learner, Losses, Prediction};

mod trainer;
pub use trainer::{BatchSource, Trainer, TrainerConfig, TrainingSummary};

pub use batch::{TrajectoryBatch, TrajectorySegment};
pub use error::ImpalaError;
