//! Types for recording training metrics.
//!
//! A [`Record`] is a set of named values produced by a training step or by
//! the [`Trainer`](crate::Trainer) loop. Records are handed to a
//! [`Recorder`], which decides where they end up.
//!
//! ```rust
//! use impala_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("v_loss", 0.5);
//! record.insert("trained_samples", RecordValue::Scalar(10000.0));
//! assert_eq!(record.get_scalar("v_loss").unwrap(), 0.5);
//! ```
//!
//! Values are scalars ([`RecordValue::Scalar`]), such as averaged losses and
//! sample counters.
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
