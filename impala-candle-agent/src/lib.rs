//! IMPALA learner implemented with [candle](https://crates.io/crates/candle-core).
//!
//! The learner trains a policy/value network on time-major trajectory batches
//! with V-trace targets. The network is any type implementing [`PolicyValue`];
//! [`cnn::PolicyValueCnn`] is the default convolutional network.
pub mod cnn;
pub mod impala;
pub mod loss;
pub mod model;
pub mod opt;
pub mod sampler;
mod tensor_batch;
#[cfg(test)]
mod testing;
pub mod vtrace;
pub use model::{PolicyValue, SubModel1};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
pub use tensor_batch::TensorTrajectory;

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl TryFrom<Device> for candle_core::Device {
    type Error = candle_core::Error;

    fn try_from(device: Device) -> Result<Self, Self::Error> {
        match device {
            Device::Cpu => Ok(candle_core::Device::Cpu),
            Device::Cuda(n) => candle_core::Device::new_cuda(n),
        }
    }
}
